//! Core data models used throughout gitrag.
//!
//! These types represent the repository reference, the admitted file corpus,
//! and the chunks that flow through the ingestion and retrieval pipeline.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// An `owner/name` pair identifying one GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parse a repository URL like `https://github.com/owner/name` (with or
    /// without a trailing slash or `.git` suffix) into owner and short name.
    pub fn parse(repo_url: &str) -> Result<Self> {
        let trimmed = repo_url.trim_end_matches('/');
        let mut parts = trimmed.rsplit('/');
        let name = parts.next().unwrap_or_default();
        let owner = parts.next().unwrap_or_default();
        if owner.is_empty() || name.is_empty() || owner.contains(':') {
            bail!("Cannot parse repository URL: '{}'", repo_url);
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.trim_end_matches(".git").to_string(),
        })
    }

    /// Tenancy key partitioning vector-index and chat data per (user, repo).
    pub fn namespace(&self, user_id: &str) -> String {
        format!("{}_{}", user_id, self.name)
    }
}

/// One admitted file from the streamed archive. Content is lossy-decoded
/// UTF-8, non-empty after trimming, and no longer than the per-file cap.
#[derive(Debug, Clone)]
pub struct IngestedFile {
    pub path: String,
    pub content: String,
}

/// A bounded, token-windowed slice of one file's text.
///
/// `chunk_id` is a content hash over (file path, window start token, text),
/// so re-chunking identical content yields identical ids and upserts
/// overwrite in place instead of duplicating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub file: String,
    pub chunk_id: String,
}

/// A stored chat message inside one namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub namespace: String,
    pub role: String,
    pub content: String,
    pub user_id: String,
    pub created_at: i64,
}

/// Cached per-repo metadata blob (opaque JSON columns).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub repo_url: String,
    pub file_tree_json: String,
    pub analytics_json: String,
    pub dependency_graph_json: String,
}

/// Summary of one completed ingestion run, returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub namespace: String,
    pub branch: String,
    pub files: usize,
    pub bytes: usize,
    pub chunks: usize,
    pub upserted: usize,
    pub skipped_batches: usize,
}
