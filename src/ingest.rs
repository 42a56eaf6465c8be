//! Budgeted ingestion controller and pipeline orchestration.
//!
//! `collect_files` drives the archive reader and path filter under four
//! simultaneous budgets (wall-clock, file count, per-file bytes, run
//! bytes). Budget exhaustion is not an error: the run stops and the
//! partial corpus is returned. `run_ingest` coordinates the full flow the
//! way the original service did: clear the previous namespace, fetch,
//! chunk, embed+upsert, cache metadata, activate the repo.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::io::Read;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::analysis;
use crate::archive::ArchiveReader;
use crate::chunk::Chunker;
use crate::config::{Config, IngestLimits};
use crate::filter::PathFilter;
use crate::github::GithubClient;
use crate::index::{self, VectorIndex};
use crate::models::{IngestReport, IngestedFile, RepoRef};
use crate::provider::ModelProvider;
use crate::store;

/// Why a run stopped before the archive was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TimeBudget,
    FileBudget,
    ByteBudget,
}

/// Why one entry was passed over. Skips never abort the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Filtered,
    EmptyAfterDecode,
    ReadError,
}

/// Per-entry outcome, so the skip/continue policy is visible in types
/// rather than buried in catch blocks.
enum Disposition {
    Admitted(IngestedFile),
    Skipped(SkipReason),
    Stop(StopReason),
}

/// Counters for one ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub admitted: usize,
    pub admitted_bytes: usize,
    pub filtered: usize,
    pub empty: usize,
    pub read_errors: usize,
    pub stopped: Option<StopReason>,
}

/// Running budget counters, owned by one run and mutated monotonically.
struct BudgetState<'a> {
    limits: &'a IngestLimits,
    started: Instant,
    files: usize,
    bytes: usize,
}

impl<'a> BudgetState<'a> {
    fn new(limits: &'a IngestLimits) -> Self {
        Self {
            limits,
            started: Instant::now(),
            files: 0,
            bytes: 0,
        }
    }

    /// Checked before any byte of the next entry is read. Doubles as the
    /// cooperative cancellation point for the time ceiling.
    fn check(&self) -> Option<StopReason> {
        if self.started.elapsed() >= Duration::from_secs(self.limits.max_seconds) {
            return Some(StopReason::TimeBudget);
        }
        if self.files >= self.limits.max_files {
            return Some(StopReason::FileBudget);
        }
        if self.bytes >= self.limits.byte_budget {
            return Some(StopReason::ByteBudget);
        }
        None
    }

    /// Bytes the next entry may contribute: the per-file cap, shrunk to
    /// whatever remains of the run budget.
    fn read_cap(&self) -> usize {
        self.limits
            .max_file_bytes
            .min(self.limits.byte_budget - self.bytes)
    }

    fn record(&mut self, bytes: usize) {
        self.files += 1;
        self.bytes += bytes;
    }
}

/// Stream a gzipped tarball through the filter and budgets, assembling the
/// admitted corpus. The archive source is any `Read`, so tests inject an
/// in-memory tarball.
pub fn collect_files<R: Read>(
    archive: R,
    filter: &PathFilter,
    limits: &IngestLimits,
) -> Result<(Vec<IngestedFile>, IngestStats)> {
    let mut reader = ArchiveReader::new(archive);
    let mut budget = BudgetState::new(limits);
    let mut stats = IngestStats::default();
    let mut files = Vec::new();

    reader.for_each_file(|path, stream| {
        match next_entry(path, stream, filter, &mut budget) {
            Disposition::Admitted(file) => {
                debug!(path = %file.path, bytes = file.content.len(), "admitted");
                files.push(file);
                ControlFlow::Continue(())
            }
            Disposition::Skipped(reason) => {
                match reason {
                    SkipReason::Filtered => stats.filtered += 1,
                    SkipReason::EmptyAfterDecode => stats.empty += 1,
                    SkipReason::ReadError => stats.read_errors += 1,
                }
                ControlFlow::Continue(())
            }
            Disposition::Stop(reason) => {
                info!(?reason, "ingestion budget reached, stopping run");
                stats.stopped = Some(reason);
                ControlFlow::Break(())
            }
        }
    })?;

    stats.admitted = files.len();
    stats.admitted_bytes = budget.bytes;
    Ok((files, stats))
}

fn next_entry(
    path: &str,
    stream: &mut dyn Read,
    filter: &PathFilter,
    budget: &mut BudgetState<'_>,
) -> Disposition {
    if let Some(stop) = budget.check() {
        return Disposition::Stop(stop);
    }
    if !filter.admit(path) {
        return Disposition::Skipped(SkipReason::Filtered);
    }

    let cap = budget.read_cap();
    let mut buf = Vec::new();
    if let Err(e) = stream.take(cap as u64).read_to_end(&mut buf) {
        warn!(%path, error = %e, "skipping unreadable entry");
        return Disposition::Skipped(SkipReason::ReadError);
    }

    let mut content = String::from_utf8_lossy(&buf).into_owned();
    // Replacement characters can inflate the decoded length past the raw
    // cap; trim back so the run-budget invariant holds exactly.
    truncate_at_char_boundary(&mut content, cap);
    if content.trim().is_empty() {
        return Disposition::Skipped(SkipReason::EmptyAfterDecode);
    }

    budget.record(content.len());
    Disposition::Admitted(IngestedFile {
        path: path.to_string(),
        content,
    })
}

fn truncate_at_char_boundary(s: &mut String, max_bytes: usize) {
    if s.len() <= max_bytes {
        return;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

/// Resolve the default branch and stream the repository at it.
pub fn fetch_repo_files(
    client: &GithubClient,
    repo: &RepoRef,
    filter: &PathFilter,
    limits: &IngestLimits,
) -> Result<(String, Vec<IngestedFile>, IngestStats)> {
    let branch = client
        .default_branch(repo)
        .context("Failed to resolve default branch")?;
    let tarball = client
        .open_tarball(repo, &branch)
        .context("Failed to open archive stream")?;
    let (files, stats) = collect_files(tarball, filter, limits)?;
    info!(
        owner = %repo.owner,
        repo = %repo.name,
        %branch,
        admitted = stats.admitted,
        bytes = stats.admitted_bytes,
        filtered = stats.filtered,
        "repository fetched"
    );
    Ok((branch, files, stats))
}

/// Ingest a repository for one user: delete the previously active
/// namespace, fetch and chunk the tree, embed and upsert, cache metadata,
/// and mark the repo active.
///
/// Callers must not run two ingestions for the same user concurrently;
/// the namespace cleanup ordering assumes a single writer per user.
pub async fn run_ingest(
    config: &Config,
    pool: &SqlitePool,
    github: &GithubClient,
    provider: &dyn ModelProvider,
    vector_index: &dyn VectorIndex,
    user_id: &str,
    repo_url: &str,
) -> Result<IngestReport> {
    let repo = RepoRef::parse(repo_url)?;
    let namespace = repo.namespace(user_id);

    // The old namespace must be empty before the new one fills, or stale
    // vectors would linger under a reused key.
    clear_active_repo(pool, vector_index, user_id).await?;

    let filter = PathFilter::new(&config.limits.deny_dirs);
    let limits = config.limits.clone();
    let client = github.clone();
    let fetch_repo = repo.clone();
    let (branch, files, stats) =
        tokio::task::spawn_blocking(move || fetch_repo_files(&client, &fetch_repo, &filter, &limits))
            .await
            .context("Ingestion task panicked")??;

    let chunker = Chunker::new(&config.chunking);
    let chunks = chunker.chunk_corpus(&files);
    info!(files = files.len(), chunks = chunks.len(), %namespace, "corpus chunked");

    let (upserted, skipped_batches) =
        index::upsert_chunks(vector_index, provider, &namespace, &chunks).await?;

    // Cached metadata is best-effort: a failed analytics fetch must not
    // sink an otherwise complete ingestion.
    let client = github.clone();
    let analytics_repo = repo.clone();
    let analytics = match tokio::task::spawn_blocking(move || client.repo_analytics(&analytics_repo))
        .await
        .context("Analytics task panicked")?
    {
        Ok(mut value) => {
            value["corpus"] = analysis::analyze_corpus(&files);
            value
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), "analytics fetch failed, storing corpus stats only");
            serde_json::json!({ "corpus": analysis::analyze_corpus(&files) })
        }
    };
    let file_tree = analysis::build_file_tree(&files);
    store::upsert_repo_metadata(
        pool,
        repo_url,
        &file_tree.to_string(),
        &analytics.to_string(),
        "{}",
    )
    .await?;

    store::set_active_repo(pool, user_id, repo_url).await?;

    if let Some(reason) = stats.stopped {
        info!(?reason, "partial ingestion (budget reached)");
    }

    Ok(IngestReport {
        namespace,
        branch,
        files: files.len(),
        bytes: stats.admitted_bytes,
        chunks: chunks.len(),
        upserted,
        skipped_batches,
    })
}

/// Delete the active repo's vectors, chat history, and pointer, if any.
/// Returns the URL that was active.
pub async fn clear_active_repo(
    pool: &SqlitePool,
    vector_index: &dyn VectorIndex,
    user_id: &str,
) -> Result<Option<String>> {
    let Some(previous_url) = store::get_active_repo(pool, user_id).await? else {
        return Ok(None);
    };
    let previous = RepoRef::parse(&previous_url)?;
    let previous_ns = previous.namespace(user_id);
    info!(namespace = %previous_ns, "clearing previously active repo");

    vector_index.delete_namespace(&previous_ns).await?;
    store::delete_chat_namespace(pool, &previous_ns).await?;
    store::delete_active_repo(pool, user_id).await?;
    Ok(Some(previous_url))
}
