//! Retrieval-augmented chat over the active repository.
//!
//! Embeds the question, queries the user's active namespace, stuffs the
//! top matches into the prompt, and logs both sides of the exchange.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use tracing::debug;

use crate::index::{IndexMatch, VectorIndex};
use crate::models::RepoRef;
use crate::provider::ModelProvider;
use crate::store;

const TOP_K: usize = 4;

#[derive(Debug, Clone)]
pub struct Answer {
    pub answer: String,
    /// File paths of the retrieved context, most relevant first.
    pub sources: Vec<String>,
}

/// Answer `question` against `user_id`'s active repo namespace.
pub async fn chat(
    pool: &SqlitePool,
    provider: &dyn ModelProvider,
    index: &dyn VectorIndex,
    user_id: &str,
    question: &str,
) -> Result<Answer> {
    let Some(repo_url) = store::get_active_repo(pool, user_id).await? else {
        bail!("No active repo for user; ingest one first");
    };
    let namespace = RepoRef::parse(&repo_url)?.namespace(user_id);

    let mut vectors = provider.embed(&[question.to_string()]).await?;
    let query_vector = vectors
        .pop()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))?;

    let matches = index.query(&namespace, &query_vector, TOP_K).await?;
    debug!(%namespace, matches = matches.len(), "retrieved context");

    let context = build_context(&matches);
    let answer = provider.generate(question, &context).await?;

    store::log_chat(pool, &namespace, "user", question, user_id).await?;
    store::log_chat(pool, &namespace, "assistant", &answer, user_id).await?;

    Ok(Answer {
        answer,
        sources: source_files(&matches),
    })
}

fn build_context(matches: &[IndexMatch]) -> String {
    matches
        .iter()
        .map(|m| format!("// {}\n{}", m.file, m.text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn source_files(matches: &[IndexMatch]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for m in matches {
        if !sources.iter().any(|s| s == &m.file) {
            sources.push(m.file.clone());
        }
    }
    sources
}
