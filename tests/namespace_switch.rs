//! Namespace lifecycle tests: switching away from a repo deletes its
//! vectors and chat history before anything new lands, and re-ingesting
//! unchanged content overwrites in place instead of duplicating.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use gitrag::chunk::Chunker;
use gitrag::config::ChunkingConfig;
use gitrag::index::{upsert_chunks, InMemoryIndex};
use gitrag::ingest::clear_active_repo;
use gitrag::models::IngestedFile;
use gitrag::provider::ModelProvider;
use gitrag::{migrate, rag, store};

struct StubProvider;

#[async_trait]
impl ModelProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn dims(&self) -> usize {
        4
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let len = t.len() as f32;
                vec![len, len.sqrt(), 1.0, 0.0]
            })
            .collect())
    }

    async fn generate(&self, _question: &str, _context: &str) -> anyhow::Result<String> {
        Ok("stub answer".to_string())
    }

    async fn validate(&self) -> bool {
        true
    }
}

async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    pool
}

fn corpus(tag: &str) -> Vec<IngestedFile> {
    vec![
        IngestedFile {
            path: format!("src/{tag}.rs"),
            content: format!("pub fn {tag}() -> &'static str {{ \"{tag}\" }}\n"),
        },
        IngestedFile {
            path: "README.md".to_string(),
            content: format!("# {tag}\n\ndocumentation for {tag}"),
        },
    ]
}

#[tokio::test]
async fn switching_repos_clears_old_namespace_before_new_upsert() {
    let pool = test_pool().await;
    let index = InMemoryIndex::new();
    let provider = StubProvider;
    let chunker = Chunker::new(&ChunkingConfig::default());

    // Ingest repoA.
    let chunks_a = chunker.chunk_corpus(&corpus("alpha"));
    upsert_chunks(&index, &provider, "u1_repoA", &chunks_a).await.unwrap();
    store::set_active_repo(&pool, "u1", "https://github.com/u1/repoA").await.unwrap();
    store::log_chat(&pool, "u1_repoA", "user", "what is alpha?", "u1").await.unwrap();
    assert!(!index.namespace_ids("u1_repoA").is_empty());

    // Switching must empty the old namespace and its chat log before any
    // repoB chunk exists.
    clear_active_repo(&pool, &index, "u1").await.unwrap();
    assert!(index.namespace_ids("u1_repoA").is_empty());
    assert!(store::get_chat_messages(&pool, "u1_repoA").await.unwrap().is_empty());
    assert_eq!(store::get_active_repo(&pool, "u1").await.unwrap(), None);
    assert!(index.namespace_ids("u1_repoB").is_empty());

    // Now repoB fills its own namespace only.
    let chunks_b = chunker.chunk_corpus(&corpus("beta"));
    upsert_chunks(&index, &provider, "u1_repoB", &chunks_b).await.unwrap();
    store::set_active_repo(&pool, "u1", "https://github.com/u1/repoB").await.unwrap();

    assert!(index.namespace_ids("u1_repoA").is_empty());
    assert_eq!(index.namespace_ids("u1_repoB").len(), chunks_b.len());
}

#[tokio::test]
async fn reingesting_unchanged_content_overwrites_not_duplicates() {
    let index = InMemoryIndex::new();
    let provider = StubProvider;
    let chunker = Chunker::new(&ChunkingConfig::default());
    let files = corpus("gamma");

    let first = chunker.chunk_corpus(&files);
    upsert_chunks(&index, &provider, "u1_repo", &first).await.unwrap();
    let ids_after_first = index.namespace_ids("u1_repo");

    let second = chunker.chunk_corpus(&files);
    let (upserted, skipped) = upsert_chunks(&index, &provider, "u1_repo", &second).await.unwrap();

    assert_eq!(upserted, second.len());
    assert_eq!(skipped, 0);
    assert_eq!(index.namespace_ids("u1_repo"), ids_after_first);
}

#[tokio::test]
async fn chat_answers_from_active_namespace_and_logs_both_sides() {
    let pool = test_pool().await;
    let index = InMemoryIndex::new();
    let provider = StubProvider;
    let chunker = Chunker::new(&ChunkingConfig::default());

    let chunks = chunker.chunk_corpus(&corpus("delta"));
    upsert_chunks(&index, &provider, "u1_repoD", &chunks).await.unwrap();
    store::set_active_repo(&pool, "u1", "https://github.com/u1/repoD").await.unwrap();

    let result = rag::chat(&pool, &provider, &index, "u1", "what does delta do?")
        .await
        .unwrap();
    assert_eq!(result.answer, "stub answer");
    assert!(!result.sources.is_empty());

    let log = store::get_chat_messages(&pool, "u1_repoD").await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].role, "user");
    assert_eq!(log[1].role, "assistant");
}

#[tokio::test]
async fn chat_without_active_repo_is_an_error() {
    let pool = test_pool().await;
    let index = InMemoryIndex::new();
    assert!(rag::chat(&pool, &StubProvider, &index, "u1", "anything").await.is_err());
}
