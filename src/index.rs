//! Vector index abstraction and implementations.
//!
//! Defines the [`VectorIndex`] contract — upsert, query, delete-namespace —
//! and two implementations:
//! - **[`PineconeIndex`]** — REST client against a serverless Pinecone
//!   index, one index per (provider, dimension) pair, created on demand.
//! - **[`InMemoryIndex`]** — brute-force cosine search over a `HashMap`;
//!   backs tests and offline runs.
//!
//! Also hosts the embed-and-upsert pipeline stage with its byte-budgeted
//! batching: a failed batch is logged and skipped, never fatal.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::warn;

use crate::config::IndexConfig;
use crate::models::Chunk;
use crate::provider::ModelProvider;

const PINECONE_API: &str = "https://api.pinecone.io";

/// Conservative request budget; the serialized payload grows past the raw
/// text with vector values and metadata.
const MAX_BATCH_BYTES: usize = 2 * 1024 * 1024;
const MAX_BATCH_CHUNKS: usize = 100;
/// Serialization overhead estimate added per chunk.
const CHUNK_OVERHEAD_BYTES: usize = 500;

/// One embeddable record destined for the index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub file: String,
}

/// One scored match returned from a query.
#[derive(Debug, Clone)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
    pub text: String,
    pub file: String,
}

/// Namespace-partitioned vector store contract.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, namespace: &str, entries: &[IndexEntry]) -> Result<()>;
    async fn query(&self, namespace: &str, vector: &[f32], top_k: usize)
        -> Result<Vec<IndexMatch>>;
    async fn delete_namespace(&self, namespace: &str) -> Result<()>;
}

/// Instantiate the configured index backend.
pub async fn create_index(
    config: &IndexConfig,
    provider_name: &str,
    dims: usize,
) -> Result<Box<dyn VectorIndex>> {
    match config.backend.as_str() {
        "memory" => Ok(Box::new(InMemoryIndex::new())),
        "pinecone" => Ok(Box::new(PineconeIndex::ensure(config, provider_name, dims).await?)),
        other => bail!("Unknown index backend: '{}'. Must be pinecone or memory.", other),
    }
}

/// Embed and upsert chunks in byte-budgeted batches. A failed batch is
/// logged and skipped; the remaining batches still run. Returns the number
/// of chunks upserted and the number of batches skipped.
pub async fn upsert_chunks(
    index: &dyn VectorIndex,
    provider: &dyn ModelProvider,
    namespace: &str,
    chunks: &[Chunk],
) -> Result<(usize, usize)> {
    let mut upserted = 0usize;
    let mut skipped = 0usize;

    for batch in batch_chunks(chunks) {
        match embed_and_upsert(index, provider, namespace, &batch).await {
            Ok(count) => upserted += count,
            Err(e) => {
                warn!(%namespace, error = %format!("{e:#}"), "skipping failed upsert batch");
                skipped += 1;
            }
        }
    }

    Ok((upserted, skipped))
}

async fn embed_and_upsert(
    index: &dyn VectorIndex,
    provider: &dyn ModelProvider,
    namespace: &str,
    batch: &[&Chunk],
) -> Result<usize> {
    let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
    let vectors = provider.embed(&texts).await?;
    if vectors.len() != batch.len() {
        bail!(
            "Embedding count mismatch: {} inputs, {} vectors",
            batch.len(),
            vectors.len()
        );
    }

    let entries: Vec<IndexEntry> = batch
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| IndexEntry {
            id: chunk.chunk_id.clone(),
            vector,
            text: chunk.text.clone(),
            file: chunk.file.clone(),
        })
        .collect();

    index.upsert(namespace, &entries).await?;
    Ok(entries.len())
}

/// Group chunks into upsert batches under the byte estimate and count
/// limits. A single chunk whose estimate exceeds the byte budget is
/// dropped outright.
fn batch_chunks(chunks: &[Chunk]) -> Vec<Vec<&Chunk>> {
    let mut batches = Vec::new();
    let mut batch: Vec<&Chunk> = Vec::new();
    let mut total = 0usize;

    for chunk in chunks {
        let estimate = chunk.text.len() + chunk.file.len() + CHUNK_OVERHEAD_BYTES;
        if estimate > MAX_BATCH_BYTES {
            warn!(file = %chunk.file, bytes = estimate, "dropping chunk larger than batch budget");
            continue;
        }
        if (!batch.is_empty() && total + estimate > MAX_BATCH_BYTES)
            || batch.len() >= MAX_BATCH_CHUNKS
        {
            batches.push(std::mem::take(&mut batch));
            total = 0;
        }
        batch.push(chunk);
        total += estimate;
    }

    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}

// ============ Pinecone ============

/// REST client for one Pinecone serverless index.
pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    api_key: String,
}

impl PineconeIndex {
    /// Resolve the index for this (provider, dims) pair, creating it when
    /// it does not exist yet. The index name is `"{base}-{provider}-{dims}"`.
    pub async fn ensure(config: &IndexConfig, provider_name: &str, dims: usize) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("PINECONE_API_KEY not set"))?;
        let name = format!("{}-{}-{}", config.index_base, provider_name, dims);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let describe = client
            .get(format!("{PINECONE_API}/indexes/{name}"))
            .header("Api-Key", &api_key)
            .send()
            .await
            .context("Failed to reach the Pinecone control plane")?;

        let body: Value = if describe.status().is_success() {
            describe.json().await?
        } else if describe.status() == reqwest::StatusCode::NOT_FOUND {
            let spec = serde_json::json!({
                "name": name,
                "dimension": dims,
                "metric": "cosine",
                "spec": { "serverless": { "cloud": "aws", "region": "us-east-1" } },
            });
            let created = client
                .post(format!("{PINECONE_API}/indexes"))
                .header("Api-Key", &api_key)
                .json(&spec)
                .send()
                .await?;
            if !created.status().is_success() {
                bail!("Failed to create index '{}' (status {})", name, created.status());
            }
            created.json().await?
        } else {
            bail!(
                "Failed to describe index '{}' (status {})",
                name,
                describe.status()
            );
        };

        let host = body
            .get("host")
            .and_then(|h| h.as_str())
            .ok_or_else(|| anyhow::anyhow!("Index description missing host"))?;

        Ok(Self {
            client,
            host: format!("https://{host}"),
            api_key,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        self.client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Pinecone request failed: {path}"))
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, namespace: &str, entries: &[IndexEntry]) -> Result<()> {
        let vectors: Vec<Value> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "id": e.id,
                    "values": e.vector,
                    "metadata": { "text": e.text, "file": e.file },
                })
            })
            .collect();
        let body = serde_json::json!({ "vectors": vectors, "namespace": namespace });
        let resp = self.post("/vectors/upsert", &body).await?;
        if !resp.status().is_success() {
            bail!("Upsert failed (status {})", resp.status());
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<IndexMatch>> {
        let body = serde_json::json!({
            "vector": vector,
            "topK": top_k,
            "namespace": namespace,
            "includeMetadata": true,
        });
        let resp = self.post("/query", &body).await?;
        if !resp.status().is_success() {
            bail!("Query failed (status {})", resp.status());
        }
        let json: Value = resp.json().await?;
        let matches = json
            .get("matches")
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(matches
            .iter()
            .map(|m| IndexMatch {
                id: m.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                score: m.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32,
                text: m
                    .pointer("/metadata/text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                file: m
                    .pointer("/metadata/file")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let body = serde_json::json!({ "deleteAll": true, "namespace": namespace });
        let resp = self.post("/vectors/delete", &body).await?;
        // A namespace that never received vectors reports 404; that is a
        // successful no-op for this contract.
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            bail!("Namespace delete failed (status {})", resp.status());
        }
        Ok(())
    }
}

// ============ In-memory ============

/// Brute-force cosine index over a `HashMap`, for tests and offline runs.
/// Entries are keyed by id, so re-upserting the same id overwrites.
#[derive(Default)]
pub struct InMemoryIndex {
    namespaces: RwLock<HashMap<String, HashMap<String, IndexEntry>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids currently stored under a namespace, sorted. Test observability.
    pub fn namespace_ids(&self, namespace: &str) -> Vec<String> {
        let namespaces = match self.namespaces.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut ids: Vec<String> = namespaces
            .get(namespace)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, namespace: &str, entries: &[IndexEntry]) -> Result<()> {
        let mut namespaces = self
            .namespaces
            .write()
            .map_err(|_| anyhow::anyhow!("index lock poisoned"))?;
        let bucket = namespaces.entry(namespace.to_string()).or_default();
        for entry in entries {
            bucket.insert(entry.id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<IndexMatch>> {
        let namespaces = self
            .namespaces
            .read()
            .map_err(|_| anyhow::anyhow!("index lock poisoned"))?;
        let Some(bucket) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<IndexMatch> = bucket
            .values()
            .map(|e| IndexMatch {
                id: e.id.clone(),
                score: cosine_similarity(&e.vector, vector),
                text: e.text.clone(),
                file: e.file.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let mut namespaces = self
            .namespaces
            .write()
            .map_err(|_| anyhow::anyhow!("index lock poisoned"))?;
        namespaces.remove(namespace);
        Ok(())
    }
}

/// Cosine similarity in `[-1, 1]`; `0.0` for mismatched or empty vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            file: "f.rs".to_string(),
            chunk_id: id.to_string(),
        }
    }

    fn entry(id: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            vector,
            text: format!("text {id}"),
            file: "f.rs".to_string(),
        }
    }

    #[test]
    fn test_batching_respects_count_limit() {
        let chunks: Vec<Chunk> = (0..250).map(|i| chunk(&format!("c{i}"), "small")).collect();
        let batches = batch_chunks(&chunks);
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() <= MAX_BATCH_CHUNKS));
        assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), 250);
    }

    #[test]
    fn test_batching_respects_byte_limit() {
        let big_text = "x".repeat(MAX_BATCH_BYTES / 2);
        let chunks = vec![
            chunk("a", &big_text),
            chunk("b", &big_text),
            chunk("c", &big_text),
        ];
        let batches = batch_chunks(&chunks);
        // Two halves plus overhead exceed the budget, so no batch holds
        // more than one of these.
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn test_oversized_chunk_dropped() {
        let chunks = vec![chunk("huge", &"x".repeat(MAX_BATCH_BYTES + 1)), chunk("ok", "small")];
        let batches = batch_chunks(&chunks);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].chunk_id, "ok");
    }

    #[tokio::test]
    async fn test_memory_index_upsert_query_delete() {
        let index = InMemoryIndex::new();
        index
            .upsert(
                "u1_repo",
                &[entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])],
            )
            .await
            .unwrap();

        let matches = index.query("u1_repo", &[1.0, 0.0], 1).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "a");

        // Other namespaces are invisible.
        assert!(index.query("u2_repo", &[1.0, 0.0], 5).await.unwrap().is_empty());

        index.delete_namespace("u1_repo").await.unwrap();
        assert!(index.query("u1_repo", &[1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_index_upsert_overwrites_same_id() {
        let index = InMemoryIndex::new();
        index.upsert("ns", &[entry("a", vec![1.0, 0.0])]).await.unwrap();
        index.upsert("ns", &[entry("a", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(index.namespace_ids("ns"), vec!["a".to_string()]);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
