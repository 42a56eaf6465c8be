//! Model provider abstraction and implementations.
//!
//! Defines the [`ModelProvider`] capability interface — embed, generate,
//! validate — with one variant per provider, selected by a provider-name
//! tag at construction. Call sites never branch on provider strings.
//!
//! # Retry Strategy
//!
//! Transient failures (HTTP 429, 5xx, network errors) retry with
//! exponential backoff (1s, 2s, 4s, ... capped at 32s). Other client
//! errors fail immediately.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::ProviderConfig;

const OPENAI_BASE: &str = "https://api.openai.com/v1";
const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const SYSTEM_PROMPT: &str = "You answer questions about a code repository. \
    Ground every answer in the provided context; when the context is \
    insufficient, say so instead of guessing.";

/// Uniform capability interface over embedding/LLM providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider tag (e.g. `"openai"`).
    fn name(&self) -> &str;
    /// Embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    /// Generate an answer to `question` grounded in `context`.
    async fn generate(&self, question: &str, context: &str) -> Result<String>;
    /// Cheap credential check (list-models call).
    async fn validate(&self) -> bool;
}

/// Instantiate the provider named by the configuration tag.
pub fn create_provider(config: &ProviderConfig, api_key: &str) -> Result<Box<dyn ModelProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiProvider::new(config, api_key)?)),
        "gemini" => Ok(Box::new(GeminiProvider::new(config, api_key)?)),
        other => bail!("Unknown model provider: '{}'. Must be openai or gemini.", other),
    }
}

fn user_prompt(question: &str, context: &str) -> String {
    format!("Context:\n{context}\n\nQuestion: {question}")
}

/// POST/GET with retry on 429/5xx/network errors.
async fn send_with_retry<F>(build: F, max_retries: u32) -> Result<Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response.json().await.context("Invalid provider response");
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    let body = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("Provider error {}: {}", status, body));
                    continue;
                }
                let body = response.text().await.unwrap_or_default();
                bail!("Provider error {}: {}", status, body);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Provider request failed after retries")))
}

// ============ OpenAI ============

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    embed_model: String,
    llm_model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig, api_key: &str) -> Result<Self> {
        if api_key.is_empty() {
            bail!("OpenAI API key is empty");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            embed_model: config.embed_model.clone(),
            llm_model: config.llm_model.clone(),
            dims: config.embed_dims,
            max_retries: config.max_retries,
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.api_key))
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.embed_model,
            "input": texts,
        });
        let json = send_with_retry(
            || {
                self.authed(self.client.post(format!("{OPENAI_BASE}/embeddings")))
                    .json(&body)
            },
            self.max_retries,
        )
        .await?;
        parse_openai_embeddings(&json)
    }

    async fn generate(&self, question: &str, context: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.llm_model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt(question, context) },
            ],
        });
        let json = send_with_retry(
            || {
                self.authed(self.client.post(format!("{OPENAI_BASE}/chat/completions")))
                    .json(&body)
            },
            self.max_retries,
        )
        .await?;
        parse_openai_answer(&json)
    }

    async fn validate(&self) -> bool {
        let resp = self
            .authed(self.client.get(format!("{OPENAI_BASE}/models")))
            .send()
            .await;
        matches!(resp, Ok(r) if r.status().is_success())
    }
}

fn parse_openai_embeddings(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing embedding"))?;
        embeddings.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(embeddings)
}

fn parse_openai_answer(json: &Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing message content"))
}

// ============ Gemini ============

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    embed_model: String,
    llm_model: String,
    dims: usize,
    max_retries: u32,
}

impl GeminiProvider {
    pub fn new(config: &ProviderConfig, api_key: &str) -> Result<Self> {
        if api_key.is_empty() {
            bail!("Gemini API key is empty");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            embed_model: config.embed_model.clone(),
            llm_model: config.llm_model.clone(),
            dims: config.embed_dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let requests: Vec<Value> = texts
            .iter()
            .map(|t| {
                serde_json::json!({
                    "model": format!("models/{}", self.embed_model),
                    "content": { "parts": [{ "text": t }] },
                })
            })
            .collect();
        let body = serde_json::json!({ "requests": requests });
        let url = format!(
            "{GEMINI_BASE}/models/{}:batchEmbedContents?key={}",
            self.embed_model, self.api_key
        );
        let json = send_with_retry(|| self.client.post(&url).json(&body), self.max_retries).await?;
        parse_gemini_embeddings(&json)
    }

    async fn generate(&self, question: &str, context: &str) -> Result<String> {
        let body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
            "contents": [{ "parts": [{ "text": user_prompt(question, context) }] }],
        });
        let url = format!(
            "{GEMINI_BASE}/models/{}:generateContent?key={}",
            self.llm_model, self.api_key
        );
        let json = send_with_retry(|| self.client.post(&url).json(&body), self.max_retries).await?;
        parse_gemini_answer(&json)
    }

    async fn validate(&self) -> bool {
        let url = format!("{GEMINI_BASE}/models?key={}", self.api_key);
        let resp = self.client.get(&url).send().await;
        matches!(resp, Ok(r) if r.status().is_success())
    }
}

fn parse_gemini_embeddings(json: &Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing embeddings array"))?;

    let mut out = Vec::with_capacity(embeddings.len());
    for item in embeddings {
        let values = item
            .get("values")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing values"))?;
        out.push(values.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect());
    }
    Ok(out)
}

fn parse_gemini_answer(json: &Value) -> Result<String> {
    json.pointer("/candidates/0/content/parts/0/text")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid generate response: missing candidate text"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_rejects_unknown_tag() {
        let mut config = ProviderConfig::default();
        config.provider = "ollama".to_string();
        assert!(create_provider(&config, "key").is_err());
    }

    #[test]
    fn test_create_provider_requires_key() {
        let config = ProviderConfig::default();
        assert!(create_provider(&config, "").is_err());
    }

    #[test]
    fn test_parse_openai_embeddings() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, 0.2] },
                { "embedding": [0.3, 0.4] },
            ]
        });
        let vecs = parse_openai_embeddings(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0].len(), 2);
        assert!((vecs[1][0] - 0.3).abs() < 1e-6);

        assert!(parse_openai_embeddings(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_parse_openai_answer() {
        let json = serde_json::json!({
            "choices": [{ "message": { "content": "the answer" } }]
        });
        assert_eq!(parse_openai_answer(&json).unwrap(), "the answer");
        assert!(parse_openai_answer(&serde_json::json!({"choices": []})).is_err());
    }

    #[test]
    fn test_parse_gemini_embeddings() {
        let json = serde_json::json!({
            "embeddings": [{ "values": [1.0, -1.0] }]
        });
        let vecs = parse_gemini_embeddings(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, -1.0]]);
    }

    #[test]
    fn test_parse_gemini_answer() {
        let json = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "hi" }] } }]
        });
        assert_eq!(parse_gemini_answer(&json).unwrap(), "hi");
    }

    #[test]
    fn test_user_prompt_contains_both_parts() {
        let p = user_prompt("what is this?", "some code");
        assert!(p.contains("some code"));
        assert!(p.contains("what is this?"));
    }
}
