use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub db: DbConfig,
    pub github: GithubConfig,
    pub limits: IngestLimits,
    pub chunking: ChunkingConfig,
    pub provider: ProviderConfig,
    pub index: IndexConfig,
    /// Base64-encoded 32-byte master key for encrypting stored API keys.
    pub master_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Personal access token. Optional; anonymous calls are rate-limited harder.
    pub token: Option<String>,
    /// Attempts per request before the last response is surfaced as-is.
    pub max_attempts: u32,
}

/// Resource ceilings for one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestLimits {
    /// Directory names rejected as exact path segments.
    pub deny_dirs: Vec<String>,
    /// Per-file byte cap; longer files are truncated at the cap.
    pub max_file_bytes: usize,
    /// Cumulative admitted-bytes budget for the whole run.
    pub byte_budget: usize,
    /// Admitted-file count cap.
    pub max_files: usize,
    /// Wall-clock ceiling in seconds.
    pub max_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target window size in tokens.
    pub target_tokens: usize,
    /// Tokens shared between consecutive windows.
    pub overlap_tokens: usize,
    /// Windows emitted per file at most.
    pub max_chunks_per_file: usize,
    /// Windows emitted per ingestion run at most, across all files.
    pub chunk_budget: usize,
    /// Decoded windows larger than this many bytes are discarded.
    pub max_chunk_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// "openai" or "gemini"
    pub provider: String,
    pub embed_model: String,
    pub llm_model: String,
    pub embed_dims: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// "pinecone" or "memory"
    pub backend: String,
    pub api_key: Option<String>,
    /// Base index name; the full name is "{base}-{provider}-{dims}".
    pub index_base: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/gitrag.sqlite"),
            },
            github: GithubConfig {
                token: None,
                max_attempts: 5,
            },
            limits: IngestLimits::default(),
            chunking: ChunkingConfig::default(),
            provider: ProviderConfig::default(),
            index: IndexConfig::default(),
            master_key: None,
        }
    }
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            deny_dirs: [
                "node_modules",
                "dist",
                "build",
                ".git",
                "__pycache__",
                ".venv",
                "venv",
                "target",
                ".next",
                ".vercel",
                "out",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_file_bytes: 2_000_000,
            byte_budget: 250_000_000,
            max_files: 10_000,
            max_seconds: 600,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: 800,
            overlap_tokens: 120,
            max_chunks_per_file: 2_000,
            chunk_budget: 50_000,
            max_chunk_bytes: 3 * 1024 * 1024,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            embed_model: "text-embedding-3-small".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            embed_dims: 1536,
            timeout_secs: 30,
            max_retries: 5,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: "pinecone".to_string(),
            api_key: None,
            index_base: "gitrag-code".to_string(),
        }
    }
}

impl Config {
    /// Build a config from environment variables, starting from defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("GITRAG_DB_PATH") {
            config.db.path = PathBuf::from(path);
        }
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            if !token.is_empty() {
                config.github.token = Some(token);
            }
        }
        if let Ok(val) = std::env::var("GITRAG_HTTP_MAX_ATTEMPTS") {
            if let Ok(v) = val.parse() {
                config.github.max_attempts = v;
            }
        }

        if let Ok(dirs) = std::env::var("GITRAG_DENY_DIRS") {
            config.limits.deny_dirs = parse_deny_dirs(&dirs);
        }
        if let Ok(val) = std::env::var("GITRAG_MAX_FILE_BYTES") {
            if let Ok(v) = val.parse() {
                config.limits.max_file_bytes = v;
            }
        }
        if let Ok(val) = std::env::var("GITRAG_BYTE_BUDGET") {
            if let Ok(v) = val.parse() {
                config.limits.byte_budget = v;
            }
        }
        if let Ok(val) = std::env::var("GITRAG_MAX_FILES") {
            if let Ok(v) = val.parse() {
                config.limits.max_files = v;
            }
        }
        if let Ok(val) = std::env::var("GITRAG_MAX_INGEST_SECONDS") {
            if let Ok(v) = val.parse() {
                config.limits.max_seconds = v;
            }
        }

        if let Ok(val) = std::env::var("GITRAG_CHUNK_TOKENS") {
            if let Ok(v) = val.parse() {
                config.chunking.target_tokens = v;
            }
        }
        if let Ok(val) = std::env::var("GITRAG_CHUNK_OVERLAP") {
            if let Ok(v) = val.parse() {
                config.chunking.overlap_tokens = v;
            }
        }
        if let Ok(val) = std::env::var("GITRAG_MAX_CHUNKS_PER_FILE") {
            if let Ok(v) = val.parse() {
                config.chunking.max_chunks_per_file = v;
            }
        }
        if let Ok(val) = std::env::var("GITRAG_CHUNK_BUDGET") {
            if let Ok(v) = val.parse() {
                config.chunking.chunk_budget = v;
            }
        }

        if let Ok(tag) = std::env::var("GITRAG_PROVIDER") {
            config.provider.provider = tag;
        }
        if let Ok(model) = std::env::var("GITRAG_EMBED_MODEL") {
            config.provider.embed_model = model;
        }
        if let Ok(model) = std::env::var("GITRAG_LLM_MODEL") {
            config.provider.llm_model = model;
        }
        if let Ok(val) = std::env::var("GITRAG_EMBED_DIMS") {
            if let Ok(v) = val.parse() {
                config.provider.embed_dims = v;
            }
        }

        if let Ok(backend) = std::env::var("GITRAG_INDEX_BACKEND") {
            config.index.backend = backend;
        }
        if let Ok(key) = std::env::var("PINECONE_API_KEY") {
            if !key.is_empty() {
                config.index.api_key = Some(key);
            }
        }
        if let Ok(base) = std::env::var("GITRAG_INDEX") {
            config.index.index_base = base;
        }
        if let Ok(key) = std::env::var("GITRAG_MASTER_KEY") {
            if !key.is_empty() {
                config.master_key = Some(key);
            }
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.target_tokens == 0 {
            anyhow::bail!("chunking target_tokens must be > 0");
        }
        if self.chunking.overlap_tokens >= self.chunking.target_tokens {
            anyhow::bail!("chunking overlap_tokens must be smaller than target_tokens");
        }
        if self.limits.max_file_bytes == 0 {
            anyhow::bail!("max_file_bytes must be > 0");
        }
        if self.limits.byte_budget == 0 {
            anyhow::bail!("byte_budget must be > 0");
        }
        if self.provider.embed_dims == 0 {
            anyhow::bail!("embed_dims must be > 0");
        }

        match self.provider.provider.as_str() {
            "openai" | "gemini" => {}
            other => anyhow::bail!(
                "Unknown model provider: '{}'. Must be openai or gemini.",
                other
            ),
        }

        match self.index.backend.as_str() {
            "memory" => {}
            "pinecone" => {
                if self.index.api_key.is_none() {
                    anyhow::bail!("PINECONE_API_KEY required for the pinecone index backend");
                }
            }
            other => anyhow::bail!(
                "Unknown index backend: '{}'. Must be pinecone or memory.",
                other
            ),
        }

        Ok(())
    }
}

fn parse_deny_dirs(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
