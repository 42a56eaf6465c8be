//! # gitrag CLI
//!
//! Command-line interface over the ingestion and chat pipeline.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gitrag init` | Create the SQLite database and run schema migrations |
//! | `gitrag key set <key> --user <id>` | Encrypt and store a provider API key |
//! | `gitrag ingest <repo_url> --user <id>` | Stream, chunk, and upsert a repository |
//! | `gitrag chat "<question>" --user <id>` | Ask about the active repository |
//! | `gitrag file <path> --user <id>` | Print one file from the active repository |
//! | `gitrag metadata --user <id>` | Print the cached metadata blob |
//! | `gitrag active --user <id>` | Show the active repository |
//! | `gitrag switch --user <id>` | Drop the active repo's vectors and chat |
//!
//! Configuration is environment-driven; see [`gitrag::config::Config`].

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use tracing_subscriber::EnvFilter;

use gitrag::config::Config;
use gitrag::crypto::KeyCipher;
use gitrag::github::GithubClient;
use gitrag::index::{self, VectorIndex};
use gitrag::models::RepoRef;
use gitrag::provider::{self, ModelProvider};
use gitrag::{db, ingest, migrate, rag, store};

/// gitrag — budgeted GitHub-repository ingestion and RAG chat.
#[derive(Parser)]
#[command(name = "gitrag", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the SQLite database and run schema migrations
    Init,
    /// Ingest a GitHub repository into the user's namespace
    Ingest {
        /// Repository URL, e.g. https://github.com/owner/repo
        repo_url: String,
        #[arg(long)]
        user: String,
    },
    /// Drop the active repo: delete its vectors, chat history, and pointer
    Switch {
        #[arg(long)]
        user: String,
    },
    /// Show the active repository
    Active {
        #[arg(long)]
        user: String,
    },
    /// Ask a question about the active repository
    Chat {
        question: String,
        #[arg(long)]
        user: String,
    },
    /// Print one file's raw content from the active repository
    File {
        path: String,
        #[arg(long)]
        user: String,
    },
    /// Print the cached metadata blob for the active repository
    Metadata {
        #[arg(long)]
        user: String,
    },
    /// Manage the stored provider API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand)]
enum KeyAction {
    /// Encrypt and store a provider API key
    Set {
        key: String,
        #[arg(long)]
        user: String,
    },
    /// Delete the stored key
    Delete {
        #[arg(long)]
        user: String,
    },
    /// Check the stored key against the provider
    Validate {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.validate()?;

    match cli.command {
        Commands::Init => {
            let pool = open_pool(&config).await?;
            pool.close().await;
            println!("initialized {}", config.db.path.display());
        }
        Commands::Ingest { repo_url, user } => {
            let pool = open_pool(&config).await?;
            let provider = provider_for_user(&config, &pool, &user).await?;
            let vector_index =
                index::create_index(&config.index, provider.name(), provider.dims()).await?;
            let github = GithubClient::new(config.github.token.clone(), config.github.max_attempts)?;

            let report = ingest::run_ingest(
                &config,
                &pool,
                &github,
                provider.as_ref(),
                vector_index.as_ref(),
                &user,
                &repo_url,
            )
            .await?;

            println!("ingest {}", report.namespace);
            println!("  branch: {}", report.branch);
            println!("  files: {}", report.files);
            println!("  bytes: {}", report.bytes);
            println!("  chunks: {}", report.chunks);
            println!("  upserted: {}", report.upserted);
            if report.skipped_batches > 0 {
                println!("  skipped batches: {}", report.skipped_batches);
            }
            println!("ok");
            pool.close().await;
        }
        Commands::Switch { user } => {
            let pool = open_pool(&config).await?;
            let vector_index = open_index(&config).await?;
            match ingest::clear_active_repo(&pool, vector_index.as_ref(), &user).await? {
                Some(url) => println!("cleared {url}"),
                None => println!("no active repo"),
            }
            pool.close().await;
        }
        Commands::Active { user } => {
            let pool = open_pool(&config).await?;
            match store::get_active_repo(&pool, &user).await? {
                Some(url) => println!("{url}"),
                None => println!("no active repo"),
            }
            pool.close().await;
        }
        Commands::Chat { question, user } => {
            let pool = open_pool(&config).await?;
            let provider = provider_for_user(&config, &pool, &user).await?;
            let vector_index =
                index::create_index(&config.index, provider.name(), provider.dims()).await?;

            let result =
                rag::chat(&pool, provider.as_ref(), vector_index.as_ref(), &user, &question)
                    .await?;
            println!("{}", result.answer);
            if !result.sources.is_empty() {
                println!();
                println!("sources:");
                for source in &result.sources {
                    println!("  {source}");
                }
            }
            pool.close().await;
        }
        Commands::File { path, user } => {
            let pool = open_pool(&config).await?;
            let repo_url = store::get_active_repo(&pool, &user)
                .await?
                .context("No active repo for user")?;
            let repo = RepoRef::parse(&repo_url)?;
            let github = GithubClient::new(config.github.token.clone(), config.github.max_attempts)?;

            // The blocking client must not run on the async runtime threads.
            let content = tokio::task::spawn_blocking(move || -> Result<String> {
                let branch = github.default_branch(&repo)?;
                github.raw_file(&repo, &branch, &path)
            })
            .await
            .context("File fetch task panicked")??;
            print!("{content}");
            pool.close().await;
        }
        Commands::Metadata { user } => {
            let pool = open_pool(&config).await?;
            let repo_url = store::get_active_repo(&pool, &user)
                .await?
                .context("No active repo for user")?;
            let meta = store::get_repo_metadata(&pool, &repo_url)
                .await?
                .context("No metadata cached for this repo; re-ingest it")?;

            let blob = serde_json::json!({
                "file_tree": parse_blob(&meta.file_tree_json),
                "analytics": parse_blob(&meta.analytics_json),
                "dependency_graph": parse_blob(&meta.dependency_graph_json),
            });
            println!("{}", serde_json::to_string_pretty(&blob)?);
            pool.close().await;
        }
        Commands::Key { action } => {
            let pool = open_pool(&config).await?;
            match action {
                KeyAction::Set { key, user } => {
                    let cipher = master_cipher(&config)?;
                    store::upsert_api_key(&pool, &cipher, &user, &key).await?;
                    println!("key stored");
                }
                KeyAction::Delete { user } => {
                    if store::delete_api_key(&pool, &user).await? {
                        println!("key deleted");
                    } else {
                        println!("no key stored");
                    }
                }
                KeyAction::Validate { user } => {
                    let provider = provider_for_user(&config, &pool, &user).await?;
                    if provider.validate().await {
                        println!("key valid");
                    } else {
                        println!("key invalid");
                        std::process::exit(1);
                    }
                }
            }
            pool.close().await;
        }
    }

    Ok(())
}

async fn open_pool(config: &Config) -> Result<SqlitePool> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    Ok(pool)
}

async fn open_index(config: &Config) -> Result<Box<dyn VectorIndex>> {
    index::create_index(
        &config.index,
        &config.provider.provider,
        config.provider.embed_dims,
    )
    .await
}

fn master_cipher(config: &Config) -> Result<KeyCipher> {
    let key = config
        .master_key
        .as_deref()
        .context("GITRAG_MASTER_KEY not set")?;
    Ok(KeyCipher::new(key)?)
}

async fn provider_for_user(
    config: &Config,
    pool: &SqlitePool,
    user: &str,
) -> Result<Box<dyn ModelProvider>> {
    let cipher = master_cipher(config)?;
    let api_key = store::get_api_key(pool, &cipher, user)
        .await?
        .context("No API key set for this user; run `gitrag key set`")?;
    provider::create_provider(&config.provider, &api_key)
}

fn parse_blob(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or(serde_json::Value::Null)
}
