//! # gitrag
//!
//! A budgeted GitHub-repository ingestion and RAG chat backend.
//!
//! gitrag streams a repository tarball from the GitHub API, filters and
//! budgets the file tree without ever materializing the whole archive,
//! windows the admitted text into overlapping token chunks with stable
//! content-addressed ids, and upserts their embeddings into a
//! per-user/per-repo namespace of a vector index for semantic-search
//! backed chat.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ GitHub API   │──▶│   Ingestion    │──▶│ Vector index │
//! │ tarball      │   │ filter+budget │   │  namespace   │
//! │ stream       │   │ chunk+embed   │   │ {user}_{repo}│
//! └──────────────┘   └──────┬────────┘   └──────┬───────┘
//!                           │                   │
//!                           ▼                   ▼
//!                     ┌──────────┐        ┌──────────┐
//!                     │  SQLite  │        │ RAG chat │
//!                     │ metadata │        │  (CLI)   │
//!                     └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! gitrag init                                    # create database
//! gitrag key set sk-... --user u1                # store a provider key
//! gitrag ingest https://github.com/o/r --user u1 # stream, chunk, upsert
//! gitrag chat "how is auth handled?" --user u1   # retrieval-backed answer
//! gitrag switch --user u1                        # drop namespace + chat
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment-driven configuration |
//! | [`models`] | Core data types |
//! | [`github`] | Rate-limit-aware GitHub client |
//! | [`archive`] | Streaming tar.gz entry reader |
//! | [`filter`] | Path admission predicate |
//! | [`ingest`] | Budgeted ingestion controller |
//! | [`chunk`] | Token-aware windowing chunker |
//! | [`analysis`] | File-tree and corpus analytics |
//! | [`provider`] | Embedding/LLM provider abstraction |
//! | [`index`] | Vector index abstraction |
//! | [`store`] | Relational CRUD |
//! | [`crypto`] | API-key encryption |
//! | [`rag`] | Retrieval + answer generation |

pub mod analysis;
pub mod archive;
pub mod chunk;
pub mod config;
pub mod crypto;
pub mod db;
pub mod filter;
pub mod github;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod provider;
pub mod rag;
pub mod store;
