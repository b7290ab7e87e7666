//! # rag-ingest - Incremental code ingestion for retrieval-augmented generation
//!
//! Keeps a vector index in sync with source repositories. Each ingestion run
//! fetches a repository snapshot, cuts it into symbol-bounded chunks, embeds
//! only the chunks whose content changed and removes the ones that vanished.
//!
//! ## Key Features
//!
//! - **Content-addressed chunks**: ids derive from repository, path and
//!   normalized content, so re-ingesting unchanged code costs no embedding calls
//! - **AST-Based Chunking**: Tree-sitter parsing for 12 programming languages,
//!   with line-window fallback and merging of tiny neighbours
//! - **Batched Embedding**: item and token limits, bounded concurrency, retries
//!   with exponential backoff and jitter
//! - **Atomic Runs**: nothing is written until every new chunk is embedded, and
//!   stale ids are deleted only by the run that still owns the repository
//! - **Serialized Triggers**: one run per repository at a time, later triggers
//!   queue and coalesce
//!
//! ## Architecture
//!
//! ```text
//!  trigger(repo, ref)
//!         |
//! +-------v-----------+     +--------------------+
//! | IngestionPipeline |---->| RepositoryPort     |  local dir / git tree
//! +-------+-----------+     +--------------------+
//!         |  CodeChunker (rayon pool)
//!         v
//! +-------------------+     +--------------------+
//! | EmbeddingBatcher  |---->| EmbeddingPort      |  FastEmbed
//! +-------+-----------+     +--------------------+
//!         v
//! +-------------------+     +--------------------+
//! | VectorIndexWriter |---->| VectorStorePort    |  memory snapshot / Qdrant
//! +-------+-----------+     +--------------------+
//!         v
//!    EventPort  (ingestionSucceeded / ingestionFailed)
//! ```
//!
//! ## Modules
//!
//! - [`pipeline`]: Run orchestration, per-repository serialization and events
//! - [`indexer`]: Language detection, AST parsing and chunking
//! - [`hasher`]: Content normalization and vector ids
//! - [`embedding`]: Embedding port, FastEmbed adapter and batcher
//! - [`vector_db`]: Vector store port, adapters and batched writer
//! - [`repository`]: Repository port with local and git adapters
//! - [`events`]: Event port and publishers
//! - [`retry`]: Backoff policy and timeout-bounded retries
//! - [`config`]: Configuration management with environment variable support
//! - [`types`]: Chunks, run records and event payloads
//! - [`error`]: Error types and their classification
//! - [`paths`]: Platform-specific data and config locations
//!
//! ## Usage Example
//!
//! ```no_run
//! use rag_ingest::config::Config;
//! use rag_ingest::embedding::FastEmbedEmbedder;
//! use rag_ingest::events::TracingEventPublisher;
//! use rag_ingest::pipeline::IngestionPipeline;
//! use rag_ingest::repository::GitRepository;
//! use rag_ingest::vector_db::MemoryVectorStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::new()?;
//!     let repository = GitRepository::new(&config.repository)?.with_root("app", "/src/app");
//!     let pipeline = IngestionPipeline::new(
//!         &config,
//!         Arc::new(repository),
//!         Arc::new(FastEmbedEmbedder::new()?),
//!         Arc::new(MemoryVectorStore::open(&config.vector_store.snapshot_path)?),
//!         Arc::new(TracingEventPublisher),
//!     )?;
//!
//!     let report = pipeline.ingest("app", "main").await?;
//!     println!("{:?}: {} new chunks", report.status, report.chunks_processed);
//!     Ok(())
//! }
//! ```

/// Configuration management with environment variable overrides
pub mod config;

/// Embedding generation using FastEmbed (all-MiniLM-L6-v2)
pub mod embedding;

/// Error types and utilities
pub mod error;

/// Run completion events
pub mod events;

/// Glob pattern matching for include and exclude filters
pub mod glob_utils;

/// Content normalization and content-addressed ids
pub mod hasher;

/// Code chunking and AST parsing
pub mod indexer;

/// Platform-specific paths for data and configuration
pub mod paths;

/// Ingestion runs and their orchestration
pub mod pipeline;

/// Repository snapshots from the file system or git
pub mod repository;

/// Exponential backoff with jitter for external calls
pub mod retry;

/// Chunk, run and event types
pub mod types;

/// Vector store abstraction with in-memory and Qdrant backends
pub mod vector_db;

pub use config::Config;
pub use error::{ErrorClass, IngestError};
pub use pipeline::{IngestionPipeline, RepoStatus, RunReport, RunTicket, TriggerDisposition};
pub use types::{Chunk, IngestionEvent, IngestionRun, RunStatus, VectorId};
