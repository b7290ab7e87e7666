/// Configuration system for rag-ingest
///
/// Supports loading from multiple sources with priority:
/// CLI args > Environment variables > Config file > Defaults
use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector store configuration
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    /// Repository fetch configuration
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Run scheduling configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Chunking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Largest chunk, in lines, before a declaration is split further
    #[serde(default = "default_max_chunk_lines")]
    pub max_chunk_lines: usize,

    /// Chunks shorter than this are merged into a sibling
    #[serde(default = "default_min_chunk_lines")]
    pub min_chunk_lines: usize,

    /// Context lines carried across a forced window seam
    #[serde(default = "default_window_overlap_lines")]
    pub window_overlap_lines: usize,

    /// Size of the CPU pool used to chunk files in parallel
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Embedding service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name (e.g., "all-MiniLM-L6-v2", "BAAI/bge-small-en-v1.5")
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Per-request item limit of the embedding service
    #[serde(default = "default_max_batch_items")]
    pub max_batch_items: usize,

    /// Per-request token limit (estimated as characters / 4)
    #[serde(default = "default_max_batch_tokens")]
    pub max_batch_tokens: usize,

    /// Concurrent embedding requests, shared by all runs
    #[serde(default = "default_embedding_concurrency")]
    pub concurrency: usize,

    /// Timeout in seconds for one embedding request
    #[serde(default = "default_call_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Vector store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Store backend: "memory" or "qdrant"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// JSON snapshot file backing the memory store
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Qdrant server URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Collection name for vector storage
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Entries per upsert call
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,

    /// Timeout in seconds for one store call
    #[serde(default = "default_call_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Repository fetch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Maximum file size to ingest (in bytes)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,

    /// Glob patterns a file must match (empty matches everything)
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Glob patterns that exclude a file
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// Timeout in seconds for one repository fetch
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Run scheduling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// Cancel a running ingestion when a newer trigger arrives for the same repository
    #[serde(default)]
    pub supersede_running: bool,
}

/// Retry policy for one external port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Random spread applied to each delay, as a fraction of it (0.0 to 1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

// Default value functions
fn default_max_chunk_lines() -> usize {
    150
}

fn default_min_chunk_lines() -> usize {
    3
}

fn default_window_overlap_lines() -> usize {
    5
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_model_name() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_max_batch_items() -> usize {
    32
}

fn default_max_batch_tokens() -> usize {
    8192
}

fn default_embedding_concurrency() -> usize {
    4
}

fn default_call_timeout() -> u64 {
    30
}

fn default_store_backend() -> String {
    #[cfg(feature = "qdrant-backend")]
    return "qdrant".to_string();
    #[cfg(not(feature = "qdrant-backend"))]
    return "memory".to_string();
}

fn default_snapshot_path() -> PathBuf {
    crate::paths::PlatformPaths::default_snapshot_path()
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_collection_name() -> String {
    "code_chunks".to_string()
}

fn default_write_batch_size() -> usize {
    128
}

fn default_max_file_size() -> usize {
    1_048_576 // 1 MB
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "target/**".to_string(),
        "node_modules/**".to_string(),
        "dist/**".to_string(),
        "build/**".to_string(),
    ]
}

fn default_fetch_timeout() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_lines: default_max_chunk_lines(),
            min_chunk_lines: default_min_chunk_lines(),
            window_overlap_lines: default_window_overlap_lines(),
            workers: default_workers(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            max_batch_items: default_max_batch_items(),
            max_batch_tokens: default_max_batch_tokens(),
            concurrency: default_embedding_concurrency(),
            timeout_secs: default_call_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            snapshot_path: default_snapshot_path(),
            qdrant_url: default_qdrant_url(),
            collection_name: default_collection_name(),
            write_batch_size: default_write_batch_size(),
            timeout_secs: default_call_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            include_patterns: Vec::new(),
            exclude_patterns: default_exclude_patterns(),
            timeout_secs: default_fetch_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(invalid(
                &format!("{section}.retry.max_attempts"),
                "must be greater than 0",
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(invalid(
                &format!("{section}.retry.base_delay_ms"),
                "must not exceed max_delay_ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(invalid(
                &format!("{section}.retry.jitter"),
                &format!("must be between 0.0 and 1.0, got {}", self.jitter),
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(format!("Invalid TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location or create default
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let config_path = crate::paths::PlatformPaths::default_config_path();

        if config_path.exists() {
            tracing::info!("Loading config from: {}", config_path.display());
            Self::from_file(&config_path)
        } else {
            tracing::info!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::SaveFailed(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = self.to_toml()?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to serialize config: {}", e)))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunking = &self.chunking;
        if chunking.max_chunk_lines == 0 {
            return Err(invalid("chunking.max_chunk_lines", "must be greater than 0"));
        }
        if chunking.min_chunk_lines > chunking.max_chunk_lines {
            return Err(invalid(
                "chunking.min_chunk_lines",
                "must not exceed max_chunk_lines",
            ));
        }
        if chunking.window_overlap_lines >= chunking.max_chunk_lines {
            return Err(invalid(
                "chunking.window_overlap_lines",
                "must be smaller than max_chunk_lines",
            ));
        }
        if chunking.workers == 0 {
            return Err(invalid("chunking.workers", "must be greater than 0"));
        }

        let embedding = &self.embedding;
        if embedding.max_batch_items == 0 {
            return Err(invalid("embedding.max_batch_items", "must be greater than 0"));
        }
        if embedding.max_batch_tokens == 0 {
            return Err(invalid("embedding.max_batch_tokens", "must be greater than 0"));
        }
        if embedding.concurrency == 0 {
            return Err(invalid("embedding.concurrency", "must be greater than 0"));
        }
        if embedding.timeout_secs == 0 {
            return Err(invalid("embedding.timeout_secs", "must be greater than 0"));
        }
        embedding.retry.validate("embedding")?;

        let store = &self.vector_store;
        if store.backend != "memory" && store.backend != "qdrant" {
            return Err(invalid(
                "vector_store.backend",
                &format!("must be 'memory' or 'qdrant', got '{}'", store.backend),
            ));
        }
        if store.write_batch_size == 0 {
            return Err(invalid("vector_store.write_batch_size", "must be greater than 0"));
        }
        if store.timeout_secs == 0 {
            return Err(invalid("vector_store.timeout_secs", "must be greater than 0"));
        }
        store.retry.validate("vector_store")?;

        let repository = &self.repository;
        if repository.max_file_size == 0 {
            return Err(invalid("repository.max_file_size", "must be greater than 0"));
        }
        if repository.timeout_secs == 0 {
            return Err(invalid("repository.timeout_secs", "must be greater than 0"));
        }
        repository.retry.validate("repository")?;

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("RAG_INGEST_MAX_CHUNK_LINES")
            && let Ok(lines) = value.parse()
        {
            self.chunking.max_chunk_lines = lines;
        }

        if let Ok(model) = std::env::var("RAG_INGEST_MODEL") {
            self.embedding.model_name = model;
        }

        if let Ok(value) = std::env::var("RAG_INGEST_BATCH_SIZE")
            && let Ok(size) = value.parse()
        {
            self.embedding.max_batch_items = size;
        }

        if let Ok(value) = std::env::var("RAG_INGEST_EMBED_CONCURRENCY")
            && let Ok(concurrency) = value.parse()
        {
            self.embedding.concurrency = concurrency;
        }

        if let Ok(backend) = std::env::var("RAG_INGEST_STORE_BACKEND") {
            self.vector_store.backend = backend;
        }

        if let Ok(path) = std::env::var("RAG_INGEST_SNAPSHOT_PATH") {
            self.vector_store.snapshot_path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("RAG_INGEST_QDRANT_URL") {
            self.vector_store.qdrant_url = url;
        }
    }

    /// Create a new Config with defaults and environment overrides
    pub fn new() -> Result<Self, ConfigError> {
        let mut config = Self::load_or_default()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
