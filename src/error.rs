/// Centralized error types for rag-ingest using thiserror
///
/// Each external port has its own error enum; the run-level [`IngestError`]
/// wraps them and carries the classification reported in failure events.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a failure, used for retry decisions and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorClass {
    /// Network timeout, rate limit, 5xx: worth retrying
    Transient,
    /// Not found, auth rejected, malformed configuration: retrying will not help
    Permanent,
    /// The run was cancelled or superseded by a newer trigger
    Cancelled,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Permanent => write!(f, "permanent"),
            ErrorClass::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Anything the retry policy can classify
pub trait Classify {
    /// Classification of this error
    fn class(&self) -> ErrorClass;

    /// Whether another attempt may succeed
    fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Errors raised by a [`RepositoryPort`](crate::repository::RepositoryPort)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Repository '{repo_id}' unavailable: {reason}")]
    Unavailable {
        repo_id: String,
        reason: String,
        /// Network failures are transient, authentication failures are not
        transient: bool,
    },

    #[error("Repository '{0}' not found")]
    NotFound(String),

    #[error("Reference '{reference}' not found in repository '{repo_id}'")]
    RefNotFound { repo_id: String, reference: String },

    #[error("Repository fetch timed out after {0} seconds")]
    Timeout(u64),
}

impl Classify for RepositoryError {
    fn class(&self) -> ErrorClass {
        match self {
            RepositoryError::Unavailable { transient: true, .. } | RepositoryError::Timeout(_) => {
                ErrorClass::Transient
            }
            _ => ErrorClass::Permanent,
        }
    }
}

/// Errors raised by an [`EmbeddingPort`](crate::embedding::EmbeddingPort)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingServiceError {
    #[error("Transient embedding failure: {0}")]
    Transient(String),

    #[error("Permanent embedding failure: {0}")]
    Permanent(String),

    #[error("Embedding request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Embedding service returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
}

impl Classify for EmbeddingServiceError {
    fn class(&self) -> ErrorClass {
        match self {
            EmbeddingServiceError::Transient(_) | EmbeddingServiceError::Timeout(_) => {
                ErrorClass::Transient
            }
            _ => ErrorClass::Permanent,
        }
    }
}

/// Errors raised by a [`VectorStorePort`](crate::vector_db::VectorStorePort)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VectorStoreError {
    #[error("Transient vector store failure: {0}")]
    Transient(String),

    #[error("Permanent vector store failure: {0}")]
    Permanent(String),

    #[error("Vector store call timed out after {0} seconds")]
    Timeout(u64),
}

impl Classify for VectorStoreError {
    fn class(&self) -> ErrorClass {
        match self {
            VectorStoreError::Transient(_) | VectorStoreError::Timeout(_) => ErrorClass::Transient,
            VectorStoreError::Permanent(_) => ErrorClass::Permanent,
        }
    }
}

/// Errors raised by an [`EventPort`](crate::events::EventPort)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Failed to publish '{event}': {reason}")]
    PublishFailed { event: String, reason: String },
}

/// Errors related to configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

/// Run-level error: why an ingestion run ended in `Failed`
#[derive(Error, Debug, Clone)]
pub enum IngestError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Embedding failed for {failed_chunks} chunk(s) in {failed_batches} batch(es): {last_error}")]
    Embedding {
        failed_batches: usize,
        failed_chunks: usize,
        last_error: EmbeddingServiceError,
    },

    #[error("Vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("Deleted {deleted} of {total} stale ids before the vector store failed: {error}")]
    IncompleteDelete {
        deleted: usize,
        total: usize,
        error: VectorStoreError,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Run was superseded by a newer trigger for the same repository")]
    Superseded,

    #[error("Run task failed: {0}")]
    Internal(String),
}

impl IngestError {
    /// Class of the port error behind this failure, before retries
    pub fn cause_class(&self) -> ErrorClass {
        match self {
            IngestError::Repository(e) => e.class(),
            IngestError::Embedding { last_error, .. } => last_error.class(),
            IngestError::VectorStore(e) | IngestError::IncompleteDelete { error: e, .. } => {
                e.class()
            }
            IngestError::Config(_) | IngestError::Internal(_) => ErrorClass::Permanent,
            IngestError::Cancelled | IngestError::Superseded => ErrorClass::Cancelled,
        }
    }

    /// Whether the run gave up on a transient error after spending its retries
    pub fn exhausted_retries(&self) -> bool {
        self.cause_class() == ErrorClass::Transient
    }
}

/// Port errors only reach run level once the retry policy has given up on
/// them, so a transient cause is reported as permanent.
impl Classify for IngestError {
    fn class(&self) -> ErrorClass {
        match self.cause_class() {
            ErrorClass::Transient => ErrorClass::Permanent,
            class => class,
        }
    }
}

impl From<ConfigError> for IngestError {
    fn from(err: ConfigError) -> Self {
        IngestError::Config(err.to_string())
    }
}
