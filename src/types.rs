use crate::error::{Classify, ErrorClass, IngestError};
use serde::{Deserialize, Serialize};

/// Kind of symbol a chunk was cut around
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Module,
    /// Structural parsing failed or the language has no grammar
    Unknown,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Module => "module",
            SymbolKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content-addressed identifier of a chunk in the vector store
///
/// A lowercase hex SHA-256 digest of `(repo_id, file_path, content_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorId(String);

impl VectorId {
    /// Wrap an already computed hex digest
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// UUID rendering of the first 128 bits, for stores that only accept UUID keys
    pub fn to_uuid_string(&self) -> String {
        let hex = &self.0;
        if hex.len() < 32 {
            return hex.clone();
        }
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}

impl std::fmt::Display for VectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A contiguous slice of one file's text, treated as one retrievable unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub repo_id: String,
    pub file_path: String,
    /// 1-based, inclusive
    pub start_line: usize,
    /// 1-based, inclusive
    pub end_line: usize,
    pub symbol_name: Option<String>,
    pub symbol_kind: SymbolKind,
    /// Language the file was parsed as, if any grammar matched
    pub language: Option<String>,
    /// Raw source text of the slice
    pub content: String,
    /// Digest of the normalized content combined with repo id and file path
    pub content_hash: String,
    pub vector_id: VectorId,
    /// Lines preceding a forced window seam, only fed to the embedding model
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub seam_context: String,
}

impl Chunk {
    /// Number of lines covered by this chunk
    pub fn line_count(&self) -> usize {
        self.end_line + 1 - self.start_line
    }

    /// Text sent to the embedding service: a short locating header, the seam
    /// context (if any), then the chunk content
    pub fn embedding_text(&self) -> String {
        let mut text = String::with_capacity(self.content.len() + self.seam_context.len() + 64);
        text.push_str("// ");
        text.push_str(&self.file_path);
        if let Some(name) = &self.symbol_name {
            text.push_str(&format!(" ({} {})", self.symbol_kind, name));
        }
        text.push('\n');
        if !self.seam_context.is_empty() {
            text.push_str(&self.seam_context);
            text.push('\n');
        }
        text.push_str(&self.content);
        text
    }

    /// Store payload describing this chunk
    pub fn payload(&self) -> ChunkPayload {
        ChunkPayload {
            repo_id: self.repo_id.clone(),
            file_path: self.file_path.clone(),
            start_line: self.start_line,
            end_line: self.end_line,
            symbol_name: self.symbol_name.clone(),
            symbol_kind: self.symbol_kind,
            language: self.language.clone(),
            content_hash: self.content_hash.clone(),
            content: self.content.clone(),
        }
    }
}

/// Metadata stored next to each vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub repo_id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub symbol_name: Option<String>,
    pub symbol_kind: SymbolKind,
    pub language: Option<String>,
    pub content_hash: String,
    pub content: String,
}

/// One record written to the vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: VectorId,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A file as returned by the repository collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the repository root, `/`-separated
    pub path: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// A retrieval hit from a searchable store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: VectorId,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Lifecycle state of an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

/// Why a run failed, as reported to callers and in failure events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    pub class: ErrorClass,
    pub message: String,
    /// The cause was transient but the retry policy ran out of attempts
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exhausted_retries: bool,
}

impl RunFailure {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            exhausted_retries: false,
        }
    }
}

impl From<&IngestError> for RunFailure {
    fn from(err: &IngestError) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
            exhausted_retries: err.exhausted_retries(),
        }
    }
}

/// One execution of the pipeline for a `(repo_id, commit_ref)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionRun {
    pub run_id: u64,
    pub repo_id: String,
    pub commit_ref: String,
    pub status: RunStatus,
    pub files_fetched: usize,
    /// Chunks embedded and upserted by this run
    pub chunks_processed: usize,
    /// Chunks already present with unchanged content
    pub chunks_skipped: usize,
    /// Ids present before the run and absent from the new snapshot
    pub chunks_deleted: usize,
    /// Unix millis
    pub started_at: i64,
    /// Unix millis, set once the run is terminal
    pub finished_at: Option<i64>,
    pub error: Option<RunFailure>,
}

impl IngestionRun {
    pub fn start(run_id: u64, repo_id: impl Into<String>, commit_ref: impl Into<String>) -> Self {
        Self {
            run_id,
            repo_id: repo_id.into(),
            commit_ref: commit_ref.into(),
            status: RunStatus::Running,
            files_fetched: 0,
            chunks_processed: 0,
            chunks_skipped: 0,
            chunks_deleted: 0,
            started_at: chrono::Utc::now().timestamp_millis(),
            finished_at: None,
            error: None,
        }
    }

    pub fn succeed(&mut self) {
        self.status = RunStatus::Succeeded;
        self.finished_at = Some(chrono::Utc::now().timestamp_millis());
    }

    /// Mark the run failed
    pub fn fail(&mut self, class: ErrorClass, message: impl Into<String>) {
        self.fail_with(RunFailure::new(class, message));
    }

    /// Mark the run failed. Counts are left as set: they describe writes
    /// that are still applied to the index.
    pub fn fail_with(&mut self, failure: RunFailure) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(chrono::Utc::now().timestamp_millis());
        self.error = Some(failure);
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RunStatus::Running
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// Event name announcing a successful run
pub const EVENT_INGESTION_SUCCEEDED: &str = "ingestionSucceeded";
/// Event name announcing a failed run
pub const EVENT_INGESTION_FAILED: &str = "ingestionFailed";

/// Payload published when a run terminates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionEvent {
    pub repo_id: String,
    pub commit_ref: String,
    pub run_id: u64,
    pub chunks_processed: usize,
    pub chunks_skipped: usize,
    pub chunks_deleted: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
}

impl IngestionEvent {
    pub fn from_run(run: &IngestionRun) -> Self {
        Self {
            repo_id: run.repo_id.clone(),
            commit_ref: run.commit_ref.clone(),
            run_id: run.run_id,
            chunks_processed: run.chunks_processed,
            chunks_skipped: run.chunks_skipped,
            chunks_deleted: run.chunks_deleted,
            error: run.error.clone(),
        }
    }

    /// Event name matching the run outcome
    pub fn name(&self) -> &'static str {
        if self.error.is_none() {
            EVENT_INGESTION_SUCCEEDED
        } else {
            EVENT_INGESTION_FAILED
        }
    }
}
