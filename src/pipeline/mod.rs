//! Ingestion pipeline: keeps a vector index in sync with repository snapshots
//!
//! A trigger names a repository and a commit reference. The pipeline fetches
//! the snapshot, chunks it, embeds only chunks whose content-addressed ids
//! are not stored yet, upserts them and deletes ids that no longer exist.
//! Runs for one repository never overlap; runs for different repositories
//! proceed concurrently and share the chunking pool and embedding budget.

mod run;
mod run_slot;

pub use run_slot::{RepoStatus, RunReport};

use crate::config::Config;
use crate::embedding::{EmbeddingBatcher, EmbeddingPort};
use crate::error::{ErrorClass, IngestError};
use crate::events::EventPort;
use crate::indexer::CodeChunker;
use crate::repository::RepositoryPort;
use crate::retry::RetryPolicy;
use crate::types::{IngestionEvent, IngestionRun};
use crate::vector_db::{VectorIndexWriter, VectorStorePort};
use run_slot::{Admission, RunSlots, StartedRun};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// How a trigger was admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDisposition {
    /// No run was active; a run started immediately
    Started,
    /// A run was active; this trigger will run after it
    Queued,
    /// A run was active and another was already queued; this trigger was
    /// folded into the queued one, which will use the latest commit reference
    Coalesced,
}

/// Handle returned by [`IngestionPipeline::trigger`]
pub struct RunTicket {
    pub repo_id: String,
    pub commit_ref: String,
    /// Id of the run that will serve this trigger
    pub run_id: u64,
    pub disposition: TriggerDisposition,
    receiver: broadcast::Receiver<RunReport>,
}

impl RunTicket {
    /// Wait for the run serving this trigger to reach a terminal state
    pub async fn wait(mut self) -> RunReport {
        match self.receiver.recv().await {
            Ok(report) => report,
            Err(e) => {
                let mut run = IngestionRun::start(self.run_id, &self.repo_id, &self.commit_ref);
                run.fail(
                    ErrorClass::Permanent,
                    format!("run ended without a report: {}", e),
                );
                run
            }
        }
    }
}

/// Shared state behind every clone of a pipeline
pub(crate) struct PipelineInner {
    repository: Arc<dyn RepositoryPort>,
    events: Arc<dyn EventPort>,
    chunker: CodeChunker,
    chunk_pool: rayon::ThreadPool,
    batcher: EmbeddingBatcher,
    writer: VectorIndexWriter,
    repository_policy: RetryPolicy,
    repository_timeout: Duration,
    supersede_running: bool,
    slots: RunSlots,
}

/// Orchestrates ingestion runs across repositories
///
/// # Example
///
/// ```no_run
/// use rag_ingest::config::Config;
/// use rag_ingest::embedding::FastEmbedEmbedder;
/// use rag_ingest::events::TracingEventPublisher;
/// use rag_ingest::pipeline::IngestionPipeline;
/// use rag_ingest::repository::LocalRepository;
/// use rag_ingest::vector_db::MemoryVectorStore;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = Config::default();
///     let repository =
///         LocalRepository::new(&config.repository)?.with_root("my-repo", "/path/to/code");
///     let pipeline = IngestionPipeline::new(
///         &config,
///         Arc::new(repository),
///         Arc::new(FastEmbedEmbedder::new()?),
///         Arc::new(MemoryVectorStore::new()),
///         Arc::new(TracingEventPublisher),
///     )?;
///
///     let report = pipeline.ingest("my-repo", "HEAD").await?;
///     println!("{} chunks embedded", report.chunks_processed);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct IngestionPipeline {
    inner: Arc<PipelineInner>,
}

impl IngestionPipeline {
    pub fn new(
        config: &Config,
        repository: Arc<dyn RepositoryPort>,
        embedder: Arc<dyn EmbeddingPort>,
        store: Arc<dyn VectorStorePort>,
        events: Arc<dyn EventPort>,
    ) -> Result<Self, IngestError> {
        config.validate()?;

        let chunk_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.chunking.workers.max(1))
            .thread_name(|i| format!("rag-chunk-{}", i))
            .build()
            .map_err(|e| IngestError::Internal(format!("failed to start chunking pool: {}", e)))?;

        tracing::info!(
            "Ingestion pipeline ready: {} chunking workers, embedding concurrency {}",
            config.chunking.workers.max(1),
            config.embedding.concurrency
        );

        Ok(Self {
            inner: Arc::new(PipelineInner {
                repository,
                events,
                chunker: CodeChunker::new(&config.chunking),
                chunk_pool,
                batcher: EmbeddingBatcher::new(embedder, &config.embedding),
                writer: VectorIndexWriter::new(store, &config.vector_store),
                repository_policy: config.repository.retry.policy(),
                repository_timeout: Duration::from_secs(config.repository.timeout_secs),
                supersede_running: config.pipeline.supersede_running,
                slots: RunSlots::new(),
            }),
        })
    }

    /// Request ingestion of `repo_id` at `commit_ref`
    ///
    /// Returns as soon as the trigger is admitted. Fails only once
    /// [`shutdown`](Self::shutdown) has been called.
    pub async fn trigger(&self, repo_id: &str, commit_ref: &str) -> Result<RunTicket, IngestError> {
        let admission = self
            .inner
            .slots
            .admit(repo_id, commit_ref, self.inner.supersede_running)
            .await;

        let (run_id, disposition, receiver) = match admission {
            Admission::Start { run, receiver } => {
                let run_id = run.run_id;
                tokio::spawn(drive(self.inner.clone(), repo_id.to_string(), run));
                (run_id, TriggerDisposition::Started, receiver)
            }
            Admission::Queued { run_id, receiver } => {
                tracing::info!("Queued run {} for {}@{}", run_id, repo_id, commit_ref);
                (run_id, TriggerDisposition::Queued, receiver)
            }
            Admission::Coalesced { run_id, receiver } => {
                tracing::debug!(
                    "Coalesced trigger for {}@{} into run {}",
                    repo_id,
                    commit_ref,
                    run_id
                );
                (run_id, TriggerDisposition::Coalesced, receiver)
            }
            Admission::Closed => return Err(IngestError::Cancelled),
        };

        Ok(RunTicket {
            repo_id: repo_id.to_string(),
            commit_ref: commit_ref.to_string(),
            run_id,
            disposition,
            receiver,
        })
    }

    /// Trigger a run and wait for the report of the run that serves it
    pub async fn ingest(&self, repo_id: &str, commit_ref: &str) -> Result<RunReport, IngestError> {
        Ok(self.trigger(repo_id, commit_ref).await?.wait().await)
    }

    /// Cancel the active run of `repo_id`. Writes already made remain and a
    /// queued run still starts afterwards. Returns false if nothing was running.
    pub async fn cancel(&self, repo_id: &str) -> bool {
        let cancelled = self.inner.slots.cancel(repo_id).await;
        if cancelled {
            tracing::info!("Cancellation requested for {}", repo_id);
        }
        cancelled
    }

    pub async fn status(&self, repo_id: &str) -> RepoStatus {
        self.inner.slots.status(repo_id).await
    }

    /// Report of the most recent run of `repo_id` that reached a terminal state
    pub async fn last_report(&self, repo_id: &str) -> Option<RunReport> {
        self.inner.slots.last_report(repo_id).await
    }

    /// Stop accepting triggers, cancel active runs and wait for them to report
    pub async fn shutdown(&self) {
        let waiters = self.inner.slots.close().await;
        tracing::info!("Shutting down, waiting for {} active run(s)", waiters.len());
        for mut waiter in waiters {
            let _ = waiter.recv().await;
        }
    }
}

/// Execute `first`, then every run promoted from the queue, for one repository
async fn drive(inner: Arc<PipelineInner>, repo_id: String, first: StartedRun) {
    let mut next = Some(first);
    while let Some(started) = next {
        let report = run_isolated(&inner, &repo_id, started).await;
        announce(inner.events.as_ref(), &report).await;
        next = inner.slots.finish(&repo_id, report).await;
    }
}

/// Run on its own task so a panic becomes a failed report instead of a
/// slot that never frees
async fn run_isolated(inner: &Arc<PipelineInner>, repo_id: &str, started: StartedRun) -> RunReport {
    let run_id = started.run_id;
    let commit_ref = started.commit_ref.clone();
    let handle = tokio::spawn(run::execute(inner.clone(), repo_id.to_string(), started));

    match handle.await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Run {} for {} aborted: {}", run_id, repo_id, e);
            let mut run = IngestionRun::start(run_id, repo_id, commit_ref);
            run.fail(ErrorClass::Permanent, format!("run task failed: {}", e));
            run
        }
    }
}

/// Publish the terminal event of a run. Failures are logged and do not
/// change the run's outcome.
async fn announce(events: &dyn EventPort, report: &RunReport) {
    let event = IngestionEvent::from_run(report);
    let payload = match serde_json::to_value(&event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Failed to serialize event for run {}: {}", report.run_id, e);
            return;
        }
    };

    if let Err(e) = events.publish(event.name(), &payload).await {
        tracing::warn!("Could not announce run {}: {}", report.run_id, e);
    }
}
