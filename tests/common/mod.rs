//! In-process fakes of the pipeline's collaborators
#![allow(dead_code)]

use async_trait::async_trait;
use rag_ingest::config::{Config, RetryConfig};
use rag_ingest::embedding::EmbeddingPort;
use rag_ingest::error::{EmbeddingServiceError, EventError, RepositoryError, VectorStoreError};
use rag_ingest::events::EventPort;
use rag_ingest::pipeline::IngestionPipeline;
use rag_ingest::repository::RepositoryPort;
use rag_ingest::types::{SourceFile, VectorEntry, VectorId};
use rag_ingest::vector_db::{MemoryVectorStore, VectorStorePort};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Configuration with millisecond retries so failure tests stay fast
pub fn test_config() -> Config {
    let retry = RetryConfig {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 2,
        jitter: 0.0,
    };
    let mut config = Config::default();
    config.chunking.workers = 2;
    config.embedding.retry = retry.clone();
    config.vector_store.retry = retry.clone();
    config.repository.retry = retry;
    config
}

/// Repository whose snapshots are set by the test
#[derive(Default)]
pub struct FakeRepository {
    files: Mutex<HashMap<String, Vec<SourceFile>>>,
    pub fetches: AtomicUsize,
    pub fetched_refs: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    pub delay: Mutex<Duration>,
}

impl FakeRepository {
    pub fn set_file(&self, repo_id: &str, path: &str, content: &str) {
        let mut files = self.files.lock().unwrap();
        let repo = files.entry(repo_id.to_string()).or_default();
        repo.retain(|f| f.path != path);
        repo.push(SourceFile::new(path, content));
        repo.sort_by(|a, b| a.path.cmp(&b.path));
    }

    pub fn remove_file(&self, repo_id: &str, path: &str) {
        if let Some(repo) = self.files.lock().unwrap().get_mut(repo_id) {
            repo.retain(|f| f.path != path);
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl RepositoryPort for FakeRepository {
    async fn fetch_files(
        &self,
        repo_id: &str,
        commit_ref: &str,
    ) -> Result<Vec<SourceFile>, RepositoryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetched_refs
            .lock()
            .unwrap()
            .push(commit_ref.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.files
            .lock()
            .unwrap()
            .get(repo_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(repo_id.to_string()))
    }
}

/// Embedder producing a small deterministic vector per text
#[derive(Default)]
pub struct CountingEmbedder {
    pub calls: AtomicUsize,
    pub texts: Mutex<Vec<String>>,
    /// Fail every call permanently
    pub fail: AtomicBool,
    /// Fail every call with a rate limit
    pub throttle: AtomicBool,
    /// Delay per call, so runs stay in flight long enough to be observed
    pub delay_ms: AtomicUsize,
}

impl CountingEmbedder {
    pub fn embedded_texts(&self) -> usize {
        self.texts.lock().unwrap().len()
    }
}

#[async_trait]
impl EmbeddingPort for CountingEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingServiceError::Permanent("model rejected input".to_string()));
        }
        if self.throttle.load(Ordering::SeqCst) {
            return Err(EmbeddingServiceError::Transient("429 too many requests".to_string()));
        }
        let vectors = texts
            .iter()
            .map(|t| vec![t.len() as f32, t.lines().count() as f32, 1.0])
            .collect();
        self.texts.lock().unwrap().extend(texts);
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        3
    }
}

/// Memory store that records every successful mutating call and can
/// refuse writes
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryVectorStore,
    pub upserts: AtomicUsize,
    pub deletes: Mutex<Vec<VectorId>>,
    /// Upsert calls allowed to succeed before the rest fail permanently
    pub upsert_budget: Mutex<Option<usize>>,
    /// Delete calls allowed to succeed before the rest fail permanently
    pub delete_budget: Mutex<Option<usize>>,
    /// Cancel this repository's run from inside the next upsert, which
    /// then succeeds
    pub cancel_on_upsert: Mutex<Option<(IngestionPipeline, String)>>,
}

impl RecordingStore {
    pub async fn ids(&self, repo_id: &str) -> HashSet<VectorId> {
        self.inner.list_ids(repo_id).await.unwrap()
    }

    pub fn fail_upserts_after(&self, successful_calls: usize) {
        *self.upsert_budget.lock().unwrap() = Some(successful_calls);
    }

    pub fn fail_deletes_after(&self, successful_calls: usize) {
        *self.delete_budget.lock().unwrap() = Some(successful_calls);
    }

    pub fn heal(&self) {
        *self.upsert_budget.lock().unwrap() = None;
        *self.delete_budget.lock().unwrap() = None;
    }
}

fn spend(budget: &Mutex<Option<usize>>) -> Result<(), VectorStoreError> {
    let mut budget = budget.lock().unwrap();
    if let Some(remaining) = budget.as_mut() {
        if *remaining == 0 {
            return Err(VectorStoreError::Permanent("disk full".to_string()));
        }
        *remaining -= 1;
    }
    Ok(())
}

#[async_trait]
impl VectorStorePort for RecordingStore {
    async fn upsert(&self, entries: Vec<VectorEntry>) -> Result<(), VectorStoreError> {
        spend(&self.upsert_budget)?;
        let hook = self.cancel_on_upsert.lock().unwrap().take();
        if let Some((pipeline, repo_id)) = hook {
            pipeline.cancel(&repo_id).await;
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(entries).await
    }

    async fn delete(&self, ids: &[VectorId]) -> Result<(), VectorStoreError> {
        spend(&self.delete_budget)?;
        self.deletes.lock().unwrap().extend_from_slice(ids);
        self.inner.delete(ids).await
    }

    async fn list_ids(&self, repo_id: &str) -> Result<HashSet<VectorId>, VectorStoreError> {
        self.inner.list_ids(repo_id).await
    }
}

/// Records published events; optionally fails every publish
#[derive(Default)]
pub struct RecordingEvents {
    pub events: Mutex<Vec<(String, Value)>>,
    pub fail: AtomicBool,
}

impl RecordingEvents {
    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl EventPort for RecordingEvents {
    async fn publish(&self, event_name: &str, payload: &Value) -> Result<(), EventError> {
        self.events
            .lock()
            .unwrap()
            .push((event_name.to_string(), payload.clone()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(EventError::PublishFailed {
                event: event_name.to_string(),
                reason: "broker unreachable".to_string(),
            });
        }
        Ok(())
    }
}

/// A pipeline wired to fresh fakes
pub struct Harness {
    pub repository: Arc<FakeRepository>,
    pub embedder: Arc<CountingEmbedder>,
    pub store: Arc<RecordingStore>,
    pub events: Arc<RecordingEvents>,
    pub pipeline: IngestionPipeline,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let repository = Arc::new(FakeRepository::default());
        let embedder = Arc::new(CountingEmbedder::default());
        let store = Arc::new(RecordingStore::default());
        let events = Arc::new(RecordingEvents::default());
        let pipeline = IngestionPipeline::new(
            &config,
            repository.clone(),
            embedder.clone(),
            store.clone(),
            events.clone(),
        )
        .unwrap();

        Self {
            repository,
            embedder,
            store,
            events,
            pipeline,
        }
    }
}

/// Python module of `functions` functions, each `body_lines + 2` lines long
pub fn python_module(functions: usize, body_lines: usize) -> String {
    let mut source = String::from("import os\n\n");
    for f in 0..functions {
        source.push_str(&format!("def func_{f}(path):\n"));
        for i in 0..body_lines {
            source.push_str(&format!("    step_{i} = os.path.join(path, '{i}')\n"));
        }
        source.push_str("    return path\n\n");
    }
    source
}

/// `class Store:` with `methods` methods of 18 lines each
pub fn python_class(methods: usize) -> String {
    let mut source = String::from("class Store:\n");
    for m in 0..methods {
        source.push_str(&format!("    def op_{m}(self):\n"));
        for i in 0..16 {
            source.push_str(&format!("        v_{i} = {i}\n"));
        }
        source.push_str("        return self\n\n");
    }
    source
}
