//! Batched, retried, concurrency-bounded embedding of chunks

use super::EmbeddingPort;
use crate::config::EmbeddingConfig;
use crate::error::EmbeddingServiceError;
use crate::retry::{RetryFailure, RetryPolicy, retry};
use crate::types::{Chunk, VectorId};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Rough token count used for batch sizing (about four characters per token)
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4).max(1)
}

/// A batch that could not be embedded
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub ids: Vec<VectorId>,
    pub error: EmbeddingServiceError,
    pub attempts: u32,
}

/// Result of embedding a set of chunks
#[derive(Debug, Default)]
pub struct EmbeddingOutcome {
    pub vectors: HashMap<VectorId, Vec<f32>>,
    pub failures: Vec<BatchFailure>,
    /// Cancellation stopped at least one batch
    pub cancelled: bool,
}

impl EmbeddingOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    pub fn failed_chunks(&self) -> usize {
        self.failures.iter().map(|f| f.ids.len()).sum()
    }
}

struct Batch {
    ids: Vec<VectorId>,
    texts: Vec<String>,
}

/// Groups chunks into request-sized batches and embeds them concurrently
///
/// The concurrency ceiling is enforced twice: per call by the stream buffer,
/// and across calls by a shared semaphore, so concurrent runs for different
/// repositories share one request budget.
pub struct EmbeddingBatcher {
    port: Arc<dyn EmbeddingPort>,
    max_batch_items: usize,
    max_batch_tokens: usize,
    concurrency: usize,
    permits: Arc<Semaphore>,
    timeout: Duration,
    policy: RetryPolicy,
}

impl EmbeddingBatcher {
    pub fn new(port: Arc<dyn EmbeddingPort>, config: &EmbeddingConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            port,
            max_batch_items: config.max_batch_items.max(1),
            max_batch_tokens: config.max_batch_tokens.max(1),
            concurrency,
            permits: Arc::new(Semaphore::new(concurrency)),
            timeout: Duration::from_secs(config.timeout_secs),
            policy: config.retry.policy(),
        }
    }

    /// Override the retry policy and per-request timeout
    pub fn with_retry(mut self, policy: RetryPolicy, timeout: Duration) -> Self {
        self.policy = policy;
        self.timeout = timeout;
        self
    }

    /// Split chunks into batches within the item and token limits, keeping
    /// input order. A chunk larger than the token limit is sent alone.
    fn batches(&self, chunks: &[Chunk]) -> Vec<Batch> {
        let mut batches = Vec::new();
        let mut current = Batch {
            ids: Vec::new(),
            texts: Vec::new(),
        };
        let mut tokens = 0;

        for chunk in chunks {
            let text = chunk.embedding_text();
            let cost = estimate_tokens(&text);

            let full = current.ids.len() >= self.max_batch_items
                || (!current.ids.is_empty() && tokens + cost > self.max_batch_tokens);
            if full {
                batches.push(std::mem::replace(
                    &mut current,
                    Batch {
                        ids: Vec::new(),
                        texts: Vec::new(),
                    },
                ));
                tokens = 0;
            }

            current.ids.push(chunk.vector_id.clone());
            current.texts.push(text);
            tokens += cost;
        }

        if !current.ids.is_empty() {
            batches.push(current);
        }
        batches
    }

    /// Embed every chunk, returning vectors keyed by id
    ///
    /// A batch that fails permanently, or exhausts its retries, is reported
    /// in `failures` without aborting the other batches.
    pub async fn embed(&self, chunks: &[Chunk], cancel: &CancellationToken) -> EmbeddingOutcome {
        let mut outcome = EmbeddingOutcome::default();
        if chunks.is_empty() {
            return outcome;
        }

        let batches = self.batches(chunks);
        tracing::debug!(
            "Embedding {} chunks in {} batches (concurrency {})",
            chunks.len(),
            batches.len(),
            self.concurrency
        );

        let results = stream::iter(batches.into_iter().enumerate().map(|(index, batch)| {
            let port = self.port.clone();
            let permits = self.permits.clone();
            async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => self.embed_batch(port, &batch, index, cancel).await,
                    Err(_) => Err(RetryFailure::Cancelled),
                };
                (batch.ids, result)
            }
        }))
        .buffer_unordered(self.concurrency);
        tokio::pin!(results);

        while let Some((ids, result)) = results.next().await {
            match result {
                Ok(vectors) => {
                    outcome.vectors.extend(ids.into_iter().zip(vectors));
                }
                Err(RetryFailure::Cancelled) => {
                    outcome.cancelled = true;
                }
                Err(RetryFailure::Exhausted { error, attempts }) => {
                    tracing::warn!(
                        "Embedding batch of {} chunks failed after {} attempt(s): {}",
                        ids.len(),
                        attempts,
                        error
                    );
                    outcome.failures.push(BatchFailure {
                        ids,
                        error,
                        attempts,
                    });
                }
            }
        }

        outcome
    }

    async fn embed_batch(
        &self,
        port: Arc<dyn EmbeddingPort>,
        batch: &Batch,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>, RetryFailure<EmbeddingServiceError>> {
        let operation = format!("embedding batch {}", index);
        let expected = batch.texts.len();

        retry(&self.policy, self.timeout, cancel, &operation, || {
            let port = port.clone();
            let texts = batch.texts.clone();
            async move {
                let vectors = port.embed(texts).await?;
                if vectors.len() != expected {
                    return Err(EmbeddingServiceError::CountMismatch {
                        expected,
                        actual: vectors.len(),
                    });
                }
                Ok(vectors)
            }
        })
        .await
    }
}
