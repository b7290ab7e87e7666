use super::VectorStorePort;
use crate::config::VectorStoreConfig;
use crate::error::VectorStoreError;
use crate::retry::{RetryFailure, RetryPolicy, retry};
use crate::types::{VectorEntry, VectorId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A batched write that stopped part way through
#[derive(Debug, Clone, PartialEq)]
pub struct WriteInterrupted {
    /// Items in the batches that were applied before the failure
    pub applied: usize,
    pub failure: RetryFailure<VectorStoreError>,
}

/// Writes to a [`VectorStorePort`] in bounded batches, with a timeout and
/// the retry policy applied to every call
pub struct VectorIndexWriter {
    store: Arc<dyn VectorStorePort>,
    write_batch_size: usize,
    timeout: Duration,
    policy: RetryPolicy,
}

impl VectorIndexWriter {
    pub fn new(store: Arc<dyn VectorStorePort>, config: &VectorStoreConfig) -> Self {
        Self {
            store,
            write_batch_size: config.write_batch_size.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            policy: config.retry.policy(),
        }
    }

    /// Override the retry policy and per-call timeout
    pub fn with_retry(mut self, policy: RetryPolicy, timeout: Duration) -> Self {
        self.policy = policy;
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn VectorStorePort> {
        &self.store
    }

    /// Upsert entries, `write_batch_size` at a time. Returns the number of
    /// entries written. Stops at the first batch that cannot be written,
    /// reporting how many entries earlier batches applied.
    pub async fn upsert(
        &self,
        entries: Vec<VectorEntry>,
        cancel: &CancellationToken,
    ) -> Result<usize, WriteInterrupted> {
        let total = entries.len();
        let mut written = 0;

        for batch in entries.chunks(self.write_batch_size) {
            let operation = format!("upsert of {} entries", batch.len());
            retry(&self.policy, self.timeout, cancel, &operation, || {
                self.store.upsert(batch.to_vec())
            })
            .await
            .map_err(|failure| WriteInterrupted {
                applied: written,
                failure,
            })?;
            written += batch.len();
            tracing::debug!("Upserted {}/{} entries", written, total);
        }

        Ok(written)
    }

    /// Delete ids, `write_batch_size` at a time. Returns the number of ids
    /// submitted for deletion. Batches deleted before a failure stay deleted.
    pub async fn delete(
        &self,
        ids: &[VectorId],
        cancel: &CancellationToken,
    ) -> Result<usize, WriteInterrupted> {
        let mut deleted = 0;

        for batch in ids.chunks(self.write_batch_size) {
            let operation = format!("delete of {} ids", batch.len());
            retry(&self.policy, self.timeout, cancel, &operation, || {
                self.store.delete(batch)
            })
            .await
            .map_err(|failure| WriteInterrupted {
                applied: deleted,
                failure,
            })?;
            deleted += batch.len();
        }

        Ok(deleted)
    }

    /// Every id stored for a repository
    pub async fn list_ids(
        &self,
        repo_id: &str,
        cancel: &CancellationToken,
    ) -> Result<HashSet<VectorId>, RetryFailure<VectorStoreError>> {
        let operation = format!("listing ids of {}", repo_id);
        retry(&self.policy, self.timeout, cancel, &operation, || {
            self.store.list_ids(repo_id)
        })
        .await
    }
}
