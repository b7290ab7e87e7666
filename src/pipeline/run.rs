//! Execution of one ingestion run
//!
//! fetch -> chunk -> diff against the store -> embed -> upsert -> delete.
//! Nothing is written until every new chunk has a vector, upserts are rolled
//! back if they cannot all be written, and stale ids are only deleted once
//! the run has confirmed it is still the authoritative run for its repository.

use super::PipelineInner;
use super::run_slot::StartedRun;
use crate::error::{Classify, ErrorClass, IngestError, VectorStoreError};
use crate::retry::{RetryFailure, retry};
use crate::types::{Chunk, IngestionRun, RunFailure, SourceFile, VectorEntry, VectorId};
use crate::vector_db::WriteInterrupted;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Return early with the run's interruption error if it has been cancelled
macro_rules! check_cancelled {
    ($run:expr) => {
        if $run.cancel.is_cancelled() {
            return Err($run.interruption());
        }
    };
}

/// How the current snapshot's chunks relate to what the store holds
#[derive(Debug, Default)]
pub(crate) struct ChunkDiff {
    /// Chunks whose ids are not stored yet
    pub(crate) to_embed: Vec<Chunk>,
    /// Stored ids absent from the snapshot, sorted
    pub(crate) to_delete: Vec<VectorId>,
    pub(crate) unchanged: usize,
}

impl ChunkDiff {
    pub(crate) fn compute(chunks: Vec<Chunk>, existing: &HashSet<VectorId>) -> Self {
        let current: HashSet<VectorId> = chunks.iter().map(|c| c.vector_id.clone()).collect();

        let mut to_delete: Vec<VectorId> = existing.difference(&current).cloned().collect();
        to_delete.sort();

        let (unchanged, to_embed): (Vec<Chunk>, Vec<Chunk>) = chunks
            .into_iter()
            .partition(|chunk| existing.contains(&chunk.vector_id));

        Self {
            to_embed,
            to_delete,
            unchanged: unchanged.len(),
        }
    }
}

/// Drop later chunks whose id repeats an earlier one, keeping input order
pub(crate) fn dedup_chunks(chunks: &mut Vec<Chunk>) -> usize {
    let before = chunks.len();
    let mut seen = HashSet::with_capacity(chunks.len());
    chunks.retain(|chunk| seen.insert(chunk.vector_id.clone()));
    before - chunks.len()
}

/// Execute a run to completion and return its terminal record
pub(crate) async fn execute(
    inner: Arc<PipelineInner>,
    repo_id: String,
    started: StartedRun,
) -> IngestionRun {
    let mut run = IngestionRun::start(started.run_id, &repo_id, &started.commit_ref);
    let start = Instant::now();
    tracing::info!(
        "Run {} started for {}@{}",
        run.run_id,
        repo_id,
        started.commit_ref
    );

    match process(&inner, &started, &mut run).await {
        Ok(()) => {
            run.succeed();
            tracing::info!(
                "Run {} for {} succeeded in {:?}: {} processed, {} unchanged, {} deleted",
                run.run_id,
                repo_id,
                start.elapsed(),
                run.chunks_processed,
                run.chunks_skipped,
                run.chunks_deleted
            );
        }
        Err(e) => {
            let class = e.class();
            if class == ErrorClass::Cancelled {
                tracing::info!("Run {} for {} stopped: {}", run.run_id, repo_id, e);
            } else {
                tracing::error!("Run {} for {} failed ({}): {}", run.run_id, repo_id, class, e);
            }
            run.fail_with(RunFailure::from(&e));
        }
    }

    run
}

async fn process(
    inner: &PipelineInner,
    started: &StartedRun,
    run: &mut IngestionRun,
) -> Result<(), IngestError> {
    let repo_id = run.repo_id.clone();

    let files = fetch(inner, started, &repo_id).await?;
    run.files_fetched = files.len();
    check_cancelled!(started);

    let mut chunks = chunk_files(inner, &repo_id, files).await?;
    let duplicates = dedup_chunks(&mut chunks);
    if duplicates > 0 {
        tracing::debug!("Dropped {} duplicate chunks in {}", duplicates, repo_id);
    }
    check_cancelled!(started);

    let existing = inner
        .writer
        .list_ids(&repo_id, &started.cancel)
        .await
        .map_err(|f| store_failure(f, started))?;

    let diff = ChunkDiff::compute(chunks, &existing);
    run.chunks_skipped = diff.unchanged;
    tracing::info!(
        "{}: {} to embed, {} unchanged, {} to delete",
        repo_id,
        diff.to_embed.len(),
        diff.unchanged,
        diff.to_delete.len()
    );

    let entries = embed(inner, started, &diff.to_embed).await?;
    check_cancelled!(started);

    let new_ids: Vec<VectorId> = entries.iter().map(|e| e.id.clone()).collect();
    match inner.writer.upsert(entries, &started.cancel).await {
        Ok(written) => run.chunks_processed = written,
        Err(WriteInterrupted {
            applied,
            failure: RetryFailure::Cancelled,
        }) => {
            // Entries already written are valid content and get reconciled next run
            run.chunks_processed = applied;
            return Err(started.interruption());
        }
        Err(WriteInterrupted {
            failure: RetryFailure::Exhausted { error, .. },
            ..
        }) => {
            roll_back(inner, &repo_id, &new_ids).await;
            return Err(IngestError::VectorStore(error));
        }
    }

    if !inner.slots.is_authoritative(&repo_id, started.run_id).await {
        return Err(started.interruption());
    }

    if !diff.to_delete.is_empty() {
        // Deletes run to completion once started
        match inner
            .writer
            .delete(&diff.to_delete, &CancellationToken::new())
            .await
        {
            Ok(deleted) => run.chunks_deleted = deleted,
            Err(WriteInterrupted { applied, failure }) => {
                // New content is in place; the remaining stale ids go next run
                run.chunks_deleted = applied;
                return Err(match failure {
                    RetryFailure::Cancelled => started.interruption(),
                    RetryFailure::Exhausted { error, .. } => IngestError::IncompleteDelete {
                        deleted: applied,
                        total: diff.to_delete.len(),
                        error,
                    },
                });
            }
        }
    }

    Ok(())
}

async fn fetch(
    inner: &PipelineInner,
    started: &StartedRun,
    repo_id: &str,
) -> Result<Vec<SourceFile>, IngestError> {
    let operation = format!("fetch of {}@{}", repo_id, started.commit_ref);
    retry(
        &inner.repository_policy,
        inner.repository_timeout,
        &started.cancel,
        &operation,
        || inner.repository.fetch_files(repo_id, &started.commit_ref),
    )
    .await
    .map_err(|failure| match failure {
        RetryFailure::Cancelled => started.interruption(),
        RetryFailure::Exhausted { error, .. } => IngestError::Repository(error),
    })
}

/// Chunk every file on the chunking pool, keeping file order
async fn chunk_files(
    inner: &PipelineInner,
    repo_id: &str,
    files: Vec<SourceFile>,
) -> Result<Vec<Chunk>, IngestError> {
    use rayon::prelude::*;

    let chunker = inner.chunker.clone();
    let repo_id = repo_id.to_string();
    let (tx, rx) = tokio::sync::oneshot::channel();

    inner.chunk_pool.spawn(move || {
        let per_file: Vec<Vec<Chunk>> = files
            .par_iter()
            .map(|file| chunker.chunk_file(&repo_id, &file.path, &file.content))
            .collect();
        let _ = tx.send(per_file.into_iter().flatten().collect::<Vec<_>>());
    });

    rx.await
        .map_err(|_| IngestError::Internal("chunking worker stopped".to_string()))
}

async fn embed(
    inner: &PipelineInner,
    started: &StartedRun,
    chunks: &[Chunk],
) -> Result<Vec<VectorEntry>, IngestError> {
    let mut outcome = inner.batcher.embed(chunks, &started.cancel).await;

    if outcome.cancelled {
        return Err(started.interruption());
    }
    if let Some(last) = outcome.failures.last() {
        return Err(IngestError::Embedding {
            failed_batches: outcome.failures.len(),
            failed_chunks: outcome.failed_chunks(),
            last_error: last.error.clone(),
        });
    }

    chunks
        .iter()
        .map(|chunk| {
            let vector = outcome.vectors.remove(&chunk.vector_id).ok_or_else(|| {
                IngestError::Internal(format!("no vector returned for chunk {}", chunk.vector_id))
            })?;
            Ok(VectorEntry {
                id: chunk.vector_id.clone(),
                vector,
                payload: chunk.payload(),
            })
        })
        .collect()
}

/// Remove the ids a failed run upserted. They were absent before the run,
/// so deleting them restores the previous id set.
async fn roll_back(inner: &PipelineInner, repo_id: &str, ids: &[VectorId]) {
    if ids.is_empty() {
        return;
    }
    match inner.writer.delete(ids, &CancellationToken::new()).await {
        Ok(_) => tracing::info!("Rolled back {} upserts in {}", ids.len(), repo_id),
        Err(e) => tracing::error!(
            "Rollback of {} upserts in {} failed, the next run will reconcile them: {:?}",
            ids.len(),
            repo_id,
            e
        ),
    }
}

fn store_failure(failure: RetryFailure<VectorStoreError>, started: &StartedRun) -> IngestError {
    match failure {
        RetryFailure::Cancelled => started.interruption(),
        RetryFailure::Exhausted { error, .. } => IngestError::VectorStore(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SymbolKind;

    fn chunk(id: &str, path: &str) -> Chunk {
        Chunk {
            repo_id: "repo".to_string(),
            file_path: path.to_string(),
            start_line: 1,
            end_line: 3,
            symbol_name: None,
            symbol_kind: SymbolKind::Unknown,
            language: None,
            content: format!("content of {}", id),
            content_hash: id.to_string(),
            vector_id: VectorId::from_hex(id),
            seam_context: String::new(),
        }
    }

    fn ids(values: &[&str]) -> HashSet<VectorId> {
        values.iter().map(|v| VectorId::from_hex(*v)).collect()
    }

    #[test]
    fn test_diff_partitions_snapshot() {
        let chunks = vec![chunk("a", "x.rs"), chunk("b", "x.rs"), chunk("c", "y.rs")];
        let existing = ids(&["a", "c", "d", "e"]);

        let diff = ChunkDiff::compute(chunks, &existing);

        assert_eq!(diff.unchanged, 2);
        assert_eq!(diff.to_embed.len(), 1);
        assert_eq!(diff.to_embed[0].vector_id.as_str(), "b");
        assert_eq!(
            diff.to_delete,
            vec![VectorId::from_hex("d"), VectorId::from_hex("e")]
        );
    }

    #[test]
    fn test_diff_against_empty_store() {
        let chunks = vec![chunk("a", "x.rs"), chunk("b", "x.rs")];
        let diff = ChunkDiff::compute(chunks, &HashSet::new());

        assert_eq!(diff.to_embed.len(), 2);
        assert_eq!(diff.unchanged, 0);
        assert!(diff.to_delete.is_empty());
    }

    #[test]
    fn test_diff_of_empty_snapshot_deletes_everything() {
        let diff = ChunkDiff::compute(Vec::new(), &ids(&["a", "b"]));

        assert!(diff.to_embed.is_empty());
        assert_eq!(diff.to_delete.len(), 2);
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let mut chunks = vec![chunk("a", "x.rs"), chunk("b", "x.rs"), chunk("a", "y.rs")];

        let dropped = dedup_chunks(&mut chunks);

        assert_eq!(dropped, 1);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].file_path, "x.rs");
        assert_eq!(chunks[1].vector_id.as_str(), "b");
    }
}
