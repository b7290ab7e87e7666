/// End-to-end tests of the ingestion pipeline against in-process fakes
mod common;

use common::{Harness, python_class, python_module, test_config};
use rag_ingest::config::Config;
use rag_ingest::error::{ErrorClass, IngestError};
use rag_ingest::pipeline::{IngestionPipeline, RepoStatus, TriggerDisposition};
use rag_ingest::repository::LocalRepository;
use rag_ingest::types::RunStatus;
use rag_ingest::vector_db::{MemoryVectorStore, VectorStorePort};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

const REPO: &str = "acme/widgets";

fn config_60() -> Config {
    let mut config = test_config();
    config.chunking.max_chunk_lines = 60;
    config
}

/// Three functions in a.py and a ten-method class in b.py: 13 chunks
fn seed_thirteen(harness: &Harness) {
    harness
        .repository
        .set_file(REPO, "a.py", &python_module(3, 12));
    harness
        .repository
        .set_file(REPO, "b.py", &python_class(10));
}

#[tokio::test]
async fn test_first_run_embeds_every_chunk() {
    let harness = Harness::with_config(config_60());
    seed_thirteen(&harness);

    let report = harness.pipeline.ingest(REPO, "c1").await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.files_fetched, 2);
    assert_eq!(report.chunks_processed, 13);
    assert_eq!(report.chunks_skipped, 0);
    assert_eq!(report.chunks_deleted, 0);
    assert_eq!(harness.store.ids(REPO).await.len(), 13);
    assert_eq!(harness.embedder.embedded_texts(), 13);
}

#[tokio::test]
async fn test_reingesting_unchanged_snapshot_is_free() {
    let harness = Harness::with_config(config_60());
    seed_thirteen(&harness);
    harness.pipeline.ingest(REPO, "c1").await.unwrap();
    let ids_before = harness.store.ids(REPO).await;
    let calls_before = harness.embedder.calls.load(Ordering::SeqCst);
    let upserts_before = harness.store.upserts.load(Ordering::SeqCst);

    let report = harness.pipeline.ingest(REPO, "c1").await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.chunks_processed, 0);
    assert_eq!(report.chunks_skipped, 13);
    assert_eq!(report.chunks_deleted, 0);
    assert_eq!(harness.embedder.calls.load(Ordering::SeqCst), calls_before);
    assert_eq!(harness.store.upserts.load(Ordering::SeqCst), upserts_before);
    assert_eq!(harness.store.ids(REPO).await, ids_before);
}

#[tokio::test]
async fn test_editing_one_method_replaces_one_chunk() {
    let harness = Harness::with_config(config_60());
    seed_thirteen(&harness);
    harness.pipeline.ingest(REPO, "c1").await.unwrap();
    let ids_before = harness.store.ids(REPO).await;

    let edited = python_class(10).replacen(
        "    def op_4(self):\n        v_0 = 0\n",
        "    def op_4(self):\n        v_0 = 100\n",
        1,
    );
    harness.repository.set_file(REPO, "b.py", &edited);
    let report = harness.pipeline.ingest(REPO, "c2").await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.chunks_processed, 1);
    assert_eq!(report.chunks_skipped, 12);
    assert_eq!(report.chunks_deleted, 1);

    let ids_after = harness.store.ids(REPO).await;
    assert_eq!(ids_after.len(), 13);
    assert_eq!(ids_before.intersection(&ids_after).count(), 12);
}

#[tokio::test]
async fn test_change_in_one_file_only_embeds_that_file() {
    let harness = Harness::with_config(config_60());
    seed_thirteen(&harness);
    harness.pipeline.ingest(REPO, "c1").await.unwrap();
    let texts_before = harness.embedder.embedded_texts();

    let edited = python_module(3, 12).replacen("def func_1(path):", "def func_1(root):", 1);
    harness.repository.set_file(REPO, "a.py", &edited);
    let report = harness.pipeline.ingest(REPO, "c2").await.unwrap();

    assert_eq!(report.chunks_processed, 1);
    let texts = harness.embedder.texts.lock().unwrap();
    let new_texts = &texts[texts_before..];
    assert_eq!(new_texts.len(), 1);
    assert!(new_texts[0].starts_with("// a.py"));
    assert!(new_texts[0].contains("func_1"));
}

#[tokio::test]
async fn test_removed_file_is_deleted_from_index() {
    let harness = Harness::with_config(config_60());
    seed_thirteen(&harness);
    harness.pipeline.ingest(REPO, "c1").await.unwrap();

    harness.repository.remove_file(REPO, "b.py");
    let report = harness.pipeline.ingest(REPO, "c2").await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.chunks_deleted, 10);
    assert_eq!(report.chunks_skipped, 3);
    assert_eq!(harness.store.ids(REPO).await.len(), 3);
    assert_eq!(harness.store.deletes.lock().unwrap().len(), 10);
}

#[tokio::test]
async fn test_embedding_failure_leaves_index_untouched() {
    let harness = Harness::with_config(config_60());
    seed_thirteen(&harness);
    harness.pipeline.ingest(REPO, "c1").await.unwrap();
    let ids_before = harness.store.ids(REPO).await;
    let upserts_before = harness.store.upserts.load(Ordering::SeqCst);

    let edited = python_module(3, 12).replacen("def func_2(path):", "def func_2(base):", 1);
    harness.repository.set_file(REPO, "a.py", &edited);
    harness.repository.remove_file(REPO, "b.py");
    harness.embedder.fail.store(true, Ordering::SeqCst);

    let report = harness.pipeline.ingest(REPO, "c2").await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    let failure = report.error.as_ref().unwrap();
    assert_eq!(failure.class, ErrorClass::Permanent);
    assert!(failure.message.contains("Embedding failed"));
    assert_eq!(report.chunks_deleted, 0);
    assert_eq!(harness.store.ids(REPO).await, ids_before);
    assert_eq!(harness.store.upserts.load(Ordering::SeqCst), upserts_before);
    assert!(harness.store.deletes.lock().unwrap().is_empty());

    harness.embedder.fail.store(false, Ordering::SeqCst);
    let retried = harness.pipeline.ingest(REPO, "c2").await.unwrap();
    assert_eq!(retried.status, RunStatus::Succeeded);
    assert_eq!(retried.chunks_processed, 1);
    assert_eq!(retried.chunks_deleted, 11);
    assert_eq!(harness.store.ids(REPO).await.len(), 3);
}

#[tokio::test]
async fn test_upsert_failure_rolls_back_partial_writes() {
    let mut config = config_60();
    config.vector_store.write_batch_size = 1;
    let harness = Harness::with_config(config);
    seed_thirteen(&harness);
    harness.store.fail_upserts_after(2);

    let report = harness.pipeline.ingest(REPO, "c1").await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error.as_ref().unwrap().class, ErrorClass::Permanent);
    assert_eq!(harness.store.upserts.load(Ordering::SeqCst), 2);
    assert!(harness.store.ids(REPO).await.is_empty());

    harness.store.heal();
    let retried = harness.pipeline.ingest(REPO, "c1").await.unwrap();
    assert_eq!(retried.status, RunStatus::Succeeded);
    assert_eq!(retried.chunks_processed, 13);
}

#[tokio::test]
async fn test_failed_delete_reports_deletes_applied() {
    let mut config = config_60();
    config.vector_store.write_batch_size = 2;
    let harness = Harness::with_config(config);
    seed_thirteen(&harness);
    harness.pipeline.ingest(REPO, "c1").await.unwrap();

    harness.repository.remove_file(REPO, "b.py");
    harness.store.fail_deletes_after(1);
    let report = harness.pipeline.ingest(REPO, "c2").await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.chunks_deleted, 2);
    assert_eq!(report.chunks_skipped, 3);
    let failure = report.error.as_ref().unwrap();
    assert_eq!(failure.class, ErrorClass::Permanent);
    assert!(failure.message.contains("Deleted 2 of 10 stale ids"));
    assert_eq!(harness.store.ids(REPO).await.len(), 11);

    let events = harness.events.events.lock().unwrap().clone();
    let (name, payload) = events.last().unwrap();
    assert_eq!(name, "ingestionFailed");
    assert_eq!(payload["chunksDeleted"], 2);

    harness.store.heal();
    let retried = harness.pipeline.ingest(REPO, "c2").await.unwrap();
    assert_eq!(retried.status, RunStatus::Succeeded);
    assert_eq!(retried.chunks_deleted, 8);
    assert_eq!(harness.store.ids(REPO).await.len(), 3);
}

#[tokio::test]
async fn test_exhausted_transient_failure_is_permanent() {
    let harness = Harness::with_config(config_60());
    seed_thirteen(&harness);
    harness.embedder.throttle.store(true, Ordering::SeqCst);

    let report = harness.pipeline.ingest(REPO, "c1").await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    let failure = report.error.as_ref().unwrap();
    assert_eq!(failure.class, ErrorClass::Permanent);
    assert!(failure.exhausted_retries);
    assert_eq!(harness.embedder.calls.load(Ordering::SeqCst), 3);
    assert!(harness.store.ids(REPO).await.is_empty());

    let events = harness.events.events.lock().unwrap().clone();
    let (_, payload) = &events[0];
    assert_eq!(payload["error"]["class"], "permanent");
    assert_eq!(payload["error"]["exhaustedRetries"], true);
}

#[tokio::test]
async fn test_run_cancelled_after_upserts_skips_deletes() {
    let harness = Harness::with_config(config_60());
    seed_thirteen(&harness);
    harness.pipeline.ingest(REPO, "c1").await.unwrap();
    let ids_before = harness.store.ids(REPO).await;

    let edited = python_class(10).replacen("        v_3 = 3\n", "        v_3 = 33\n", 1);
    harness.repository.set_file(REPO, "b.py", &edited);
    *harness.store.cancel_on_upsert.lock().unwrap() =
        Some((harness.pipeline.clone(), REPO.to_string()));

    let report = harness.pipeline.ingest(REPO, "c2").await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error.as_ref().unwrap().class, ErrorClass::Cancelled);
    assert_eq!(report.chunks_deleted, 0);
    assert!(harness.store.deletes.lock().unwrap().is_empty());

    // The new chunk landed next to the old one; nothing was removed
    let ids_after = harness.store.ids(REPO).await;
    assert_eq!(ids_after.len(), 14);
    assert!(ids_after.is_superset(&ids_before));

    let reconciled = harness.pipeline.ingest(REPO, "c2").await.unwrap();
    assert_eq!(reconciled.status, RunStatus::Succeeded);
    assert_eq!(reconciled.chunks_processed, 0);
    assert_eq!(reconciled.chunks_deleted, 1);
    assert_eq!(harness.store.ids(REPO).await.len(), 13);
}

#[tokio::test]
async fn test_triggers_for_busy_repository_queue_and_coalesce() {
    let harness = Harness::new();
    harness
        .repository
        .set_file(REPO, "lib.rs", "fn a() {\n    1\n}\n");
    harness.repository.set_delay(Duration::from_millis(100));

    let first = harness.pipeline.trigger(REPO, "c1").await.unwrap();
    let second = harness.pipeline.trigger(REPO, "c2").await.unwrap();
    let third = harness.pipeline.trigger(REPO, "c3").await.unwrap();

    assert_eq!(first.disposition, TriggerDisposition::Started);
    assert_eq!(second.disposition, TriggerDisposition::Queued);
    assert_eq!(third.disposition, TriggerDisposition::Coalesced);
    assert_eq!(second.run_id, third.run_id);
    assert_eq!(
        harness.pipeline.status(REPO).await,
        RepoStatus::Running {
            run_id: first.run_id,
            commit_ref: "c1".to_string(),
            pending: Some("c3".to_string()),
        }
    );

    let first_report = first.wait().await;
    let second_report = second.wait().await;
    let third_report = third.wait().await;

    assert_eq!(first_report.status, RunStatus::Succeeded);
    assert_eq!(second_report, third_report);
    assert_eq!(second_report.commit_ref, "c3");
    assert_eq!(second_report.chunks_skipped, 1);
    assert_eq!(harness.repository.fetches.load(Ordering::SeqCst), 2);
    assert_eq!(harness.repository.peak_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(
        *harness.repository.fetched_refs.lock().unwrap(),
        vec!["c1".to_string(), "c3".to_string()]
    );
    assert_eq!(harness.pipeline.status(REPO).await, RepoStatus::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_different_repositories_run_concurrently() {
    let harness = Harness::new();
    harness.repository.set_file("one", "a.rs", "fn a() {\n    1\n}\n");
    harness.repository.set_file("two", "b.rs", "fn b() {\n    2\n}\n");
    harness.repository.set_delay(Duration::from_millis(200));

    let one = harness.pipeline.trigger("one", "HEAD").await.unwrap();
    let two = harness.pipeline.trigger("two", "HEAD").await.unwrap();
    assert_eq!(one.disposition, TriggerDisposition::Started);
    assert_eq!(two.disposition, TriggerDisposition::Started);

    let (one, two) = tokio::join!(one.wait(), two.wait());

    assert_eq!(one.status, RunStatus::Succeeded);
    assert_eq!(two.status, RunStatus::Succeeded);
    assert_eq!(harness.repository.peak_in_flight.load(Ordering::SeqCst), 2);
    assert_eq!(harness.store.ids("one").await.len(), 1);
    assert_eq!(harness.store.ids("two").await.len(), 1);
}

#[tokio::test]
async fn test_cancelled_run_writes_nothing() {
    let harness = Harness::new();
    harness
        .repository
        .set_file(REPO, "lib.rs", "fn a() {\n    1\n}\n");
    harness.repository.set_delay(Duration::from_millis(200));

    let ticket = harness.pipeline.trigger(REPO, "c1").await.unwrap();
    assert!(harness.pipeline.cancel(REPO).await);
    let report = ticket.wait().await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error.unwrap().class, ErrorClass::Cancelled);
    assert!(harness.store.ids(REPO).await.is_empty());
    assert_eq!(harness.embedder.calls.load(Ordering::SeqCst), 0);
    assert!(!harness.pipeline.cancel(REPO).await);
}

#[tokio::test]
async fn test_supersede_cancels_running_run() {
    let mut config = test_config();
    config.pipeline.supersede_running = true;
    let harness = Harness::with_config(config);
    harness
        .repository
        .set_file(REPO, "lib.rs", "fn a() {\n    1\n}\n");
    harness.repository.set_delay(Duration::from_millis(200));

    let first = harness.pipeline.trigger(REPO, "c1").await.unwrap();
    let second = harness.pipeline.trigger(REPO, "c2").await.unwrap();
    assert_eq!(second.disposition, TriggerDisposition::Queued);

    let first_report = first.wait().await;
    let second_report = second.wait().await;

    assert_eq!(first_report.status, RunStatus::Failed);
    let failure = first_report.error.unwrap();
    assert_eq!(failure.class, ErrorClass::Cancelled);
    assert!(failure.message.contains("superseded"));
    assert_eq!(second_report.status, RunStatus::Succeeded);
    assert_eq!(second_report.commit_ref, "c2");
    assert_eq!(second_report.chunks_processed, 1);
}

#[tokio::test]
async fn test_events_announce_each_run() {
    let harness = Harness::with_config(config_60());
    seed_thirteen(&harness);
    harness.pipeline.ingest(REPO, "c1").await.unwrap();
    harness.embedder.fail.store(true, Ordering::SeqCst);
    harness
        .repository
        .set_file(REPO, "c.py", &python_module(1, 4));
    harness.pipeline.ingest(REPO, "c2").await.unwrap();

    let events = harness.events.events.lock().unwrap().clone();
    assert_eq!(
        harness.events.names(),
        vec!["ingestionSucceeded", "ingestionFailed"]
    );

    let (_, succeeded) = &events[0];
    assert_eq!(succeeded["repoId"], REPO);
    assert_eq!(succeeded["commitRef"], "c1");
    assert_eq!(succeeded["chunksProcessed"], 13);
    assert!(succeeded.get("error").is_none());

    let (_, failed) = &events[1];
    assert_eq!(failed["commitRef"], "c2");
    assert_eq!(failed["error"]["class"], "permanent");
    assert!(failed["error"].get("exhaustedRetries").is_none());
}

#[tokio::test]
async fn test_event_failure_does_not_fail_run() {
    let harness = Harness::new();
    harness
        .repository
        .set_file(REPO, "lib.rs", "fn a() {\n    1\n}\n");
    harness.events.fail.store(true, Ordering::SeqCst);

    let report = harness.pipeline.ingest(REPO, "c1").await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(harness.events.names(), vec!["ingestionSucceeded"]);
    assert_eq!(harness.pipeline.last_report(REPO).await, Some(report));
}

#[tokio::test]
async fn test_unknown_repository_fails_permanently() {
    let harness = Harness::new();

    let report = harness.pipeline.ingest("missing", "HEAD").await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error.unwrap().class, ErrorClass::Permanent);
    assert_eq!(harness.repository.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(harness.events.names(), vec!["ingestionFailed"]);
}

#[tokio::test]
async fn test_shutdown_refuses_new_triggers() {
    let harness = Harness::new();
    harness
        .repository
        .set_file(REPO, "lib.rs", "fn a() {\n    1\n}\n");
    harness.repository.set_delay(Duration::from_millis(200));

    let running = harness.pipeline.trigger(REPO, "c1").await.unwrap();
    let queued = harness.pipeline.trigger(REPO, "c2").await.unwrap();
    harness.pipeline.shutdown().await;

    assert_eq!(running.wait().await.status, RunStatus::Failed);
    let abandoned = queued.wait().await;
    assert_eq!(abandoned.error.unwrap().class, ErrorClass::Cancelled);
    assert!(matches!(
        harness.pipeline.trigger(REPO, "c3").await,
        Err(IngestError::Cancelled)
    ));
    assert_eq!(harness.pipeline.status(REPO).await, RepoStatus::Idle);
}

#[tokio::test]
async fn test_snapshot_store_survives_restart() {
    let code = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    std::fs::write(code.path().join("lib.rs"), "fn a() {\n    1\n}\n\nfn b() {\n    2\n}\n")
        .unwrap();
    let snapshot = data.path().join("vectors.json");
    let config = test_config();

    let open = |embedder: Arc<common::CountingEmbedder>| {
        let repository = LocalRepository::new(&config.repository)
            .unwrap()
            .with_root(REPO, code.path());
        let store = Arc::new(MemoryVectorStore::open(&snapshot).unwrap());
        let pipeline = IngestionPipeline::new(
            &config,
            Arc::new(repository),
            embedder,
            store.clone(),
            Arc::new(common::RecordingEvents::default()),
        )
        .unwrap();
        (pipeline, store)
    };

    let first_embedder = Arc::new(common::CountingEmbedder::default());
    let (pipeline, _) = open(first_embedder.clone());
    let first = pipeline.ingest(REPO, "HEAD").await.unwrap();
    assert_eq!(first.chunks_processed, 2);
    drop(pipeline);

    let second_embedder = Arc::new(common::CountingEmbedder::default());
    let (pipeline, store) = open(second_embedder.clone());
    let second = pipeline.ingest(REPO, "HEAD").await.unwrap();

    assert_eq!(second.status, RunStatus::Succeeded);
    assert_eq!(second.chunks_processed, 0);
    assert_eq!(second.chunks_skipped, 2);
    assert_eq!(second_embedder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.list_ids(REPO).await.unwrap().len(), 2);
}
