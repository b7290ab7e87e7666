//! Per-repository run slots
//!
//! At most one run per repository executes at a time. While it runs, later
//! triggers collapse into a single pending entry that starts once the
//! current run finishes. Every trigger gets a receiver on which the report
//! of the run that will serve it is broadcast.

use crate::error::{ErrorClass, IngestError};
use crate::types::IngestionRun;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

/// What the pipeline reports for a run: the terminal run record
pub type RunReport = IngestionRun;

/// The run currently executing for a repository
struct ActiveRun {
    run_id: u64,
    commit_ref: String,
    cancel: CancellationToken,
    superseded: Arc<AtomicBool>,
    /// Sender to broadcast the report to every waiting trigger
    result_tx: broadcast::Sender<RunReport>,
}

/// The run that will start when the active one finishes
struct PendingRun {
    run_id: u64,
    commit_ref: String,
    result_tx: broadcast::Sender<RunReport>,
}

#[derive(Default)]
struct RunSlot {
    running: Option<ActiveRun>,
    pending: Option<PendingRun>,
    last_report: Option<RunReport>,
}

#[derive(Default)]
struct SlotTable {
    slots: HashMap<String, RunSlot>,
    closed: bool,
}

/// Handle given to the task that executes a run
#[derive(Debug, Clone)]
pub(crate) struct StartedRun {
    pub(crate) run_id: u64,
    pub(crate) commit_ref: String,
    pub(crate) cancel: CancellationToken,
    superseded: Arc<AtomicBool>,
}

impl StartedRun {
    /// The error describing why this run stopped early
    pub(crate) fn interruption(&self) -> IngestError {
        if self.superseded.load(Ordering::Acquire) {
            IngestError::Superseded
        } else {
            IngestError::Cancelled
        }
    }
}

/// Result of admitting a trigger into a repository's slot
pub(crate) enum Admission {
    /// The slot was idle; the caller must execute the run
    Start {
        run: StartedRun,
        receiver: broadcast::Receiver<RunReport>,
    },
    /// A run is active; this trigger becomes the pending run
    Queued {
        run_id: u64,
        receiver: broadcast::Receiver<RunReport>,
    },
    /// A run is active and one is already pending; this trigger joins it
    Coalesced {
        run_id: u64,
        receiver: broadcast::Receiver<RunReport>,
    },
    /// The pipeline is shutting down
    Closed,
}

/// Snapshot of one repository's slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoStatus {
    Idle,
    Running {
        run_id: u64,
        commit_ref: String,
        /// Commit reference of the pending run, if one is queued
        pending: Option<String>,
    },
}

pub(crate) struct RunSlots {
    table: Mutex<SlotTable>,
    next_run_id: AtomicU64,
    /// Parent of every run's cancellation token
    root: CancellationToken,
}

impl RunSlots {
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(SlotTable::default()),
            next_run_id: AtomicU64::new(1),
            root: CancellationToken::new(),
        }
    }

    fn allocate_run_id(&self) -> u64 {
        self.next_run_id.fetch_add(1, Ordering::Relaxed)
    }

    fn activate(
        &self,
        run_id: u64,
        commit_ref: String,
        result_tx: broadcast::Sender<RunReport>,
    ) -> (ActiveRun, StartedRun) {
        let cancel = self.root.child_token();
        let superseded = Arc::new(AtomicBool::new(false));
        let started = StartedRun {
            run_id,
            commit_ref: commit_ref.clone(),
            cancel: cancel.clone(),
            superseded: superseded.clone(),
        };
        let active = ActiveRun {
            run_id,
            commit_ref,
            cancel,
            superseded,
            result_tx,
        };
        (active, started)
    }

    /// Admit a trigger. With `supersede` set, an active run is cancelled so
    /// the queued trigger starts as soon as it stops.
    pub(crate) async fn admit(
        &self,
        repo_id: &str,
        commit_ref: &str,
        supersede: bool,
    ) -> Admission {
        let mut table = self.table.lock().await;
        if table.closed {
            return Admission::Closed;
        }
        let slot = table.slots.entry(repo_id.to_string()).or_default();

        let Some(active) = &slot.running else {
            let (result_tx, receiver) = broadcast::channel(1);
            let run_id = self.allocate_run_id();
            let (active, run) = self.activate(run_id, commit_ref.to_string(), result_tx);
            slot.running = Some(active);
            return Admission::Start { run, receiver };
        };

        if supersede && !active.cancel.is_cancelled() {
            tracing::info!(
                "Superseding run {} of {} with a trigger for {}",
                active.run_id,
                repo_id,
                commit_ref
            );
            active.superseded.store(true, Ordering::Release);
            active.cancel.cancel();
        }

        match &mut slot.pending {
            Some(pending) => {
                // The pending run fetches at dequeue time, so only the latest ref matters
                pending.commit_ref = commit_ref.to_string();
                Admission::Coalesced {
                    run_id: pending.run_id,
                    receiver: pending.result_tx.subscribe(),
                }
            }
            None => {
                let (result_tx, receiver) = broadcast::channel(1);
                let run_id = self.allocate_run_id();
                slot.pending = Some(PendingRun {
                    run_id,
                    commit_ref: commit_ref.to_string(),
                    result_tx,
                });
                Admission::Queued { run_id, receiver }
            }
        }
    }

    /// Record the report of the active run, wake its waiters and promote the
    /// pending run, if any. The caller must execute the returned run.
    pub(crate) async fn finish(&self, repo_id: &str, report: RunReport) -> Option<StartedRun> {
        let (finished, next) = {
            let mut table = self.table.lock().await;
            let closed = table.closed;
            let slot = table.slots.entry(repo_id.to_string()).or_default();

            let finished = slot.running.take();
            slot.last_report = Some(report.clone());

            let next = match slot.pending.take() {
                Some(pending) if !closed => {
                    let (active, run) =
                        self.activate(pending.run_id, pending.commit_ref, pending.result_tx);
                    slot.running = Some(active);
                    Some(run)
                }
                Some(pending) => {
                    let _ = pending.result_tx.send(abandoned(
                        pending.run_id,
                        repo_id,
                        &pending.commit_ref,
                    ));
                    None
                }
                None => None,
            };
            (finished, next)
        };

        if let Some(active) = finished {
            // No receivers is fine
            let _ = active.result_tx.send(report);
        }
        next
    }

    /// Whether `run_id` is still the run allowed to mutate `repo_id`
    pub(crate) async fn is_authoritative(&self, repo_id: &str, run_id: u64) -> bool {
        let table = self.table.lock().await;
        table
            .slots
            .get(repo_id)
            .and_then(|slot| slot.running.as_ref())
            .is_some_and(|active| active.run_id == run_id && !active.cancel.is_cancelled())
    }

    /// Cancel the active run of a repository. Returns false if none is active.
    pub(crate) async fn cancel(&self, repo_id: &str) -> bool {
        let table = self.table.lock().await;
        match table.slots.get(repo_id).and_then(|slot| slot.running.as_ref()) {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) async fn status(&self, repo_id: &str) -> RepoStatus {
        let table = self.table.lock().await;
        match table.slots.get(repo_id) {
            Some(RunSlot {
                running: Some(active),
                pending,
                ..
            }) => RepoStatus::Running {
                run_id: active.run_id,
                commit_ref: active.commit_ref.clone(),
                pending: pending.as_ref().map(|p| p.commit_ref.clone()),
            },
            _ => RepoStatus::Idle,
        }
    }

    pub(crate) async fn last_report(&self, repo_id: &str) -> Option<RunReport> {
        let table = self.table.lock().await;
        table
            .slots
            .get(repo_id)
            .and_then(|slot| slot.last_report.clone())
    }

    /// Refuse new triggers, fail pending runs and cancel active ones.
    /// Returns receivers that resolve once each active run has reported.
    pub(crate) async fn close(&self) -> Vec<broadcast::Receiver<RunReport>> {
        let mut table = self.table.lock().await;
        table.closed = true;
        self.root.cancel();

        let mut waiters = Vec::new();
        for (repo_id, slot) in table.slots.iter_mut() {
            if let Some(pending) = slot.pending.take() {
                let _ = pending.result_tx.send(abandoned(
                    pending.run_id,
                    repo_id,
                    &pending.commit_ref,
                ));
            }
            if let Some(active) = &slot.running {
                waiters.push(active.result_tx.subscribe());
            }
        }
        waiters
    }
}

/// Report for a queued run that never started
fn abandoned(run_id: u64, repo_id: &str, commit_ref: &str) -> RunReport {
    let mut run = IngestionRun::start(run_id, repo_id, commit_ref);
    run.fail(ErrorClass::Cancelled, "pipeline shut down before the run started");
    run
}
