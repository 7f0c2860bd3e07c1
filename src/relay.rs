//! Relay Dispatcher
//!
//! Consumes [`SourceEvent`]s from the watcher queue and fans each one out to
//! every other chain. Each (event, destination) pair runs as an independent
//! pipeline:
//!
//! 1. Obtain a proof for the source log from the proof oracle
//! 2. Submit it to the destination's `apply_remote`
//! 3. Record the outcome
//!
//! ## Failure handling
//!
//! - `AlreadyApplied` and `StaleVersion` are benign terminal outcomes
//! - Other store rejections are terminal protocol violations
//! - Transport failures are retried with exponential backoff, bounded
//! - An unreachable oracle is retried with the same backoff, bounded
//! - `ProofFailed` and `ProofTimeout` are final for the task and are not
//!   requested again; the pipeline ends with no side effects
//!
//! Pipelines never wait on each other: one destination failing does not
//! affect the others. A semaphore caps concurrent submissions only, so a
//! pipeline waiting on its proof holds no permit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use backoff::ExponentialBackoff;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::destination::{StateSyncDestination, SubmitError};
use crate::monitor::SourceEvent;
use crate::proof_oracle::{OracleError, ProofPolling, ProofSource};
use crate::store::StoreError;
use crate::types::{ChainId, SyncTask};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Bounded retry: at most `max_attempts` calls, spaced by a doubling delay
/// from `initial_backoff` up to `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay schedule without jitter or an elapsed-time limit; the attempt
    /// count is enforced by the caller.
    pub fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_backoff,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub polling: ProofPolling,
    /// Proof attempts while the oracle is unreachable
    pub oracle_retry: RetryPolicy,
    /// Submission attempts on transport failure
    pub submit_retry: RetryPolicy,
    /// Submissions in flight at once across all destinations
    pub max_concurrent_tasks: usize,
    /// Finished task records kept for inspection
    pub task_history: usize,
}

impl DispatcherSettings {
    pub fn from_config(config: &Config) -> Self {
        let initial_backoff = Duration::from_millis(config.submission.initial_backoff_ms);
        let max_backoff = Duration::from_millis(config.submission.max_backoff_ms);
        Self {
            polling: ProofPolling::from_config(&config.oracle),
            oracle_retry: RetryPolicy {
                max_attempts: config.oracle.request_retries.saturating_add(1),
                initial_backoff,
                max_backoff,
            },
            submit_retry: RetryPolicy {
                max_attempts: config.submission.max_attempts.max(1),
                initial_backoff,
                max_backoff,
            },
            max_concurrent_tasks: config.relayer.max_concurrent_tasks.max(1),
            task_history: config.relayer.task_history,
        }
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

/// Terminal result of one (event, destination) pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    Applied {
        tx_hash: Option<String>,
        version: Option<u64>,
    },
    AlreadyApplied,
    StaleVersion {
        incoming: u64,
        current: u64,
    },
    ProofFailed {
        reason: String,
    },
    ProofTimeout {
        attempts: u32,
    },
    /// Store rejected the proof as a protocol violation
    Rejected {
        error: String,
        reason: String,
    },
    /// Retries exhausted or unrecoverable relayer-side failure
    Failed {
        reason: String,
    },
}

impl TaskOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskOutcome::Applied { .. } => "applied",
            TaskOutcome::AlreadyApplied => "already_applied",
            TaskOutcome::StaleVersion { .. } => "stale_version",
            TaskOutcome::ProofFailed { .. } => "proof_failed",
            TaskOutcome::ProofTimeout { .. } => "proof_timeout",
            TaskOutcome::Rejected { .. } => "rejected",
            TaskOutcome::Failed { .. } => "failed",
        }
    }

    fn from_store_error(err: &StoreError) -> Self {
        match err {
            StoreError::AlreadyApplied(_) => TaskOutcome::AlreadyApplied,
            StoreError::StaleVersion { incoming, current } => TaskOutcome::StaleVersion {
                incoming: *incoming,
                current: *current,
            },
            other => TaskOutcome::Rejected {
                error: other.kind().to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Record of a finished pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: SyncTask,
    pub outcome: TaskOutcome,
    /// Submission attempts made (0 when no proof was obtained)
    pub attempts: u32,
    pub finished_at: DateTime<Utc>,
}

/// Aggregate counters for the status API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    pub finished: u64,
    /// Finished tasks per outcome kind
    pub outcomes: BTreeMap<String, u64>,
    /// Submissions currently holding a permit
    pub running_tasks: usize,
    pub in_flight_proofs: usize,
}

#[derive(Debug, Default)]
struct Ledger {
    history: VecDeque<TaskRecord>,
    counts: BTreeMap<String, u64>,
    finished: u64,
}

// ============================================================================
// DISPATCHER
// ============================================================================

pub struct Dispatcher {
    proofs: Arc<dyn ProofSource>,
    destinations: BTreeMap<ChainId, Arc<dyn StateSyncDestination>>,
    settings: DispatcherSettings,
    permits: Semaphore,
    ledger: Mutex<Ledger>,
}

impl Dispatcher {
    pub fn new(
        proofs: Arc<dyn ProofSource>,
        destinations: Vec<Arc<dyn StateSyncDestination>>,
        settings: DispatcherSettings,
    ) -> Self {
        let destinations = destinations
            .into_iter()
            .map(|d| (d.chain_id(), d))
            .collect();
        Self {
            proofs,
            destinations,
            permits: Semaphore::new(settings.max_concurrent_tasks.max(1)),
            settings,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// One task per destination other than the event's source chain.
    pub fn tasks_for(&self, event: &SourceEvent) -> Vec<SyncTask> {
        self.destinations
            .keys()
            .filter(|id| **id != event.locator.source_chain_id)
            .map(|id| SyncTask::new(event.locator, *id))
            .collect()
    }

    /// Runs every destination pipeline for `event` concurrently.
    pub async fn dispatch_event(&self, event: SourceEvent) -> Vec<TaskRecord> {
        let tasks = self.tasks_for(&event);
        info!(
            "Dispatching {}: key={}, version={}, destinations={}",
            event.locator,
            event.event.hashed_key,
            event.event.version,
            tasks.len()
        );
        futures::future::join_all(tasks.into_iter().map(|task| self.process_task(task))).await
    }

    /// Drives one task to a terminal outcome and records it.
    pub async fn process_task(&self, task: SyncTask) -> TaskRecord {
        let (outcome, attempts) = self.run_pipeline(&task).await;

        let record = TaskRecord {
            task,
            outcome,
            attempts,
            finished_at: Utc::now(),
        };
        self.record(record.clone()).await;
        record
    }

    async fn run_pipeline(&self, task: &SyncTask) -> (TaskOutcome, u32) {
        let Some(destination) = self.destinations.get(&task.destination_chain_id).cloned() else {
            error!("No destination configured: {}", task);
            return (
                TaskOutcome::Failed {
                    reason: format!("chain {} has no destination", task.destination_chain_id),
                },
                0,
            );
        };

        let proof = match self.obtain_proof(task).await {
            Ok(proof) => proof,
            Err(outcome) => return (outcome, 0),
        };

        let Ok(_permit) = self.permits.acquire().await else {
            return (
                TaskOutcome::Failed {
                    reason: "dispatcher shut down".to_string(),
                },
                0,
            );
        };
        self.submit(task, destination.as_ref(), &proof).await
    }

    async fn obtain_proof(&self, task: &SyncTask) -> Result<Vec<u8>, TaskOutcome> {
        let locator = &task.locator();
        let polling = &self.settings.polling;
        let retry = self.settings.oracle_retry;
        let proofs = self.proofs.as_ref();
        let attempts = &AtomicU32::new(0);

        let result = backoff::future::retry_notify(
            retry.schedule(),
            move || async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                info!("Proof requested: {} (attempt {}/{})", task, attempt, retry.max_attempts);

                match proofs.fetch_proof(locator, polling).await {
                    Ok(proof) => Ok(proof),
                    Err(err @ OracleError::Unavailable(_)) if attempt < retry.max_attempts => {
                        Err(backoff::Error::transient(err))
                    }
                    Err(err) => Err(backoff::Error::permanent(err)),
                }
            },
            |err: OracleError, delay: Duration| {
                warn!("Proof oracle unavailable: {}, retrying in {:?}: {}", task, delay, err);
            },
        )
        .await;

        match result {
            Ok(proof) => {
                info!("Proof complete: {}, bytes={}", task, proof.len());
                Ok(proof)
            }
            Err(OracleError::Unavailable(msg)) => {
                error!(
                    "Proof oracle unavailable, giving up after {} attempts: {}: {}",
                    attempts.load(Ordering::SeqCst),
                    task,
                    msg
                );
                Err(TaskOutcome::Failed {
                    reason: format!("proof oracle unavailable: {}", msg),
                })
            }
            Err(OracleError::ProofFailed { job_id, reason }) => {
                error!("Proof failed: {}, job={}: {}", task, job_id, reason);
                Err(TaskOutcome::ProofFailed { reason })
            }
            Err(OracleError::ProofTimeout { job_id, attempts }) => {
                error!("Proof timeout: {}, job={}, polls={}", task, job_id, attempts);
                Err(TaskOutcome::ProofTimeout { attempts })
            }
            Err(OracleError::Malformed(msg)) => {
                error!("Malformed proof oracle response: {}: {}", task, msg);
                Err(TaskOutcome::Failed {
                    reason: format!("malformed oracle response: {}", msg),
                })
            }
        }
    }

    async fn submit(
        &self,
        task: &SyncTask,
        destination: &dyn StateSyncDestination,
        proof: &[u8],
    ) -> (TaskOutcome, u32) {
        let retry = self.settings.submit_retry;
        let attempts = &AtomicU32::new(0);

        let result = backoff::future::retry_notify(
            retry.schedule(),
            move || async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                info!("Proof submitted: {} (attempt {}/{})", task, attempt, retry.max_attempts);

                match destination.apply_remote(proof).await {
                    Ok(receipt) => Ok(receipt),
                    Err(err @ SubmitError::Transport(_)) if attempt < retry.max_attempts => {
                        Err(backoff::Error::transient(err))
                    }
                    Err(err) => Err(backoff::Error::permanent(err)),
                }
            },
            |err: SubmitError, delay: Duration| {
                warn!("Submission failed: {}, retrying in {:?}: {}", task, delay, err);
            },
        )
        .await;
        let attempts = attempts.load(Ordering::SeqCst);

        match result {
            Ok(receipt) => {
                info!(
                    "Proof confirmed: {}, tx={}, version={}",
                    task,
                    receipt.tx_hash.as_deref().unwrap_or("-"),
                    receipt
                        .version
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
                (
                    TaskOutcome::Applied {
                        tx_hash: receipt.tx_hash,
                        version: receipt.version,
                    },
                    attempts,
                )
            }
            Err(SubmitError::Rejected(err)) if err.is_benign() => {
                info!("Destination already up to date: {}: {}", task, err);
                (TaskOutcome::from_store_error(&err), attempts)
            }
            Err(SubmitError::Rejected(err)) => {
                error!("Destination rejected proof: {}: {}", task, err);
                (TaskOutcome::from_store_error(&err), attempts)
            }
            Err(SubmitError::Transport(msg)) => {
                error!(
                    "Submission failed permanently after {} attempts: {}: {}",
                    attempts, task, msg
                );
                (
                    TaskOutcome::Failed {
                        reason: format!("submission failed after {} attempts: {}", attempts, msg),
                    },
                    attempts,
                )
            }
        }
    }

    async fn record(&self, record: TaskRecord) {
        let mut ledger = self.ledger.lock().await;
        ledger.finished += 1;
        *ledger.counts.entry(record.outcome.kind().to_string()).or_insert(0) += 1;
        if self.settings.task_history == 0 {
            return;
        }
        ledger.history.push_back(record);
        while ledger.history.len() > self.settings.task_history {
            ledger.history.pop_front();
        }
    }

    /// Consumes the queue until every sender is dropped, spawning one tokio
    /// task per event. Waits for spawned work before returning.
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<SourceEvent>) {
        info!(
            "Dispatcher started: destinations={:?}, max_concurrent_tasks={}",
            self.destinations.keys().collect::<Vec<_>>(),
            self.settings.max_concurrent_tasks
        );

        let mut handles = Vec::new();
        while let Some(event) = receiver.recv().await {
            let dispatcher = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                dispatcher.dispatch_event(event).await;
            }));
            handles.retain(|h| !h.is_finished());
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Dispatch task panicked: {}", e);
            }
        }
        info!("Dispatcher queue closed");
    }

    /// Finished task records, oldest first.
    pub async fn history(&self) -> Vec<TaskRecord> {
        self.ledger.lock().await.history.iter().cloned().collect()
    }

    pub async fn stats(&self) -> DispatcherStats {
        let (finished, outcomes) = {
            let ledger = self.ledger.lock().await;
            (ledger.finished, ledger.counts.clone())
        };
        DispatcherStats {
            finished,
            outcomes,
            running_tasks: self
                .settings
                .max_concurrent_tasks
                .saturating_sub(self.permits.available_permits()),
            in_flight_proofs: self.proofs.in_flight().await,
        }
    }
}
