//! One-shot delayed settlement jobs
//!
//! Every confirmation timer is a tokio task carrying the transaction id it
//! settles. Jobs are keyed by that id: scheduling an id whose job is still
//! pending or already succeeded returns a handle to that job instead of
//! starting a second timer. A job that finished with an error is replaced,
//! and the new job runs under the same settlement attempt id so a status
//! change the failed job landed without hearing back is still credited.
//!
//! # Cancellation
//!
//! Jobs are fire-and-forget. Dropping a [`ConfirmationHandle`], or the state
//! machine that owns it, does not stop the timer; the settlement still runs
//! against the store and the balance book. [`ConfirmationScheduler::drain`]
//! waits for every in-flight job, which the CLI runner does before exporting.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

use super::settlement::{Settled, Settlement, SettlementJob};
use crate::types::{LedgerError, TransactionId};

/// Progress of a scheduled job
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Pending,
    Finished(Result<Settled, LedgerError>),
}

impl JobState {
    fn failed(&self) -> bool {
        matches!(self, JobState::Finished(Err(_)))
    }
}

#[derive(Debug)]
struct ScheduledJob {
    attempt: Uuid,
    receiver: watch::Receiver<JobState>,
}

/// Runs [`SettlementJob`]s after a delay
#[derive(Debug, Clone)]
pub struct ConfirmationScheduler {
    settlement: Arc<Settlement>,
    jobs: Arc<DashMap<TransactionId, ScheduledJob>>,
    tracker: TaskTracker,
}

impl ConfirmationScheduler {
    pub fn new(settlement: Arc<Settlement>) -> Self {
        Self {
            settlement,
            jobs: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Run `job` once `delay` has elapsed
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, job: SettlementJob, delay: Duration) -> ConfirmationHandle {
        let id = job.transaction_id();
        match self.jobs.entry(id) {
            Entry::Occupied(existing) if !existing.get().receiver.borrow().failed() => {
                debug!(tx = %id, "settlement already scheduled, reusing job");
                ConfirmationHandle {
                    id,
                    receiver: existing.get().receiver.clone(),
                }
            }
            Entry::Occupied(mut failed) => {
                let attempt = failed.get().attempt;
                let receiver = self.spawn(job, attempt, delay);
                failed.insert(ScheduledJob {
                    attempt,
                    receiver: receiver.clone(),
                });
                info!(tx = %id, delay_ms = delay.as_millis() as u64, "previous settlement failed, scheduled again");
                ConfirmationHandle { id, receiver }
            }
            Entry::Vacant(slot) => {
                let attempt = Uuid::new_v4();
                let receiver = self.spawn(job, attempt, delay);
                slot.insert(ScheduledJob {
                    attempt,
                    receiver: receiver.clone(),
                });
                info!(tx = %id, delay_ms = delay.as_millis() as u64, ?job, "settlement scheduled");
                ConfirmationHandle { id, receiver }
            }
        }
    }

    fn spawn(&self, job: SettlementJob, attempt: Uuid, delay: Duration) -> watch::Receiver<JobState> {
        let (sender, receiver) = watch::channel(JobState::Pending);
        let settlement = Arc::clone(&self.settlement);
        self.tracker.spawn(async move {
            sleep(delay).await;
            let outcome = settlement.run_attempt(job, attempt).await;
            sender.send_replace(JobState::Finished(outcome));
        });
        receiver
    }

    /// Handle to the latest job for `id`, if one was ever scheduled
    pub fn handle(&self, id: TransactionId) -> Option<ConfirmationHandle> {
        self.jobs.get(&id).map(|job| ConfirmationHandle {
            id,
            receiver: job.receiver.clone(),
        })
    }

    /// Number of jobs whose timer or settlement has not finished yet
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every job scheduled so far has finished
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

/// Observer for one scheduled job
#[derive(Debug, Clone)]
pub struct ConfirmationHandle {
    id: TransactionId,
    receiver: watch::Receiver<JobState>,
}

impl ConfirmationHandle {
    pub fn transaction_id(&self) -> TransactionId {
        self.id
    }

    /// The outcome if the job already finished
    pub fn outcome(&self) -> Option<Result<Settled, LedgerError>> {
        match &*self.receiver.borrow() {
            JobState::Pending => None,
            JobState::Finished(outcome) => Some(outcome.clone()),
        }
    }

    /// Wait for the job to finish
    pub async fn wait(&self) -> Result<Settled, LedgerError> {
        let mut receiver = self.receiver.clone();
        let state = receiver
            .wait_for(|state| matches!(state, JobState::Finished(_)))
            .await
            .map_err(|_| {
                LedgerError::store_unavailable("confirmation", "job ended without an outcome")
            })?;
        let outcome = match &*state {
            JobState::Finished(outcome) => outcome.clone(),
            JobState::Pending => Err(LedgerError::store_unavailable(
                "confirmation",
                "job ended without an outcome",
            )),
        };
        outcome
    }
}
