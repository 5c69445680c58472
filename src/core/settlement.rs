//! Completion steps run when a simulated confirmation delay elapses
//!
//! Both steps are idempotent. The status update is a compare-and-set in the
//! store, and the deposit credit only happens when this attempt performed the
//! pending → completed transition. A duplicate callback (a second scheduling
//! after a reload) finds the record already completed and leaves the balance
//! alone.
//!
//! Each attempt writes its id into the record's `settled_by` metadata along
//! with the status. When an update lands but its answer is lost, the retry
//! sees its own id on the completed record and still credits the deposit.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::balance_book::BalanceBook;
use super::clock::Clock;
use super::retry::with_timeout;
use super::traits::LedgerStore;
use crate::config::PolicyConfig;
use crate::types::{
    meta, ErrorKind, LedgerError, StatusChange, StatusPatch, Transaction, TransactionId,
    TransactionStatus, TransactionType,
};

/// Work to perform once a confirmation delay elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementJob {
    /// Mark a pending deposit completed and credit the owner
    ConfirmDeposit(TransactionId),
    /// Mark a pending withdrawal completed; the balance was already debited
    CompleteWithdrawal(TransactionId),
}

impl SettlementJob {
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            SettlementJob::ConfirmDeposit(id) | SettlementJob::CompleteWithdrawal(id) => *id,
        }
    }
}

/// Result of a settlement step
#[derive(Debug, Clone, PartialEq)]
pub struct Settled {
    /// The record after the step
    pub transaction: Transaction,
    /// Owner's balance after the step
    pub balance: Decimal,
    /// False when the record was already completed and nothing changed
    pub applied: bool,
}

/// Executes [`SettlementJob`]s against the store and the balance book
#[derive(Debug)]
pub struct Settlement {
    store: Arc<dyn LedgerStore>,
    balances: Arc<BalanceBook>,
    clock: Arc<dyn Clock>,
    config: Arc<PolicyConfig>,
}

impl Settlement {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        balances: Arc<BalanceBook>,
        clock: Arc<dyn Clock>,
        config: Arc<PolicyConfig>,
    ) -> Self {
        Self {
            store,
            balances,
            clock,
            config,
        }
    }

    /// Run `job` as a fresh attempt
    pub async fn run(&self, job: SettlementJob) -> Result<Settled, LedgerError> {
        self.run_attempt(job, Uuid::new_v4()).await
    }

    /// Run `job` under the attempt id `attempt`
    ///
    /// A failed attempt never credits, so re-running it with the same id
    /// is safe and picks up a status change that landed unanswered.
    pub async fn run_attempt(
        &self,
        job: SettlementJob,
        attempt: Uuid,
    ) -> Result<Settled, LedgerError> {
        let result = match job {
            SettlementJob::ConfirmDeposit(id) => self.confirm_deposit(id, attempt).await,
            SettlementJob::CompleteWithdrawal(id) => self.complete_withdrawal(id, attempt).await,
        };
        if let Err(err) = &result {
            if err.kind() == ErrorKind::InconsistentState {
                error!(tx = %job.transaction_id(), error = %err, "settlement abandoned for transaction");
            }
        }
        result
    }

    async fn apply(
        &self,
        existing: &Transaction,
        expected: TransactionType,
        patch: StatusPatch,
        attempt: Uuid,
    ) -> Result<StatusChange, LedgerError> {
        let id = existing.id;
        if existing.tx_type != expected {
            return Err(LedgerError::unexpected_type(id, existing.tx_type, expected));
        }

        let tag = attempt.to_string();
        let patch = patch.with_metadata(meta::SETTLED_BY, tag.as_str());
        let timeout = self.config.store_timeout;
        let change = self
            .config
            .completion_retry
            .retry_async("update_status", |_| {
                let patch = patch.clone();
                with_timeout("update_status", timeout, self.store.update_status(id, patch))
            })
            .await?;

        let landed_earlier = !change.applied
            && change.transaction.metadata.get(meta::SETTLED_BY).and_then(|v| v.as_str())
                == Some(tag.as_str());
        if landed_earlier {
            warn!(tx = %id, %attempt, "status change landed on an unanswered call");
        }
        Ok(StatusChange {
            applied: change.applied || landed_earlier,
            transaction: change.transaction,
        })
    }

    async fn confirm_deposit(
        &self,
        id: TransactionId,
        attempt: Uuid,
    ) -> Result<Settled, LedgerError> {
        let existing = self.fetch(id).await?;
        let network = existing.sender.clone().unwrap_or_else(|| self.config.deposit_network.clone());
        let patch = StatusPatch::new(TransactionStatus::Completed)
            .with_metadata(meta::CONFIRMED_AT, self.clock.now().to_rfc3339())
            .with_description(format!("{} deposit confirmed", network));

        let change = self
            .apply(&existing, TransactionType::Deposit, patch, attempt)
            .await?;
        let tx = change.transaction;

        let balance = if change.applied {
            let balance = self.balances.credit(&tx.user_id, tx.amount)?;
            info!(tx = %tx.id, user_id = %tx.user_id, amount = %tx.amount, %balance, "deposit confirmed");
            balance
        } else {
            self.balances.balance(&tx.user_id)
        };

        Ok(Settled {
            transaction: tx,
            balance,
            applied: change.applied,
        })
    }

    async fn complete_withdrawal(
        &self,
        id: TransactionId,
        attempt: Uuid,
    ) -> Result<Settled, LedgerError> {
        let existing = self.fetch(id).await?;
        let patch = StatusPatch::new(TransactionStatus::Completed)
            .with_metadata(meta::COMPLETED_AT, self.clock.now().to_rfc3339());

        let change = self
            .apply(&existing, TransactionType::Withdrawal, patch, attempt)
            .await?;
        let tx = change.transaction;
        if change.applied {
            info!(tx = %tx.id, user_id = %tx.user_id, amount = %tx.amount, "withdrawal completed");
        }

        Ok(Settled {
            balance: self.balances.balance(&tx.user_id),
            transaction: tx,
            applied: change.applied,
        })
    }

    async fn fetch(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        let timeout = self.config.store_timeout;
        self.config
            .completion_retry
            .retry_async("get", |_| with_timeout("get", timeout, self.store.get(id)))
            .await?
            .ok_or_else(|| LedgerError::transaction_not_found(id, "settlement"))
    }
}
