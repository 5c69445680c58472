//! Thread-safe in-memory ledger store
//!
//! This module provides [`InMemoryLedgerStore`], a [`LedgerStore`] backed by a
//! `DashMap` keyed by transaction id.
//!
//! # Design
//!
//! Status updates run while holding the record's map entry lock, so the
//! "is it still pending? then complete it" decision is a compare-and-set.
//! Two completion callbacks racing for the same transaction produce exactly
//! one `applied == true` outcome. Every successful write publishes a
//! [`ChangeNotifier`] signal for the record's owner after the lock is
//! released.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::notifier::ChangeNotifier;
use super::traits::LedgerStore;
use crate::types::{
    LedgerError, StatusChange, StatusPatch, Transaction, TransactionDraft, TransactionId,
};

/// In-memory ledger table
#[derive(Debug)]
pub struct InMemoryLedgerStore {
    transactions: DashMap<TransactionId, Transaction>,
    clock: Arc<dyn Clock>,
    notifier: Option<ChangeNotifier>,
}

impl InMemoryLedgerStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            transactions: DashMap::new(),
            clock,
            notifier: None,
        }
    }

    /// Publish a change signal after every successful write
    pub fn with_notifier(mut self, notifier: ChangeNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    fn publish(&self, user_id: &str) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(user_id);
        }
    }

    fn sorted_for_user(&self, user_id: &str) -> Vec<Transaction> {
        let mut records: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert(&self, draft: TransactionDraft) -> Result<Transaction, LedgerError> {
        let now = self.clock.now();
        let id = draft.id.unwrap_or_else(Uuid::new_v4);
        let created_at = draft.created_at.unwrap_or(now);
        let transaction = Transaction {
            id,
            user_id: draft.user_id,
            tx_type: draft.tx_type,
            amount: draft.amount,
            description: draft.description,
            status: draft.status,
            sender: draft.sender,
            recipient: draft.recipient,
            metadata: draft.metadata,
            created_at,
            updated_at: created_at,
        };

        match self.transactions.entry(id) {
            Entry::Occupied(_) => {
                warn!(tx = %id, "rejecting duplicate transaction id");
                return Err(LedgerError::DuplicateTransaction { tx: id });
            }
            Entry::Vacant(slot) => {
                slot.insert(transaction.clone());
            }
        }

        debug!(tx = %id, user_id = %transaction.user_id, status = %transaction.status, "transaction inserted");
        self.publish(&transaction.user_id);
        Ok(transaction)
    }

    async fn update_status(
        &self,
        id: TransactionId,
        patch: StatusPatch,
    ) -> Result<StatusChange, LedgerError> {
        let change = {
            let mut entry = self
                .transactions
                .get_mut(&id)
                .ok_or_else(|| LedgerError::transaction_not_found(id, "update_status"))?;
            let record = entry.value_mut();

            if record.status == patch.status && record.status.is_terminal() {
                StatusChange {
                    transaction: record.clone(),
                    applied: false,
                }
            } else if record.status.can_advance_to(patch.status) {
                record.status = patch.status;
                record.updated_at = self.clock.now();
                for (key, value) in patch.metadata {
                    record.metadata.entry(key).or_insert(value);
                }
                if let Some(description) = patch.description {
                    record.description = description;
                }
                StatusChange {
                    transaction: record.clone(),
                    applied: true,
                }
            } else {
                return Err(LedgerError::unexpected_status(id, record.status, patch.status));
            }
        };

        if change.applied {
            debug!(tx = %id, status = %change.transaction.status, "transaction status updated");
            self.publish(&change.transaction.user_id);
        }
        Ok(change)
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.transactions.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Transaction>, usize), LedgerError> {
        let records = self.sorted_for_user(user_id);
        let total = records.len();
        let page_size = page_size.max(1);
        let offset = page.saturating_sub(1).saturating_mul(page_size);
        let items = records.into_iter().skip(offset).take(page_size).collect();
        Ok((items, total))
    }

    async fn list_all_by_user(&self, user_id: &str) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.sorted_for_user(user_id))
    }
}
