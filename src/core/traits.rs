//! Core traits for ledger persistence and session access
//!
//! These are the seams where external collaborators plug in: the persistence
//! service that owns the ledger table, and the session mechanism that knows
//! who the current user is. The in-memory implementations in this crate are
//! used by the CLI runner and the tests.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::types::{
    LedgerError, StatusChange, StatusPatch, Transaction, TransactionDraft, TransactionId, UserId,
};

/// Durable collection of transaction records
///
/// Every method is a suspension point and may fail; callers bound each call
/// with a timeout and surface failures as recoverable errors.
#[async_trait]
pub trait LedgerStore: Send + Sync + Debug {
    /// Insert a new record, assigning `id` and `created_at` when absent
    async fn insert(&self, draft: TransactionDraft) -> Result<Transaction, LedgerError>;

    /// Advance a record's status and attach metadata
    ///
    /// Re-applying the terminal status a record already holds is a no-op
    /// reported with `applied == false`. Any other non-forward transition is
    /// an [`LedgerError::UnexpectedStatus`].
    async fn update_status(
        &self,
        id: TransactionId,
        patch: StatusPatch,
    ) -> Result<StatusChange, LedgerError>;

    /// Fetch a single record
    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError>;

    /// One page of a user's records, newest first, with the user's total count
    ///
    /// `page` is 1-based. A page past the end is empty, not an error.
    async fn list_by_user(
        &self,
        user_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Transaction>, usize), LedgerError>;

    /// Every record of a user, newest first
    async fn list_all_by_user(&self, user_id: &str) -> Result<Vec<Transaction>, LedgerError>;
}

/// Access to the authenticated user of the current session
pub trait Session: Send + Sync {
    /// `None` when nobody is signed in
    fn current_user_id(&self) -> Option<UserId>;
}

/// A session fixed to one user, or to nobody
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticSession(pub Option<UserId>);

impl StaticSession {
    pub fn user(user_id: impl Into<UserId>) -> Self {
        Self(Some(user_id.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl Session for StaticSession {
    fn current_user_id(&self) -> Option<UserId> {
        self.0.clone()
    }
}
