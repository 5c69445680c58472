//! Shared collaborators handed to every state machine

use std::sync::Arc;

use super::balance_book::BalanceBook;
use super::clock::{Clock, SystemClock};
use super::ledger_store::InMemoryLedgerStore;
use super::notifier::ChangeNotifier;
use super::retry::with_timeout;
use super::scheduler::ConfirmationScheduler;
use super::settlement::Settlement;
use super::traits::LedgerStore;
use crate::config::PolicyConfig;
use crate::types::{LedgerError, Transaction, TransactionDraft, TransactionId};

/// Store, balances, clock, notifier and scheduler for one ledger
///
/// Cloning is cheap; every field is shared.
#[derive(Debug, Clone)]
pub struct LedgerContext {
    pub config: Arc<PolicyConfig>,
    pub store: Arc<dyn LedgerStore>,
    pub balances: Arc<BalanceBook>,
    pub clock: Arc<dyn Clock>,
    pub notifier: ChangeNotifier,
    pub scheduler: ConfirmationScheduler,
}

impl LedgerContext {
    /// Wire a context around an existing store
    ///
    /// The store is expected to publish its writes on `notifier`.
    pub fn new(
        config: PolicyConfig,
        store: Arc<dyn LedgerStore>,
        balances: Arc<BalanceBook>,
        clock: Arc<dyn Clock>,
        notifier: ChangeNotifier,
    ) -> Self {
        let config = Arc::new(config);
        let settlement = Arc::new(Settlement::new(
            Arc::clone(&store),
            Arc::clone(&balances),
            Arc::clone(&clock),
            Arc::clone(&config),
        ));
        Self {
            config,
            store,
            balances,
            clock,
            notifier,
            scheduler: ConfirmationScheduler::new(settlement),
        }
    }

    /// A fully in-memory ledger
    pub fn in_memory(config: PolicyConfig, clock: Arc<dyn Clock>) -> Self {
        let notifier = ChangeNotifier::new();
        let store = InMemoryLedgerStore::new(Arc::clone(&clock)).with_notifier(notifier.clone());
        Self::new(
            config,
            Arc::new(store),
            Arc::new(BalanceBook::new()),
            clock,
            notifier,
        )
    }

    /// Bounded `insert`
    ///
    /// A draft whose id is already present is treated as a retry of an
    /// earlier submission: the existing record is returned with `false`.
    pub(crate) async fn insert_once(
        &self,
        draft: TransactionDraft,
    ) -> Result<(Transaction, bool), LedgerError> {
        let owner = draft.user_id.clone();
        let limit = self.config.store_timeout;
        match with_timeout("insert", limit, self.store.insert(draft)).await {
            Ok(tx) => Ok((tx, true)),
            Err(LedgerError::DuplicateTransaction { tx }) => match self.fetch(tx).await? {
                Some(existing) if existing.user_id == owner => Ok((existing, false)),
                _ => Err(LedgerError::DuplicateTransaction { tx }),
            },
            Err(err) => Err(err),
        }
    }

    /// Bounded `get`
    pub(crate) async fn fetch(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError> {
        with_timeout("get", self.config.store_timeout, self.store.get(id)).await
    }

    /// Bounded `list_all_by_user`
    pub(crate) async fn records_of(&self, user_id: &str) -> Result<Vec<Transaction>, LedgerError> {
        with_timeout(
            "list_all_by_user",
            self.config.store_timeout,
            self.store.list_all_by_user(user_id),
        )
        .await
    }
}

impl Default for LedgerContext {
    fn default() -> Self {
        Self::in_memory(PolicyConfig::default(), Arc::new(SystemClock))
    }
}
