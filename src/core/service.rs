//! Session-scoped entry point to the ledger
//!
//! [`LedgerService`] resolves the current user through the [`Session`]
//! collaborator and hands out everything a signed-in user can do: start a
//! deposit or withdrawal, read and subscribe to their ledger, read stats and
//! export CSV. Every entry point fails with [`LedgerError::Unauthenticated`]
//! when nobody is signed in, which the presentation layer turns into a
//! redirect.

use rust_decimal::Decimal;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::context::LedgerContext;
use super::deposit::DepositMachine;
use super::live_view::LiveLedgerView;
use super::notifier::LedgerChanged;
use super::query::{LedgerPage, LedgerQuery, LedgerQueryEngine};
use super::stats::LedgerStats;
use super::traits::Session;
use super::withdrawal::WithdrawalMachine;
use crate::io::write_ledger_csv;
use crate::types::{LedgerError, Transaction, TransactionType, UserId};

/// Ledger operations on behalf of the session's user
pub struct LedgerService {
    ctx: LedgerContext,
    session: Arc<dyn Session>,
    queries: LedgerQueryEngine,
}

impl LedgerService {
    pub fn new(ctx: LedgerContext, session: Arc<dyn Session>) -> Self {
        let queries = LedgerQueryEngine::new(&ctx);
        Self {
            ctx,
            session,
            queries,
        }
    }

    pub fn context(&self) -> &LedgerContext {
        &self.ctx
    }

    /// The signed-in user, or [`LedgerError::Unauthenticated`]
    pub fn current_user(&self) -> Result<UserId, LedgerError> {
        self.session.current_user_id().ok_or_else(|| {
            debug!("no authenticated user in session");
            LedgerError::Unauthenticated
        })
    }

    pub fn balance(&self) -> Result<Decimal, LedgerError> {
        let user = self.current_user()?;
        Ok(self.ctx.balances.balance(&user))
    }

    pub fn set_balance(&self, balance: Decimal) -> Result<(), LedgerError> {
        let user = self.current_user()?;
        self.ctx.balances.set_balance(&user, balance)?;
        info!(user_id = %user, %balance, "balance set");
        Ok(())
    }

    pub fn start_deposit(&self) -> Result<DepositMachine, LedgerError> {
        Ok(DepositMachine::new(self.ctx.clone(), self.current_user()?))
    }

    pub fn start_withdrawal(&self) -> Result<WithdrawalMachine, LedgerError> {
        Ok(WithdrawalMachine::new(self.ctx.clone(), self.current_user()?))
    }

    /// Re-attach to every deposit of the user that is still awaiting
    /// confirmation, rescheduling its settlement
    ///
    /// Used after a restart, when no timer is running for those records.
    pub async fn resume_pending_deposits(&self) -> Result<Vec<DepositMachine>, LedgerError> {
        let user = self.current_user()?;
        let pending: Vec<Transaction> = self
            .ctx
            .records_of(&user)
            .await?
            .into_iter()
            .filter(|tx| tx.tx_type == TransactionType::Deposit)
            .filter(|tx| !tx.status.is_terminal())
            .collect();

        let mut machines = Vec::with_capacity(pending.len());
        for tx in pending {
            let id = tx.id;
            match DepositMachine::resume(self.ctx.clone(), tx) {
                Ok(machine) => machines.push(machine),
                Err(err) => warn!(tx = %id, error = %err, "could not resume deposit"),
            }
        }
        info!(user_id = %user, resumed = machines.len(), "pending deposits resumed");
        Ok(machines)
    }

    /// Run a filtered, paginated query over the user's ledger
    pub async fn ledger(&self, query: &LedgerQuery) -> Result<LedgerPage, LedgerError> {
        let user = self.current_user()?;
        self.queries.run(&user, query).await
    }

    /// A page that refreshes itself on every ledger change
    pub async fn live_ledger(&self, query: LedgerQuery) -> Result<LiveLedgerView, LedgerError> {
        let user = self.current_user()?;
        LiveLedgerView::open(self.queries.clone(), &self.ctx.notifier, user, query).await
    }

    /// Stats over the user's whole ledger
    pub async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let user = self.current_user()?;
        self.queries.overall_stats(&user).await
    }

    /// The newest `limit` records, straight from the store
    pub async fn recent(&self, limit: usize) -> Result<Vec<Transaction>, LedgerError> {
        let user = self.current_user()?;
        let (items, _) = self.queries.recent(&user, 1, limit).await?;
        Ok(items)
    }

    /// Whether any of the user's records is still pending or processing
    pub async fn has_pending(&self) -> Result<bool, LedgerError> {
        Ok(self.stats().await?.pending_count > 0)
    }

    /// Write every record matching `query` (all pages) as CSV
    ///
    /// Returns the number of records written.
    pub async fn export_csv(
        &self,
        query: &LedgerQuery,
        output: &mut dyn Write,
    ) -> Result<usize, LedgerError> {
        let user = self.current_user()?;
        let records = self.queries.matching(&user, query).await?;
        write_ledger_csv(&records, output)?;
        info!(user_id = %user, records = records.len(), "ledger exported");
        Ok(records.len())
    }

    /// Call `callback` on every change to the user's ledger
    pub fn subscribe<F, Fut>(&self, callback: F) -> Result<JoinHandle<()>, LedgerError>
    where
        F: FnMut(LedgerChanged) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let user = self.current_user()?;
        Ok(self.ctx.notifier.subscribe_with(&user, callback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::StaticSession;
    use rstest::rstest;

    const BTC: &str = "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy";

    fn service(session: StaticSession) -> LedgerService {
        LedgerService::new(LedgerContext::default(), Arc::new(session))
    }

    #[rstest]
    #[case::balance("balance")]
    #[case::deposit("deposit")]
    #[case::withdrawal("withdrawal")]
    #[case::subscribe("subscribe")]
    #[tokio::test]
    async fn test_anonymous_session_is_rejected(#[case] operation: &str) {
        let service = service(StaticSession::anonymous());

        let err = match operation {
            "balance" => service.balance().unwrap_err(),
            "deposit" => service.start_deposit().unwrap_err(),
            "withdrawal" => service.start_withdrawal().unwrap_err(),
            "subscribe" => service.subscribe(|_| async {}).unwrap_err(),
            other => panic!("unknown operation {}", other),
        };

        assert_eq!(err, LedgerError::Unauthenticated);
    }

    #[tokio::test]
    async fn test_anonymous_ledger_read_is_rejected() {
        let service = service(StaticSession::anonymous());

        assert_eq!(
            service.ledger(&LedgerQuery::new()).await,
            Err(LedgerError::Unauthenticated)
        );
        assert_eq!(service.stats().await, Err(LedgerError::Unauthenticated));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flows_through_service() {
        let service = service(StaticSession::user("u1"));
        service.set_balance(Decimal::new(1_000, 0)).unwrap();

        let mut deposit = service.start_deposit().unwrap();
        deposit.enter_amount(Decimal::new(500, 0)).unwrap();
        deposit.confirm_payment_sent().await.unwrap();
        assert!(service.has_pending().await.unwrap());

        let mut withdrawal = service.start_withdrawal().unwrap();
        withdrawal.submit_details(Decimal::new(200, 0), BTC).await.unwrap();
        withdrawal.confirm().await.unwrap();
        assert_eq!(service.balance().unwrap(), Decimal::new(800, 0));

        service.context().scheduler.drain().await;

        assert_eq!(service.balance().unwrap(), Decimal::new(1_300, 0));
        assert!(!service.has_pending().await.unwrap());
        let stats = service.stats().await.unwrap();
        assert_eq!(stats.total_deposits, Decimal::new(500, 0));
        assert_eq!(stats.total_withdrawals, Decimal::new(200, 0));
        assert_eq!(service.recent(1).await.unwrap().len(), 1);

        let mut csv = Vec::new();
        let written = service.export_csv(&LedgerQuery::new(), &mut csv).await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(String::from_utf8(csv).unwrap().lines().count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_pending_deposits_after_restart() {
        let ctx = LedgerContext::default();
        let before = LedgerService::new(ctx.clone(), Arc::new(StaticSession::user("u1")));
        let mut deposit = before.start_deposit().unwrap();
        deposit.enter_amount(Decimal::new(500, 0)).unwrap();
        deposit.confirm_payment_sent().await.unwrap();

        // same ledger and balances, fresh scheduler with no timers
        let restarted_ctx = LedgerContext::new(
            (*ctx.config).clone(),
            ctx.store.clone(),
            ctx.balances.clone(),
            ctx.clock.clone(),
            ctx.notifier.clone(),
        );
        let after = LedgerService::new(restarted_ctx.clone(), Arc::new(StaticSession::user("u1")));
        let mut resumed = after.resume_pending_deposits().await.unwrap();
        assert_eq!(resumed.len(), 1);

        // both schedulers race to settle the same record; only one credits
        resumed[0].await_confirmation().await.unwrap();
        ctx.scheduler.drain().await;
        restarted_ctx.scheduler.drain().await;

        assert_eq!(after.balance().unwrap(), Decimal::new(500, 0));
    }
}
