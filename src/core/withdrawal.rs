//! Withdrawal state machine
//!
//! `AmountAndDestination → Confirm → Processing → Success`
//!
//! Unlike a deposit, a withdrawal takes the money out of the balance as soon
//! as it is submitted. The debit and the pending ledger insert succeed or
//! fail together: the balance is reserved first with an atomic
//! check-and-subtract, and credited back if the insert fails.
//!
//! # Validation
//!
//! `submit_details` runs every check independently and reports all failures
//! at once, each attributed to the amount or the destination field:
//! - amount within `[min_withdrawal, max_withdrawal]`
//! - amount covered by the current balance
//! - destination matches a known address format
//! - today's non-failed withdrawals plus this one stay within the daily cap
//!
//! The balance and the daily cap are checked again, atomically, on
//! confirmation.
//!
//! # Ambiguous submissions
//!
//! A store failure does not say whether the insert landed. After a failed
//! insert the machine looks the nonce up: funds are released only once the
//! record is known to be absent. Otherwise the reservation stays with the
//! machine, which keeps it on `Confirm` until a retry adopts the record.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::balance_book::DailyCap;
use super::context::LedgerContext;
use super::scheduler::ConfirmationHandle;
use super::settlement::{Settled, SettlementJob};
use super::validation::{check_amount_bounds, detect_network, FeeBreakdown, Network};
use crate::types::{
    meta, LedgerError, Transaction, TransactionDraft, TransactionId, TransactionStatus,
    TransactionType, UserId, ValidationError, ValidationErrors,
};

/// A validated withdrawal awaiting confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalRequest {
    /// Gross amount debited from the balance
    pub amount: Decimal,
    pub destination: String,
    pub network: Network,
    pub fees: FeeBreakdown,
}

/// Steps of a withdrawal
#[derive(Debug, Clone, PartialEq)]
pub enum WithdrawalState {
    AmountAndDestination,
    Confirm(WithdrawalRequest),
    Processing {
        request: WithdrawalRequest,
        transaction: Transaction,
        /// Balance right after the debit
        balance: Decimal,
    },
    Success {
        transaction: Transaction,
        balance: Decimal,
    },
}

impl WithdrawalState {
    pub fn name(&self) -> &'static str {
        match self {
            WithdrawalState::AmountAndDestination => "AmountAndDestination",
            WithdrawalState::Confirm(_) => "Confirm",
            WithdrawalState::Processing { .. } => "Processing",
            WithdrawalState::Success { .. } => "Success",
        }
    }
}

/// Funds taken from the balance for a submission not yet recorded
#[derive(Debug, Clone, Copy, PartialEq)]
struct Reservation {
    amount: Decimal,
    day: NaiveDate,
}

/// Drives one user's withdrawals
#[derive(Debug)]
pub struct WithdrawalMachine {
    ctx: LedgerContext,
    user_id: UserId,
    nonce: TransactionId,
    input: Option<(Decimal, String)>,
    state: WithdrawalState,
    completion: Option<ConfirmationHandle>,
    reserved: Option<Reservation>,
}

impl WithdrawalMachine {
    pub fn new(ctx: LedgerContext, user_id: impl Into<UserId>) -> Self {
        Self {
            ctx,
            user_id: user_id.into(),
            nonce: Uuid::new_v4(),
            input: None,
            state: WithdrawalState::AmountAndDestination,
            completion: None,
            reserved: None,
        }
    }

    pub fn state(&self) -> &WithdrawalState {
        &self.state
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Id the next inserted record will carry
    pub fn nonce(&self) -> TransactionId {
        self.nonce
    }

    /// Last submitted amount and destination, kept across `back`
    pub fn input(&self) -> Option<(Decimal, &str)> {
        self.input
            .as_ref()
            .map(|(amount, destination)| (*amount, destination.as_str()))
    }

    /// Validate amount and destination and move to `Confirm`
    pub async fn submit_details(
        &mut self,
        amount: Decimal,
        destination: &str,
    ) -> Result<WithdrawalRequest, LedgerError> {
        if !matches!(self.state, WithdrawalState::AmountAndDestination) {
            return Err(LedgerError::invalid_transition(self.state.name(), "submit details"));
        }

        let destination = destination.trim().to_string();
        self.input = Some((amount, destination.clone()));

        let config = &self.ctx.config;
        let mut errors = ValidationErrors::new();
        if let Some(error) = check_amount_bounds(amount, config.min_withdrawal, config.max_withdrawal) {
            errors.push(error);
        }
        let available = self.ctx.balances.balance(&self.user_id);
        if amount > available {
            errors.push(ValidationError::InsufficientBalance {
                available,
                requested: amount,
            });
        }
        let network = detect_network(&destination);
        if network.is_none() {
            errors.push(ValidationError::InvalidDestination {
                address: destination.clone(),
            });
        }

        if errors.is_empty() {
            let today = self.ctx.clock.now().date_naive();
            let withdrawn_today = self
                .recorded_withdrawals(today)
                .await?
                .max(self.ctx.balances.withdrawn_on(&self.user_id, today));
            let limit = self.ctx.config.daily_withdrawal_cap;
            if withdrawn_today + amount > limit {
                errors.push(ValidationError::DailyLimitExceeded {
                    limit,
                    withdrawn_today,
                    requested: amount,
                });
            }
        }

        let network = match (errors.is_empty(), network) {
            (true, Some(network)) => network,
            _ => {
                warn!(user_id = %self.user_id, %amount, errors = %errors, "withdrawal details rejected");
                return Err(LedgerError::Validation(errors));
            }
        };

        let config = &self.ctx.config;
        let request = WithdrawalRequest {
            amount,
            destination,
            network,
            fees: FeeBreakdown::compute(amount, config.network_fee, config.processing_fee_pct),
        };
        self.state = WithdrawalState::Confirm(request.clone());
        Ok(request)
    }

    /// Sum of the ledger's non-failed withdrawals created on `day` (UTC)
    async fn recorded_withdrawals(&self, day: NaiveDate) -> Result<Decimal, LedgerError> {
        let records = self.ctx.records_of(&self.user_id).await?;
        Ok(records
            .iter()
            .filter(|tx| tx.tx_type == TransactionType::Withdrawal)
            .filter(|tx| tx.status != TransactionStatus::Failed)
            .filter(|tx| tx.created_at.date_naive() == day)
            .map(|tx| tx.amount.abs())
            .sum())
    }

    /// Confirm the summary: reserve the funds, record the withdrawal and
    /// schedule its completion
    ///
    /// If the balance or the daily cap no longer covers the amount the
    /// machine returns to `AmountAndDestination`. If the ledger insert fails
    /// the machine stays on `Confirm` for a retry; the reservation is
    /// released unless the record may have landed.
    pub async fn confirm(&mut self) -> Result<Transaction, LedgerError> {
        let request = match &self.state {
            WithdrawalState::Confirm(request) => request.clone(),
            other => return Err(LedgerError::invalid_transition(other.name(), "confirm")),
        };

        let now = self.ctx.clock.now();
        if self.reserved.is_none() {
            let day = now.date_naive();
            let cap = DailyCap {
                limit: self.ctx.config.daily_withdrawal_cap,
                day,
                recorded: self.recorded_withdrawals(day).await?,
            };
            if let Err(err) = self.ctx.balances.try_reserve(&self.user_id, request.amount, cap) {
                warn!(user_id = %self.user_id, amount = %request.amount, error = %err, "withdrawal no longer covered");
                self.state = WithdrawalState::AmountAndDestination;
                return Err(err);
            }
            self.reserved = Some(Reservation {
                amount: request.amount,
                day,
            });
        }

        let eta: DateTime<Utc> = now
            + chrono::Duration::from_std(self.ctx.config.withdrawal_completion_delay)
                .unwrap_or_else(|_| chrono::Duration::zero());
        let draft = TransactionDraft::pending(
            self.user_id.clone(),
            TransactionType::Withdrawal,
            -request.amount,
            format!("Withdrawal to {} wallet", request.network),
        )
        .with_id(self.nonce)
        .with_recipient(request.destination.clone())
        .with_metadata(meta::WALLET_ADDRESS, request.destination.clone())
        .with_metadata(meta::NETWORK, request.network.as_str())
        .with_metadata(meta::NETWORK_FEE, request.fees.network_fee.to_string())
        .with_metadata(meta::PROCESSING_FEE, request.fees.processing_fee.to_string())
        .with_metadata(meta::NET_AMOUNT, request.fees.net_amount.to_string())
        .with_metadata(meta::ESTIMATED_COMPLETION, eta.to_rfc3339())
        .created_at(now);

        let (transaction, inserted) = match self.ctx.insert_once(draft).await {
            Ok(result) => result,
            Err(err) => {
                self.settle_failed_insert(&err).await;
                return Err(err);
            }
        };
        // the record now carries the reservation
        self.reserved = None;
        let balance = self.ctx.balances.balance(&self.user_id);
        if inserted {
            info!(tx = %transaction.id, user_id = %self.user_id, amount = %request.amount, %balance, "withdrawal submitted");
        } else {
            info!(tx = %transaction.id, user_id = %self.user_id, "withdrawal already recorded, adopting it");
        }

        let handle = self.ctx.scheduler.schedule(
            SettlementJob::CompleteWithdrawal(transaction.id),
            self.ctx.config.withdrawal_completion_delay,
        );
        self.completion = Some(handle);
        self.state = WithdrawalState::Processing {
            request,
            transaction: transaction.clone(),
            balance,
        };
        Ok(transaction)
    }

    /// Release the reservation after a failed insert, unless the record
    /// exists or might exist
    async fn settle_failed_insert(&mut self, err: &LedgerError) {
        let Some(reservation) = self.reserved else {
            return;
        };
        if matches!(
            err,
            LedgerError::StoreTimeout { .. } | LedgerError::StoreUnavailable { .. }
        ) {
            match self.ctx.fetch(self.nonce).await {
                Ok(None) => {}
                Ok(Some(_)) => {
                    warn!(user_id = %self.user_id, nonce = %self.nonce, error = %err, "withdrawal recorded despite store error, funds stay reserved");
                    return;
                }
                Err(lookup) => {
                    warn!(user_id = %self.user_id, nonce = %self.nonce, error = %err, %lookup, "withdrawal outcome unknown, funds stay reserved");
                    return;
                }
            }
        }

        match self
            .ctx
            .balances
            .release(&self.user_id, reservation.amount, reservation.day)
        {
            Ok(balance) => {
                warn!(user_id = %self.user_id, nonce = %self.nonce, error = %err, %balance, "withdrawal submission failed, funds released");
            }
            Err(release) => {
                error!(user_id = %self.user_id, amount = %reservation.amount, error = %release, "failed to release reserved funds");
            }
        }
        self.reserved = None;
    }

    /// Wait for the scheduled completion and move to `Success`
    pub async fn await_completion(&mut self) -> Result<Settled, LedgerError> {
        let handle = self.processing_handle("await completion")?;
        let settled = handle.wait().await?;
        self.finish(&settled);
        Ok(settled)
    }

    /// Non-blocking check of the scheduled completion
    ///
    /// Returns `Ok(true)` if the machine moved to `Success`.
    pub fn poll(&mut self) -> Result<bool, LedgerError> {
        let handle = self.processing_handle("poll completion")?;
        match handle.outcome() {
            None => Ok(false),
            Some(outcome) => {
                let settled = outcome?;
                self.finish(&settled);
                Ok(true)
            }
        }
    }

    fn processing_handle(&self, action: &str) -> Result<ConfirmationHandle, LedgerError> {
        match (&self.state, &self.completion) {
            (WithdrawalState::Processing { .. }, Some(handle)) => Ok(handle.clone()),
            (other, _) => Err(LedgerError::invalid_transition(other.name(), action)),
        }
    }

    fn finish(&mut self, settled: &Settled) {
        self.completion = None;
        self.state = WithdrawalState::Success {
            transaction: settled.transaction.clone(),
            balance: settled.balance,
        };
    }

    /// Step back one screen
    ///
    /// `Processing` has no way back: the funds are already committed. Nor
    /// does `Confirm` while a submission of unknown outcome holds funds.
    pub fn back(&mut self) {
        match std::mem::replace(&mut self.state, WithdrawalState::AmountAndDestination) {
            WithdrawalState::AmountAndDestination => {}
            confirm @ WithdrawalState::Confirm(_) if self.reserved.is_some() => {
                self.state = confirm
            }
            WithdrawalState::Confirm(_) => {}
            processing @ WithdrawalState::Processing { .. } => self.state = processing,
            WithdrawalState::Success { .. } => self.start_new(),
        }
    }

    /// Reset to `AmountAndDestination` with a fresh nonce
    ///
    /// Ignored while a submission of unknown outcome holds funds.
    pub fn start_new(&mut self) {
        if self.reserved.is_some() {
            warn!(user_id = %self.user_id, nonce = %self.nonce, "submission unresolved, keeping withdrawal");
            return;
        }
        self.nonce = Uuid::new_v4();
        self.input = None;
        self.completion = None;
        self.state = WithdrawalState::AmountAndDestination;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::core::clock::{Clock, ManualClock};
    use crate::core::ledger_store::faults::faulty_context;
    use crate::core::traits::LedgerStore;
    use crate::types::Field;
    use chrono::TimeZone;
    use rstest::rstest;
    use std::sync::Arc;

    const BTC: &str = "bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh";
    const ETH: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    fn context(balance: i64) -> (LedgerContext, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
        let ctx = LedgerContext::in_memory(PolicyConfig::default(), Arc::new(clock.clone()));
        ctx.balances.set_balance("u1", Decimal::new(balance, 0)).unwrap();
        (ctx, clock)
    }

    #[tokio::test]
    async fn test_insufficient_balance_rejected_without_insert() {
        let (ctx, _) = context(50_000);
        let mut machine = WithdrawalMachine::new(ctx.clone(), "u1");

        let err = machine
            .submit_details(Decimal::new(100_000, 0), BTC)
            .await
            .unwrap_err();

        let errors = err.validation_errors().unwrap();
        assert!(errors.contains(|e| matches!(e, ValidationError::InsufficientBalance { .. })));
        assert_eq!(machine.state(), &WithdrawalState::AmountAndDestination);
        assert_eq!(machine.input(), Some((Decimal::new(100_000, 0), BTC)));
        assert_eq!(ctx.balances.balance("u1"), Decimal::new(50_000, 0));
        assert!(ctx.store.list_all_by_user("u1").await.unwrap().is_empty());
    }

    #[rstest]
    #[case::all_three_fail(Decimal::new(200_000, 0), "not-an-address", 3)]
    #[case::bounds_and_destination(Decimal::new(10, 0), "xyz", 2)]
    #[case::destination_only(Decimal::new(100, 0), "0x123", 1)]
    #[tokio::test]
    async fn test_checks_are_reported_independently(
        #[case] amount: Decimal,
        #[case] destination: &str,
        #[case] expected: usize,
    ) {
        let (ctx, _) = context(1_000);
        let mut machine = WithdrawalMachine::new(ctx, "u1");

        let err = machine.submit_details(amount, destination).await.unwrap_err();

        let errors = err.validation_errors().unwrap();
        assert_eq!(errors.errors().len(), expected);
        assert_eq!(errors.for_field(Field::Destination).count(), 1);
    }

    #[tokio::test]
    async fn test_summary_carries_fees_and_network() {
        let (ctx, _) = context(5_000);
        let mut machine = WithdrawalMachine::new(ctx, "u1");

        let request = machine
            .submit_details(Decimal::new(1_000, 0), &format!("  {}  ", ETH))
            .await
            .unwrap();

        assert_eq!(request.network, Network::Ethereum);
        assert_eq!(request.destination, ETH);
        assert_eq!(request.fees.total_fees, Decimal::new(10, 0));
        assert_eq!(request.fees.net_amount, Decimal::new(990, 0));
        assert_eq!(machine.state().name(), "Confirm");
    }

    #[tokio::test(start_paused = true)]
    async fn test_balance_debited_on_submission_not_on_completion() {
        let (ctx, _) = context(5_000);
        let mut machine = WithdrawalMachine::new(ctx.clone(), "u1");
        machine.submit_details(Decimal::new(1_000, 0), BTC).await.unwrap();

        let tx = machine.confirm().await.unwrap();

        assert_eq!(ctx.balances.balance("u1"), Decimal::new(4_000, 0));
        assert_eq!(tx.amount, Decimal::new(-1_000, 0));
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.recipient.as_deref(), Some(BTC));
        assert_eq!(
            tx.metadata.get(meta::NET_AMOUNT),
            Some(&serde_json::Value::String("990.00".to_string()))
        );
        assert!(!machine.poll().unwrap());

        let settled = machine.await_completion().await.unwrap();

        assert_eq!(settled.transaction.status, TransactionStatus::Completed);
        assert_eq!(settled.balance, Decimal::new(4_000, 0));
        assert_eq!(ctx.balances.balance("u1"), Decimal::new(4_000, 0));
        assert_eq!(machine.state().name(), "Success");
    }

    #[tokio::test]
    async fn test_concurrent_spend_detected_on_confirm() {
        let (ctx, _) = context(1_000);
        let mut machine = WithdrawalMachine::new(ctx.clone(), "u1");
        machine.submit_details(Decimal::new(800, 0), BTC).await.unwrap();

        // another session spends most of the balance in between
        ctx.balances.try_debit("u1", Decimal::new(500, 0)).unwrap();
        let err = machine.confirm().await.unwrap_err();

        assert!(err
            .validation_errors()
            .unwrap()
            .contains(|e| matches!(e, ValidationError::InsufficientBalance { .. })));
        assert_eq!(machine.state(), &WithdrawalState::AmountAndDestination);
        assert_eq!(ctx.balances.balance("u1"), Decimal::new(500, 0));
        assert!(ctx.store.list_all_by_user("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_daily_cap_counts_todays_withdrawals() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
        let config = PolicyConfig {
            daily_withdrawal_cap: Decimal::new(1_500, 0),
            ..PolicyConfig::default()
        };
        let ctx = LedgerContext::in_memory(config, Arc::new(clock.clone()));
        ctx.balances.set_balance("u1", Decimal::new(10_000, 0)).unwrap();
        ctx.store
            .insert(
                TransactionDraft::pending("u1", TransactionType::Withdrawal, Decimal::new(-1_000, 0), "w")
                    .created_at(clock.now()),
            )
            .await
            .unwrap();
        ctx.store
            .insert(
                TransactionDraft::pending("u1", TransactionType::Withdrawal, Decimal::new(-5_000, 0), "old")
                    .created_at(clock.now() - chrono::Duration::days(1)),
            )
            .await
            .unwrap();

        let mut machine = WithdrawalMachine::new(ctx, "u1");
        let err = machine
            .submit_details(Decimal::new(600, 0), BTC)
            .await
            .unwrap_err();
        assert!(err
            .validation_errors()
            .unwrap()
            .contains(|e| matches!(e, ValidationError::DailyLimitExceeded { .. })));

        assert!(machine.submit_details(Decimal::new(500, 0), BTC).await.is_ok());
    }

    #[tokio::test]
    async fn test_back_from_confirm_keeps_input() {
        let (ctx, _) = context(5_000);
        let mut machine = WithdrawalMachine::new(ctx, "u1");
        machine.submit_details(Decimal::new(1_000, 0), BTC).await.unwrap();

        machine.back();

        assert_eq!(machine.state(), &WithdrawalState::AmountAndDestination);
        assert_eq!(machine.input(), Some((Decimal::new(1_000, 0), BTC)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_is_ignored_while_processing() {
        let (ctx, _) = context(5_000);
        let mut machine = WithdrawalMachine::new(ctx, "u1");
        machine.submit_details(Decimal::new(1_000, 0), BTC).await.unwrap();
        machine.confirm().await.unwrap();

        machine.back();

        assert_eq!(machine.state().name(), "Processing");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_unanswered_insert_debits_once() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
        let (ctx, store) = faulty_context(PolicyConfig::default(), Arc::new(clock));
        ctx.balances.set_balance("u1", Decimal::new(5_000, 0)).unwrap();
        let mut machine = WithdrawalMachine::new(ctx.clone(), "u1");
        machine.submit_details(Decimal::new(1_000, 0), BTC).await.unwrap();

        store.stall_inserts(1);
        let err = machine.confirm().await.unwrap_err();

        assert!(matches!(err, LedgerError::StoreTimeout { .. }));
        assert_eq!(machine.state().name(), "Confirm");
        assert_eq!(ctx.balances.balance("u1"), Decimal::new(4_000, 0));
        machine.back();
        assert_eq!(machine.state().name(), "Confirm");

        let tx = machine.confirm().await.unwrap();

        assert_eq!(tx.id, machine.nonce());
        assert_eq!(tx.amount, Decimal::new(-1_000, 0));
        assert_eq!(ctx.balances.balance("u1"), Decimal::new(4_000, 0));
        assert_eq!(ctx.store.list_all_by_user("u1").await.unwrap().len(), 1);
        assert_eq!(machine.state().name(), "Processing");
    }

    #[tokio::test(start_paused = true)]
    async fn test_daily_cap_rechecked_on_confirm() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
        let config = PolicyConfig {
            daily_withdrawal_cap: Decimal::new(1_000, 0),
            ..PolicyConfig::default()
        };
        let ctx = LedgerContext::in_memory(config, Arc::new(clock));
        ctx.balances.set_balance("u1", Decimal::new(5_000, 0)).unwrap();
        let mut first = WithdrawalMachine::new(ctx.clone(), "u1");
        let mut second = WithdrawalMachine::new(ctx.clone(), "u1");

        // both pass validation before either records anything
        first.submit_details(Decimal::new(800, 0), BTC).await.unwrap();
        second.submit_details(Decimal::new(800, 0), ETH).await.unwrap();
        first.confirm().await.unwrap();
        let err = second.confirm().await.unwrap_err();

        assert!(err
            .validation_errors()
            .unwrap()
            .contains(|e| matches!(e, ValidationError::DailyLimitExceeded { .. })));
        assert_eq!(second.state(), &WithdrawalState::AmountAndDestination);
        assert_eq!(ctx.balances.balance("u1"), Decimal::new(4_200, 0));
        assert_eq!(ctx.store.list_all_by_user("u1").await.unwrap().len(), 1);
    }
}
