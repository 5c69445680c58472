//! Deposit state machine
//!
//! `AmountEntry → PaymentInstructions → Confirming → Success`
//!
//! The machine writes exactly one pending ledger record, on the "I have sent
//! the funds" action, and schedules a [`SettlementJob::ConfirmDeposit`] for
//! it. The balance changes only when that job completes the record.
//!
//! # Idempotency
//!
//! Each deposit attempt carries a nonce that becomes the transaction id. A
//! retried `confirm_payment_sent` after a lost response finds the record
//! already inserted and reuses it, and the scheduler never runs two jobs for
//! the same id.
//!
//! # Example
//!
//! ```no_run
//! use rust_decimal::Decimal;
//! use rust_ledger_engine::core::{DepositMachine, LedgerContext};
//!
//! # async fn run() -> Result<(), rust_ledger_engine::LedgerError> {
//! let ctx = LedgerContext::default();
//! let mut deposit = DepositMachine::new(ctx, "user-1");
//! let quote = deposit.enter_amount(Decimal::new(500, 0))?;
//! println!("send {} to {}", quote.crypto_display(), quote.address);
//! deposit.confirm_payment_sent().await?;
//! let settled = deposit.await_confirmation().await?;
//! println!("new balance {}", settled.balance);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::context::LedgerContext;
use super::scheduler::ConfirmationHandle;
use super::settlement::{Settled, SettlementJob};
use super::validation::{check_amount_bounds, convert_to_secondary};
use crate::types::{
    meta, LedgerError, Transaction, TransactionDraft, TransactionId, TransactionStatus,
    TransactionType, UserId,
};

/// What the user is asked to send
#[derive(Debug, Clone, PartialEq)]
pub struct DepositQuote {
    /// Primary-unit amount credited on confirmation
    pub amount: Decimal,
    /// Secondary-unit amount to send
    pub crypto_amount: Decimal,
    pub rate: Decimal,
    /// Receiving address
    pub address: String,
    pub network: String,
}

impl DepositQuote {
    fn new(amount: Decimal, ctx: &LedgerContext) -> Self {
        let rate = ctx.config.conversion_rate;
        Self {
            amount,
            crypto_amount: convert_to_secondary(amount, rate),
            rate,
            address: ctx.config.deposit_address.clone(),
            network: ctx.config.deposit_network.clone(),
        }
    }

    /// Rebuild the quote recorded on a pending deposit
    fn from_record(tx: &Transaction, ctx: &LedgerContext) -> Self {
        let mut quote = Self::new(tx.amount, ctx);
        if let Some(rate) = metadata_decimal(tx, meta::CONVERSION_RATE) {
            quote.rate = rate;
            quote.crypto_amount = convert_to_secondary(tx.amount, rate);
        }
        if let Some(address) = tx.metadata.get(meta::DEPOSIT_ADDRESS).and_then(|v| v.as_str()) {
            quote.address = address.to_string();
        }
        if let Some(network) = &tx.sender {
            quote.network = network.clone();
        }
        quote
    }

    /// Secondary amount with exactly eight decimal places
    pub fn crypto_display(&self) -> String {
        format!("{:.8}", self.crypto_amount)
    }
}

fn metadata_decimal(tx: &Transaction, key: &str) -> Option<Decimal> {
    tx.metadata
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|raw| Decimal::from_str(raw).ok())
}

/// Steps of a deposit
#[derive(Debug, Clone, PartialEq)]
pub enum DepositState {
    AmountEntry,
    PaymentInstructions(DepositQuote),
    Confirming {
        quote: DepositQuote,
        transaction: Transaction,
        /// End of the confirmation window shown to the user
        deadline: DateTime<Utc>,
    },
    Success {
        transaction: Transaction,
        balance: Decimal,
    },
}

impl DepositState {
    pub fn name(&self) -> &'static str {
        match self {
            DepositState::AmountEntry => "AmountEntry",
            DepositState::PaymentInstructions(_) => "PaymentInstructions",
            DepositState::Confirming { .. } => "Confirming",
            DepositState::Success { .. } => "Success",
        }
    }
}

/// Drives one user's deposits
#[derive(Debug)]
pub struct DepositMachine {
    ctx: LedgerContext,
    user_id: UserId,
    nonce: TransactionId,
    amount: Option<Decimal>,
    state: DepositState,
    confirmation: Option<ConfirmationHandle>,
}

impl DepositMachine {
    pub fn new(ctx: LedgerContext, user_id: impl Into<UserId>) -> Self {
        Self {
            ctx,
            user_id: user_id.into(),
            nonce: Uuid::new_v4(),
            amount: None,
            state: DepositState::AmountEntry,
            confirmation: None,
        }
    }

    /// Re-attach to a deposit inserted by an earlier machine
    ///
    /// A pending record goes straight to `Confirming` and its settlement is
    /// scheduled for whatever remains of the completion delay. A completed
    /// record goes to `Success`.
    pub fn resume(ctx: LedgerContext, transaction: Transaction) -> Result<Self, LedgerError> {
        if transaction.tx_type != TransactionType::Deposit {
            return Err(LedgerError::unexpected_type(
                transaction.id,
                transaction.tx_type,
                TransactionType::Deposit,
            ));
        }

        let mut machine = Self::new(ctx, transaction.user_id.clone());
        machine.nonce = transaction.id;
        machine.amount = Some(transaction.amount);

        match transaction.status {
            TransactionStatus::Pending | TransactionStatus::Processing => {
                let elapsed = (machine.ctx.clock.now() - transaction.created_at)
                    .to_std()
                    .unwrap_or_default();
                let delay = machine
                    .ctx
                    .config
                    .deposit_completion_delay
                    .saturating_sub(elapsed);
                machine.enter_confirming(transaction, delay);
            }
            TransactionStatus::Completed => {
                machine.state = DepositState::Success {
                    balance: machine.ctx.balances.balance(&transaction.user_id),
                    transaction,
                };
            }
            TransactionStatus::Failed => {
                return Err(LedgerError::unexpected_status(
                    transaction.id,
                    transaction.status,
                    TransactionStatus::Completed,
                ));
            }
        }
        Ok(machine)
    }

    pub fn state(&self) -> &DepositState {
        &self.state
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Id the next inserted record will carry
    pub fn nonce(&self) -> TransactionId {
        self.nonce
    }

    /// Last accepted amount
    pub fn amount(&self) -> Option<Decimal> {
        self.amount
    }

    /// Validate `amount` and show the payment instructions
    pub fn enter_amount(&mut self, amount: Decimal) -> Result<DepositQuote, LedgerError> {
        if !matches!(self.state, DepositState::AmountEntry) {
            return Err(LedgerError::invalid_transition(self.state.name(), "enter amount"));
        }

        let config = &self.ctx.config;
        if let Some(error) = check_amount_bounds(amount, config.min_deposit, config.max_deposit) {
            warn!(user_id = %self.user_id, %amount, %error, "deposit amount rejected");
            return Err(error.into());
        }

        let quote = DepositQuote::new(amount, &self.ctx);
        self.amount = Some(amount);
        self.state = DepositState::PaymentInstructions(quote.clone());
        Ok(quote)
    }

    /// The user reports the funds as sent
    ///
    /// Inserts the pending record and schedules its confirmation. A store
    /// failure leaves the machine on the payment instructions so the same
    /// submission can be retried.
    pub async fn confirm_payment_sent(&mut self) -> Result<Transaction, LedgerError> {
        let quote = match &self.state {
            DepositState::PaymentInstructions(quote) => quote.clone(),
            other => {
                return Err(LedgerError::invalid_transition(other.name(), "confirm payment"))
            }
        };

        let now = self.ctx.clock.now();
        let expires_at = now
            + chrono::Duration::from_std(self.ctx.config.confirmation_window)
                .unwrap_or_else(|_| chrono::Duration::zero());
        let draft = TransactionDraft::pending(
            self.user_id.clone(),
            TransactionType::Deposit,
            quote.amount,
            format!("{} deposit pending", quote.network),
        )
        .with_sender(quote.network.clone())
        .with_metadata(meta::CRYPTO_AMOUNT, quote.crypto_display())
        .with_metadata(meta::CONVERSION_RATE, quote.rate.to_string())
        .with_metadata(meta::DEPOSIT_ADDRESS, quote.address.clone())
        .with_metadata(meta::EXPIRES_AT, expires_at.to_rfc3339())
        .with_id(self.nonce)
        .created_at(now);

        let (transaction, inserted) = match self.ctx.insert_once(draft).await {
            Ok(result) => result,
            Err(err) => {
                warn!(user_id = %self.user_id, nonce = %self.nonce, error = %err, "deposit submission failed");
                return Err(err);
            }
        };
        if inserted {
            info!(tx = %transaction.id, user_id = %self.user_id, amount = %transaction.amount, "deposit awaiting confirmation");
        }

        let delay = self.ctx.config.deposit_completion_delay;
        self.enter_confirming(transaction.clone(), delay);
        Ok(transaction)
    }

    fn enter_confirming(&mut self, transaction: Transaction, delay: Duration) {
        let window = chrono::Duration::from_std(self.ctx.config.confirmation_window)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let handle = self
            .ctx
            .scheduler
            .schedule(SettlementJob::ConfirmDeposit(transaction.id), delay);

        self.confirmation = Some(handle);
        self.state = DepositState::Confirming {
            quote: DepositQuote::from_record(&transaction, &self.ctx),
            deadline: transaction.created_at + window,
            transaction,
        };
    }

    /// Time left on the confirmation countdown, saturating at zero
    pub fn remaining(&self) -> Option<Duration> {
        match &self.state {
            DepositState::Confirming { deadline, .. } => Some(
                (*deadline - self.ctx.clock.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO),
            ),
            _ => None,
        }
    }

    /// Wait for the scheduled confirmation and move to `Success`
    ///
    /// On failure the machine stays in `Confirming`; the error says why the
    /// deposit could not be completed.
    pub async fn await_confirmation(&mut self) -> Result<Settled, LedgerError> {
        let handle = self.confirming_handle("await confirmation")?;
        let settled = handle.wait().await?;
        self.finish(&settled);
        Ok(settled)
    }

    /// Non-blocking check of the scheduled confirmation
    ///
    /// Returns `Ok(true)` if the machine moved to `Success`.
    pub fn poll(&mut self) -> Result<bool, LedgerError> {
        let handle = self.confirming_handle("poll confirmation")?;
        match handle.outcome() {
            None => Ok(false),
            Some(outcome) => {
                let settled = outcome?;
                self.finish(&settled);
                Ok(true)
            }
        }
    }

    fn confirming_handle(&self, action: &str) -> Result<ConfirmationHandle, LedgerError> {
        match (&self.state, &self.confirmation) {
            (DepositState::Confirming { .. }, Some(handle)) => Ok(handle.clone()),
            (DepositState::Confirming { transaction, .. }, None) => self
                .ctx
                .scheduler
                .handle(transaction.id)
                .ok_or_else(|| LedgerError::invalid_transition("Confirming", action)),
            (other, _) => Err(LedgerError::invalid_transition(other.name(), action)),
        }
    }

    fn finish(&mut self, settled: &Settled) {
        self.confirmation = None;
        self.state = DepositState::Success {
            transaction: settled.transaction.clone(),
            balance: settled.balance,
        };
    }

    /// Step back one screen
    ///
    /// Leaving `Confirming` only drops this machine's view of the
    /// confirmation; the scheduled settlement still runs.
    pub fn back(&mut self) {
        match std::mem::replace(&mut self.state, DepositState::AmountEntry) {
            DepositState::AmountEntry | DepositState::PaymentInstructions(_) => {}
            DepositState::Confirming { quote, .. } => {
                self.confirmation = None;
                self.state = DepositState::PaymentInstructions(quote);
            }
            DepositState::Success { .. } => self.start_new(),
        }
    }

    /// Reset to `AmountEntry` with a fresh nonce
    pub fn start_new(&mut self) {
        self.nonce = Uuid::new_v4();
        self.amount = None;
        self.confirmation = None;
        self.state = DepositState::AmountEntry;
    }
}
