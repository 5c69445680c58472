//! Policy configuration
//!
//! Every policy constant the state machines consult lives in [`PolicyConfig`].
//! Defaults match the product's published limits; each value can be
//! overridden from the environment (or a `.env` file) with a `LEDGER_`
//! prefixed variable.

use crate::core::retry::RetryPolicy;
use crate::types::LedgerError;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

/// Limits, fees, delays and rates for deposits and withdrawals
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    pub min_deposit: Decimal,
    pub max_deposit: Decimal,
    pub min_withdrawal: Decimal,
    pub max_withdrawal: Decimal,
    /// Sum of non-failed withdrawals allowed per UTC day
    pub daily_withdrawal_cap: Decimal,
    /// Flat fee charged on every withdrawal
    pub network_fee: Decimal,
    /// Percentage fee on the withdrawal amount, e.g. `0.5` for 0.5%
    pub processing_fee_pct: Decimal,
    /// How long a pending deposit is shown as awaiting confirmation
    pub confirmation_window: Duration,
    /// Simulated delay before a deposit is confirmed
    pub deposit_completion_delay: Duration,
    /// Simulated delay before a withdrawal is marked completed
    pub withdrawal_completion_delay: Duration,
    /// Primary-to-secondary unit rate used for the deposit quote
    pub conversion_rate: Decimal,
    /// Static receiving address shown on the payment instructions step
    pub deposit_address: String,
    /// Network label recorded as the deposit sender
    pub deposit_network: String,
    /// Upper bound on a single ledger store call
    pub store_timeout: Duration,
    /// Retry policy for scheduled completions
    pub completion_retry: RetryPolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_deposit: Decimal::new(50, 0),
            max_deposit: Decimal::new(50_000, 0),
            min_withdrawal: Decimal::new(50, 0),
            max_withdrawal: Decimal::new(100_000, 0),
            daily_withdrawal_cap: Decimal::new(100_000, 0),
            network_fee: Decimal::new(500, 2),
            processing_fee_pct: Decimal::new(5, 1),
            confirmation_window: Duration::from_secs(1800),
            deposit_completion_delay: Duration::from_secs(30),
            withdrawal_completion_delay: Duration::from_secs(30),
            conversion_rate: Decimal::new(25, 6),
            deposit_address: "bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh".to_string(),
            deposit_network: "Bitcoin".to_string(),
            store_timeout: Duration::from_secs(5),
            completion_retry: RetryPolicy::default(),
        }
    }
}

impl PolicyConfig {
    /// Load configuration from the process environment
    ///
    /// A `.env` file in the working directory is read first if present.
    /// Unset variables keep their default value.
    pub fn from_env() -> Result<Self, LedgerError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LedgerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();

        let decimal = |key: &str, fallback: Decimal| -> Result<Decimal, LedgerError> {
            match lookup(key) {
                Some(raw) => Decimal::from_str(raw.trim())
                    .map_err(|e| LedgerError::config(format!("{}='{}': {}", key, raw, e))),
                None => Ok(fallback),
            }
        };
        let seconds = |key: &str, fallback: Duration| -> Result<Duration, LedgerError> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| LedgerError::config(format!("{}='{}': {}", key, raw, e))),
                None => Ok(fallback),
            }
        };

        let config = Self {
            min_deposit: decimal("LEDGER_MIN_DEPOSIT", default.min_deposit)?,
            max_deposit: decimal("LEDGER_MAX_DEPOSIT", default.max_deposit)?,
            min_withdrawal: decimal("LEDGER_MIN_WITHDRAWAL", default.min_withdrawal)?,
            max_withdrawal: decimal("LEDGER_MAX_WITHDRAWAL", default.max_withdrawal)?,
            daily_withdrawal_cap: decimal(
                "LEDGER_DAILY_WITHDRAWAL_CAP",
                default.daily_withdrawal_cap,
            )?,
            network_fee: decimal("LEDGER_NETWORK_FEE", default.network_fee)?,
            processing_fee_pct: decimal("LEDGER_PROCESSING_FEE_PCT", default.processing_fee_pct)?,
            confirmation_window: seconds(
                "LEDGER_CONFIRMATION_WINDOW_SECS",
                default.confirmation_window,
            )?,
            deposit_completion_delay: seconds(
                "LEDGER_DEPOSIT_DELAY_SECS",
                default.deposit_completion_delay,
            )?,
            withdrawal_completion_delay: seconds(
                "LEDGER_WITHDRAWAL_DELAY_SECS",
                default.withdrawal_completion_delay,
            )?,
            conversion_rate: decimal("LEDGER_CONVERSION_RATE", default.conversion_rate)?,
            deposit_address: lookup("LEDGER_DEPOSIT_ADDRESS").unwrap_or(default.deposit_address),
            deposit_network: lookup("LEDGER_DEPOSIT_NETWORK").unwrap_or(default.deposit_network),
            store_timeout: seconds("LEDGER_STORE_TIMEOUT_SECS", default.store_timeout)?,
            completion_retry: default.completion_retry,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject bounds that could never admit a request
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.min_deposit <= Decimal::ZERO || self.min_deposit > self.max_deposit {
            return Err(LedgerError::config(format!(
                "deposit bounds must satisfy 0 < min <= max (got {}..{})",
                self.min_deposit, self.max_deposit
            )));
        }
        if self.min_withdrawal <= Decimal::ZERO || self.min_withdrawal > self.max_withdrawal {
            return Err(LedgerError::config(format!(
                "withdrawal bounds must satisfy 0 < min <= max (got {}..{})",
                self.min_withdrawal, self.max_withdrawal
            )));
        }
        if self.daily_withdrawal_cap < self.min_withdrawal {
            return Err(LedgerError::config(
                "daily withdrawal cap is below the minimum withdrawal",
            ));
        }
        if self.network_fee < Decimal::ZERO
            || self.processing_fee_pct < Decimal::ZERO
            || self.processing_fee_pct >= Decimal::ONE_HUNDRED
        {
            return Err(LedgerError::config("fees must be non-negative and below 100%"));
        }
        if self.network_fee >= self.min_withdrawal {
            return Err(LedgerError::config(
                "network fee must be below the minimum withdrawal",
            ));
        }
        if self.conversion_rate <= Decimal::ZERO {
            return Err(LedgerError::config("conversion rate must be positive"));
        }
        if self.deposit_completion_delay >= self.confirmation_window {
            return Err(LedgerError::config(
                "deposit completion delay must be shorter than the confirmation window",
            ));
        }
        Ok(())
    }
}
