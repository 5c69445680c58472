//! Error types for the ledger engine
//!
//! This module defines every error the lifecycle subsystem can surface.
//! Errors carry enough context to render a dismissible, user-attributable
//! message and are classified so callers know whether to re-prompt, offer a
//! retry, or abandon the affected transaction.
//!
//! # Error Categories
//!
//! - **Validation**: amount bounds, malformed destination, insufficient
//!   balance, daily cap. Recoverable by re-entering the same step.
//! - **Persistence**: ledger insert/update/list failures and timeouts.
//!   Recoverable with an explicit retry; never advances a state machine.
//! - **Inconsistent state**: a completion fired for a record that vanished
//!   or moved to an unexpected status. Fatal for that transaction only.

use super::transaction::{TransactionId, TransactionStatus, TransactionType, UserId};
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

/// Input field a validation failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Amount,
    Destination,
}

/// A single failed validation check
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Amount {amount} is below the minimum of {minimum}")]
    AmountBelowMinimum { amount: Decimal, minimum: Decimal },

    #[error("Amount {amount} exceeds the maximum of {maximum}")]
    AmountAboveMaximum { amount: Decimal, maximum: Decimal },

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Daily withdrawal limit of {limit} exceeded: already withdrawn {withdrawn_today}, requested {requested}")]
    DailyLimitExceeded {
        limit: Decimal,
        withdrawn_today: Decimal,
        requested: Decimal,
    },

    #[error("Invalid destination address '{address}'")]
    InvalidDestination { address: String },
}

impl ValidationError {
    /// The input field this failure belongs to
    pub fn field(&self) -> Field {
        match self {
            ValidationError::InvalidDestination { .. } => Field::Destination,
            _ => Field::Amount,
        }
    }
}

/// Every independent validation failure found for one submission
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    /// Failures attributed to `field`
    pub fn for_field(&self, field: Field) -> impl Iterator<Item = &ValidationError> {
        self.0.iter().filter(move |e| e.field() == field)
    }

    pub fn contains(&self, predicate: impl Fn(&ValidationError) -> bool) -> bool {
        self.0.iter().any(predicate)
    }

    /// `Ok(())` when no check failed, otherwise a [`LedgerError::Validation`]
    pub fn into_result(self) -> Result<(), LedgerError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::Validation(self))
        }
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        f.write_str(&messages.join("; "))
    }
}

/// Coarse classification used to decide how a failure is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Persistence,
    InconsistentState,
    Unauthenticated,
    Configuration,
    Io,
}

/// Main error type for the ledger engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// One or more input checks failed; no ledger write happened
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// A user action arrived in a state that does not accept it
    #[error("Cannot {action} while in state {state}")]
    InvalidTransition { state: String, action: String },

    /// The ledger store rejected or failed an operation
    #[error("Ledger store {operation} failed: {message}")]
    StoreUnavailable { operation: String, message: String },

    /// A ledger store call did not answer in time
    #[error("Ledger store {operation} timed out after {timeout_ms}ms")]
    StoreTimeout { operation: String, timeout_ms: u64 },

    /// Transaction IDs must be unique
    #[error("Duplicate transaction ID {tx}")]
    DuplicateTransaction { tx: TransactionId },

    /// A referenced transaction no longer exists
    #[error("Transaction {tx} not found for {operation}")]
    TransactionNotFound { tx: TransactionId, operation: String },

    /// A status transition was requested from an incompatible status
    #[error("Transaction {tx} is {current}, cannot move to {requested}")]
    UnexpectedStatus {
        tx: TransactionId,
        current: TransactionStatus,
        requested: TransactionStatus,
    },

    /// A completion step was aimed at a record of another type
    #[error("Transaction {tx} is a {actual}, expected a {expected}")]
    UnexpectedType {
        tx: TransactionId,
        actual: TransactionType,
        expected: TransactionType,
    },

    /// Balance arithmetic would overflow
    #[error("Arithmetic overflow in {operation} for user {user}")]
    ArithmeticOverflow { operation: String, user: UserId },

    /// No authenticated user in the current session
    #[error("Not authenticated")]
    Unauthenticated,

    /// Policy configuration is missing or inconsistent
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O error while reading scripts or writing exports
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Malformed input record
    #[error("CSV parse error{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    Parse { line: Option<u64>, message: String },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) | LedgerError::InvalidTransition { .. } => {
                ErrorKind::Validation
            }
            LedgerError::StoreUnavailable { .. }
            | LedgerError::StoreTimeout { .. }
            | LedgerError::DuplicateTransaction { .. } => ErrorKind::Persistence,
            LedgerError::TransactionNotFound { .. }
            | LedgerError::UnexpectedStatus { .. }
            | LedgerError::UnexpectedType { .. }
            | LedgerError::ArithmeticOverflow { .. } => ErrorKind::InconsistentState,
            LedgerError::Unauthenticated => ErrorKind::Unauthenticated,
            LedgerError::Config { .. } => ErrorKind::Configuration,
            LedgerError::Io { .. } | LedgerError::Parse { .. } => ErrorKind::Io,
        }
    }

    /// Whether the user can act on this error (re-enter input or retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Validation | ErrorKind::Persistence)
    }

    /// Validation failures carried by this error, if any
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            LedgerError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<ValidationError> for LedgerError {
    fn from(error: ValidationError) -> Self {
        LedgerError::Validation(error.into())
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(error: std::io::Error) -> Self {
        LedgerError::Io {
            message: error.to_string(),
        }
    }
}

impl From<csv::Error> for LedgerError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        LedgerError::Parse {
            line,
            message: error.to_string(),
        }
    }
}

// Helper functions for creating common errors

impl LedgerError {
    pub fn invalid_transition(state: &str, action: &str) -> Self {
        LedgerError::InvalidTransition {
            state: state.to_string(),
            action: action.to_string(),
        }
    }

    pub fn store_unavailable(operation: &str, message: impl Into<String>) -> Self {
        LedgerError::StoreUnavailable {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn store_timeout(operation: &str, timeout_ms: u64) -> Self {
        LedgerError::StoreTimeout {
            operation: operation.to_string(),
            timeout_ms,
        }
    }

    pub fn transaction_not_found(tx: TransactionId, operation: &str) -> Self {
        LedgerError::TransactionNotFound {
            tx,
            operation: operation.to_string(),
        }
    }

    pub fn unexpected_status(
        tx: TransactionId,
        current: TransactionStatus,
        requested: TransactionStatus,
    ) -> Self {
        LedgerError::UnexpectedStatus {
            tx,
            current,
            requested,
        }
    }

    pub fn unexpected_type(
        tx: TransactionId,
        actual: TransactionType,
        expected: TransactionType,
    ) -> Self {
        LedgerError::UnexpectedType {
            tx,
            actual,
            expected,
        }
    }

    pub fn arithmetic_overflow(operation: &str, user: &str) -> Self {
        LedgerError::ArithmeticOverflow {
            operation: operation.to_string(),
            user: user.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        LedgerError::Config {
            message: message.into(),
        }
    }
}
