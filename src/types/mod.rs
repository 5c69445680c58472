//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `account`: Per-user balance record
//! - `transaction`: Ledger records, statuses and identifiers
//! - `error`: Error types for the ledger engine

pub mod account;
pub mod error;
pub mod transaction;

pub use account::Account;
pub use error::{ErrorKind, Field, LedgerError, ValidationError, ValidationErrors};
pub use transaction::{
    meta, Metadata, StatusChange, StatusPatch, Transaction, TransactionDraft, TransactionId,
    TransactionStatus, TransactionType, UserId,
};
