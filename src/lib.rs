//! Rust Ledger Engine Library
//! # Overview
//!
//! This library tracks a per-user ledger of balance-affecting transactions
//! and drives the two flows that write to it: a crypto deposit and a crypto
//! withdrawal, each a small state machine with a simulated confirmation
//! delay.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (Transaction, Account, errors)
//! - [`config`] - Policy limits, fees, delays and rates
//! - [`core`] - Business logic components:
//!   - [`core::ledger_store`] - Append-mostly transaction store
//!   - [`core::balance_book`] - Per-user balances
//!   - [`core::deposit`] / [`core::withdrawal`] - Flow state machines
//!   - [`core::scheduler`] - Delayed, idempotent confirmation jobs
//!   - [`core::query`] / [`core::live_view`] - Filtered, paginated reads
//!   - [`core::service`] - Session-scoped entry point
//! - [`io`] - Action-script reading and CSV output
//! - [`cli`] / [`runner`] - Command-line replay of action scripts
//!
//! # Transaction Lifecycle
//!
//! - **Deposit**: inserted `pending`, confirmed after a delay; the balance is
//!   credited exactly once, on the confirming transition
//! - **Withdrawal**: the balance is debited when the request is submitted,
//!   the record is inserted `pending` and completed after a delay
//!
//! A record reaches `completed` or `failed` once and never moves again.

// Module declarations
pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod runner;
pub mod types;

pub use config::PolicyConfig;
pub use crate::core::{LedgerContext, LedgerService};
pub use io::write_ledger_csv;
pub use types::{
    Account, LedgerError, Transaction, TransactionId, TransactionStatus, TransactionType, UserId,
};
