//! Transaction-related types for the ledger engine
//!
//! This module defines the ledger's unit of record, its type and status
//! enumerations, and the draft/patch shapes used to insert and advance
//! records in a [`LedgerStore`](crate::core::LedgerStore).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// User identifier
///
/// Opaque account identifier handed out by the session collaborator.
pub type UserId = String;

/// Transaction identifier
///
/// Assigned at creation and never changed afterwards.
pub type TransactionId = Uuid;

/// Open key/value bag attached to a transaction
///
/// Additive only: keys may be attached during the lifecycle but an existing
/// key is never redefined.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Metadata keys written by the state machines
pub mod meta {
    /// Secondary-unit amount computed from the fixed conversion rate
    pub const CRYPTO_AMOUNT: &str = "crypto_amount";
    /// Conversion rate used to derive `crypto_amount`
    pub const CONVERSION_RATE: &str = "conversion_rate";
    /// Receiving address shown to the user for a deposit
    pub const DEPOSIT_ADDRESS: &str = "deposit_address";
    /// End of the confirmation window for a pending deposit
    pub const EXPIRES_AT: &str = "expires_at";
    /// Time the simulated confirmation landed
    pub const CONFIRMED_AT: &str = "confirmed_at";
    /// Destination address of a withdrawal
    pub const WALLET_ADDRESS: &str = "wallet_address";
    /// Network the destination address belongs to
    pub const NETWORK: &str = "network";
    /// Flat network fee charged on a withdrawal
    pub const NETWORK_FEE: &str = "network_fee";
    /// Percentage processing fee charged on a withdrawal
    pub const PROCESSING_FEE: &str = "processing_fee";
    /// Amount that reaches the destination after fees
    pub const NET_AMOUNT: &str = "net_amount";
    /// Expected completion time of a withdrawal
    pub const ESTIMATED_COMPLETION: &str = "estimated_completion";
    /// Time a withdrawal was marked completed
    pub const COMPLETED_AT: &str = "completed_at";
    /// Settlement attempt that performed the terminal status change
    pub const SETTLED_BY: &str = "settled_by";
}

/// Transaction types recorded in the ledger
///
/// The amount sign follows the effect on the owner's balance: deposits and
/// investment returns are positive, withdrawals and investment purchases are
/// negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Funds arriving from an external network
    Deposit,

    /// Funds leaving to an external destination
    Withdrawal,

    /// Purchase of, or return from, an investment product
    Investment,

    /// Internal movement between accounts
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Investment => "investment",
            TransactionType::Transfer => "transfer",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "investment" => Ok(TransactionType::Investment),
            "transfer" => Ok(TransactionType::Transfer),
            other => Err(format!("Invalid transaction type: '{}'", other)),
        }
    }
}

/// Lifecycle status of a transaction
///
/// A record starts at `Pending` or `Processing` and advances exactly once to
/// a terminal status (`Completed` or `Failed`). It never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    /// Whether no further transition may occur from this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            TransactionStatus::Pending => 0,
            TransactionStatus::Processing => 1,
            TransactionStatus::Completed | TransactionStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition
    ///
    /// Terminal statuses accept nothing; non-terminal statuses accept any
    /// status of strictly higher rank.
    pub fn can_advance_to(&self, next: TransactionStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "processing" => Ok(TransactionStatus::Processing),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("Invalid transaction status: '{}'", other)),
        }
    }
}

/// A ledger record
///
/// Field-for-field the persisted row shape:
/// `id, user_id, type, amount, description, status, sender, recipient,
/// metadata, created_at, updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    /// Signed amount; positive credits the owner, negative debits
    pub amount: Decimal,
    pub description: String,
    pub status: TransactionStatus,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Secondary-unit amount from metadata, if one was recorded
    pub fn crypto_amount(&self) -> Option<String> {
        self.metadata.get(meta::CRYPTO_AMOUNT).map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Counter-party label shown in listings: recipient first, then sender
    pub fn counterparty(&self) -> Option<&str> {
        self.recipient.as_deref().or(self.sender.as_deref())
    }
}

/// A transaction that has not been inserted yet
///
/// `id` and `created_at` are optional; the store assigns them when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDraft {
    pub id: Option<TransactionId>,
    pub user_id: UserId,
    pub tx_type: TransactionType,
    pub amount: Decimal,
    pub description: String,
    pub status: TransactionStatus,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub metadata: Metadata,
    pub created_at: Option<DateTime<Utc>>,
}

impl TransactionDraft {
    /// Start a pending draft for `user_id`
    pub fn pending(
        user_id: impl Into<UserId>,
        tx_type: TransactionType,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            tx_type,
            amount,
            description: description.into(),
            status: TransactionStatus::Pending,
            sender: None,
            recipient: None,
            metadata: Metadata::new(),
            created_at: None,
        }
    }

    /// Use a caller-chosen id, typically an idempotency nonce
    pub fn with_id(mut self, id: TransactionId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }
}

/// A status transition request for an existing transaction
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPatch {
    pub status: TransactionStatus,
    /// Keys to attach; keys already present on the record are left untouched
    pub metadata: Metadata,
    /// Optional one-time rewrite of the description
    pub description: Option<String>,
}

impl StatusPatch {
    pub fn new(status: TransactionStatus) -> Self {
        Self {
            status,
            metadata: Metadata::new(),
            description: None,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Outcome of applying a [`StatusPatch`]
///
/// `applied` is false when the record already held the requested terminal
/// status and the patch was a no-op. Callers use it to make follow-up side
/// effects (balance credits) happen exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub transaction: Transaction,
    pub applied: bool,
}
