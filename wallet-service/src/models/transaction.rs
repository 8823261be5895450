//! Credit transaction log model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// How a transaction affected the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Balance was debited.
    Charge,
    /// Scale-tier usage: counted in `credits_used`, balance untouched.
    Bypass,
}

#[derive(Debug, Error)]
#[error("Unknown transaction kind: {0}")]
pub struct ParseKindError(pub String);

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Charge => "charge",
            TransactionKind::Bypass => "bypass",
        }
    }
}

impl TryFrom<String> for TransactionKind {
    type Error = ParseKindError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "charge" => Ok(TransactionKind::Charge),
            "bypass" => Ok(TransactionKind::Bypass),
            _ => Err(ParseKindError(value)),
        }
    }
}

/// Immutable record of one charge attempt's effect on a wallet.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub feature_key: String,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    #[sqlx(try_from = "String")]
    pub kind: TransactionKind,
    pub metadata: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

impl CreditTransaction {
    /// Keyset position of this row in newest-first history.
    pub fn cursor(&self) -> TransactionCursor {
        TransactionCursor {
            created_utc: self.created_utc,
            transaction_id: self.transaction_id,
        }
    }
}

/// Position in history ordered by `(created_utc, transaction_id)` descending.
/// A page after the cursor holds rows strictly below it in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionCursor {
    pub created_utc: DateTime<Utc>,
    pub transaction_id: Uuid,
}

impl TransactionCursor {
    /// Cursor from a bare timestamp: every row created strictly earlier.
    pub fn at(created_utc: DateTime<Utc>) -> Self {
        Self {
            created_utc,
            transaction_id: Uuid::nil(),
        }
    }

    /// Whether `tx` comes after this cursor in newest-first order.
    pub fn precedes(&self, tx: &CreditTransaction) -> bool {
        tx.cursor() < *self
    }
}

/// What the ledger committed for one charge or bypass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerReceipt {
    pub transaction_id: Uuid,
    pub cost: i64,
    pub balance_after: i64,
}

/// Result of a successful `charge_credits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub ok: bool,
    pub remaining: i64,
    pub cost: i64,
    pub bypassed: bool,
}

impl ChargeOutcome {
    pub fn charged(remaining: i64, cost: i64) -> Self {
        Self {
            ok: true,
            remaining,
            cost,
            bypassed: false,
        }
    }

    pub fn bypassed(remaining: i64, cost: i64) -> Self {
        Self {
            ok: true,
            remaining,
            cost,
            bypassed: true,
        }
    }
}
