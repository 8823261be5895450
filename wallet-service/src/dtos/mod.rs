//! Request and response bodies for the HTTP API.

use crate::models::{CreditCost, CreditTransaction, Plan, TransactionCursor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChargeRequest {
    #[validate(length(min = 1, max = 100))]
    pub feature_key: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CostsQuery {
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostsResponse {
    pub costs: Vec<CreditCost>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostResponse {
    pub feature_key: String,
    pub cost: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffordResponse {
    pub feature_key: String,
    pub can_afford: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
    pub before: Option<DateTime<Utc>>,
    /// Tie-breaker for `before`; rows at exactly `before` with a smaller id
    /// are still returned.
    pub before_id: Option<Uuid>,
}

impl TransactionsQuery {
    pub fn cursor(&self) -> Option<TransactionCursor> {
        self.before.map(|created_utc| match self.before_id {
            Some(transaction_id) => TransactionCursor {
                created_utc,
                transaction_id,
            },
            None => TransactionCursor::at(created_utc),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<CreditTransaction>,
    /// Pass as `before` and `before_id` to fetch the next page; absent on
    /// the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_before: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_before_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePlanRequest {
    pub plan: Plan,
}
