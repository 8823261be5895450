//! Storage ports used by the wallet gate.

use crate::error::WalletError;
use crate::models::{
    CreditCost, CreditTransaction, LedgerReceipt, NewWallet, Plan, TransactionCursor, Wallet,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

/// Wallet rows, the cost table and the transaction history.
#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn find_wallet(&self, user_id: Uuid) -> Result<Option<Wallet>, AppError>;

    /// Insert `wallet` unless the user already has one; return whichever row
    /// exists afterwards.
    async fn insert_wallet_if_absent(&self, wallet: &NewWallet) -> Result<Wallet, AppError>;

    async fn fetch_credit_costs(&self) -> Result<Vec<CreditCost>, AppError>;

    /// Newest first by `(created_utc, transaction_id)`, at most `limit`,
    /// strictly after `before` in that order if given.
    async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        before: Option<TransactionCursor>,
    ) -> Result<Vec<CreditTransaction>, AppError>;

    /// Set plan and allotment. `credits_remaining` is left alone.
    async fn change_plan(
        &self,
        user_id: Uuid,
        plan: Plan,
        monthly_credits: i64,
    ) -> Result<Option<Wallet>, AppError>;

    /// Reset every wallet whose cycle ended at or before `now`.
    async fn rollover_expired_cycles(&self, now: DateTime<Utc>) -> Result<u64, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

/// Debit-and-log boundary.
///
/// Implementations resolve the authoritative cost for the feature themselves
/// and must apply the balance change and the transaction insert as one unit.
#[async_trait]
pub trait SpendLedger: Send + Sync {
    /// Debit the feature's cost. Fails with `InsufficientCredits` if the
    /// balance at commit time is below the cost.
    async fn charge(
        &self,
        user_id: Uuid,
        feature_key: &str,
        metadata: &serde_json::Value,
    ) -> Result<LedgerReceipt, WalletError>;

    /// Scale-tier usage: add the cost to `credits_used` and log a bypass
    /// transaction without touching `credits_remaining`.
    async fn record_bypass(
        &self,
        user_id: Uuid,
        feature_key: &str,
        metadata: &serde_json::Value,
    ) -> Result<LedgerReceipt, WalletError>;
}
