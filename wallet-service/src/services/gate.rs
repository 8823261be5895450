//! Spend authorization gate.
//!
//! Decides whether a caller may run a paid feature, charges the wallet, and
//! surfaces a structured shortfall when the balance is too low. Durability
//! and atomicity belong to the [`SpendLedger`]; the gate owns only the cost
//! cache.

use crate::error::WalletError;
use crate::models::{
    lookup_cost, ChargeOutcome, CreditCost, CreditTransaction, NewWallet, Plan, PlanAllotments,
    TransactionCursor, Wallet,
};
use crate::services::cost_cache::{CacheLookup, CostCache};
use crate::services::metrics::{
    record_cache_lookup, record_charge, record_credits_charged, record_error, record_rollover,
};
use crate::services::store::{SpendLedger, WalletRepository};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Upper bound for one page of transaction history.
pub const MAX_TRANSACTION_PAGE: i64 = 100;

/// Provisioning and plan rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletPolicy {
    pub default_plan: Plan,
    pub default_monthly_credits: i64,
    pub allotments: PlanAllotments,
}

impl Default for WalletPolicy {
    fn default() -> Self {
        Self {
            default_plan: Plan::Operator,
            default_monthly_credits: 30_000,
            allotments: PlanAllotments::default(),
        }
    }
}

pub struct WalletGate {
    wallets: Arc<dyn WalletRepository>,
    ledger: Arc<dyn SpendLedger>,
    cost_cache: CostCache,
    policy: WalletPolicy,
}

impl WalletGate {
    pub fn new(
        wallets: Arc<dyn WalletRepository>,
        ledger: Arc<dyn SpendLedger>,
        cost_cache: CostCache,
        policy: WalletPolicy,
    ) -> Self {
        Self {
            wallets,
            ledger,
            cost_cache,
            policy,
        }
    }

    pub fn policy(&self) -> &WalletPolicy {
        &self.policy
    }

    /// Resolve the caller's wallet, provisioning it on first read.
    #[instrument(skip(self))]
    pub async fn get_wallet(&self, caller: Option<Uuid>) -> Result<Wallet, WalletError> {
        let user_id = caller.ok_or(WalletError::Unauthorized)?;
        self.load_wallet(user_id).await
    }

    async fn load_wallet(&self, user_id: Uuid) -> Result<Wallet, WalletError> {
        if let Some(wallet) = self.wallets.find_wallet(user_id).await? {
            return Ok(wallet);
        }

        let seed = NewWallet::starting_at(
            user_id,
            self.policy.default_plan,
            self.policy.default_monthly_credits,
            Utc::now(),
        );

        match self.wallets.insert_wallet_if_absent(&seed).await {
            Ok(wallet) => Ok(wallet),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Wallet provisioning failed");
                record_error("wallet_provisioning");
                Err(WalletError::WalletNotFound { user_id })
            }
        }
    }

    /// Full cost table, served from cache while fresh.
    #[instrument(skip(self))]
    pub async fn get_credit_costs(&self, force_refresh: bool) -> Result<Vec<CreditCost>, WalletError> {
        let now = Utc::now();

        if force_refresh {
            record_cache_lookup("bypass");
        } else if let CacheLookup::Fresh(costs) = self.cost_cache.load(now).await {
            debug!(count = costs.len(), "Cost table served from cache");
            return Ok(costs);
        }

        let costs = self.wallets.fetch_credit_costs().await?;
        self.cost_cache.store(&costs, now).await;
        debug!(count = costs.len(), "Cost table refreshed");
        Ok(costs)
    }

    /// Cost of one feature. Unknown features cost 0 and are always allowed.
    #[instrument(skip(self))]
    pub async fn get_cost(&self, feature_key: &str) -> Result<i64, WalletError> {
        let costs = self.get_credit_costs(false).await?;
        match lookup_cost(&costs, feature_key) {
            Some(cost) => Ok(cost),
            None => {
                warn!(feature_key = %feature_key, "No credit cost configured, allowing for free");
                Ok(0)
            }
        }
    }

    /// Authorize and charge one action.
    #[instrument(skip(self, metadata))]
    pub async fn charge_credits(
        &self,
        caller: Option<Uuid>,
        feature_key: &str,
        metadata: Option<Value>,
    ) -> Result<ChargeOutcome, WalletError> {
        let result = self.authorize_and_charge(caller, feature_key, metadata).await;
        match &result {
            Ok(outcome) if outcome.bypassed => {
                record_charge("bypassed");
                record_credits_charged("bypass", outcome.cost);
            }
            Ok(outcome) if outcome.cost == 0 => record_charge("free"),
            Ok(outcome) => {
                record_charge("charged");
                record_credits_charged("charge", outcome.cost);
            }
            Err(WalletError::InsufficientCredits { .. }) => record_charge("insufficient"),
            Err(e) => {
                record_charge("error");
                record_error(e.code());
            }
        }
        result
    }

    async fn authorize_and_charge(
        &self,
        caller: Option<Uuid>,
        feature_key: &str,
        metadata: Option<Value>,
    ) -> Result<ChargeOutcome, WalletError> {
        let user_id = caller.ok_or(WalletError::Unauthorized)?;

        let wallet = match self.load_wallet(user_id).await {
            Ok(wallet) => wallet,
            Err(WalletError::Unknown(e)) => {
                warn!(user_id = %user_id, error = %e, "Wallet lookup failed during charge");
                return Err(WalletError::WalletNotFound { user_id });
            }
            Err(e) => return Err(e),
        };

        let cost = self.get_cost(feature_key).await?;
        if cost == 0 {
            debug!(feature_key = %feature_key, "Free feature, nothing charged");
            return Ok(ChargeOutcome::charged(wallet.credits_remaining, 0));
        }

        let metadata = metadata.unwrap_or_else(|| json!({}));

        if wallet.plan.bypasses_balance() {
            let receipt = self
                .ledger
                .record_bypass(user_id, feature_key, &tag_bypass(metadata))
                .await?;
            info!(
                user_id = %user_id,
                feature_key = %feature_key,
                cost = receipt.cost,
                "Scale-tier bypass"
            );
            return Ok(ChargeOutcome::bypassed(receipt.balance_after, receipt.cost));
        }

        if !wallet.has_balance_for(cost) {
            info!(
                user_id = %user_id,
                feature_key = %feature_key,
                cost = cost,
                remaining = wallet.credits_remaining,
                "Insufficient credits"
            );
            return Err(WalletError::InsufficientCredits {
                cost,
                remaining: wallet.credits_remaining,
                feature_key: feature_key.to_string(),
            });
        }

        let receipt = self.ledger.charge(user_id, feature_key, &metadata).await?;
        Ok(ChargeOutcome::charged(receipt.balance_after, receipt.cost))
    }

    /// Non-mutating affordability check for UI state.
    #[instrument(skip(self))]
    pub async fn check_can_afford(
        &self,
        caller: Option<Uuid>,
        feature_key: &str,
    ) -> Result<bool, WalletError> {
        let wallet = self.get_wallet(caller).await?;
        if wallet.plan.bypasses_balance() {
            return Ok(true);
        }
        let cost = self.get_cost(feature_key).await?;
        Ok(wallet.can_afford(cost))
    }

    /// Drop the cached cost table.
    #[instrument(skip(self))]
    pub async fn clear_cost_cache(&self) -> Result<(), WalletError> {
        self.cost_cache.clear().await?;
        info!("Cost cache cleared");
        Ok(())
    }

    /// Caller's transaction history, newest first.
    #[instrument(skip(self))]
    pub async fn list_transactions(
        &self,
        caller: Option<Uuid>,
        limit: i64,
        before: Option<TransactionCursor>,
    ) -> Result<Vec<CreditTransaction>, WalletError> {
        let user_id = caller.ok_or(WalletError::Unauthorized)?;
        let limit = limit.clamp(1, MAX_TRANSACTION_PAGE);
        Ok(self.wallets.list_transactions(user_id, limit, before).await?)
    }

    /// Move a wallet to another plan and its allotment. The remaining balance
    /// is kept until the next rollover.
    #[instrument(skip(self))]
    pub async fn change_plan(&self, user_id: Uuid, plan: Plan) -> Result<Wallet, WalletError> {
        let monthly_credits = self.policy.allotments.for_plan(plan);
        let wallet = self
            .wallets
            .change_plan(user_id, plan, monthly_credits)
            .await?
            .ok_or(WalletError::WalletNotFound { user_id })?;

        info!(
            user_id = %user_id,
            plan = %plan,
            monthly_credits = monthly_credits,
            "Wallet plan changed"
        );
        Ok(wallet)
    }

    /// Reset all wallets whose cycle has ended.
    #[instrument(skip(self))]
    pub async fn rollover_expired_cycles(&self, now: DateTime<Utc>) -> Result<u64, WalletError> {
        let reset = self.wallets.rollover_expired_cycles(now).await?;
        record_rollover(reset);
        if reset > 0 {
            info!(wallets = reset, "Wallet cycles rolled over");
        }
        Ok(reset)
    }

    pub async fn health_check(&self) -> Result<(), WalletError> {
        Ok(self.wallets.health_check().await?)
    }
}

/// Mark metadata as belonging to a scale-tier bypass.
fn tag_bypass(metadata: Value) -> Value {
    match metadata {
        Value::Object(mut map) => {
            map.insert("bypass".to_string(), Value::Bool(true));
            Value::Object(map)
        }
        Value::Null => json!({ "bypass": true }),
        other => json!({ "bypass": true, "value": other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_tag_merges_into_objects() {
        let tagged = tag_bypass(json!({ "party_id": "p-1" }));
        assert_eq!(tagged, json!({ "party_id": "p-1", "bypass": true }));
    }

    #[test]
    fn bypass_tag_wraps_scalars() {
        assert_eq!(tag_bypass(Value::Null), json!({ "bypass": true }));
        assert_eq!(
            tag_bypass(json!("note")),
            json!({ "bypass": true, "value": "note" })
        );
    }

    #[test]
    fn default_policy_provisions_operator_wallets() {
        let policy = WalletPolicy::default();
        assert_eq!(policy.default_plan, Plan::Operator);
        assert_eq!(policy.default_monthly_credits, 30_000);
    }
}
