//! In-process wallet store.
//!
//! Implements both storage ports over mutex-guarded maps. Every ledger
//! operation holds the lock for its whole check-debit-log sequence, which is
//! what gives it the same atomicity as the Postgres transaction.

use crate::error::WalletError;
use crate::models::{
    cycle_end_after, CreditCost, CreditTransaction, LedgerReceipt, NewWallet, Plan,
    TransactionCursor, TransactionKind, Wallet,
};
use crate::services::store::{SpendLedger, WalletRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    wallets: HashMap<Uuid, Wallet>,
    costs: BTreeMap<String, CreditCost>,
    transactions: Vec<CreditTransaction>,
}

/// Wallet store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryWalletStore {
    state: Mutex<MemoryState>,
    cost_fetches: AtomicUsize,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a cost table.
    pub fn with_costs<I>(costs: I) -> Self
    where
        I: IntoIterator<Item = CreditCost>,
    {
        let store = Self::new();
        {
            let mut state = store.state();
            for cost in costs {
                state.costs.insert(cost.feature_key.clone(), cost);
            }
        }
        store
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a cost row.
    pub fn set_cost(&self, feature_key: &str, cost: i64) {
        self.state()
            .costs
            .insert(feature_key.to_string(), CreditCost::new(feature_key, cost));
    }

    /// Insert or replace a wallet row as-is.
    pub fn put_wallet(&self, wallet: Wallet) {
        self.state().wallets.insert(wallet.user_id, wallet);
    }

    /// Snapshot of a wallet row.
    pub fn wallet(&self, user_id: Uuid) -> Option<Wallet> {
        self.state().wallets.get(&user_id).cloned()
    }

    /// All transactions for a user, oldest first.
    pub fn transactions_for(&self, user_id: Uuid) -> Vec<CreditTransaction> {
        self.state()
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    /// How many times the cost table was read.
    pub fn cost_fetch_count(&self) -> usize {
        self.cost_fetches.load(Ordering::SeqCst)
    }

    fn resolve_cost(state: &MemoryState, feature_key: &str) -> Result<i64, WalletError> {
        state
            .costs
            .get(feature_key)
            .map(|c| c.cost)
            .ok_or_else(|| WalletError::CostNotFound {
                feature_key: feature_key.to_string(),
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn append_transaction(
        state: &mut MemoryState,
        user_id: Uuid,
        feature_key: &str,
        amount: i64,
        balance_before: i64,
        balance_after: i64,
        kind: TransactionKind,
        metadata: &serde_json::Value,
    ) -> Uuid {
        let transaction_id = Uuid::new_v4();
        // Log timestamps strictly increase, matching insertion order.
        let mut created_utc = Utc::now();
        if let Some(last) = state.transactions.last() {
            if created_utc <= last.created_utc {
                created_utc = last.created_utc + chrono::Duration::microseconds(1);
            }
        }
        state.transactions.push(CreditTransaction {
            transaction_id,
            user_id,
            feature_key: feature_key.to_string(),
            amount,
            balance_before,
            balance_after,
            kind,
            metadata: metadata.clone(),
            created_utc,
        });
        transaction_id
    }
}

#[async_trait]
impl WalletRepository for InMemoryWalletStore {
    async fn find_wallet(&self, user_id: Uuid) -> Result<Option<Wallet>, AppError> {
        Ok(self.wallet(user_id))
    }

    async fn insert_wallet_if_absent(&self, wallet: &NewWallet) -> Result<Wallet, AppError> {
        let now = Utc::now();
        let mut state = self.state();
        let row = state
            .wallets
            .entry(wallet.user_id)
            .or_insert_with(|| wallet.clone().into_wallet(now));
        Ok(row.clone())
    }

    async fn fetch_credit_costs(&self) -> Result<Vec<CreditCost>, AppError> {
        self.cost_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.state().costs.values().cloned().collect())
    }

    async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        before: Option<TransactionCursor>,
    ) -> Result<Vec<CreditTransaction>, AppError> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(0);
        let mut page: Vec<CreditTransaction> = self
            .state()
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .filter(|t| before.map_or(true, |cursor| cursor.precedes(t)))
            .cloned()
            .collect();
        page.sort_by_key(|t| std::cmp::Reverse(t.cursor()));
        page.truncate(limit);
        Ok(page)
    }

    async fn change_plan(
        &self,
        user_id: Uuid,
        plan: Plan,
        monthly_credits: i64,
    ) -> Result<Option<Wallet>, AppError> {
        let mut state = self.state();
        Ok(state.wallets.get_mut(&user_id).map(|wallet| {
            wallet.plan = plan;
            wallet.monthly_credits = monthly_credits;
            wallet.updated_utc = Utc::now();
            wallet.clone()
        }))
    }

    async fn rollover_expired_cycles(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut state = self.state();
        let mut reset = 0;
        for wallet in state.wallets.values_mut().filter(|w| w.cycle_expired(now)) {
            wallet.credits_remaining = wallet.monthly_credits;
            wallet.credits_used = 0;
            wallet.cycle_start = now;
            wallet.cycle_end = cycle_end_after(now);
            wallet.updated_utc = now;
            reset += 1;
        }
        Ok(reset)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait]
impl SpendLedger for InMemoryWalletStore {
    async fn charge(
        &self,
        user_id: Uuid,
        feature_key: &str,
        metadata: &serde_json::Value,
    ) -> Result<LedgerReceipt, WalletError> {
        let mut state = self.state();
        let cost = Self::resolve_cost(&state, feature_key)?;

        let wallet = state
            .wallets
            .get_mut(&user_id)
            .ok_or(WalletError::WalletNotFound { user_id })?;

        if !wallet.has_balance_for(cost) {
            return Err(WalletError::InsufficientCredits {
                cost,
                remaining: wallet.credits_remaining,
                feature_key: feature_key.to_string(),
            });
        }

        let balance_before = wallet.credits_remaining;
        wallet.credits_remaining -= cost;
        wallet.credits_used += cost;
        wallet.updated_utc = Utc::now();
        let balance_after = wallet.credits_remaining;

        let transaction_id = Self::append_transaction(
            &mut state,
            user_id,
            feature_key,
            cost,
            balance_before,
            balance_after,
            TransactionKind::Charge,
            metadata,
        );

        Ok(LedgerReceipt {
            transaction_id,
            cost,
            balance_after,
        })
    }

    async fn record_bypass(
        &self,
        user_id: Uuid,
        feature_key: &str,
        metadata: &serde_json::Value,
    ) -> Result<LedgerReceipt, WalletError> {
        let mut state = self.state();
        let cost = Self::resolve_cost(&state, feature_key)?;

        let wallet = state
            .wallets
            .get_mut(&user_id)
            .filter(|w| w.plan.bypasses_balance())
            .ok_or_else(|| {
                WalletError::Unknown(anyhow::anyhow!(
                    "Wallet {} is not eligible for scale-tier bypass",
                    user_id
                ))
            })?;

        wallet.credits_used += cost;
        wallet.updated_utc = Utc::now();
        let balance = wallet.credits_remaining;

        let transaction_id = Self::append_transaction(
            &mut state,
            user_id,
            feature_key,
            cost,
            balance,
            balance,
            TransactionKind::Bypass,
            metadata,
        );

        Ok(LedgerReceipt {
            transaction_id,
            cost,
            balance_after: balance,
        })
    }
}
