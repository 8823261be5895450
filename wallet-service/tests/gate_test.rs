//! Spend gate integration tests over the in-memory store.

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{gate_over, gate_with_cache, give_wallet, seeded_store};
use serde_json::json;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wallet_service::error::WalletError;
use wallet_service::models::{
    CreditCost, CreditTransaction, NewWallet, Plan, TransactionCursor, TransactionKind, Wallet,
};
use wallet_service::services::cost_cache::{COSTS_KEY, COSTS_TIMESTAMP_KEY, DEFAULT_TTL};
use wallet_service::services::{
    CostCache, KeyValueStore, MemoryStore, WalletGate, WalletPolicy, WalletRepository,
};

/// Repository whose wallet reads or writes fail.
struct FailingWallets {
    lookup_fails: bool,
}

fn db_down() -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("connection refused"))
}

#[async_trait]
impl WalletRepository for FailingWallets {
    async fn find_wallet(&self, _user_id: Uuid) -> Result<Option<Wallet>, AppError> {
        if self.lookup_fails {
            Err(db_down())
        } else {
            Ok(None)
        }
    }

    async fn insert_wallet_if_absent(&self, _wallet: &NewWallet) -> Result<Wallet, AppError> {
        Err(db_down())
    }

    async fn fetch_credit_costs(&self) -> Result<Vec<CreditCost>, AppError> {
        Ok(common::test_costs())
    }

    async fn list_transactions(
        &self,
        _user_id: Uuid,
        _limit: i64,
        _before: Option<TransactionCursor>,
    ) -> Result<Vec<CreditTransaction>, AppError> {
        Err(db_down())
    }

    async fn change_plan(
        &self,
        _user_id: Uuid,
        _plan: Plan,
        _monthly_credits: i64,
    ) -> Result<Option<Wallet>, AppError> {
        Err(db_down())
    }

    async fn rollover_expired_cycles(&self, _now: DateTime<Utc>) -> Result<u64, AppError> {
        Err(db_down())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Err(db_down())
    }
}

fn failing_gate(lookup_fails: bool) -> WalletGate {
    WalletGate::new(
        Arc::new(FailingWallets { lookup_fails }),
        seeded_store(),
        CostCache::new(Arc::new(MemoryStore::new()), DEFAULT_TTL),
        WalletPolicy::default(),
    )
}

#[tokio::test]
async fn provisioning_failure_is_wallet_not_found() {
    let gate = failing_gate(false);
    let user_id = Uuid::new_v4();

    assert!(matches!(
        gate.get_wallet(Some(user_id)).await,
        Err(WalletError::WalletNotFound { user_id: id }) if id == user_id
    ));
    assert!(matches!(
        gate.charge_credits(Some(user_id), "listening_party_create", None).await,
        Err(WalletError::WalletNotFound { user_id: id }) if id == user_id
    ));
}

#[tokio::test]
async fn lookup_failure_is_unknown_on_read_and_not_found_on_charge() {
    let gate = failing_gate(true);
    let user_id = Uuid::new_v4();

    let err = gate.get_wallet(Some(user_id)).await.unwrap_err();
    assert!(matches!(err, WalletError::Unknown(_)), "got {err:?}");
    assert_eq!(err.code(), "UNKNOWN");

    assert!(matches!(
        gate.charge_credits(Some(user_id), "listening_party_create", None).await,
        Err(WalletError::WalletNotFound { user_id: id }) if id == user_id
    ));
}

#[tokio::test]
async fn first_read_provisions_operator_wallet() {
    common::init_tracing();
    let store = seeded_store();
    let gate = gate_over(store.clone(), DEFAULT_TTL);
    let user_id = Uuid::new_v4();

    let wallet = gate.get_wallet(Some(user_id)).await.unwrap();

    assert_eq!(wallet.plan, Plan::Operator);
    assert_eq!(wallet.monthly_credits, 30_000);
    assert_eq!(wallet.credits_remaining, 30_000);
    assert_eq!(wallet.credits_used, 0);
    assert!(wallet.cycle_end > wallet.cycle_start + ChronoDuration::days(27));
    assert!(wallet.cycle_end <= wallet.cycle_start + ChronoDuration::days(31));

    // Second read returns the same row.
    let again = gate.get_wallet(Some(user_id)).await.unwrap();
    assert_eq!(again.created_utc, wallet.created_utc);
}

#[tokio::test]
async fn missing_caller_is_unauthorized() {
    let gate = gate_over(seeded_store(), DEFAULT_TTL);

    assert!(matches!(
        gate.get_wallet(None).await,
        Err(WalletError::Unauthorized)
    ));
    assert!(matches!(
        gate.charge_credits(None, "listening_party_create", None).await,
        Err(WalletError::Unauthorized)
    ));
    assert!(matches!(
        gate.check_can_afford(None, "listening_party_create").await,
        Err(WalletError::Unauthorized)
    ));
    assert!(matches!(
        gate.list_transactions(None, 10, None).await,
        Err(WalletError::Unauthorized)
    ));
}

#[tokio::test]
async fn growth_wallet_short_of_credits_is_rejected() {
    let store = seeded_store();
    let gate = gate_over(store.clone(), DEFAULT_TTL);
    let user_id = give_wallet(&store, Plan::Growth, 500);

    let err = gate
        .charge_credits(Some(user_id), "listening_party_create", None)
        .await
        .unwrap_err();

    match err {
        WalletError::InsufficientCredits {
            cost,
            remaining,
            feature_key,
        } => {
            assert_eq!(cost, 800);
            assert_eq!(remaining, 500);
            assert_eq!(feature_key, "listening_party_create");
        }
        other => panic!("expected InsufficientCredits, got {other:?}"),
    }

    assert_eq!(store.wallet(user_id).unwrap().credits_remaining, 500);
    assert!(store.transactions_for(user_id).is_empty());
}

#[tokio::test]
async fn scale_wallet_bypasses_balance() {
    let store = seeded_store();
    let gate = gate_over(store.clone(), DEFAULT_TTL);
    let user_id = give_wallet(&store, Plan::Scale, 500);
    let used_before = store.wallet(user_id).unwrap().credits_used;

    let outcome = gate
        .charge_credits(
            Some(user_id),
            "listening_party_create",
            Some(json!({ "party_id": "p-42" })),
        )
        .await
        .unwrap();

    assert!(outcome.ok);
    assert!(outcome.bypassed);
    assert_eq!(outcome.remaining, 500);
    assert_eq!(outcome.cost, 800);

    let wallet = store.wallet(user_id).unwrap();
    assert_eq!(wallet.credits_remaining, 500);
    assert_eq!(wallet.credits_used, used_before + 800);

    let transactions = store.transactions_for(user_id);
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].kind, TransactionKind::Bypass);
    assert_eq!(transactions[0].metadata["bypass"], json!(true));
    assert_eq!(transactions[0].metadata["party_id"], json!("p-42"));
}

#[tokio::test]
async fn charge_debits_and_records_transaction() {
    let store = seeded_store();
    let gate = gate_over(store.clone(), DEFAULT_TTL);
    let user_id = give_wallet(&store, Plan::Operator, 2_000);

    let outcome = gate
        .charge_credits(Some(user_id), "ad_diagnostics_run", None)
        .await
        .unwrap();

    assert!(outcome.ok);
    assert!(!outcome.bypassed);
    assert_eq!(outcome.cost, 500);
    assert_eq!(outcome.remaining, 1_500);

    let wallet = store.wallet(user_id).unwrap();
    assert_eq!(wallet.credits_remaining, 1_500);
    assert!(wallet.is_balanced());

    let transactions = store.transactions_for(user_id);
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].kind, TransactionKind::Charge);
    assert_eq!(transactions[0].amount, 500);
    assert_eq!(transactions[0].balance_before, 2_000);
    assert_eq!(transactions[0].balance_after, 1_500);
}

#[tokio::test]
async fn exact_balance_can_be_spent_to_zero() {
    let store = seeded_store();
    let gate = gate_over(store.clone(), DEFAULT_TTL);
    let user_id = give_wallet(&store, Plan::Operator, 800);

    let outcome = gate
        .charge_credits(Some(user_id), "listening_party_create", None)
        .await
        .unwrap();
    assert_eq!(outcome.remaining, 0);

    assert!(gate
        .charge_credits(Some(user_id), "listening_party_create", None)
        .await
        .unwrap_err()
        .is_insufficient_credits());
}

#[tokio::test]
async fn free_and_unknown_features_change_nothing() {
    let store = seeded_store();
    let gate = gate_over(store.clone(), DEFAULT_TTL);
    let user_id = give_wallet(&store, Plan::Operator, 100);
    let used_before = store.wallet(user_id).unwrap().credits_used;

    for feature in ["course_lesson_view", "feature_nobody_priced"] {
        let outcome = gate
            .charge_credits(Some(user_id), feature, None)
            .await
            .unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.cost, 0);
        assert_eq!(outcome.remaining, 100);
    }

    assert_eq!(gate.get_cost("feature_nobody_priced").await.unwrap(), 0);
    let wallet = store.wallet(user_id).unwrap();
    assert_eq!(wallet.credits_remaining, 100);
    assert_eq!(wallet.credits_used, used_before);
    assert!(store.transactions_for(user_id).is_empty());
}

#[tokio::test]
async fn can_afford_does_not_mutate() {
    let store = seeded_store();
    let gate = gate_over(store.clone(), DEFAULT_TTL);
    let poor = give_wallet(&store, Plan::Growth, 500);
    let scale = give_wallet(&store, Plan::Scale, 0);

    assert!(!gate
        .check_can_afford(Some(poor), "listening_party_create")
        .await
        .unwrap());
    assert!(gate
        .check_can_afford(Some(poor), "ad_diagnostics_run")
        .await
        .unwrap());
    assert!(gate
        .check_can_afford(Some(scale), "cover_art_generate")
        .await
        .unwrap());

    assert_eq!(store.wallet(poor).unwrap().credits_remaining, 500);
    assert!(store.transactions_for(poor).is_empty());
}

#[tokio::test]
async fn cost_table_is_cached_within_ttl() {
    let store = seeded_store();
    let gate = gate_over(store.clone(), DEFAULT_TTL);

    gate.get_credit_costs(false).await.unwrap();
    gate.get_credit_costs(false).await.unwrap();
    gate.get_cost("listening_party_create").await.unwrap();
    assert_eq!(store.cost_fetch_count(), 1);

    gate.get_credit_costs(true).await.unwrap();
    assert_eq!(store.cost_fetch_count(), 2);
}

#[tokio::test]
async fn price_changes_show_after_cache_clear() {
    let store = seeded_store();
    let gate = gate_over(store.clone(), DEFAULT_TTL);

    assert_eq!(gate.get_cost("listening_party_create").await.unwrap(), 800);
    store.set_cost("listening_party_create", 900);
    assert_eq!(gate.get_cost("listening_party_create").await.unwrap(), 800);

    gate.clear_cost_cache().await.unwrap();
    assert_eq!(gate.get_cost("listening_party_create").await.unwrap(), 900);
}

#[tokio::test]
async fn corrupt_or_stale_cache_is_refetched() {
    let store = seeded_store();
    let cache = Arc::new(MemoryStore::new());
    let gate = gate_with_cache(store.clone(), cache.clone(), DEFAULT_TTL);

    cache
        .set(COSTS_KEY, "{not json", DEFAULT_TTL)
        .await
        .unwrap();
    cache
        .set(COSTS_TIMESTAMP_KEY, &Utc::now().to_rfc3339(), DEFAULT_TTL)
        .await
        .unwrap();

    let costs = gate.get_credit_costs(false).await.unwrap();
    assert_eq!(costs.len(), 4);
    assert_eq!(store.cost_fetch_count(), 1);

    let stale = Utc::now() - ChronoDuration::minutes(11);
    cache
        .set(COSTS_TIMESTAMP_KEY, &stale.to_rfc3339(), DEFAULT_TTL)
        .await
        .unwrap();
    gate.get_credit_costs(false).await.unwrap();
    assert_eq!(store.cost_fetch_count(), 2);
}

#[tokio::test]
async fn ledger_rejects_when_price_rises_behind_cache() {
    let store = seeded_store();
    let gate = gate_over(store.clone(), DEFAULT_TTL);
    let user_id = give_wallet(&store, Plan::Operator, 900);

    // Warm the cache at 800, then raise the real price above the balance.
    gate.get_cost("listening_party_create").await.unwrap();
    store.set_cost("listening_party_create", 1_200);

    let err = gate
        .charge_credits(Some(user_id), "listening_party_create", None)
        .await
        .unwrap_err();
    match err {
        WalletError::InsufficientCredits { cost, remaining, .. } => {
            assert_eq!(cost, 1_200);
            assert_eq!(remaining, 900);
        }
        other => panic!("expected InsufficientCredits, got {other:?}"),
    }
    assert_eq!(store.wallet(user_id).unwrap().credits_remaining, 900);
}

#[tokio::test]
async fn concurrent_charges_never_overdraw() {
    let store = seeded_store();
    let gate = Arc::new(gate_over(store.clone(), DEFAULT_TTL));
    let user_id = give_wallet(&store, Plan::Growth, 5_000);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            gate.charge_credits(Some(user_id), "cover_art_generate", None)
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert!(e.is_insufficient_credits(), "unexpected error: {e:?}"),
        }
    }

    assert_eq!(succeeded, 5);
    let wallet = store.wallet(user_id).unwrap();
    assert_eq!(wallet.credits_remaining, 0);
    assert_eq!(store.transactions_for(user_id).len(), 5);
}

#[tokio::test]
async fn transactions_are_listed_newest_first() {
    let store = seeded_store();
    let gate = gate_over(store.clone(), DEFAULT_TTL);
    let user_id = give_wallet(&store, Plan::Operator, 10_000);

    for feature in ["ad_diagnostics_run", "listening_party_create", "cover_art_generate"] {
        gate.charge_credits(Some(user_id), feature, None)
            .await
            .unwrap();
    }

    let page = gate.list_transactions(Some(user_id), 2, None).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].feature_key, "cover_art_generate");
    assert_eq!(page[1].feature_key, "listening_party_create");

    // Another user's history stays separate.
    let other = give_wallet(&store, Plan::Operator, 10_000);
    assert!(gate
        .list_transactions(Some(other), 10, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn plan_change_keeps_balance_and_sets_allotment() {
    let store = seeded_store();
    let gate = gate_over(store.clone(), DEFAULT_TTL);
    let user_id = give_wallet(&store, Plan::Operator, 1_234);

    let wallet = gate.change_plan(user_id, Plan::Growth).await.unwrap();
    assert_eq!(wallet.plan, Plan::Growth);
    assert_eq!(wallet.monthly_credits, 65_000);
    assert_eq!(wallet.credits_remaining, 1_234);

    let missing = Uuid::new_v4();
    assert!(matches!(
        gate.change_plan(missing, Plan::Scale).await,
        Err(WalletError::WalletNotFound { user_id }) if user_id == missing
    ));
}

#[tokio::test]
async fn rollover_restores_allotment_for_expired_cycles() {
    let store = seeded_store();
    let gate = gate_over(store.clone(), Duration::from_secs(60));
    let expired = give_wallet(&store, Plan::Growth, 100);
    let current = give_wallet(&store, Plan::Growth, 100);

    let mut wallet = store.wallet(expired).unwrap();
    let now = Utc::now();
    wallet.cycle_start = now - ChronoDuration::days(31);
    wallet.cycle_end = now - ChronoDuration::minutes(1);
    store.put_wallet(wallet);

    assert_eq!(gate.rollover_expired_cycles(now).await.unwrap(), 1);

    let wallet = store.wallet(expired).unwrap();
    assert_eq!(wallet.credits_remaining, 65_000);
    assert_eq!(wallet.credits_used, 0);
    assert!(wallet.cycle_end > now);
    assert_eq!(store.wallet(current).unwrap().credits_remaining, 100);
}
