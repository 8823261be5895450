//! Common test utilities for wallet-service integration tests.

#![allow(dead_code)]

use chrono::Utc;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wallet_service::config::WalletConfig;
use wallet_service::models::{CreditCost, NewWallet, Plan};
use wallet_service::services::{
    CostCache, InMemoryWalletStore, MemoryStore, WalletGate, WalletPolicy,
};
use wallet_service::startup::Application;

static INIT: Once = Once::new();

pub const ADMIN_KEY: &str = "test-admin-key";

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,wallet_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Cost table used across the suite.
pub fn test_costs() -> Vec<CreditCost> {
    vec![
        CreditCost::new("listening_party_create", 800),
        CreditCost::new("ad_diagnostics_run", 500),
        CreditCost::new("cover_art_generate", 1_000),
        CreditCost::new("course_lesson_view", 0),
    ]
}

/// Store seeded with [`test_costs`].
pub fn seeded_store() -> Arc<InMemoryWalletStore> {
    Arc::new(InMemoryWalletStore::with_costs(test_costs()))
}

/// Gate over `store` with an in-process cost cache.
pub fn gate_over(store: Arc<InMemoryWalletStore>, ttl: Duration) -> WalletGate {
    gate_with_cache(store, Arc::new(MemoryStore::new()), ttl)
}

/// Gate over `store` with a caller-provided cache backend.
pub fn gate_with_cache(
    store: Arc<InMemoryWalletStore>,
    cache: Arc<MemoryStore>,
    ttl: Duration,
) -> WalletGate {
    WalletGate::new(
        store.clone(),
        store,
        CostCache::new(cache, ttl),
        WalletPolicy::default(),
    )
}

/// Put a wallet on `plan` holding `remaining` credits into the store.
pub fn give_wallet(store: &InMemoryWalletStore, plan: Plan, remaining: i64) -> Uuid {
    let user_id = Uuid::new_v4();
    let now = Utc::now();
    let monthly = WalletPolicy::default().allotments.for_plan(plan);
    let mut wallet = NewWallet::starting_at(user_id, plan, monthly, now).into_wallet(now);
    wallet.credits_remaining = remaining;
    wallet.credits_used = monthly - remaining;
    store.put_wallet(wallet);
    user_id
}

/// Running HTTP server over an in-memory store.
pub struct TestApp {
    pub http_address: String,
    pub store: Arc<InMemoryWalletStore>,
    shutdown: CancellationToken,
}

impl TestApp {
    pub async fn spawn() -> Self {
        init_tracing();

        let mut config = WalletConfig::in_memory();
        config.admin.api_key = Some(ADMIN_KEY.to_string());

        let store = seeded_store();
        let app = Application::build_with_backend(config, store.clone(), store.clone())
            .await
            .expect("Failed to build application");

        let http_address = format!("http://127.0.0.1:{}", app.port());
        let shutdown = app.shutdown_token();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        Self {
            http_address,
            store,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.http_address, path)
    }

    pub async fn cleanup(&self) {
        self.shutdown.cancel();
    }
}
