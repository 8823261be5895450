//! Application startup and lifecycle management.

use crate::config::{StorageBackend, WalletConfig};
use crate::handlers::{admin, costs, credits, health, wallet};
use crate::middleware::admin_auth_middleware;
use crate::models::default_credit_costs;
use crate::services::{
    init_metrics, CostCache, CycleRolloverJob, Database, InMemoryWalletStore, KeyValueStore,
    MemoryStore, RedisStore, SpendLedger, WalletGate, WalletRepository,
};
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<WalletGate>,
    pub admin_api_key: Option<Arc<str>>,
}

/// Build the HTTP router over the given state.
pub fn router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/wallets/:user_id/plan", put(admin::change_plan))
        .route("/credit-costs/cache", delete(costs::clear_cost_cache))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    let api_routes = Router::new()
        .route("/wallet", get(wallet::get_wallet))
        .route("/transactions", get(wallet::list_transactions))
        .route("/credit-costs", get(costs::list_costs))
        .route("/credit-costs/:feature_key", get(costs::get_cost))
        .route("/credits/charge", post(credits::charge))
        .route("/credits/can-afford/:feature_key", get(credits::can_afford))
        .nest("/admin", admin_routes);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_handler))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    config: WalletConfig,
    shutdown_token: CancellationToken,
}

impl Application {
    /// Build the application with the configured backend, running migrations.
    pub async fn build(config: WalletConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: WalletConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: WalletConfig, run_migrations: bool) -> Result<Self, AppError> {
        let (wallets, ledger): (Arc<dyn WalletRepository>, Arc<dyn SpendLedger>) =
            match &config.backend {
                StorageBackend::Postgres(database) => {
                    let db = Database::new(
                        &database.url,
                        database.max_connections,
                        database.min_connections,
                    )
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                        e
                    })?;

                    if run_migrations {
                        db.run_migrations().await.map_err(|e| {
                            tracing::error!(error = %e, "Failed to run migrations");
                            e
                        })?;
                    }

                    let db = Arc::new(db);
                    (db.clone(), db)
                }
                StorageBackend::Memory => {
                    tracing::warn!("Using in-memory wallet store; balances are not durable");
                    let store = Arc::new(InMemoryWalletStore::with_costs(default_credit_costs()));
                    (store.clone(), store)
                }
            };

        Self::build_with_backend(config, wallets, ledger).await
    }

    /// Build the application over explicit storage ports.
    pub async fn build_with_backend(
        config: WalletConfig,
        wallets: Arc<dyn WalletRepository>,
        ledger: Arc<dyn SpendLedger>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let cache_store: Arc<dyn KeyValueStore> = match &config.cost_cache.redis_url {
            Some(url) => Arc::new(RedisStore::connect(url).await.map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to Redis");
                e
            })?),
            None => Arc::new(MemoryStore::new()),
        };
        let cost_cache = CostCache::new(cache_store, config.cost_cache.ttl());

        let gate = Arc::new(WalletGate::new(
            wallets,
            ledger,
            cost_cache,
            config.policy.to_policy(),
        ));

        let state = AppState {
            gate,
            admin_api_key: config.admin.api_key.as_deref().map(Arc::from),
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Wallet service listener bound");

        Ok(Self {
            port,
            listener,
            state,
            config,
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the wallet gate.
    pub fn gate(&self) -> Arc<WalletGate> {
        self.state.gate.clone()
    }

    /// Token that stops the server and background jobs when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        if self.config.rollover.enabled {
            let job = CycleRolloverJob::new(
                self.state.gate.clone(),
                self.config.rollover.interval(),
                self.shutdown_token.child_token(),
            );
            tokio::spawn(job.run());
        } else {
            tracing::info!("Cycle rollover job disabled by configuration");
        }

        let app = router(self.state);

        tracing::info!(
            service = %self.config.service_name,
            version = %self.config.service_version,
            port = self.port,
            "Service ready to accept connections"
        );

        let token = self.shutdown_token.clone();
        let result = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;

        self.shutdown_token.cancel();

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
