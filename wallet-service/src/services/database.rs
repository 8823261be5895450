//! Database service for wallet-service.

use crate::error::WalletError;
use crate::models::{
    cycle_end_after, CreditCost, CreditTransaction, LedgerReceipt, NewWallet, Plan,
    TransactionCursor, TransactionKind, Wallet,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{SpendLedger, WalletRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const WALLET_COLUMNS: &str = "user_id, plan, monthly_credits, credits_remaining, credits_used, \
     cycle_start, cycle_end, created_utc, updated_utc";

const TRANSACTION_COLUMNS: &str = "transaction_id, user_id, feature_key, amount, balance_before, \
     balance_after, kind, metadata, created_utc";

fn db_error(context: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "wallet-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| db_error("Failed to connect", e))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Upsert a cost row.
    #[instrument(skip(self, description))]
    pub async fn upsert_credit_cost(
        &self,
        feature_key: &str,
        cost: i64,
        description: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO credit_costs (feature_key, cost, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (feature_key)
            DO UPDATE SET cost = EXCLUDED.cost, description = EXCLUDED.description, updated_utc = NOW()
            "#,
        )
        .bind(feature_key)
        .bind(cost)
        .bind(description)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to upsert credit cost", e))?;
        Ok(())
    }

    async fn resolve_cost(
        tx: &mut Transaction<'_, Postgres>,
        feature_key: &str,
    ) -> Result<i64, WalletError> {
        let cost: Option<i64> =
            sqlx::query_scalar("SELECT cost FROM credit_costs WHERE feature_key = $1")
                .bind(feature_key)
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| db_error("Failed to resolve credit cost", e))?;

        cost.ok_or_else(|| WalletError::CostNotFound {
            feature_key: feature_key.to_string(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_transaction(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        feature_key: &str,
        amount: i64,
        balance_before: i64,
        balance_after: i64,
        kind: TransactionKind,
        metadata: &serde_json::Value,
    ) -> Result<Uuid, AppError> {
        let transaction_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO credit_transactions
                (transaction_id, user_id, feature_key, amount, balance_before, balance_after, kind, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(transaction_id)
        .bind(user_id)
        .bind(feature_key)
        .bind(amount)
        .bind(balance_before)
        .bind(balance_after)
        .bind(kind.as_str())
        .bind(metadata)
        .execute(&mut **tx)
        .await
        .map_err(|e| db_error("Failed to insert credit transaction", e))?;

        Ok(transaction_id)
    }
}

#[async_trait]
impl WalletRepository for Database {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn find_wallet(&self, user_id: Uuid) -> Result<Option<Wallet>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_wallet"])
            .start_timer();

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM user_wallets WHERE user_id = $1",
            WALLET_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get wallet", e))?;

        timer.observe_duration();

        Ok(wallet)
    }

    #[instrument(skip(self, wallet), fields(user_id = %wallet.user_id, plan = %wallet.plan))]
    async fn insert_wallet_if_absent(&self, wallet: &NewWallet) -> Result<Wallet, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_wallet"])
            .start_timer();

        let inserted = sqlx::query(
            r#"
            INSERT INTO user_wallets
                (user_id, plan, monthly_credits, credits_remaining, credits_used, cycle_start, cycle_end)
            VALUES ($1, $2, $3, $3, 0, $4, $5)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(wallet.user_id)
        .bind(wallet.plan.as_str())
        .bind(wallet.monthly_credits)
        .bind(wallet.cycle_start)
        .bind(wallet.cycle_end)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to create wallet", e))?
        .rows_affected();

        // Concurrent first reads race here; the loser reads the winner's row.
        let row = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM user_wallets WHERE user_id = $1",
            WALLET_COLUMNS
        ))
        .bind(wallet.user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to read provisioned wallet", e))?;

        timer.observe_duration();

        if inserted == 1 {
            info!(monthly_credits = row.monthly_credits, "Wallet provisioned");
        }

        Ok(row)
    }

    #[instrument(skip(self))]
    async fn fetch_credit_costs(&self) -> Result<Vec<CreditCost>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fetch_credit_costs"])
            .start_timer();

        let costs = sqlx::query_as::<_, CreditCost>(
            "SELECT feature_key, cost, description FROM credit_costs ORDER BY feature_key",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch credit costs", e))?;

        timer.observe_duration();

        Ok(costs)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        before: Option<TransactionCursor>,
    ) -> Result<Vec<CreditTransaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_transactions"])
            .start_timer();

        let transactions = sqlx::query_as::<_, CreditTransaction>(&format!(
            r#"
            SELECT {}
            FROM credit_transactions
            WHERE user_id = $1
              AND ($2::timestamptz IS NULL OR (created_utc, transaction_id) < ($2, $3))
            ORDER BY created_utc DESC, transaction_id DESC
            LIMIT $4
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .bind(before.map(|c| c.created_utc))
        .bind(before.map(|c| c.transaction_id))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list transactions", e))?;

        timer.observe_duration();

        Ok(transactions)
    }

    #[instrument(skip(self), fields(user_id = %user_id, plan = %plan))]
    async fn change_plan(
        &self,
        user_id: Uuid,
        plan: Plan,
        monthly_credits: i64,
    ) -> Result<Option<Wallet>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["change_plan"])
            .start_timer();

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            r#"
            UPDATE user_wallets
            SET plan = $2, monthly_credits = $3, updated_utc = NOW()
            WHERE user_id = $1
            RETURNING {}
            "#,
            WALLET_COLUMNS
        ))
        .bind(user_id)
        .bind(plan.as_str())
        .bind(monthly_credits)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to change plan", e))?;

        timer.observe_duration();

        Ok(wallet)
    }

    #[instrument(skip(self))]
    async fn rollover_expired_cycles(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["rollover_expired_cycles"])
            .start_timer();

        let reset = sqlx::query(
            r#"
            UPDATE user_wallets
            SET credits_remaining = monthly_credits,
                credits_used = 0,
                cycle_start = $1,
                cycle_end = $2,
                updated_utc = NOW()
            WHERE cycle_end <= $1
            "#,
        )
        .bind(now)
        .bind(cycle_end_after(now))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to roll over wallet cycles", e))?
        .rows_affected();

        timer.observe_duration();

        Ok(reset)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Health check failed", e))?;
        Ok(())
    }
}

#[async_trait]
impl SpendLedger for Database {
    /// Debit inside one transaction: the conditional UPDATE serializes
    /// concurrent spends on the wallet row, and the log insert commits with it.
    #[instrument(skip(self, metadata), fields(user_id = %user_id, feature_key = %feature_key))]
    async fn charge(
        &self,
        user_id: Uuid,
        feature_key: &str,
        metadata: &serde_json::Value,
    ) -> Result<LedgerReceipt, WalletError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["spend_credits"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let cost = Self::resolve_cost(&mut tx, feature_key).await?;

        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE user_wallets
            SET credits_remaining = credits_remaining - $2,
                credits_used = credits_used + $2,
                updated_utc = NOW()
            WHERE user_id = $1 AND credits_remaining >= $2
            RETURNING credits_remaining
            "#,
        )
        .bind(user_id)
        .bind(cost)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to debit wallet", e))?;

        let balance_after = match remaining {
            Some(balance) => balance,
            None => {
                let current: Option<i64> = sqlx::query_scalar(
                    "SELECT credits_remaining FROM user_wallets WHERE user_id = $1",
                )
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| db_error("Failed to read wallet balance", e))?;

                tx.rollback().await.ok();
                timer.observe_duration();

                return Err(match current {
                    Some(remaining) => WalletError::InsufficientCredits {
                        cost,
                        remaining,
                        feature_key: feature_key.to_string(),
                    },
                    None => WalletError::WalletNotFound { user_id },
                });
            }
        };

        let transaction_id = Self::insert_transaction(
            &mut tx,
            user_id,
            feature_key,
            cost,
            balance_after + cost,
            balance_after,
            TransactionKind::Charge,
            metadata,
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit charge", e))?;

        timer.observe_duration();

        info!(
            transaction_id = %transaction_id,
            cost = cost,
            remaining = balance_after,
            "Credits charged"
        );

        Ok(LedgerReceipt {
            transaction_id,
            cost,
            balance_after,
        })
    }

    #[instrument(skip(self, metadata), fields(user_id = %user_id, feature_key = %feature_key))]
    async fn record_bypass(
        &self,
        user_id: Uuid,
        feature_key: &str,
        metadata: &serde_json::Value,
    ) -> Result<LedgerReceipt, WalletError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_bypass"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let cost = Self::resolve_cost(&mut tx, feature_key).await?;

        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE user_wallets
            SET credits_used = credits_used + $2, updated_utc = NOW()
            WHERE user_id = $1 AND plan = 'scale'
            RETURNING credits_remaining
            "#,
        )
        .bind(user_id)
        .bind(cost)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to record bypass usage", e))?;

        let Some(balance) = remaining else {
            tx.rollback().await.ok();
            timer.observe_duration();
            warn!("Bypass requested for a wallet that is missing or not on the scale plan");
            return Err(WalletError::Unknown(anyhow::anyhow!(
                "Wallet {} is not eligible for scale-tier bypass",
                user_id
            )));
        };

        let transaction_id = Self::insert_transaction(
            &mut tx,
            user_id,
            feature_key,
            cost,
            balance,
            balance,
            TransactionKind::Bypass,
            metadata,
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit bypass", e))?;

        timer.observe_duration();

        info!(
            transaction_id = %transaction_id,
            cost = cost,
            "Scale-tier usage recorded"
        );

        Ok(LedgerReceipt {
            transaction_id,
            cost,
            balance_after: balance,
        })
    }
}
