//! Time-bounded read-through cache for the credit cost table.
//!
//! The table is kept as two entries in a [`KeyValueStore`]: the serialized
//! costs and the RFC 3339 timestamp of the fetch that produced them. An entry
//! that is missing, unparsable or older than the TTL counts as a miss; the
//! gate then refetches and rewrites both entries.

use crate::models::CreditCost;
use crate::services::metrics::record_cache_lookup;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Key holding the serialized cost table.
pub const COSTS_KEY: &str = "ghoste_credit_costs";

/// Key holding the fetch timestamp of [`COSTS_KEY`].
pub const COSTS_TIMESTAMP_KEY: &str = "ghoste_credit_costs_ts";

/// Default freshness window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// String key-value store backing the cache.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    /// Store `value`. Stores with native expiry should drop it after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError>;

    async fn remove(&self, key: &str) -> Result<(), AppError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), AppError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), AppError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Redis-backed store, shared across service instances.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        tracing::info!("Connecting to Redis for cost cache");
        let client = redis::Client::open(url)
            .map_err(|e| AppError::CacheError(anyhow::anyhow!("Invalid Redis URL: {}", e)))?;

        // ConnectionManager reconnects on its own after drops
        let manager = client.get_connection_manager().await.map_err(|e| {
            AppError::CacheError(anyhow::anyhow!("Failed to connect to Redis: {}", e))
        })?;

        tracing::info!("Redis connection established");
        Ok(Self { manager })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::CacheError(anyhow::anyhow!("Failed to get {}: {}", key, e)))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::CacheError(anyhow::anyhow!("Failed to set {}: {}", key, e)))
    }

    async fn remove(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::CacheError(anyhow::anyhow!("Failed to delete {}: {}", key, e)))
    }
}

/// Outcome of reading the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Fresh(Vec<CreditCost>),
    Missing,
    Stale,
    Corrupt,
}

impl CacheLookup {
    fn label(&self) -> &'static str {
        match self {
            CacheLookup::Fresh(_) => "hit",
            CacheLookup::Missing => "miss",
            CacheLookup::Stale => "stale",
            CacheLookup::Corrupt => "corrupt",
        }
    }
}

/// Cost table cache over an injectable store.
#[derive(Clone)]
pub struct CostCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl CostCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Read the cached table. Store failures and garbage both count as misses.
    pub async fn load(&self, now: DateTime<Utc>) -> CacheLookup {
        let lookup = self.read(now).await;
        record_cache_lookup(lookup.label());
        lookup
    }

    async fn read(&self, now: DateTime<Utc>) -> CacheLookup {
        let (raw_costs, raw_ts) = match (
            self.store.get(COSTS_KEY).await,
            self.store.get(COSTS_TIMESTAMP_KEY).await,
        ) {
            (Ok(Some(costs)), Ok(Some(ts))) => (costs, ts),
            (Ok(_), Ok(_)) => return CacheLookup::Missing,
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Cost cache read failed, treating as miss");
                return CacheLookup::Missing;
            }
        };

        let fetched_at = match DateTime::parse_from_rfc3339(raw_ts.trim()) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                warn!(error = %e, "Cost cache timestamp unparsable, refetching");
                return CacheLookup::Corrupt;
            }
        };

        if !self.is_fresh(fetched_at, now) {
            debug!(fetched_at = %fetched_at, "Cost cache expired");
            return CacheLookup::Stale;
        }

        match serde_json::from_str::<Vec<CreditCost>>(&raw_costs) {
            Ok(costs) => CacheLookup::Fresh(costs),
            Err(e) => {
                warn!(error = %e, "Cost cache payload unparsable, refetching");
                CacheLookup::Corrupt
            }
        }
    }

    /// Fresh iff fetched within the TTL and not in the future.
    pub fn is_fresh(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(fetched_at);
        match age.to_std() {
            Ok(age) => age < self.ttl,
            Err(_) => false,
        }
    }

    /// Write both entries. Failures are logged, not returned: the table was
    /// fetched successfully and the caller still gets it.
    pub async fn store(&self, costs: &[CreditCost], fetched_at: DateTime<Utc>) {
        let payload = match serde_json::to_string(costs) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Failed to serialize cost table");
                return;
            }
        };

        if let Err(e) = self.store.set(COSTS_KEY, &payload, self.ttl).await {
            warn!(error = %e, "Failed to write cost cache");
            return;
        }
        if let Err(e) = self
            .store
            .set(COSTS_TIMESTAMP_KEY, &fetched_at.to_rfc3339(), self.ttl)
            .await
        {
            warn!(error = %e, "Failed to write cost cache timestamp");
        }
    }

    /// Remove both entries.
    pub async fn clear(&self) -> Result<(), AppError> {
        self.store.remove(COSTS_KEY).await?;
        self.store.remove(COSTS_TIMESTAMP_KEY).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (CostCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (CostCache::new(store.clone(), DEFAULT_TTL), store)
    }

    fn costs() -> Vec<CreditCost> {
        vec![
            CreditCost::new("listening_party_create", 800),
            CreditCost::new("course_lesson_view", 0),
        ]
    }

    #[tokio::test]
    async fn empty_store_is_a_miss() {
        let (cache, _) = cache();
        assert_eq!(cache.load(Utc::now()).await, CacheLookup::Missing);
    }

    #[tokio::test]
    async fn stored_table_is_fresh_within_ttl() {
        let (cache, _) = cache();
        let now = Utc::now();
        cache.store(&costs(), now).await;

        let later = now + chrono::Duration::minutes(9);
        assert_eq!(cache.load(later).await, CacheLookup::Fresh(costs()));
    }

    #[tokio::test]
    async fn table_expires_after_ttl() {
        let (cache, _) = cache();
        let now = Utc::now();
        cache.store(&costs(), now).await;

        let later = now + chrono::Duration::minutes(10);
        assert_eq!(cache.load(later).await, CacheLookup::Stale);
    }

    #[tokio::test]
    async fn future_timestamp_is_not_fresh() {
        let (cache, _) = cache();
        let now = Utc::now();
        cache.store(&costs(), now + chrono::Duration::hours(1)).await;
        assert_eq!(cache.load(now).await, CacheLookup::Stale);
    }

    #[tokio::test]
    async fn garbage_payload_is_corrupt() {
        let (cache, store) = cache();
        let now = Utc::now();
        store
            .set(COSTS_KEY, "{not json", DEFAULT_TTL)
            .await
            .unwrap();
        store
            .set(COSTS_TIMESTAMP_KEY, &now.to_rfc3339(), DEFAULT_TTL)
            .await
            .unwrap();
        assert_eq!(cache.load(now).await, CacheLookup::Corrupt);
    }

    #[tokio::test]
    async fn garbage_timestamp_is_corrupt() {
        let (cache, store) = cache();
        cache.store(&costs(), Utc::now()).await;
        store
            .set(COSTS_TIMESTAMP_KEY, "yesterday-ish", DEFAULT_TTL)
            .await
            .unwrap();
        assert_eq!(cache.load(Utc::now()).await, CacheLookup::Corrupt);
    }

    #[tokio::test]
    async fn clear_removes_both_entries() {
        let (cache, store) = cache();
        cache.store(&costs(), Utc::now()).await;
        cache.clear().await.unwrap();

        assert!(store.get(COSTS_KEY).await.unwrap().is_none());
        assert!(store.get(COSTS_TIMESTAMP_KEY).await.unwrap().is_none());
    }
}
