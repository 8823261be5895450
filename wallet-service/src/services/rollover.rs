//! Background job restoring wallets at the end of their accounting cycle.

use crate::services::gate::WalletGate;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct CycleRolloverJob {
    gate: Arc<WalletGate>,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl CycleRolloverJob {
    pub fn new(gate: Arc<WalletGate>, interval: Duration, shutdown_token: CancellationToken) -> Self {
        Self {
            gate,
            interval,
            shutdown_token,
        }
    }

    /// Run one pass. Failures are logged and retried on the next tick.
    pub async fn tick(&self) -> u64 {
        match self.gate.rollover_expired_cycles(Utc::now()).await {
            Ok(reset) => reset,
            Err(e) => {
                tracing::error!(error = %e, "Cycle rollover failed");
                0
            }
        }
    }

    /// Tick until the token is cancelled. The first pass runs immediately.
    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Starting cycle rollover job"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Cycle rollover job stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewWallet, Plan};
    use crate::services::cost_cache::{CostCache, MemoryStore, DEFAULT_TTL};
    use crate::services::gate::WalletPolicy;
    use crate::services::memory::InMemoryWalletStore;
    use uuid::Uuid;

    fn gate_with(store: Arc<InMemoryWalletStore>) -> Arc<WalletGate> {
        Arc::new(WalletGate::new(
            store.clone(),
            store,
            CostCache::new(Arc::new(MemoryStore::new()), DEFAULT_TTL),
            WalletPolicy::default(),
        ))
    }

    #[tokio::test]
    async fn tick_resets_expired_wallets() {
        let store = Arc::new(InMemoryWalletStore::new());
        let now = Utc::now();
        let user_id = Uuid::new_v4();
        let mut wallet = NewWallet::starting_at(user_id, Plan::Growth, 65_000, now).into_wallet(now);
        wallet.cycle_start = now - chrono::Duration::days(31);
        wallet.cycle_end = now - chrono::Duration::seconds(1);
        wallet.credits_remaining = 0;
        wallet.credits_used = 65_000;
        store.put_wallet(wallet);

        let job = CycleRolloverJob::new(
            gate_with(store.clone()),
            Duration::from_secs(60),
            CancellationToken::new(),
        );

        assert_eq!(job.tick().await, 1);
        assert_eq!(store.wallet(user_id).unwrap().credits_remaining, 65_000);
        assert_eq!(job.tick().await, 0);
    }

    #[tokio::test]
    async fn run_stops_when_cancelled() {
        let store = Arc::new(InMemoryWalletStore::new());
        let token = CancellationToken::new();
        let job = CycleRolloverJob::new(gate_with(store), Duration::from_millis(10), token.clone());

        let handle = tokio::spawn(job.run());
        token.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("job did not stop")
            .unwrap();
    }
}
