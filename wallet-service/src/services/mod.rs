//! Services module for wallet-service.

pub mod cost_cache;
pub mod database;
pub mod gate;
pub mod memory;
pub mod metrics;
pub mod rollover;
pub mod store;

pub use cost_cache::{CostCache, KeyValueStore, MemoryStore, RedisStore};
pub use database::Database;
pub use gate::{WalletGate, WalletPolicy};
pub use memory::InMemoryWalletStore;
pub use metrics::{get_metrics, init_metrics};
pub use rollover::CycleRolloverJob;
pub use store::{SpendLedger, WalletRepository};
