//! Configuration module for wallet-service.

use crate::models::{Plan, PlanAllotments};
use crate::services::WalletPolicy;
use service_core::config::{self as core_config, get_env, is_production, parse_env};
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub backend: StorageBackend,
    pub cost_cache: CostCacheConfig,
    pub policy: PolicyConfig,
    pub rollover: RolloverConfig,
    pub admin: AdminConfig,
}

/// Where wallets and the ledger live.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    Postgres(DatabaseConfig),
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct CostCacheConfig {
    pub ttl_secs: u64,
    /// When set the cache is shared through Redis instead of process memory.
    pub redis_url: Option<String>,
}

impl CostCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub default_plan: Plan,
    pub default_monthly_credits: i64,
    pub allotments: PlanAllotments,
}

impl PolicyConfig {
    pub fn to_policy(&self) -> WalletPolicy {
        WalletPolicy {
            default_plan: self.default_plan,
            default_monthly_credits: self.default_monthly_credits,
            allotments: self.allotments,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let policy = WalletPolicy::default();
        Self {
            default_plan: policy.default_plan,
            default_monthly_credits: policy.default_monthly_credits,
            allotments: policy.allotments,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RolloverConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl RolloverConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdminConfig {
    /// Admin routes answer 403 while unset.
    pub api_key: Option<String>,
}

impl WalletConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = is_production();

        let backend = match get_env("WALLET_BACKEND", Some("postgres"), false)?
            .to_lowercase()
            .as_str()
        {
            "postgres" => StorageBackend::Postgres(DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2)?,
            }),
            "memory" if !is_prod => StorageBackend::Memory,
            "memory" => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "WALLET_BACKEND=memory is not allowed in production"
                )))
            }
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Invalid WALLET_BACKEND: {}",
                    other
                )))
            }
        };

        let defaults = PlanAllotments::default();
        let allotments = PlanAllotments {
            operator: parse_env("PLAN_OPERATOR_CREDITS", defaults.operator)?,
            growth: parse_env("PLAN_GROWTH_CREDITS", defaults.growth)?,
            scale: parse_env("PLAN_SCALE_CREDITS", defaults.scale)?,
        };

        let default_plan: Plan = get_env("DEFAULT_PLAN", Some("operator"), false)?
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{}", e)))?;

        let config = Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "wallet-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            backend,
            cost_cache: CostCacheConfig {
                ttl_secs: parse_env("COST_CACHE_TTL_SECS", 600)?,
                redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            },
            policy: PolicyConfig {
                default_plan,
                default_monthly_credits: parse_env(
                    "DEFAULT_MONTHLY_CREDITS",
                    allotments.for_plan(default_plan),
                )?,
                allotments,
            },
            rollover: RolloverConfig {
                enabled: parse_env("ROLLOVER_ENABLED", true)?,
                interval_secs: parse_env("ROLLOVER_INTERVAL_SECS", 300)?,
            },
            admin: AdminConfig {
                api_key: env::var("ADMIN_API_KEY").ok().filter(|s| !s.is_empty()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject allotments and TTLs that would make the gate misbehave.
    pub fn validate(&self) -> Result<(), AppError> {
        let allotments = &self.policy.allotments;
        if self.policy.default_monthly_credits < 0
            || allotments.operator < 0
            || allotments.growth < 0
            || allotments.scale < 0
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Credit allotments must not be negative"
            )));
        }
        if self.cost_cache.ttl_secs == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "COST_CACHE_TTL_SECS must be greater than zero"
            )));
        }
        Ok(())
    }

    /// Configuration for tests and local runs: memory backend, no exporters.
    pub fn in_memory() -> Self {
        Self {
            common: core_config::Config { port: 0 },
            service_name: "wallet-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            backend: StorageBackend::Memory,
            cost_cache: CostCacheConfig {
                ttl_secs: 600,
                redis_url: None,
            },
            policy: PolicyConfig::default(),
            rollover: RolloverConfig {
                enabled: false,
                interval_secs: 300,
            },
            admin: AdminConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_config_is_valid() {
        let config = WalletConfig::in_memory();
        config.validate().unwrap();
        assert_eq!(config.cost_cache.ttl(), Duration::from_secs(600));
        assert_eq!(config.policy.to_policy(), WalletPolicy::default());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut config = WalletConfig::in_memory();
        config.cost_cache.ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_allotment_is_rejected() {
        let mut config = WalletConfig::in_memory();
        config.policy.allotments.growth = -1;
        assert!(config.validate().is_err());
    }
}
