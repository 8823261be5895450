//! Prometheus metrics for wallet-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec,
    HistogramVec, IntCounter, TextEncoder,
};

/// Charge decisions by outcome.
pub static CHARGES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "wallet_charges_total",
        "Total number of charge decisions",
        &["outcome"] // charged, bypassed, free, insufficient, error
    )
    .expect("Failed to register charges_total")
});

/// Credits consumed, split by debit vs scale-tier bypass.
pub static CREDITS_CHARGED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "wallet_credits_charged_total",
        "Total credits consumed by charges",
        &["kind"]
    )
    .expect("Failed to register credits_charged_total")
});

/// Cost table cache lookups by result.
pub static COST_CACHE_LOOKUPS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "wallet_cost_cache_lookups_total",
        "Cost table cache lookups",
        &["result"] // hit, miss, stale, corrupt, bypass
    )
    .expect("Failed to register cost_cache_lookups")
});

/// Wallets reset by the cycle rollover job.
pub static ROLLOVER_WALLETS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "wallet_rollover_wallets_total",
        "Total number of wallets reset at cycle end"
    )
    .expect("Failed to register rollover_wallets_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "wallet_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "wallet_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&CHARGES_TOTAL);
    Lazy::force(&CREDITS_CHARGED_TOTAL);
    Lazy::force(&COST_CACHE_LOOKUPS);
    Lazy::force(&ROLLOVER_WALLETS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

pub fn record_charge(outcome: &str) {
    CHARGES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_credits_charged(kind: &str, amount: i64) {
    if amount > 0 {
        CREDITS_CHARGED_TOTAL
            .with_label_values(&[kind])
            .inc_by(amount as f64);
    }
}

pub fn record_cache_lookup(result: &str) {
    COST_CACHE_LOOKUPS.with_label_values(&[result]).inc();
}

pub fn record_rollover(count: u64) {
    ROLLOVER_WALLETS_TOTAL.inc_by(count);
}

pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
