//! service-core: Shared infrastructure for the Ghoste wallet services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;

pub use axum;
pub use serde_json;
pub use tracing;
