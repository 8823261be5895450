//! Request extractors and guards for wallet-service.

pub mod admin;
pub mod caller;

pub use admin::admin_auth_middleware;
pub use caller::{Caller, USER_ID_HEADER};
