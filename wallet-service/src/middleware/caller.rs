use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity taken from `X-User-ID`, set by the trusted BFF.
///
/// Never rejects: a missing or malformed header yields `Caller(None)` and the
/// gate answers `UNAUTHORIZED`, so the failure carries the wallet error code.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Option<Uuid>);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok());

        let user_id = match raw {
            Some(value) => match Uuid::parse_str(value.trim()) {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::debug!("Ignoring malformed X-User-ID header");
                    None
                }
            },
            None => None,
        };

        Ok(Caller(user_id))
    }
}
