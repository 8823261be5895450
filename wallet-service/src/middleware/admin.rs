use crate::startup::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use service_core::error::AppError;
use subtle::ConstantTimeEq;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Guard for administrative routes. Disabled (403) unless a key is configured.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.admin_api_key.as_deref() else {
        return AppError::Forbidden(anyhow::anyhow!("Admin API is disabled")).into_response();
    };

    let provided = request
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        next.run(request).await
    } else {
        tracing::warn!("Failed admin authentication attempt");
        AppError::Unauthorized(anyhow::anyhow!("Invalid or missing admin API key")).into_response()
    }
}
