//! HTTP handlers for wallet-service.

pub mod admin;
pub mod costs;
pub mod credits;
pub mod health;
pub mod wallet;

use crate::error::WalletError;
use axum::response::{IntoResponse, Response};
use service_core::error::AppError;

/// Handler error: wallet failures keep their code, request problems use the
/// shared infrastructure error.
#[derive(Debug)]
pub enum ApiError {
    Wallet(WalletError),
    App(AppError),
}

impl From<WalletError> for ApiError {
    fn from(err: WalletError) -> Self {
        ApiError::Wallet(err)
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError::App(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::App(AppError::ValidationError(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Wallet(err) => err.into_response(),
            ApiError::App(err) => err.into_response(),
        }
    }
}
