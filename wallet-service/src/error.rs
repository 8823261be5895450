//! Failure taxonomy surfaced by the wallet gate.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Errors a caller can branch on. Every variant maps to a stable string code
/// so the dashboard can pick between a generic toast and an upgrade prompt.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Insufficient credits for '{feature_key}': need {cost}, have {remaining}")]
    InsufficientCredits {
        cost: i64,
        remaining: i64,
        feature_key: String,
    },

    #[error("Wallet not found for user {user_id}")]
    WalletNotFound { user_id: Uuid },

    #[error("No credit cost configured for '{feature_key}'")]
    CostNotFound { feature_key: String },

    #[error("Unauthorized: no authenticated caller")]
    Unauthorized,

    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl WalletError {
    pub const INSUFFICIENT_CREDITS: &'static str = "INSUFFICIENT_CREDITS";
    pub const WALLET_NOT_FOUND: &'static str = "WALLET_NOT_FOUND";
    pub const COST_NOT_FOUND: &'static str = "COST_NOT_FOUND";
    pub const UNAUTHORIZED: &'static str = "UNAUTHORIZED";
    pub const UNKNOWN: &'static str = "UNKNOWN";

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::InsufficientCredits { .. } => Self::INSUFFICIENT_CREDITS,
            WalletError::WalletNotFound { .. } => Self::WALLET_NOT_FOUND,
            WalletError::CostNotFound { .. } => Self::COST_NOT_FOUND,
            WalletError::Unauthorized => Self::UNAUTHORIZED,
            WalletError::Unknown(_) => Self::UNKNOWN,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            WalletError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            WalletError::WalletNotFound { .. } | WalletError::CostNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            WalletError::Unauthorized => StatusCode::UNAUTHORIZED,
            WalletError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_insufficient_credits(&self) -> bool {
        matches!(self, WalletError::InsufficientCredits { .. })
    }
}

impl From<AppError> for WalletError {
    fn from(err: AppError) -> Self {
        WalletError::Unknown(anyhow::Error::new(err))
    }
}

impl IntoResponse for WalletError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            code: &'static str,
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<serde_json::Value>,
        }

        let status = self.status();
        let code = self.code();
        let (error, details) = match &self {
            WalletError::InsufficientCredits {
                cost,
                remaining,
                feature_key,
            } => (
                self.to_string(),
                Some(json!({
                    "cost": cost,
                    "remaining": remaining,
                    "feature_key": feature_key,
                })),
            ),
            WalletError::CostNotFound { feature_key } => (
                self.to_string(),
                Some(json!({ "feature_key": feature_key })),
            ),
            WalletError::WalletNotFound { .. } | WalletError::Unauthorized => {
                (self.to_string(), None)
            }
            WalletError::Unknown(err) => {
                tracing::error!(error = ?err, "Unhandled wallet error");
                ("Internal server error".to_string(), None)
            }
        };

        (
            status,
            Json(ErrorResponse {
                code,
                error,
                details,
            }),
        )
            .into_response()
    }
}
