use crate::dtos::{AffordResponse, ChargeRequest};
use crate::handlers::ApiError;
use crate::middleware::Caller;
use crate::models::ChargeOutcome;
use crate::startup::AppState;
use axum::extract::{Path, State};
use axum::Json;
use validator::Validate;

pub async fn charge(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(request): Json<ChargeRequest>,
) -> Result<Json<ChargeOutcome>, ApiError> {
    request.validate()?;

    let outcome = state
        .gate
        .charge_credits(caller, &request.feature_key, request.metadata)
        .await?;
    Ok(Json(outcome))
}

pub async fn can_afford(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(feature_key): Path<String>,
) -> Result<Json<AffordResponse>, ApiError> {
    let can_afford = state.gate.check_can_afford(caller, &feature_key).await?;
    Ok(Json(AffordResponse {
        feature_key,
        can_afford,
    }))
}
