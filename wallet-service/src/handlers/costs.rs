use crate::dtos::{CostResponse, CostsQuery, CostsResponse};
use crate::handlers::ApiError;
use crate::startup::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

pub async fn list_costs(
    State(state): State<AppState>,
    Query(query): Query<CostsQuery>,
) -> Result<Json<CostsResponse>, ApiError> {
    let costs = state.gate.get_credit_costs(query.force_refresh).await?;
    Ok(Json(CostsResponse { costs }))
}

pub async fn get_cost(
    State(state): State<AppState>,
    Path(feature_key): Path<String>,
) -> Result<Json<CostResponse>, ApiError> {
    let cost = state.gate.get_cost(&feature_key).await?;
    Ok(Json(CostResponse { feature_key, cost }))
}

pub async fn clear_cost_cache(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.gate.clear_cost_cache().await?;
    Ok(StatusCode::NO_CONTENT)
}
