use crate::dtos::ChangePlanRequest;
use crate::handlers::ApiError;
use crate::models::Wallet;
use crate::startup::AppState;
use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

pub async fn change_plan(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<ChangePlanRequest>,
) -> Result<Json<Wallet>, ApiError> {
    Ok(Json(state.gate.change_plan(user_id, request.plan).await?))
}
