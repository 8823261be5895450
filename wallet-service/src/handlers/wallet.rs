use crate::dtos::{TransactionsQuery, TransactionsResponse};
use crate::handlers::ApiError;
use crate::middleware::Caller;
use crate::models::Wallet;
use crate::services::gate::MAX_TRANSACTION_PAGE;
use crate::startup::AppState;
use axum::extract::{Query, State};
use axum::Json;

const DEFAULT_PAGE: i64 = 20;

pub async fn get_wallet(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Wallet>, ApiError> {
    Ok(Json(state.gate.get_wallet(caller).await?))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE)
        .clamp(1, MAX_TRANSACTION_PAGE);
    let transactions = state
        .gate
        .list_transactions(caller, limit, query.cursor())
        .await?;

    let next = if transactions.len() as i64 == limit {
        transactions.last().map(|t| t.cursor())
    } else {
        None
    };

    Ok(Json(TransactionsResponse {
        transactions,
        next_before: next.map(|c| c.created_utc),
        next_before_id: next.map(|c| c.transaction_id),
    }))
}
