//! Position endpoints: active book, trade history, stats and manual close

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::models::AuthUser;
use crate::portfolio::Position;
use crate::portfolio::stats::PortfolioStats;
use crate::routes::{ApiResult, optional_json};
use crate::server::AppState;

/// Optional body of a manual close
#[derive(Debug, Default, Deserialize)]
pub struct ClosePositionRequest {
    /// Close at this price instead of the live one
    pub price: Option<f64>,
}

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/positions", get(list_positions))
        .route("/api/v1/positions/history", get(trade_history))
        .route("/api/v1/positions/stats", get(portfolio_stats))
        .route("/api/v1/positions/{id}/close", post(close_position))
}

/// Pending orders and open positions of the current user
pub async fn list_positions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<Position>> {
    Ok(Json(state.manager.active_positions(user.id).await?))
}

pub async fn trade_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<Position>> {
    Ok(Json(state.manager.history(user.id).await?))
}

pub async fn portfolio_stats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<PortfolioStats> {
    Ok(Json(state.manager.stats(user.id).await?))
}

pub async fn close_position(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(position_id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<Position> {
    let request: ClosePositionRequest = optional_json(&body)?;
    info!("User {} closing position {}", user.id, position_id);

    let position = state
        .manager
        .close_position(user.id, position_id, request.price)
        .await?;
    Ok(Json(position))
}
