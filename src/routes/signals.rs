//! Signal endpoints: generate, list, execute and dismiss

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::models::AuthUser;
use crate::portfolio::ai_client::StrategyRequest;
use crate::portfolio::signal::{ExecutionOptions, dismiss_signal, execute_signal};
use crate::portfolio::{
    GeneratedSignal, PortfolioError, Position, RiskProfile, SignalStatus, TradingMode,
};
use crate::routes::{ApiError, ApiResult, optional_json};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateSignalRequest {
    pub symbol: String,
    #[serde(default)]
    pub trading_mode: TradingMode,
    #[serde(default)]
    pub risk_profile: RiskProfile,
}

/// Optional body of a signal execution
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteSignalRequest {
    pub size: Option<f64>,
    /// Open immediately at the live price instead of waiting for the entry
    #[serde(default)]
    pub instant: bool,
}

#[derive(Debug, Serialize)]
pub struct ExecuteSignalResponse {
    pub signal: GeneratedSignal,
    pub position: Position,
}

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/signals", get(list_signals))
        .route("/api/v1/signals/generate", post(generate_signal))
        .route("/api/v1/signals/{id}/execute", post(execute))
        .route("/api/v1/signals/{id}/dismiss", post(dismiss))
}

pub async fn list_signals(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<GeneratedSignal>> {
    Ok(Json(state.store.signals(user.id).await?))
}

/// Ask the strategy generator for a fresh signal on `symbol`
pub async fn generate_signal(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<GenerateSignalRequest>,
) -> ApiResult<GeneratedSignal> {
    let symbol = request.symbol.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(ApiError::bad_request("Symbol is required"));
    }

    let market = state.feed.ticker(&symbol).await?;
    let strategy_request = StrategyRequest {
        symbol: symbol.clone(),
        market,
        trading_mode: request.trading_mode,
        risk_profile: request.risk_profile,
    };

    let strategy = state.generator.generate(&strategy_request).await.map_err(|e| {
        warn!("Strategy generation for {} failed: {}", symbol, e);
        e
    })?;

    let signal = GeneratedSignal::new(
        user.id,
        &symbol,
        strategy,
        request.trading_mode,
        request.risk_profile,
        Utc::now(),
    );
    state.store.insert_signal(&signal).await?;

    info!(
        "📡 Generated {} signal {} for {}",
        signal.strategy.signal.as_str(),
        signal.id,
        signal.symbol
    );
    Ok(Json(signal))
}

async fn owned_signal(state: &AppState, user: &AuthUser, signal_id: Uuid) -> Result<GeneratedSignal, PortfolioError> {
    state
        .store
        .signal(signal_id)
        .await?
        .filter(|signal| signal.user_id == user.id)
        .ok_or_else(|| PortfolioError::NotFound(format!("Signal {}", signal_id)))
}

/// Turn a pending signal into a simulated position
pub async fn execute(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(signal_id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<ExecuteSignalResponse> {
    let request: ExecuteSignalRequest = optional_json(&body)?;
    if request.size.is_some_and(|size| !size.is_finite() || size <= 0.0) {
        return Err(ApiError::bad_request("Size must be a positive number"));
    }

    let mut signal = owned_signal(&state, &user, signal_id).await?;

    let market_price = if request.instant {
        Some(state.feed.ticker(&signal.symbol).await?.last_price)
    } else {
        None
    };

    let options = ExecutionOptions {
        size: Some(request.size.unwrap_or(state.default_position_size)),
        market_price,
    };
    let position = execute_signal(&mut signal, options, Utc::now())?;

    state.store.record_execution(&signal, &position).await?;

    Ok(Json(ExecuteSignalResponse { signal, position }))
}

pub async fn dismiss(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(signal_id): Path<Uuid>,
) -> ApiResult<GeneratedSignal> {
    let mut signal = owned_signal(&state, &user, signal_id).await?;
    dismiss_signal(&mut signal)?;
    state
        .store
        .update_signal(&signal, SignalStatus::PendingExecution)
        .await?;

    info!("Signal {} dismissed", signal.id);
    Ok(Json(signal))
}
