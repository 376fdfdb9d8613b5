use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::portfolio::price_feed::Ticker;
use crate::routes::ApiResult;
use crate::server::AppState;

pub fn create_routes() -> Router<AppState> {
    Router::new().route("/api/v1/market/{symbol}", get(get_ticker))
}

/// Live ticker for a symbol
pub async fn get_ticker(State(state): State<AppState>, Path(symbol): Path<String>) -> ApiResult<Ticker> {
    let ticker = state.feed.ticker(&symbol.to_ascii_uppercase()).await?;
    Ok(Json(ticker))
}
