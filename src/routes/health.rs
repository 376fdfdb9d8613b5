use axum::response::Json;
use serde_json::json;

/// Health check endpoint handler.
///
/// `GET /ping` returns `{"status": "pong"}` while the server is up.
pub async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "status": "pong" }))
}
