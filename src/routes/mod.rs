// # Routes Module
//
// HTTP route handlers, grouped by API area. Each submodule exposes a
// `create_routes()` that `server.rs` merges into the application router.
//
// ## Available Route Modules
// - `health`: liveness endpoint
// - `auth`: registration, login and current user
// - `positions`: active book, history, stats and manual close
// - `signals`: strategy generation, execution and dismissal
// - `market`: live ticker lookup
// - `profile`: reward progress of the current user

use axum::{
    Json,
    body::Bytes,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::portfolio::PortfolioError;

/// Liveness endpoint
pub mod health;

/// Registration, login and session endpoints
pub mod auth;

pub mod market;
pub mod positions;
pub mod profile;
pub mod signals;

/// Error returned by every handler, rendered as `{"error": "<message>"}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<PortfolioError> for ApiError {
    fn from(err: PortfolioError) -> Self {
        let status = match &err {
            PortfolioError::NotFound(_) => StatusCode::NOT_FOUND,
            PortfolioError::InvalidTransition { .. }
            | PortfolioError::SignalAlreadyResolved(_)
            | PortfolioError::Conflict(_) => StatusCode::CONFLICT,
            PortfolioError::NotTradable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PortfolioError::PriceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PortfolioError::PriceFeed(_)
            | PortfolioError::StrategyGeneration(_)
            | PortfolioError::Http(_) => StatusCode::BAD_GATEWAY,
            PortfolioError::Storage(_)
            | PortfolioError::Configuration(_)
            | PortfolioError::Serialization(_)
            | PortfolioError::Database(_)
            | PortfolioError::Pool(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", err);
        } else {
            tracing::debug!("Request rejected: {}", err);
        }

        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Decode an optional JSON body, falling back to `T::default()` when empty
pub fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e)))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use uuid::Uuid;

    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Body {
        price: Option<f64>,
    }

    #[test]
    fn test_error_status_mapping() {
        let id = Uuid::new_v4();
        assert_eq!(ApiError::from(PortfolioError::NotFound("Position".into())).status, StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(PortfolioError::Conflict(id)).status, StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(PortfolioError::NotTradable(id)).status,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(PortfolioError::PriceUnavailable("BTCUSDT".into())).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_optional_json() {
        assert_eq!(optional_json::<Body>(&Bytes::new()).unwrap(), Body::default());
        assert_eq!(
            optional_json::<Body>(&Bytes::from_static(br#"{"price": 101.5}"#)).unwrap(),
            Body { price: Some(101.5) }
        );
        assert!(optional_json::<Body>(&Bytes::from_static(b"{oops")).is_err());
    }
}
