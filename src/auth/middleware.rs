//! Authentication Middleware
//!
//! Axum middleware for JWT token validation and user authentication.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::auth::{jwt::JwtService, models::AuthUser};

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Authentication middleware that validates JWT tokens and injects user info
pub struct AuthMiddleware;

impl AuthMiddleware {
    /// Middleware function for validating JWT tokens
    pub async fn validate_token(
        State(jwt_service): State<Arc<JwtService>>,
        mut req: Request,
        next: Next,
    ) -> Result<Response, StatusCode> {
        tracing::debug!("[AuthMiddleware] Incoming request: {} {}", req.method(), req.uri());

        let Some(token) = extract_token(&req) else {
            tracing::warn!("[AuthMiddleware] Missing Authorization header and access_token cookie");
            return Err(StatusCode::UNAUTHORIZED);
        };

        let claims = match jwt_service.validate_token(&token) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::warn!("[AuthMiddleware] JWT validation failed: {:?}", e);
                return Err(StatusCode::UNAUTHORIZED);
            }
        };

        let auth_user = AuthUser {
            id: claims.sub,
            email: claims.email,
        };
        tracing::debug!("[AuthMiddleware] AuthUser injected: id={}", auth_user.id);

        req.extensions_mut().insert(auth_user);

        Ok(next.run(req).await)
    }
}

/// Bearer header first, `access_token` cookie as fallback
fn extract_token(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|auth_header| auth_header.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .or_else(|| {
            req.headers()
                .get(header::COOKIE)
                .and_then(|cookie_header| cookie_header.to_str().ok())
                .and_then(|cookie_str| {
                    cookie_str
                        .split(';')
                        .map(str::trim)
                        .find_map(|cookie| {
                            cookie
                                .strip_prefix(ACCESS_TOKEN_COOKIE)
                                .and_then(|rest| rest.strip_prefix('='))
                        })
                        .map(str::to_string)
                })
        })
}
