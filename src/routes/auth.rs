//! Auth routes for registration, login, and user info

use argon2::password_hash::rand_core::OsRng;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use axum::{
    Extension, Json, Router,
    extract::State,
    routing::post,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;

use crate::auth::middleware::ACCESS_TOKEN_COOKIE;
use crate::auth::models::{AuthUser, Credentials, TokenResponse};
use crate::portfolio::{PortfolioError, UserProfile};
use crate::routes::profile::ProfileResponse;
use crate::routes::{ApiError, ApiResult};
use crate::server::AppState;

const MIN_PASSWORD_LENGTH: usize = 8;

/// Public routes: register and login
pub fn create_auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/auth/register", post(register))
        .route("/api/v1/auth/login", post(login))
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))
}

fn verify_password(password: &str, password_hash: &str) -> bool {
    PasswordHash::new(password_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn issue_token(state: &AppState, jar: CookieJar, user: AuthUser) -> Result<(CookieJar, Json<TokenResponse>), ApiError> {
    let access_token = state
        .jwt_service
        .create_token(user.id, user.email.clone())
        .map_err(|e| ApiError::internal(format!("Failed to issue token: {}", e)))?;
    let expires_in = state.jwt_service.ttl_seconds();

    let mut cookie = Cookie::new(ACCESS_TOKEN_COOKIE, access_token.clone());
    cookie.set_http_only(true);
    cookie.set_secure(true);
    cookie.set_same_site(SameSite::None);
    cookie.set_path("/");
    cookie.set_max_age(time::Duration::seconds(expires_in));

    Ok((jar.add(cookie), Json(TokenResponse::new(access_token, expires_in, user))))
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<Credentials>,
) -> Result<(CookieJar, Json<TokenResponse>), ApiError> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::bad_request("A valid email is required"));
    }
    if payload.password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let password_hash = hash_password(&payload.password)?;
    let profile = UserProfile::new(email.clone(), password_hash, Utc::now());

    match state.store.create_profile(&profile).await {
        Ok(()) => {}
        Err(PortfolioError::Conflict(_)) => {
            return Err(ApiError::new(
                axum::http::StatusCode::CONFLICT,
                "Email already registered",
            ));
        }
        Err(e) => return Err(e.into()),
    }

    info!("👤 Registered user {}", profile.user_id);
    issue_token(&state, jar, AuthUser { id: profile.user_id, email })
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<Credentials>,
) -> Result<(CookieJar, Json<TokenResponse>), ApiError> {
    let email = payload.email.trim().to_lowercase();

    let profile = state
        .store
        .profile_by_email(&email)
        .await?
        .filter(|profile| verify_password(&payload.password, &profile.password_hash))
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password"))?;

    info!("🔑 User {} logged in", profile.user_id);
    issue_token(&state, jar, AuthUser { id: profile.user_id, email: profile.email })
}

/// Current user with their profile
pub async fn me(State(state): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<Value> {
    let profile = state
        .store
        .profile(user.id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;

    Ok(Json(json!({
        "user": user,
        "profile": ProfileResponse::from(profile),
    })))
}
