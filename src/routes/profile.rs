use axum::{
    Extension, Json, Router,
    extract::State,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::models::AuthUser;
use crate::portfolio::{PortfolioError, UserProfile};
use crate::routes::ApiResult;
use crate::server::AppState;

/// Profile as exposed over HTTP, without credentials
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user_id: Uuid,
    pub email: String,
    pub wallet_address: Option<String>,
    pub weekly_points: i64,
    pub airdrop_points: i64,
    pub gas_paid: f64,
    pub blocks_trained: i64,
    pub claimed_missions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserProfile> for ProfileResponse {
    fn from(profile: UserProfile) -> Self {
        Self {
            user_id: profile.user_id,
            email: profile.email,
            wallet_address: profile.wallet_address,
            weekly_points: profile.weekly_points,
            airdrop_points: profile.airdrop_points,
            gas_paid: profile.gas_paid,
            blocks_trained: profile.blocks_trained,
            claimed_missions: profile.claimed_missions,
            created_at: profile.created_at,
            updated_at: profile.updated_at,
        }
    }
}

pub fn create_routes() -> Router<AppState> {
    Router::new().route("/api/v1/profile", get(get_profile))
}

/// Accumulated points, gas and blocks of the current user
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<ProfileResponse> {
    let profile = state
        .store
        .profile(user.id)
        .await?
        .ok_or_else(|| PortfolioError::NotFound(format!("Profile {}", user.id)))?;
    Ok(Json(profile.into()))
}
