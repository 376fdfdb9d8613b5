//! Configuration module for environment variables and application settings

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, anyhow};
use once_cell::sync::Lazy;

use crate::portfolio::ai_client::OPENAI_CHAT_URL;
use crate::portfolio::price_feed::BINANCE_API_URL;

/// Global application configuration loaded from environment variables
pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    Config::from_env().expect("Failed to load configuration from environment")
});

#[derive(Debug, Clone)]
pub struct Config {
    /// OpenAI API key for strategy generation; placeholder strategies without it
    pub openai_api_key: Option<String>,

    pub openai_model: String,

    /// Chat completions endpoint, for OpenAI-compatible gateways
    pub openai_api_url: String,

    /// Base URL of the Binance-compatible ticker API
    pub price_api_url: String,

    /// Secret used to sign access tokens
    pub jwt_secret: String,

    pub jwt_ttl_hours: i64,

    /// PostgreSQL URL. The in-memory store is used when unset.
    pub database_url: Option<String>,

    /// JSON snapshot file for the in-memory store
    pub snapshot_path: Option<String>,

    pub server: ServerConfig,

    pub portfolio: PortfolioConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PortfolioConfig {
    /// Interval between price polls
    pub poll_interval: Duration,
    /// Size used when executing a signal without an explicit size
    pub default_position_size: f64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ if cfg!(debug_assertions) => {
                tracing::warn!("⚠️  JWT_SECRET not set, using development secret");
                "dev_secret".to_string()
            }
            _ => return Err(anyhow!("JWT_SECRET environment variable is required")),
        };

        Ok(Self {
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|key| !key.trim().is_empty()),

            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),

            openai_api_url: env::var("OPENAI_API_URL").unwrap_or_else(|_| OPENAI_CHAT_URL.to_string()),

            price_api_url: env::var("PRICE_API_URL").unwrap_or_else(|_| BINANCE_API_URL.to_string()),

            jwt_secret,

            jwt_ttl_hours: parse_or("JWT_TTL_HOURS", 24),

            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),

            snapshot_path: env::var("PORTFOLIO_SNAPSHOT").ok().filter(|path| !path.trim().is_empty()),

            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .or_else(|_| env::var("SERVER_PORT"))
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(3000),
                allowed_origins: env::var("ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3001".to_string())
                    .split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect(),
            },

            portfolio: PortfolioConfig {
                poll_interval: Duration::from_secs(parse_or("POLL_INTERVAL_SECS", 15)),
                default_position_size: position_size(parse_or("DEFAULT_POSITION_SIZE", 1.0))?,
            },
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn position_size(size: f64) -> Result<f64> {
    if size.is_finite() && size > 0.0 {
        Ok(size)
    } else {
        Err(anyhow!("DEFAULT_POSITION_SIZE must be a positive number, got {}", size))
    }
}
