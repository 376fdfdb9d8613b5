//! # Signal Portfolio Server
//!
//! HTTP API that turns AI-generated trading signals into simulated
//! positions, tracks them against live prices and pays out gamified
//! rewards when they close.
//!
//! ## Architecture
//! - `server`: router, shared state and startup
//! - `config`: environment-driven configuration
//! - `portfolio`: position lifecycle, rewards, price feed and strategy generation
//! - `database`: PostgreSQL store and migrations
//! - `auth`: JWT issuing and validation
//! - `routes`: HTTP handlers
//!
//! ## Environment
//! `JWT_SECRET`, `DATABASE_URL` (optional, in-memory store otherwise),
//! `OPENAI_API_KEY` (optional), `PORT`, `POLL_INTERVAL_SECS`. A `.env` file
//! is loaded when present.
//!
//! ## Running the Server
//! ```bash
//! cargo run
//! curl http://localhost:3000/ping
//! ```

mod auth;
mod config;
mod database;
mod portfolio;
mod routes;
mod server;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .compact(),
        )
        .init();

    tracing::info!("🏁 Starting signal portfolio server...");
    tracing::info!("📦 Package: {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    tracing::info!("🏗️  Build profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });

    if let Err(e) = server::start().await {
        tracing::error!("❌ Server failed: {:#}", e);
        std::process::exit(1);
    }
}
