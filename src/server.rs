//! # Server Module
//!
//! HTTP server setup, shared state and route configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::auth::jwt::JwtService;
use crate::auth::middleware::AuthMiddleware;
use crate::config::CONFIG;
use crate::database::{DatabaseConnection, migrations};
use crate::portfolio::PortfolioManager;
use crate::portfolio::ai_client::{AIClient, PlaceholderGenerator, StrategyGenerator};
use crate::portfolio::price_feed::{BinancePriceFeed, PriceFeed};
use crate::portfolio::store::{MemoryStore, PortfolioStore};
use crate::routes::{auth, health::ping, market, positions, profile, signals};

/// Application state shared across all route handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PortfolioStore>,
    pub manager: Arc<PortfolioManager>,
    pub feed: Arc<dyn PriceFeed>,
    pub generator: Arc<dyn StrategyGenerator>,
    pub jwt_service: Arc<JwtService>,
    pub default_position_size: f64,
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
        ])
        .allow_credentials(true)
}

/// Build the application router.
///
/// Everything under `/api/v1` except register and login sits behind the
/// JWT middleware.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let protected = Router::new()
        .route("/api/v1/auth/me", get(auth::me))
        .merge(positions::create_routes())
        .merge(signals::create_routes())
        .merge(market::create_routes())
        .merge(profile::create_routes())
        .layer(middleware::from_fn_with_state(
            state.jwt_service.clone(),
            AuthMiddleware::validate_token,
        ));

    Router::new()
        .route("/ping", get(ping))
        .merge(auth::create_auth_routes())
        .merge(protected)
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

async fn build_store() -> Result<Arc<dyn PortfolioStore>> {
    if let Some(database_url) = &CONFIG.database_url {
        let db = DatabaseConnection::from_url(database_url).await?;
        migrations::run_migrations(db.pool()).await?;
        return Ok(Arc::new(db));
    }

    match &CONFIG.snapshot_path {
        Some(path) => {
            tracing::info!("💾 Using in-memory store with snapshot at {}", path);
            let store = MemoryStore::with_snapshot(path)
                .await
                .context("Failed to load portfolio snapshot")?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("⚠️  DATABASE_URL not set, state lives in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn build_generator() -> Result<Arc<dyn StrategyGenerator>> {
    match &CONFIG.openai_api_key {
        Some(api_key) => {
            let client = AIClient::new(api_key.clone())?
                .with_model(CONFIG.openai_model.clone())
                .with_endpoint(CONFIG.openai_api_url.clone());
            tracing::info!("🤖 Strategy generation via {}", CONFIG.openai_model);
            Ok(Arc::new(client))
        }
        None => {
            tracing::warn!("⚠️  OPENAI_API_KEY not set, signals use the placeholder strategy");
            Ok(Arc::new(PlaceholderGenerator))
        }
    }
}

/// Starts the HTTP server and the portfolio polling loop.
///
/// Runs until Ctrl+C, then stops the manager.
pub async fn start() -> Result<()> {
    let store = build_store().await?;
    let feed: Arc<dyn PriceFeed> = Arc::new(BinancePriceFeed::new(CONFIG.price_api_url.clone())?);
    let generator = build_generator()?;
    let jwt_service = Arc::new(JwtService::new(&CONFIG.jwt_secret, CONFIG.jwt_ttl_hours));

    let (manager, mut events) =
        PortfolioManager::new(store.clone(), feed.clone(), CONFIG.portfolio.poll_interval);
    let manager = Arc::new(manager);

    let poller = manager.clone();
    tokio::spawn(async move {
        if let Err(e) = poller.start().await {
            tracing::error!("Portfolio manager exited: {}", e);
        }
    });

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(position_id = %event.position_id(), "🔔 {}", event.message());
        }
    });

    let app_state = AppState {
        store,
        manager: manager.clone(),
        feed,
        generator,
        jwt_service,
        default_position_size: CONFIG.portfolio.default_position_size,
    };
    let app = build_router(app_state, &CONFIG.server.allowed_origins);

    let addr = format!("{}:{}", CONFIG.server.host, CONFIG.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {} - port may already be in use", addr))?;

    tracing::info!("🚀 Signal portfolio server starting...");
    tracing::info!("📡 Listening on http://{}", addr);
    tracing::info!("🏥 Health check available at http://{}/ping", addr);
    tracing::info!("📈 Portfolio endpoints available at http://{}/api/v1/*", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
        .context("Server error")?;

    manager.stop().await;
    tracing::info!("👋 Server shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    use async_trait::async_trait;

    use super::*;
    use crate::portfolio::ai_client::StrategyRequest;
    use crate::portfolio::price_feed::fixtures::StaticPriceFeed;
    use crate::portfolio::signal::fixtures;
    use crate::portfolio::{GeneratedStrategy, PortfolioError, SignalDirection, SignalStatus};

    /// Generator whose upstream is down
    struct FailingGenerator;

    #[async_trait]
    impl StrategyGenerator for FailingGenerator {
        async fn generate(&self, _request: &StrategyRequest) -> Result<GeneratedStrategy, PortfolioError> {
            Err(PortfolioError::StrategyGeneration("OpenAI API error 500".to_string()))
        }
    }

    struct TestApp {
        router: Router,
        store: Arc<MemoryStore>,
        feed: Arc<StaticPriceFeed>,
        manager: Arc<PortfolioManager>,
    }

    fn test_app() -> TestApp {
        test_app_with(Arc::new(PlaceholderGenerator))
    }

    fn test_app_with(generator: Arc<dyn StrategyGenerator>) -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let feed = Arc::new(StaticPriceFeed::with(&[("ETHUSDT", 105.0)]));
        let (manager, _events) =
            PortfolioManager::new(store.clone(), feed.clone(), Duration::from_secs(60));
        let manager = Arc::new(manager);

        let state = AppState {
            store: store.clone(),
            manager: manager.clone(),
            feed: feed.clone(),
            generator,
            jwt_service: Arc::new(JwtService::new("test_secret", 1)),
            default_position_size: 2.0,
        };

        TestApp {
            router: build_router(state, &["http://localhost:3001".to_string()]),
            store,
            feed,
            manager,
        }
    }

    async fn send(app: &TestApp, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn register(app: &TestApp, email: &str) -> (String, Uuid) {
        let (status, body) = send(
            app,
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({ "email": email, "password": "hunter2hunter2" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["access_token"].as_str().unwrap().to_string();
        let user_id = body["user"]["id"].as_str().unwrap().parse().unwrap();
        (token, user_id)
    }

    async fn buy_signal(app: &TestApp, user_id: Uuid) -> Uuid {
        let strategy = fixtures::strategy(SignalDirection::Buy, "100", "90", "120");
        let signal = fixtures::signal(user_id, strategy);
        app.store.insert_signal(&signal).await.unwrap();
        signal.id
    }

    #[tokio::test]
    async fn test_ping() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/ping", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pong");
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let app = test_app();
        register(&app, "Trader@Example.com").await;

        let credentials = json!({ "email": "trader@example.com", "password": "hunter2hunter2" });
        let (status, body) = send(&app, "POST", "/api/v1/auth/register", None, Some(credentials.clone())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Email already registered");

        let (status, body) = send(&app, "POST", "/api/v1/auth/login", None, Some(credentials)).await;
        assert_eq!(status, StatusCode::OK);
        let token = body["access_token"].as_str().unwrap().to_string();

        let wrong = json!({ "email": "trader@example.com", "password": "not-the-password" });
        let (status, _) = send(&app, "POST", "/api/v1/auth/login", None, Some(wrong)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&app, "GET", "/api/v1/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "trader@example.com");
        assert!(body["profile"].get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_register_rejects_short_password() {
        let app = test_app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({ "email": "a@b.co", "password": "short" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("at least"));
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let app = test_app();
        let (status, _) = send(&app, "GET", "/api/v1/positions", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, "GET", "/api/v1/positions", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_generated_placeholder_signal_is_not_tradable() {
        let app = test_app();
        let (token, _) = register(&app, "hold@example.com").await;

        let (status, signal) = send(
            &app,
            "POST",
            "/api/v1/signals/generate",
            Some(&token),
            Some(json!({ "symbol": "ethusdt", "trading_mode": "Scalper" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(signal["symbol"], "ETHUSDT");
        assert_eq!(signal["signal"], "HOLD");
        assert_eq!(signal["status"], "PENDING_EXECUTION");

        let (_, listed) = send(&app, "GET", "/api/v1/signals", Some(&token), None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let uri = format!("/api/v1/signals/{}/execute", signal["id"].as_str().unwrap());
        let (status, _) = send(&app, "POST", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_generate_without_price_is_unavailable() {
        let app = test_app();
        let (token, _) = register(&app, "nofeed@example.com").await;

        let (status, _) = send(
            &app,
            "POST",
            "/api/v1/signals/generate",
            Some(&token),
            Some(json!({ "symbol": "DOGEUSDT" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_generator_failure_is_bad_gateway_and_stores_nothing() {
        let app = test_app_with(Arc::new(FailingGenerator));
        let (token, user_id) = register(&app, "down@example.com").await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/signals/generate",
            Some(&token),
            Some(json!({ "symbol": "ETHUSDT" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].is_string());
        assert!(app.store.signals(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_executions_open_one_position() {
        let app = test_app();
        let (token, user_id) = register(&app, "twice@example.com").await;
        let signal_id = buy_signal(&app, user_id).await;

        let uri = format!("/api/v1/signals/{}/execute", signal_id);
        let ((first, _), (second, _)) = tokio::join!(
            send(&app, "POST", &uri, Some(&token), None),
            send(&app, "POST", &uri, Some(&token), None),
        );

        let mut statuses = [first, second];
        statuses.sort();
        assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);
        assert_eq!(app.store.active_positions(Some(user_id)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_execute_and_dismiss_resolve_once() {
        let app = test_app();
        let (token, user_id) = register(&app, "either@example.com").await;
        let signal_id = buy_signal(&app, user_id).await;

        let execute_uri = format!("/api/v1/signals/{}/execute", signal_id);
        let dismiss_uri = format!("/api/v1/signals/{}/dismiss", signal_id);
        let ((executed, _), (dismissed, _)) = tokio::join!(
            send(&app, "POST", &execute_uri, Some(&token), None),
            send(&app, "POST", &dismiss_uri, Some(&token), None),
        );

        let positions = app.store.active_positions(Some(user_id)).await.unwrap();
        let signal = app.store.signal(signal_id).await.unwrap().unwrap();
        match (executed, dismissed) {
            (StatusCode::OK, StatusCode::CONFLICT) => {
                assert_eq!(signal.status, SignalStatus::Executed);
                assert_eq!(positions.len(), 1);
            }
            (StatusCode::CONFLICT, StatusCode::OK) => {
                assert_eq!(signal.status, SignalStatus::Dismissed);
                assert!(positions.is_empty());
            }
            other => panic!("both requests resolved the signal: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_fill_and_manual_close() {
        let app = test_app();
        let (token, user_id) = register(&app, "full@example.com").await;
        let signal_id = buy_signal(&app, user_id).await;

        let uri = format!("/api/v1/signals/{}/execute", signal_id);
        let (status, body) = send(&app, "POST", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["signal"]["status"], "EXECUTED");
        assert_eq!(body["position"]["status"], "PENDING");
        assert_eq!(body["position"]["size"], 2.0);
        let position_id = body["position"]["id"].as_str().unwrap().to_string();

        let (status, _) = send(&app, "POST", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        app.feed.set("ETHUSDT", 99.0);
        app.manager.tick().await.unwrap();

        let (_, active) = send(&app, "GET", "/api/v1/positions", Some(&token), None).await;
        assert_eq!(active[0]["status"], "OPEN");

        let close_uri = format!("/api/v1/positions/{}/close", position_id);
        let (status, closed) = send(&app, "POST", &close_uri, Some(&token), Some(json!({ "price": 110.0 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(closed["status"], "CLOSED");
        assert_eq!(closed["close_reason"], "Manual");
        assert_eq!(closed["pnl"], 20.0);

        let (_, history) = send(&app, "GET", "/api/v1/positions/history", Some(&token), None).await;
        assert_eq!(history.as_array().unwrap().len(), 1);

        let (_, stats) = send(&app, "GET", "/api/v1/positions/stats", Some(&token), None).await;
        assert_eq!(stats["total_trades"], 1);
        assert_eq!(stats["wins"], 1);

        let (_, profile) = send(&app, "GET", "/api/v1/profile", Some(&token), None).await;
        assert!(profile["weekly_points"].as_i64().unwrap() > 0);
        assert_eq!(profile["weekly_points"], closed["rewards"]["xp"]);

        let (status, _) = send(&app, "POST", &close_uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_instant_execution_opens_at_live_price() {
        let app = test_app();
        let (token, user_id) = register(&app, "instant@example.com").await;
        let signal_id = buy_signal(&app, user_id).await;

        let uri = format!("/api/v1/signals/{}/execute", signal_id);
        let (status, body) = send(&app, "POST", &uri, Some(&token), Some(json!({ "instant": true, "size": 0.5 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["position"]["status"], "OPEN");
        assert_eq!(body["position"]["entry_price"], 105.0);
        assert_eq!(body["position"]["size"], 0.5);
    }

    #[tokio::test]
    async fn test_other_users_cannot_touch_signals_or_positions() {
        let app = test_app();
        let (_, owner_id) = register(&app, "owner@example.com").await;
        let (intruder, _) = register(&app, "intruder@example.com").await;
        let signal_id = buy_signal(&app, owner_id).await;

        let uri = format!("/api/v1/signals/{}/dismiss", signal_id);
        let (status, _) = send(&app, "POST", &uri, Some(&intruder), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let close_uri = format!("/api/v1/positions/{}/close", Uuid::new_v4());
        let (status, body) = send(&app, "POST", &close_uri, Some(&intruder), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_dismissed_signal_cannot_execute() {
        let app = test_app();
        let (token, user_id) = register(&app, "dismiss@example.com").await;
        let signal_id = buy_signal(&app, user_id).await;

        let (status, body) = send(&app, "POST", &format!("/api/v1/signals/{}/dismiss", signal_id), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "DISMISSED");

        let (status, _) = send(&app, "POST", &format!("/api/v1/signals/{}/execute", signal_id), Some(&token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_market_ticker() {
        let app = test_app();
        let (token, _) = register(&app, "market@example.com").await;

        let (status, body) = send(&app, "GET", "/api/v1/market/ethusdt", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["last_price"], 105.0);

        let (status, _) = send(&app, "GET", "/api/v1/market/XRPUSDT", Some(&token), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
