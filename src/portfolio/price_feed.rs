use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::portfolio::types::PortfolioError;

pub const BINANCE_API_URL: &str = "https://api.binance.com";

/// How long a fetched ticker is served from cache
const CACHE_TTL_SECS: i64 = 2;

/// Last trade price and 24h statistics for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume_24h: f64,
    pub fetched_at: DateTime<Utc>,
}

#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn ticker(&self, symbol: &str) -> Result<Ticker, PortfolioError>;

    /// Fetch last prices for many symbols concurrently.
    ///
    /// Symbols whose request failed are missing from the result and are
    /// retried on the next call.
    async fn fetch_prices(&self, symbols: &[String]) -> HashMap<String, f64> {
        let unique: HashSet<&String> = symbols.iter().collect();
        let requests = unique.into_iter().map(|symbol| async move {
            (symbol.clone(), self.ticker(symbol).await)
        });

        let mut prices = HashMap::new();
        for (symbol, result) in futures::future::join_all(requests).await {
            match result {
                Ok(ticker) => {
                    prices.insert(symbol, ticker.last_price);
                }
                Err(e) => warn!("Price unavailable for {}: {}", symbol, e),
            }
        }
        prices
    }
}

/// Raw Binance 24h ticker, numbers are sent as strings
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceTicker {
    symbol: String,
    last_price: String,
    high_price: String,
    low_price: String,
    volume: String,
}

/// Binance REST price feed with a last-price cache
pub struct BinancePriceFeed {
    client: Client,
    base_url: String,
    price_cache: DashMap<String, Ticker>,
}

impl BinancePriceFeed {
    pub fn new(base_url: impl Into<String>) -> Result<Self, PortfolioError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            price_cache: DashMap::new(),
        })
    }

    /// Ticker fetched within the cache TTL, if any
    fn cached_ticker(&self, symbol: &str) -> Option<Ticker> {
        let entry = self.price_cache.get(symbol)?;
        let age = Utc::now() - entry.fetched_at;
        (age < chrono::Duration::seconds(CACHE_TTL_SECS)).then(|| entry.value().clone())
    }

    fn parse_ticker(raw: BinanceTicker) -> Result<Ticker, PortfolioError> {
        let number = |field: &str, value: &str| {
            value.parse::<f64>().map_err(|_| {
                PortfolioError::PriceFeed(format!("Invalid {} '{}' for {}", field, value, raw.symbol))
            })
        };

        Ok(Ticker {
            last_price: number("lastPrice", &raw.last_price)?,
            high_24h: number("highPrice", &raw.high_price)?,
            low_24h: number("lowPrice", &raw.low_price)?,
            volume_24h: number("volume", &raw.volume)?,
            symbol: raw.symbol.clone(),
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl PriceFeed for BinancePriceFeed {
    async fn ticker(&self, symbol: &str) -> Result<Ticker, PortfolioError> {
        let symbol = symbol.to_ascii_uppercase();
        if let Some(ticker) = self.cached_ticker(&symbol) {
            return Ok(ticker);
        }
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PortfolioError::PriceFeed(format!(
                "HTTP {} for {}: {}",
                status, symbol, body
            )));
        }

        let raw: BinanceTicker = response.json().await?;
        let ticker = Self::parse_ticker(raw)?;
        debug!("Fetched {} last={}", ticker.symbol, ticker.last_price);

        self.price_cache.insert(symbol, ticker.clone());
        Ok(ticker)
    }
}
