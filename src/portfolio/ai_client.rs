use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::portfolio::price_feed::Ticker;
use crate::portfolio::types::{
    GeneratedStrategy, PortfolioError, RiskProfile, SignalDirection, TradingMode,
};

pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Input to a strategy generation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRequest {
    pub symbol: String,
    pub market: Ticker,
    pub trading_mode: TradingMode,
    pub risk_profile: RiskProfile,
}

#[async_trait]
pub trait StrategyGenerator: Send + Sync {
    async fn generate(&self, request: &StrategyRequest) -> Result<GeneratedStrategy, PortfolioError>;
}

/// Static strategy used when the model returns nothing or no model is configured
pub fn placeholder_strategy(request: &StrategyRequest) -> GeneratedStrategy {
    let price = request.market.last_price;
    let range = (request.market.high_24h - request.market.low_24h).abs().max(price * 0.01);

    GeneratedStrategy {
        signal: SignalDirection::Hold,
        entry_zone: format!("{:.4}", price),
        stop_loss: format!("{:.4}", price - range / 2.0),
        take_profit: format!("{:.4}", price + range / 2.0),
        confidence: 0.0,
        risk_rating: request.risk_profile.as_str().to_string(),
        sentiment: "Neutral".to_string(),
        analysis_summary: format!("No strategy could be generated for {} right now.", request.symbol),
        technical_reasoning: "Insufficient model output.".to_string(),
        fundamental_reasoning: "Insufficient model output.".to_string(),
    }
}

/// Generator that always answers with the placeholder strategy
pub struct PlaceholderGenerator;

#[async_trait]
impl StrategyGenerator for PlaceholderGenerator {
    async fn generate(&self, request: &StrategyRequest) -> Result<GeneratedStrategy, PortfolioError> {
        Ok(placeholder_strategy(request))
    }
}

/// OpenAI-compatible chat completion client producing JSON strategies
pub struct AIClient {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AIClient {
    pub fn new(api_key: String) -> Result<Self, PortfolioError> {
        if api_key.trim().is_empty() {
            return Err(PortfolioError::Configuration("OpenAI API key is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key,
            endpoint: OPENAI_CHAT_URL.to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1200,
            temperature: 0.3,
        })
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    fn system_prompt(&self) -> &'static str {
        "You are a crypto trading analyst. Answer only with a JSON object. \
         Price levels are strings and may be single prices or ranges written as \"low - high\"."
    }

    fn strategy_prompt(&self, request: &StrategyRequest) -> String {
        format!(
            r#"Produce a trading strategy for {symbol}.

Market snapshot:
- last price: {last}
- 24h high: {high}
- 24h low: {low}
- 24h volume: {volume}

Trading mode: {mode}
Risk profile: {risk}

Respond with:
{{
    "signal": "BUY" | "SELL" | "HOLD",
    "entry_zone": "<price or range>",
    "stop_loss": "<price>",
    "take_profit": "<price or range>",
    "confidence": <number 0-1>,
    "risk_rating": "Low" | "Medium" | "High",
    "sentiment": "<Bullish | Bearish | Neutral>",
    "analysis_summary": "<one paragraph>",
    "technical_reasoning": "<one paragraph>",
    "fundamental_reasoning": "<one paragraph>"
}}"#,
            symbol = request.symbol,
            last = request.market.last_price,
            high = request.market.high_24h,
            low = request.market.low_24h,
            volume = request.market.volume_24h,
            mode = request.trading_mode.as_str(),
            risk = request.risk_profile.as_str(),
        )
    }

    async fn call_openai_api(&self, system_prompt: &str, user_prompt: &str) -> Result<String, PortfolioError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt }
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" }
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PortfolioError::StrategyGeneration(format!(
                "OpenAI API error {}: {}",
                status, error_text
            )));
        }

        let json: Value = response.json().await?;
        Ok(json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

/// Parse the model's JSON answer. `None` when the answer is empty.
pub fn parse_strategy(content: &str) -> Result<Option<GeneratedStrategy>, PortfolioError> {
    if content.trim().is_empty() {
        return Ok(None);
    }
    let json: Value = serde_json::from_str(content)
        .map_err(|e| PortfolioError::StrategyGeneration(format!("Failed to parse AI response: {}", e)))?;
    if json.as_object().is_none_or(|obj| obj.is_empty()) {
        return Ok(None);
    }

    let text = |key: &str| json[key].as_str().unwrap_or("").trim().to_string();
    // Levels occasionally come back as bare numbers
    let level = |key: &str| match &json[key] {
        Value::Number(n) => n.to_string(),
        other => other.as_str().unwrap_or("").trim().to_string(),
    };

    let signal = json["signal"]
        .as_str()
        .ok_or_else(|| PortfolioError::StrategyGeneration("Missing signal in AI response".to_string()))?
        .parse::<SignalDirection>()?;

    Ok(Some(GeneratedStrategy {
        signal,
        entry_zone: level("entry_zone"),
        stop_loss: level("stop_loss"),
        take_profit: level("take_profit"),
        confidence: json["confidence"].as_f64().unwrap_or(0.5).clamp(0.0, 1.0),
        risk_rating: text("risk_rating"),
        sentiment: text("sentiment"),
        analysis_summary: text("analysis_summary"),
        technical_reasoning: text("technical_reasoning"),
        fundamental_reasoning: text("fundamental_reasoning"),
    }))
}

#[async_trait]
impl StrategyGenerator for AIClient {
    async fn generate(&self, request: &StrategyRequest) -> Result<GeneratedStrategy, PortfolioError> {
        let content = self
            .call_openai_api(self.system_prompt(), &self.strategy_prompt(request))
            .await?;

        match parse_strategy(&content)? {
            Some(strategy) => {
                info!(
                    "Generated {} strategy for {} (confidence {:.2})",
                    strategy.signal.as_str(),
                    request.symbol,
                    strategy.confidence
                );
                Ok(strategy)
            }
            None => {
                warn!("Empty strategy from model for {}, using placeholder", request.symbol);
                Ok(placeholder_strategy(request))
            }
        }
    }
}
