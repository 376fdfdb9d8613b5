use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the portfolio domain and its collaborators
#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("Invalid transition for position {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: PositionStatus,
        to: PositionStatus,
    },

    #[error("Signal {0} is already resolved")]
    SignalAlreadyResolved(Uuid),

    #[error("Signal {0} has no tradable direction")]
    NotTradable(Uuid),

    #[error("Position {0} was modified concurrently")]
    Conflict(Uuid),

    #[error("{0} not found")]
    NotFound(String),

    #[error("No live price available for {0}")]
    PriceUnavailable(String),

    #[error("Price feed error: {0}")]
    PriceFeed(String),

    #[error("Strategy generation failed: {0}")]
    StrategyGeneration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }
}

impl FromStr for Direction {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(Direction::Buy),
            "SELL" => Ok(Direction::Sell),
            other => Err(PortfolioError::Storage(format!("Unknown direction: {}", other))),
        }
    }
}

/// Lifecycle state of a simulated position.
///
/// Allowed moves: `Pending -> Open -> Closed`, `Pending -> Archived`, and
/// `Pending -> Closed` through a manual close only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Pending,
    Open,
    Closed,
    Archived,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Pending => "PENDING",
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
            PositionStatus::Archived => "ARCHIVED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, PositionStatus::Pending | PositionStatus::Open)
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionStatus {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PositionStatus::Pending),
            "OPEN" => Ok(PositionStatus::Open),
            "CLOSED" => Ok(PositionStatus::Closed),
            "ARCHIVED" => Ok(PositionStatus::Archived),
            other => Err(PortfolioError::Storage(format!("Unknown position status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TradingMode {
    Scalper,
    Sniper,
    #[default]
    Intraday,
    Swing,
    Custom,
}

impl TradingMode {
    pub fn multiplier(&self) -> f64 {
        match self {
            TradingMode::Scalper => 1.0,
            TradingMode::Sniper => 1.1,
            TradingMode::Intraday => 1.2,
            TradingMode::Swing => 1.5,
            TradingMode::Custom => 1.2,
        }
    }

    /// How long an executed signal stays alive before it expires
    pub fn order_ttl(&self) -> Duration {
        match self {
            TradingMode::Scalper => Duration::hours(1),
            TradingMode::Sniper => Duration::hours(4),
            TradingMode::Intraday => Duration::hours(24),
            TradingMode::Swing => Duration::days(7),
            TradingMode::Custom => Duration::days(3),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Scalper => "Scalper",
            TradingMode::Sniper => "Sniper",
            TradingMode::Intraday => "Intraday",
            TradingMode::Swing => "Swing",
            TradingMode::Custom => "Custom",
        }
    }
}

impl FromStr for TradingMode {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Scalper" => Ok(TradingMode::Scalper),
            "Sniper" => Ok(TradingMode::Sniper),
            "Intraday" => Ok(TradingMode::Intraday),
            "Swing" => Ok(TradingMode::Swing),
            "Custom" => Ok(TradingMode::Custom),
            other => Err(PortfolioError::Storage(format!("Unknown trading mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RiskProfile {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskProfile {
    pub fn multiplier(&self) -> f64 {
        match self {
            RiskProfile::Low => 0.8,
            RiskProfile::Medium => 1.0,
            RiskProfile::High => 1.3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskProfile::Low => "Low",
            RiskProfile::Medium => "Medium",
            RiskProfile::High => "High",
        }
    }
}

impl FromStr for RiskProfile {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(RiskProfile::Low),
            "Medium" => Ok(RiskProfile::Medium),
            "High" => Ok(RiskProfile::High),
            other => Err(PortfolioError::Storage(format!("Unknown risk profile: {}", other))),
        }
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    Expired,
    Manual,
}

impl CloseReason {
    /// Label shown to the user in close notifications
    pub fn label(&self) -> &'static str {
        match self {
            CloseReason::TakeProfit => "Take Profit Hit",
            CloseReason::StopLoss => "Stop Loss Hit",
            CloseReason::Expired => "Position Expired",
            CloseReason::Manual => "Position Closed Manually",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TakeProfit => "TakeProfit",
            CloseReason::StopLoss => "StopLoss",
            CloseReason::Expired => "Expired",
            CloseReason::Manual => "Manual",
        }
    }
}

impl FromStr for CloseReason {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TakeProfit" => Ok(CloseReason::TakeProfit),
            "StopLoss" => Ok(CloseReason::StopLoss),
            "Expired" => Ok(CloseReason::Expired),
            "Manual" => Ok(CloseReason::Manual),
            other => Err(PortfolioError::Storage(format!("Unknown close reason: {}", other))),
        }
    }
}

/// Reward deltas produced when a position closes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Rewards {
    pub xp: i64,
    pub airdrop_points: i64,
    pub gas_paid: f64,
    pub blocks_trained: i64,
}

/// Price levels parsed from free text may be NaN, which JSON cannot carry.
/// NaN is written as `null` and `null` reads back as NaN.
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// A simulated trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub status: PositionStatus,
    #[serde(with = "nan_as_null")]
    entry_price: f64,
    #[serde(with = "nan_as_null")]
    stop_loss: f64,
    #[serde(with = "nan_as_null")]
    take_profit: f64,
    pub size: f64,
    pub trading_mode: TradingMode,
    pub risk_profile: RiskProfile,
    pub created_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub close_price: Option<f64>,
    pub pnl: Option<f64>,
    pub close_reason: Option<CloseReason>,
    pub rewards: Option<Rewards>,
    pub signal_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub sentiment: Option<String>,
    pub confidence: Option<f64>,
}

/// Parameters for opening a new position
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub user_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub size: f64,
    pub trading_mode: TradingMode,
    pub risk_profile: RiskProfile,
    pub signal_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub sentiment: Option<String>,
    pub confidence: Option<f64>,
}

impl Position {
    /// Create a pending limit order
    pub fn pending(params: NewPosition, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: params.user_id,
            symbol: params.symbol.to_ascii_uppercase(),
            direction: params.direction,
            status: PositionStatus::Pending,
            entry_price: params.entry_price,
            stop_loss: params.stop_loss,
            take_profit: params.take_profit,
            size: params.size,
            trading_mode: params.trading_mode,
            risk_profile: params.risk_profile,
            created_at: now,
            opened_at: None,
            closed_at: None,
            archived_at: None,
            close_price: None,
            pnl: None,
            close_reason: None,
            rewards: None,
            signal_id: params.signal_id,
            expires_at: params.expires_at,
            sentiment: params.sentiment,
            confidence: params.confidence,
        }
    }

    /// Create a position that is open immediately (instant signals)
    pub fn open_now(params: NewPosition, now: DateTime<Utc>) -> Self {
        let mut position = Self::pending(params, now);
        position.status = PositionStatus::Open;
        position.opened_at = Some(now);
        position
    }

    /// Rebuild a position from persisted state without re-running lifecycle checks
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        id: Uuid,
        params: NewPosition,
        status: PositionStatus,
        created_at: DateTime<Utc>,
        opened_at: Option<DateTime<Utc>>,
        closed_at: Option<DateTime<Utc>>,
        archived_at: Option<DateTime<Utc>>,
        close_price: Option<f64>,
        pnl: Option<f64>,
        close_reason: Option<CloseReason>,
        rewards: Option<Rewards>,
    ) -> Self {
        let mut position = Self::pending(params, created_at);
        position.id = id;
        position.status = status;
        position.opened_at = opened_at;
        position.closed_at = closed_at;
        position.archived_at = archived_at;
        position.close_price = close_price;
        position.pnl = pnl;
        position.close_reason = close_reason;
        position.rewards = rewards;
        position
    }

    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn stop_loss(&self) -> f64 {
        self.stop_loss
    }

    pub fn take_profit(&self) -> f64 {
        self.take_profit
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Realized PnL if the position were closed at `close_price`
    pub fn pnl_at(&self, close_price: f64) -> f64 {
        match self.direction {
            Direction::Buy => (close_price - self.entry_price) * self.size,
            Direction::Sell => (self.entry_price - close_price) * self.size,
        }
    }

    /// PENDING -> OPEN
    pub fn fill(&mut self, now: DateTime<Utc>) -> Result<(), PortfolioError> {
        self.ensure_status(PositionStatus::Pending, PositionStatus::Open)?;
        self.status = PositionStatus::Open;
        self.opened_at = Some(now);
        Ok(())
    }

    /// PENDING -> ARCHIVED
    pub fn archive(&mut self, now: DateTime<Utc>) -> Result<(), PortfolioError> {
        self.ensure_status(PositionStatus::Pending, PositionStatus::Archived)?;
        self.status = PositionStatus::Archived;
        self.archived_at = Some(now);
        Ok(())
    }

    /// OPEN -> CLOSED, or PENDING -> CLOSED for manual closes.
    ///
    /// A pending order that is closed by hand was never filled, so it closes
    /// at its entry with zero PnL and no rewards.
    pub fn close(
        &mut self,
        close_price: f64,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Result<f64, PortfolioError> {
        let manual_pending = reason == CloseReason::Manual && self.status == PositionStatus::Pending;
        if !manual_pending {
            self.ensure_status(PositionStatus::Open, PositionStatus::Closed)?;
        }

        let (close_price, pnl, rewards) = if manual_pending {
            (self.entry_price, 0.0, Rewards::default())
        } else {
            let pnl = self.pnl_at(close_price);
            let rewards = crate::portfolio::rewards::calculate_rewards(
                pnl,
                self.trading_mode,
                self.risk_profile,
            );
            (close_price, pnl, rewards)
        };

        self.status = PositionStatus::Closed;
        self.close_price = Some(close_price);
        self.closed_at = Some(now);
        self.pnl = Some(pnl);
        self.close_reason = Some(reason);
        self.rewards = Some(rewards);
        Ok(pnl)
    }

    fn ensure_status(&self, expected: PositionStatus, to: PositionStatus) -> Result<(), PortfolioError> {
        if self.status != expected {
            return Err(PortfolioError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Buy,
    Sell,
    Hold,
}

impl SignalDirection {
    pub fn as_direction(&self) -> Option<Direction> {
        match self {
            SignalDirection::Buy => Some(Direction::Buy),
            SignalDirection::Sell => Some(Direction::Sell),
            SignalDirection::Hold => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDirection::Buy => "BUY",
            SignalDirection::Sell => "SELL",
            SignalDirection::Hold => "HOLD",
        }
    }
}

impl FromStr for SignalDirection {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "LONG" => Ok(SignalDirection::Buy),
            "SELL" | "SHORT" => Ok(SignalDirection::Sell),
            "HOLD" => Ok(SignalDirection::Hold),
            other => Err(PortfolioError::StrategyGeneration(format!("Unknown signal: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    PendingExecution,
    Executed,
    Dismissed,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::PendingExecution => "PENDING_EXECUTION",
            SignalStatus::Executed => "EXECUTED",
            SignalStatus::Dismissed => "DISMISSED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SignalStatus::PendingExecution)
    }
}

impl FromStr for SignalStatus {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_EXECUTION" => Ok(SignalStatus::PendingExecution),
            "EXECUTED" => Ok(SignalStatus::Executed),
            "DISMISSED" => Ok(SignalStatus::Dismissed),
            other => Err(PortfolioError::Storage(format!("Unknown signal status: {}", other))),
        }
    }
}

/// Strategy fields returned by the generator, before they are bound to a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedStrategy {
    pub signal: SignalDirection,
    pub entry_zone: String,
    pub stop_loss: String,
    pub take_profit: String,
    pub confidence: f64,
    pub risk_rating: String,
    pub sentiment: String,
    pub analysis_summary: String,
    pub technical_reasoning: String,
    pub fundamental_reasoning: String,
}

/// An AI-produced candidate strategy awaiting user action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSignal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    #[serde(flatten)]
    pub strategy: GeneratedStrategy,
    pub trading_mode: TradingMode,
    pub risk_profile: RiskProfile,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
    pub position_id: Option<Uuid>,
}

impl GeneratedSignal {
    pub fn new(
        user_id: Uuid,
        symbol: &str,
        strategy: GeneratedStrategy,
        trading_mode: TradingMode,
        risk_profile: RiskProfile,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            symbol: symbol.to_ascii_uppercase(),
            strategy,
            trading_mode,
            risk_profile,
            status: SignalStatus::PendingExecution,
            created_at: now,
            position_id: None,
        }
    }
}

/// Account/progress record credited with rewards on every close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub wallet_address: Option<String>,
    pub weekly_points: i64,
    pub airdrop_points: i64,
    pub gas_paid: f64,
    pub blocks_trained: i64,
    pub claimed_missions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(email: String, password_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            email,
            password_hash,
            wallet_address: None,
            weekly_points: 0,
            airdrop_points: 0,
            gas_paid: 0.0,
            blocks_trained: 0,
            claimed_missions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn credit(&mut self, rewards: &Rewards, now: DateTime<Utc>) {
        self.weekly_points += rewards.xp;
        self.airdrop_points += rewards.airdrop_points;
        self.gas_paid += rewards.gas_paid;
        self.blocks_trained += rewards.blocks_trained;
        self.updated_at = now;
    }
}

/// Notifications emitted by the lifecycle manager
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum PortfolioEvent {
    Filled {
        position_id: Uuid,
        user_id: Uuid,
        symbol: String,
        price: f64,
    },
    Expired {
        position_id: Uuid,
        user_id: Uuid,
        symbol: String,
    },
    Closed {
        position_id: Uuid,
        user_id: Uuid,
        symbol: String,
        reason: CloseReason,
        close_price: f64,
        pnl: f64,
        rewards: Rewards,
    },
}

impl PortfolioEvent {
    pub fn position_id(&self) -> Uuid {
        match self {
            PortfolioEvent::Filled { position_id, .. }
            | PortfolioEvent::Expired { position_id, .. }
            | PortfolioEvent::Closed { position_id, .. } => *position_id,
        }
    }

    /// Human readable message, the server-side counterpart of a toast
    pub fn message(&self) -> String {
        match self {
            PortfolioEvent::Filled { symbol, price, .. } => {
                format!("Order filled: {} at {:.4}", symbol, price)
            }
            PortfolioEvent::Expired { symbol, .. } => {
                format!("Pending order expired: {}", symbol)
            }
            PortfolioEvent::Closed { symbol, reason, pnl, .. } => {
                format!("{}: {} closed with PnL {:.2}", reason.label(), symbol, pnl)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn new_position(direction: Direction, entry: f64, stop: f64, target: f64) -> NewPosition {
        NewPosition {
            user_id: Uuid::nil(),
            symbol: "BTCUSDT".to_string(),
            direction,
            entry_price: entry,
            stop_loss: stop,
            take_profit: target,
            size: 1.0,
            trading_mode: TradingMode::Intraday,
            risk_profile: RiskProfile::Medium,
            signal_id: None,
            expires_at: None,
            sentiment: None,
            confidence: None,
        }
    }
}
