use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::portfolio::pricing::parse_price;
use crate::portfolio::types::{
    GeneratedSignal, NewPosition, PortfolioError, Position, SignalStatus,
};

pub const DEFAULT_POSITION_SIZE: f64 = 1.0;

/// Options supplied by the user when executing a signal
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Position size, defaults to [`DEFAULT_POSITION_SIZE`]
    pub size: Option<f64>,
    /// Live price for instant (market) execution. When set the position
    /// opens immediately at this price instead of waiting as a limit order.
    pub market_price: Option<f64>,
}

/// Turn a generated signal into a position and mark the signal executed
pub fn execute_signal(
    signal: &mut GeneratedSignal,
    options: ExecutionOptions,
    now: DateTime<Utc>,
) -> Result<Position, PortfolioError> {
    if signal.status.is_terminal() {
        return Err(PortfolioError::SignalAlreadyResolved(signal.id));
    }
    let direction = signal
        .strategy
        .signal
        .as_direction()
        .ok_or(PortfolioError::NotTradable(signal.id))?;

    let entry_price = options
        .market_price
        .unwrap_or_else(|| parse_price(&signal.strategy.entry_zone));
    let stop_loss = parse_price(&signal.strategy.stop_loss);
    let take_profit = parse_price(&signal.strategy.take_profit);

    if entry_price.is_nan() || stop_loss.is_nan() || take_profit.is_nan() {
        warn!(
            "Signal {} for {} has unparseable levels: entry={:?} stop={:?} target={:?}",
            signal.id,
            signal.symbol,
            signal.strategy.entry_zone,
            signal.strategy.stop_loss,
            signal.strategy.take_profit
        );
    }

    let params = NewPosition {
        user_id: signal.user_id,
        symbol: signal.symbol.clone(),
        direction,
        entry_price,
        stop_loss,
        take_profit,
        size: options.size.unwrap_or(DEFAULT_POSITION_SIZE),
        trading_mode: signal.trading_mode,
        risk_profile: signal.risk_profile,
        signal_id: Some(signal.id),
        expires_at: Some(now + signal.trading_mode.order_ttl()),
        sentiment: Some(signal.strategy.sentiment.clone()),
        confidence: Some(signal.strategy.confidence),
    };

    let position = if options.market_price.is_some() {
        Position::open_now(params, now)
    } else {
        Position::pending(params, now)
    };

    signal.status = SignalStatus::Executed;
    signal.position_id = Some(position.id);

    info!(
        "Executed signal {} -> position {} ({} {} @ {})",
        signal.id,
        position.id,
        position.direction.as_str(),
        position.symbol,
        position.entry_price()
    );

    Ok(position)
}

/// Mark a signal dismissed
pub fn dismiss_signal(signal: &mut GeneratedSignal) -> Result<(), PortfolioError> {
    if signal.status.is_terminal() {
        return Err(PortfolioError::SignalAlreadyResolved(signal.id));
    }
    signal.status = SignalStatus::Dismissed;
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use uuid::Uuid;

    use crate::portfolio::types::{
        GeneratedSignal, GeneratedStrategy, RiskProfile, SignalDirection, TradingMode,
    };

    pub fn strategy(signal: SignalDirection, entry: &str, stop: &str, target: &str) -> GeneratedStrategy {
        GeneratedStrategy {
            signal,
            entry_zone: entry.to_string(),
            stop_loss: stop.to_string(),
            take_profit: target.to_string(),
            confidence: 0.72,
            risk_rating: "Medium".to_string(),
            sentiment: "Bullish".to_string(),
            analysis_summary: "Range breakout".to_string(),
            technical_reasoning: "Higher lows on 4h".to_string(),
            fundamental_reasoning: "Inflows rising".to_string(),
        }
    }

    pub fn signal(user_id: Uuid, strategy: GeneratedStrategy) -> GeneratedSignal {
        GeneratedSignal::new(
            user_id,
            "ethusdt",
            strategy,
            TradingMode::Swing,
            RiskProfile::High,
            chrono::Utc::now(),
        )
    }
}
