//! Position transition engine.
//!
//! Evaluation is pure: it looks at a position, the latest price for its
//! symbol and the current time, and decides at most one transition. Applying
//! a transition mutates the position and yields the notification to emit.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::portfolio::types::{
    CloseReason, Direction, PortfolioError, PortfolioEvent, Position, PositionStatus,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// Pending limit order reached its entry
    Fill { price: f64 },
    /// Pending order outlived its expiration
    Archive,
    /// Open position hit TP, SL, expiry, or was closed by hand
    Close { reason: CloseReason, price: f64 },
}

/// Decide the transition for one position, if any.
///
/// Without a price only the time-based archive of pending orders can fire;
/// everything else waits for the next tick.
pub fn evaluate(position: &Position, price: Option<f64>, now: DateTime<Utc>) -> Option<Transition> {
    match position.status {
        PositionStatus::Pending => {
            if position.is_expired(now) {
                return Some(Transition::Archive);
            }
            let price = price?;
            let triggered = match position.direction {
                Direction::Buy => price <= position.entry_price(),
                Direction::Sell => price >= position.entry_price(),
            };
            triggered.then_some(Transition::Fill { price })
        }
        PositionStatus::Open => {
            let price = price?;
            let (take_profit_hit, stop_loss_hit) = match position.direction {
                Direction::Buy => (price >= position.take_profit(), price <= position.stop_loss()),
                Direction::Sell => (price <= position.take_profit(), price >= position.stop_loss()),
            };

            let reason = if take_profit_hit {
                CloseReason::TakeProfit
            } else if stop_loss_hit {
                CloseReason::StopLoss
            } else if position.is_expired(now) {
                CloseReason::Expired
            } else {
                return None;
            };
            Some(Transition::Close { reason, price })
        }
        PositionStatus::Closed | PositionStatus::Archived => None,
    }
}

/// Evaluate every position against a symbol -> price map.
///
/// Positions are indexed by symbol so each price lookup happens once per
/// symbol. Output preserves the input order of positions.
pub fn evaluate_all(
    positions: &[Position],
    prices: &HashMap<String, f64>,
    now: DateTime<Utc>,
) -> Vec<(Uuid, Transition)> {
    let mut by_symbol: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, position) in positions.iter().enumerate() {
        by_symbol.entry(position.symbol.as_str()).or_default().push(idx);
    }

    let mut decided: Vec<(usize, Transition)> = Vec::new();
    for (symbol, indices) in by_symbol {
        let price = prices.get(symbol).copied();
        for idx in indices {
            if let Some(transition) = evaluate(&positions[idx], price, now) {
                decided.push((idx, transition));
            }
        }
    }

    decided.sort_by_key(|(idx, _)| *idx);
    decided
        .into_iter()
        .map(|(idx, transition)| (positions[idx].id, transition))
        .collect()
}

impl Transition {
    /// The status the position is expected to be in before applying
    pub fn expected_status(&self, position: &Position) -> PositionStatus {
        match self {
            Transition::Fill { .. } | Transition::Archive => PositionStatus::Pending,
            Transition::Close { .. } => position.status,
        }
    }

    pub fn apply(&self, position: &mut Position, now: DateTime<Utc>) -> Result<PortfolioEvent, PortfolioError> {
        match *self {
            Transition::Fill { price } => {
                position.fill(now)?;
                Ok(PortfolioEvent::Filled {
                    position_id: position.id,
                    user_id: position.user_id,
                    symbol: position.symbol.clone(),
                    price,
                })
            }
            Transition::Archive => {
                position.archive(now)?;
                Ok(PortfolioEvent::Expired {
                    position_id: position.id,
                    user_id: position.user_id,
                    symbol: position.symbol.clone(),
                })
            }
            Transition::Close { reason, price } => {
                let pnl = position.close(price, reason, now)?;
                Ok(PortfolioEvent::Closed {
                    position_id: position.id,
                    user_id: position.user_id,
                    symbol: position.symbol.clone(),
                    reason,
                    close_price: position.close_price.unwrap_or(price),
                    pnl,
                    rewards: position.rewards.unwrap_or_default(),
                })
            }
        }
    }
}
