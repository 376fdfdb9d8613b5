use serde::Serialize;

use crate::portfolio::types::{Position, PositionStatus};

/// Aggregate figures over a user's trade history and active book
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PortfolioStats {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub best_trade: Option<f64>,
    pub worst_trade: Option<f64>,
    pub total_xp: i64,
    pub total_airdrop_points: i64,
    pub total_gas_paid: f64,
    pub total_blocks_trained: i64,
    pub open_positions: usize,
    pub pending_orders: usize,
}

impl PortfolioStats {
    pub fn compute(history: &[Position], active: &[Position]) -> Self {
        let mut stats = Self::default();

        for position in history.iter().filter(|p| p.status == PositionStatus::Closed) {
            let pnl = position.pnl.filter(|pnl| pnl.is_finite()).unwrap_or(0.0);
            stats.total_trades += 1;
            if pnl > 0.0 {
                stats.wins += 1;
            } else {
                stats.losses += 1;
            }
            stats.total_pnl += pnl;
            stats.best_trade = Some(stats.best_trade.map_or(pnl, |best| best.max(pnl)));
            stats.worst_trade = Some(stats.worst_trade.map_or(pnl, |worst| worst.min(pnl)));

            if let Some(rewards) = position.rewards {
                stats.total_xp += rewards.xp;
                stats.total_airdrop_points += rewards.airdrop_points;
                stats.total_gas_paid += rewards.gas_paid;
                stats.total_blocks_trained += rewards.blocks_trained;
            }
        }

        if stats.total_trades > 0 {
            stats.win_rate = stats.wins as f64 / stats.total_trades as f64;
        }

        stats.open_positions = active.iter().filter(|p| p.status == PositionStatus::Open).count();
        stats.pending_orders = active.iter().filter(|p| p.status == PositionStatus::Pending).count();
        stats
    }
}
