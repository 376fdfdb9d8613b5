//! Reward payouts for closed positions.

use crate::portfolio::types::{Rewards, RiskProfile, TradingMode};

pub const BASE_WIN_XP: f64 = 50.0;
pub const BASE_LOSS_XP: f64 = 10.0;
pub const WIN_AIRDROP_BONUS: f64 = 25.0;
pub const LOSS_AIRDROP_BONUS: f64 = 5.0;
pub const BASE_GAS: f64 = 0.5;
pub const GAS_PER_PNL: f64 = 0.01;
const PNL_PER_BLOCK: f64 = 10.0;

/// Derive reward deltas from a closing PnL.
///
/// Wins scale with both the trading mode and the risk profile, losses only
/// with the trading mode. Values are rounded half away from zero.
pub fn calculate_rewards(pnl: f64, mode: TradingMode, risk: RiskProfile) -> Rewards {
    let is_win = pnl > 0.0;
    let mode_mult = mode.multiplier();
    let risk_mult = risk.multiplier();

    let xp = if is_win {
        BASE_WIN_XP * mode_mult * risk_mult
    } else {
        BASE_LOSS_XP * mode_mult
    };

    let bonus = if is_win {
        WIN_AIRDROP_BONUS * mode_mult * risk_mult
    } else {
        LOSS_AIRDROP_BONUS * mode_mult
    };
    // NaN PnL (unparseable entry) earns nothing
    let airdrop_points = if pnl.is_finite() { (pnl + bonus).round() } else { 0.0 };

    let magnitude = if pnl.is_finite() { pnl.abs() } else { 0.0 };
    let gas_paid = round2(BASE_GAS * mode_mult * risk_mult + magnitude * GAS_PER_PNL);
    let blocks_trained = (magnitude * mode_mult * risk_mult / PNL_PER_BLOCK).ceil() + 1.0;

    Rewards {
        xp: xp.round() as i64,
        airdrop_points: airdrop_points as i64,
        gas_paid,
        blocks_trained: blocks_trained as i64,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
