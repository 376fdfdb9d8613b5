// Database Models
//
// Row mappings between tokio-postgres rows and the portfolio domain types.

use tokio_postgres::Row;

use crate::portfolio::types::{
    CloseReason, GeneratedSignal, GeneratedStrategy, NewPosition, PortfolioError, Position, Rewards,
    UserProfile,
};

/// Trait for converting from tokio-postgres Row
pub trait FromRow {
    fn from_row(row: &Row) -> Result<Self, PortfolioError>
    where
        Self: Sized;
}

fn parse_column<T: std::str::FromStr<Err = PortfolioError>>(row: &Row, column: &str) -> Result<T, PortfolioError> {
    let raw: String = row.try_get(column)?;
    raw.parse()
}

impl FromRow for Position {
    fn from_row(row: &Row) -> Result<Self, PortfolioError> {
        let params = NewPosition {
            user_id: row.try_get("user_id")?,
            symbol: row.try_get("symbol")?,
            direction: parse_column(row, "direction")?,
            entry_price: row.try_get("entry_price")?,
            stop_loss: row.try_get("stop_loss")?,
            take_profit: row.try_get("take_profit")?,
            size: row.try_get("size")?,
            trading_mode: parse_column(row, "trading_mode")?,
            risk_profile: parse_column(row, "risk_profile")?,
            signal_id: row.try_get("signal_id")?,
            expires_at: row.try_get("expires_at")?,
            sentiment: row.try_get("sentiment")?,
            confidence: row.try_get("confidence")?,
        };

        let close_reason: Option<CloseReason> = row
            .try_get::<_, Option<String>>("close_reason")?
            .map(|reason| reason.parse())
            .transpose()?;
        let rewards = row
            .try_get::<_, Option<serde_json::Value>>("rewards")?
            .map(serde_json::from_value::<Rewards>)
            .transpose()?;

        Ok(Position::restore(
            row.try_get("id")?,
            params,
            parse_column(row, "status")?,
            row.try_get("created_at")?,
            row.try_get("opened_at")?,
            row.try_get("closed_at")?,
            row.try_get("archived_at")?,
            row.try_get("close_price")?,
            row.try_get("pnl")?,
            close_reason,
            rewards,
        ))
    }
}

impl FromRow for GeneratedSignal {
    fn from_row(row: &Row) -> Result<Self, PortfolioError> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            symbol: row.try_get("symbol")?,
            strategy: GeneratedStrategy {
                signal: parse_column(row, "signal")?,
                entry_zone: row.try_get("entry_zone")?,
                stop_loss: row.try_get("stop_loss")?,
                take_profit: row.try_get("take_profit")?,
                confidence: row.try_get("confidence")?,
                risk_rating: row.try_get("risk_rating")?,
                sentiment: row.try_get("sentiment")?,
                analysis_summary: row.try_get("analysis_summary")?,
                technical_reasoning: row.try_get("technical_reasoning")?,
                fundamental_reasoning: row.try_get("fundamental_reasoning")?,
            },
            trading_mode: parse_column(row, "trading_mode")?,
            risk_profile: parse_column(row, "risk_profile")?,
            status: parse_column(row, "status")?,
            created_at: row.try_get("created_at")?,
            position_id: row.try_get("position_id")?,
        })
    }
}

impl FromRow for UserProfile {
    fn from_row(row: &Row) -> Result<Self, PortfolioError> {
        Ok(Self {
            user_id: row.try_get("user_id")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            wallet_address: row.try_get("wallet_address")?,
            weekly_points: row.try_get("weekly_points")?,
            airdrop_points: row.try_get("airdrop_points")?,
            gas_paid: row.try_get("gas_paid")?,
            blocks_trained: row.try_get("blocks_trained")?,
            claimed_missions: row.try_get("claimed_missions")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
