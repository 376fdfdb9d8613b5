// PostgreSQL-backed portfolio store

use async_trait::async_trait;
use deadpool_postgres::Transaction;
use tokio_postgres::error::SqlState;
use tracing::debug;
use uuid::Uuid;

use crate::database::connection::DatabaseConnection;
use crate::database::models::FromRow;
use crate::portfolio::store::PortfolioStore;
use crate::portfolio::types::{
    GeneratedSignal, PortfolioError, Position, PositionStatus, SignalStatus, UserProfile,
};

const POSITION_COLUMNS: &str = "id, user_id, symbol, direction, status, entry_price, stop_loss, \
     take_profit, size, trading_mode, risk_profile, created_at, opened_at, closed_at, archived_at, \
     close_price, pnl, close_reason, rewards, signal_id, expires_at, sentiment, confidence";

const SIGNAL_COLUMNS: &str = "id, user_id, symbol, signal, entry_zone, stop_loss, take_profit, \
     confidence, risk_rating, sentiment, analysis_summary, technical_reasoning, \
     fundamental_reasoning, trading_mode, risk_profile, status, position_id, created_at";

const PROFILE_COLUMNS: &str = "user_id, email, password_hash, wallet_address, weekly_points, \
     airdrop_points, gas_paid, blocks_trained, claimed_missions, created_at, updated_at";

fn rewards_json(position: &Position) -> Result<Option<serde_json::Value>, PortfolioError> {
    position
        .rewards
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(PortfolioError::from)
}

fn collect<T: FromRow>(rows: Vec<tokio_postgres::Row>) -> Result<Vec<T>, PortfolioError> {
    rows.iter().map(T::from_row).collect()
}

async fn insert_position_in(tx: &Transaction<'_>, position: &Position) -> Result<(), PortfolioError> {
    let rewards = rewards_json(position)?;
    let close_reason = position.close_reason.map(|reason| reason.as_str());

    tx.execute(
        &format!(
            "INSERT INTO positions ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
             $18, $19, $20, $21, $22, $23)",
            POSITION_COLUMNS
        ),
        &[
            &position.id,
            &position.user_id,
            &position.symbol,
            &position.direction.as_str(),
            &position.status.as_str(),
            &position.entry_price(),
            &position.stop_loss(),
            &position.take_profit(),
            &position.size,
            &position.trading_mode.as_str(),
            &position.risk_profile.as_str(),
            &position.created_at,
            &position.opened_at,
            &position.closed_at,
            &position.archived_at,
            &position.close_price,
            &position.pnl,
            &close_reason,
            &rewards,
            &position.signal_id,
            &position.expires_at,
            &position.sentiment,
            &position.confidence,
        ],
    )
    .await?;

    debug!("Inserted position {} for {}", position.id, position.symbol);
    Ok(())
}

/// Guarded UPDATE: only rows still in `expected` status are touched
async fn replace_position_in(
    tx: &Transaction<'_>,
    position: &Position,
    expected: PositionStatus,
) -> Result<(), PortfolioError> {
    let rewards = rewards_json(position)?;
    let close_reason = position.close_reason.map(|reason| reason.as_str());

    let updated = tx
        .execute(
            "UPDATE positions SET status = $3, opened_at = $4, closed_at = $5, \
             archived_at = $6, close_price = $7, pnl = $8, close_reason = $9, rewards = $10 \
             WHERE id = $1 AND status = $2",
            &[
                &position.id,
                &expected.as_str(),
                &position.status.as_str(),
                &position.opened_at,
                &position.closed_at,
                &position.archived_at,
                &position.close_price,
                &position.pnl,
                &close_reason,
                &rewards,
            ],
        )
        .await?;

    if updated == 1 {
        return Ok(());
    }

    let exists = tx
        .query_opt("SELECT 1 FROM positions WHERE id = $1", &[&position.id])
        .await?
        .is_some();
    if exists {
        Err(PortfolioError::Conflict(position.id))
    } else {
        Err(PortfolioError::NotFound(format!("Position {}", position.id)))
    }
}

async fn replace_signal_in(
    tx: &Transaction<'_>,
    signal: &GeneratedSignal,
    expected: SignalStatus,
) -> Result<(), PortfolioError> {
    let updated = tx
        .execute(
            "UPDATE signals SET status = $3, position_id = $4 WHERE id = $1 AND status = $2",
            &[
                &signal.id,
                &expected.as_str(),
                &signal.status.as_str(),
                &signal.position_id,
            ],
        )
        .await?;

    if updated == 1 {
        return Ok(());
    }

    let exists = tx
        .query_opt("SELECT 1 FROM signals WHERE id = $1", &[&signal.id])
        .await?
        .is_some();
    if exists {
        Err(PortfolioError::SignalAlreadyResolved(signal.id))
    } else {
        Err(PortfolioError::NotFound(format!("Signal {}", signal.id)))
    }
}

#[async_trait]
impl PortfolioStore for DatabaseConnection {
    async fn insert_position(&self, position: &Position) -> Result<(), PortfolioError> {
        let mut client = self.pool().get().await?;
        let tx = client.transaction().await?;
        insert_position_in(&tx, position).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn position(&self, id: Uuid) -> Result<Option<Position>, PortfolioError> {
        let client = self.pool().get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM positions WHERE id = $1", POSITION_COLUMNS),
                &[&id],
            )
            .await?;

        row.as_ref().map(Position::from_row).transpose()
    }

    async fn active_positions(&self, user_id: Option<Uuid>) -> Result<Vec<Position>, PortfolioError> {
        let client = self.pool().get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM positions \
                     WHERE status IN ('PENDING', 'OPEN') AND ($1::UUID IS NULL OR user_id = $1) \
                     ORDER BY created_at ASC",
                    POSITION_COLUMNS
                ),
                &[&user_id],
            )
            .await?;

        collect(rows)
    }

    async fn update_position(
        &self,
        position: &Position,
        expected: PositionStatus,
    ) -> Result<(), PortfolioError> {
        let mut client = self.pool().get().await?;
        let tx = client.transaction().await?;
        replace_position_in(&tx, position, expected).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn settle_position(
        &self,
        position: &Position,
        expected: PositionStatus,
    ) -> Result<(), PortfolioError> {
        let mut client = self.pool().get().await?;
        let tx = client.transaction().await?;
        replace_position_in(&tx, position, expected).await?;

        if let Some(rewards) = &position.rewards {
            let credited = tx
                .execute(
                    "UPDATE user_profiles SET \
                     weekly_points = weekly_points + $2, \
                     airdrop_points = airdrop_points + $3, \
                     gas_paid = gas_paid + $4, \
                     blocks_trained = blocks_trained + $5, \
                     updated_at = NOW() \
                     WHERE user_id = $1",
                    &[
                        &position.user_id,
                        &rewards.xp,
                        &rewards.airdrop_points,
                        &rewards.gas_paid,
                        &rewards.blocks_trained,
                    ],
                )
                .await?;
            if credited == 0 {
                debug!("No profile for user {}, rewards not credited", position.user_id);
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn trade_history(&self, user_id: Uuid) -> Result<Vec<Position>, PortfolioError> {
        let client = self.pool().get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM positions WHERE user_id = $1 AND status = 'CLOSED' \
                     ORDER BY closed_at DESC",
                    POSITION_COLUMNS
                ),
                &[&user_id],
            )
            .await?;

        collect(rows)
    }

    async fn insert_signal(&self, signal: &GeneratedSignal) -> Result<(), PortfolioError> {
        let client = self.pool().get().await?;
        let strategy = &signal.strategy;

        client
            .execute(
                &format!(
                    "INSERT INTO signals ({}) VALUES \
                     ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
                    SIGNAL_COLUMNS
                ),
                &[
                    &signal.id,
                    &signal.user_id,
                    &signal.symbol,
                    &strategy.signal.as_str(),
                    &strategy.entry_zone,
                    &strategy.stop_loss,
                    &strategy.take_profit,
                    &strategy.confidence,
                    &strategy.risk_rating,
                    &strategy.sentiment,
                    &strategy.analysis_summary,
                    &strategy.technical_reasoning,
                    &strategy.fundamental_reasoning,
                    &signal.trading_mode.as_str(),
                    &signal.risk_profile.as_str(),
                    &signal.status.as_str(),
                    &signal.position_id,
                    &signal.created_at,
                ],
            )
            .await?;

        Ok(())
    }

    async fn signal(&self, id: Uuid) -> Result<Option<GeneratedSignal>, PortfolioError> {
        let client = self.pool().get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM signals WHERE id = $1", SIGNAL_COLUMNS),
                &[&id],
            )
            .await?;

        row.as_ref().map(GeneratedSignal::from_row).transpose()
    }

    async fn signals(&self, user_id: Uuid) -> Result<Vec<GeneratedSignal>, PortfolioError> {
        let client = self.pool().get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM signals WHERE user_id = $1 ORDER BY created_at DESC",
                    SIGNAL_COLUMNS
                ),
                &[&user_id],
            )
            .await?;

        collect(rows)
    }

    async fn update_signal(
        &self,
        signal: &GeneratedSignal,
        expected: SignalStatus,
    ) -> Result<(), PortfolioError> {
        let mut client = self.pool().get().await?;
        let tx = client.transaction().await?;
        replace_signal_in(&tx, signal, expected).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_execution(
        &self,
        signal: &GeneratedSignal,
        position: &Position,
    ) -> Result<(), PortfolioError> {
        let mut client = self.pool().get().await?;
        let tx = client.transaction().await?;
        replace_signal_in(&tx, signal, SignalStatus::PendingExecution).await?;
        insert_position_in(&tx, position).await?;
        tx.commit().await?;

        debug!("Recorded execution of signal {} as position {}", signal.id, position.id);
        Ok(())
    }

    async fn create_profile(&self, profile: &UserProfile) -> Result<(), PortfolioError> {
        let client = self.pool().get().await?;
        let result = client
            .execute(
                &format!(
                    "INSERT INTO user_profiles ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                    PROFILE_COLUMNS
                ),
                &[
                    &profile.user_id,
                    &profile.email,
                    &profile.password_hash,
                    &profile.wallet_address,
                    &profile.weekly_points,
                    &profile.airdrop_points,
                    &profile.gas_paid,
                    &profile.blocks_trained,
                    &profile.claimed_missions,
                    &profile.created_at,
                    &profile.updated_at,
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                Err(PortfolioError::Conflict(profile.user_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, PortfolioError> {
        let client = self.pool().get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM user_profiles WHERE user_id = $1", PROFILE_COLUMNS),
                &[&user_id],
            )
            .await?;

        row.as_ref().map(UserProfile::from_row).transpose()
    }

    async fn profile_by_email(&self, email: &str) -> Result<Option<UserProfile>, PortfolioError> {
        let client = self.pool().get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM user_profiles WHERE email = $1", PROFILE_COLUMNS),
                &[&email],
            )
            .await?;

        row.as_ref().map(UserProfile::from_row).transpose()
    }
}
