use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::portfolio::types::{
    GeneratedSignal, PortfolioError, Position, PositionStatus, SignalStatus, UserProfile,
};

/// Per-user persistence for positions, signals and profiles
#[async_trait]
pub trait PortfolioStore: Send + Sync {
    async fn insert_position(&self, position: &Position) -> Result<(), PortfolioError>;

    async fn position(&self, id: Uuid) -> Result<Option<Position>, PortfolioError>;

    /// PENDING and OPEN positions, for one user or for everyone
    async fn active_positions(&self, user_id: Option<Uuid>) -> Result<Vec<Position>, PortfolioError>;

    /// Persist `position` only if the stored copy is still in `expected`
    /// status. Returns [`PortfolioError::Conflict`] otherwise.
    async fn update_position(
        &self,
        position: &Position,
        expected: PositionStatus,
    ) -> Result<(), PortfolioError>;

    /// Persist a closed position and credit its rewards to the owner's
    /// profile in one step. Same status guard as [`update_position`](Self::update_position).
    async fn settle_position(
        &self,
        position: &Position,
        expected: PositionStatus,
    ) -> Result<(), PortfolioError>;

    /// CLOSED positions of a user, newest close first
    async fn trade_history(&self, user_id: Uuid) -> Result<Vec<Position>, PortfolioError>;

    async fn insert_signal(&self, signal: &GeneratedSignal) -> Result<(), PortfolioError>;

    async fn signal(&self, id: Uuid) -> Result<Option<GeneratedSignal>, PortfolioError>;

    /// Signals of a user, newest first
    async fn signals(&self, user_id: Uuid) -> Result<Vec<GeneratedSignal>, PortfolioError>;

    /// Persist `signal` only if the stored copy is still in `expected`
    /// status. Returns [`PortfolioError::SignalAlreadyResolved`] otherwise.
    async fn update_signal(
        &self,
        signal: &GeneratedSignal,
        expected: SignalStatus,
    ) -> Result<(), PortfolioError>;

    /// Mark an executed signal and insert its position in one step.
    ///
    /// Fails with [`PortfolioError::SignalAlreadyResolved`] when the stored
    /// signal is no longer pending, so a signal yields at most one position.
    async fn record_execution(
        &self,
        signal: &GeneratedSignal,
        position: &Position,
    ) -> Result<(), PortfolioError>;

    async fn create_profile(&self, profile: &UserProfile) -> Result<(), PortfolioError>;

    async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, PortfolioError>;

    async fn profile_by_email(&self, email: &str) -> Result<Option<UserProfile>, PortfolioError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Snapshot {
    positions: HashMap<Uuid, Position>,
    signals: HashMap<Uuid, GeneratedSignal>,
    profiles: HashMap<Uuid, UserProfile>,
}

impl Snapshot {
    fn replace_position(&mut self, position: &Position, expected: PositionStatus) -> Result<(), PortfolioError> {
        let stored = self
            .positions
            .get_mut(&position.id)
            .ok_or_else(|| PortfolioError::NotFound(format!("Position {}", position.id)))?;
        if stored.status != expected {
            return Err(PortfolioError::Conflict(position.id));
        }
        *stored = position.clone();
        Ok(())
    }

    fn pending_signal(&mut self, id: Uuid, expected: SignalStatus) -> Result<&mut GeneratedSignal, PortfolioError> {
        let stored = self
            .signals
            .get_mut(&id)
            .ok_or_else(|| PortfolioError::NotFound(format!("Signal {}", id)))?;
        if stored.status != expected {
            return Err(PortfolioError::SignalAlreadyResolved(id));
        }
        Ok(stored)
    }
}

/// In-memory store with an optional JSON snapshot on disk.
///
/// The snapshot is rewritten after every mutation and reloaded on startup.
/// A failed write is logged and retried with the next mutation; memory stays
/// the source of truth.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<Snapshot>,
    snapshot_path: Option<PathBuf>,
    snapshot_writer: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load state from `path` if it exists and keep it in sync afterwards
    pub async fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self, PortfolioError> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                info!(
                    "📂 Loaded portfolio snapshot from {} ({} positions, {} signals)",
                    path.display(),
                    snapshot.positions.len(),
                    snapshot.signals.len()
                );
                snapshot
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => {
                return Err(PortfolioError::Storage(format!(
                    "Failed to read snapshot {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
            snapshot_writer: Mutex::new(()),
        })
    }

    async fn persist(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        // State is read under the writer lock so snapshots land in mutation order
        let _writer = self.snapshot_writer.lock().await;
        let bytes = {
            let state = self.state.read();
            serde_json::to_vec_pretty(&*state)
        };

        let result = match bytes {
            Ok(bytes) => write_snapshot(path, bytes).await,
            Err(e) => Err(std::io::Error::other(e)),
        };
        match result {
            Ok(()) => debug!("Snapshot written to {}", path.display()),
            Err(e) => warn!("Failed to write snapshot {}: {}", path.display(), e),
        }
    }
}

/// Write to a sibling temp file, then rename over the snapshot
async fn write_snapshot(path: &Path, bytes: Vec<u8>) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl PortfolioStore for MemoryStore {
    async fn insert_position(&self, position: &Position) -> Result<(), PortfolioError> {
        self.state.write().positions.insert(position.id, position.clone());
        self.persist().await;
        Ok(())
    }

    async fn position(&self, id: Uuid) -> Result<Option<Position>, PortfolioError> {
        Ok(self.state.read().positions.get(&id).cloned())
    }

    async fn active_positions(&self, user_id: Option<Uuid>) -> Result<Vec<Position>, PortfolioError> {
        let state = self.state.read();
        let mut positions: Vec<Position> = state
            .positions
            .values()
            .filter(|p| p.status.is_active())
            .filter(|p| user_id.is_none_or(|user_id| p.user_id == user_id))
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.created_at);
        Ok(positions)
    }

    async fn update_position(
        &self,
        position: &Position,
        expected: PositionStatus,
    ) -> Result<(), PortfolioError> {
        self.state.write().replace_position(position, expected)?;
        self.persist().await;
        Ok(())
    }

    async fn settle_position(
        &self,
        position: &Position,
        expected: PositionStatus,
    ) -> Result<(), PortfolioError> {
        {
            let mut state = self.state.write();
            state.replace_position(position, expected)?;
            match (position.rewards, state.profiles.get_mut(&position.user_id)) {
                (Some(rewards), Some(profile)) => profile.credit(&rewards, Utc::now()),
                (_, None) => debug!("No profile for user {}, rewards not credited", position.user_id),
                (None, _) => {}
            }
        }
        self.persist().await;
        Ok(())
    }

    async fn trade_history(&self, user_id: Uuid) -> Result<Vec<Position>, PortfolioError> {
        let state = self.state.read();
        let mut history: Vec<Position> = state
            .positions
            .values()
            .filter(|p| p.user_id == user_id && p.status == PositionStatus::Closed)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
        Ok(history)
    }

    async fn insert_signal(&self, signal: &GeneratedSignal) -> Result<(), PortfolioError> {
        self.state.write().signals.insert(signal.id, signal.clone());
        self.persist().await;
        Ok(())
    }

    async fn signal(&self, id: Uuid) -> Result<Option<GeneratedSignal>, PortfolioError> {
        Ok(self.state.read().signals.get(&id).cloned())
    }

    async fn signals(&self, user_id: Uuid) -> Result<Vec<GeneratedSignal>, PortfolioError> {
        let state = self.state.read();
        let mut signals: Vec<GeneratedSignal> = state
            .signals
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        signals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(signals)
    }

    async fn update_signal(
        &self,
        signal: &GeneratedSignal,
        expected: SignalStatus,
    ) -> Result<(), PortfolioError> {
        {
            let mut state = self.state.write();
            let stored = state.pending_signal(signal.id, expected)?;
            *stored = signal.clone();
        }
        self.persist().await;
        Ok(())
    }

    async fn record_execution(
        &self,
        signal: &GeneratedSignal,
        position: &Position,
    ) -> Result<(), PortfolioError> {
        {
            let mut state = self.state.write();
            let stored = state.pending_signal(signal.id, SignalStatus::PendingExecution)?;
            *stored = signal.clone();
            state.positions.insert(position.id, position.clone());
        }
        self.persist().await;
        Ok(())
    }

    async fn create_profile(&self, profile: &UserProfile) -> Result<(), PortfolioError> {
        {
            let mut state = self.state.write();
            if state.profiles.values().any(|p| p.email == profile.email) {
                return Err(PortfolioError::Conflict(profile.user_id));
            }
            state.profiles.insert(profile.user_id, profile.clone());
        }
        self.persist().await;
        Ok(())
    }

    async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, PortfolioError> {
        Ok(self.state.read().profiles.get(&user_id).cloned())
    }

    async fn profile_by_email(&self, email: &str) -> Result<Option<UserProfile>, PortfolioError> {
        Ok(self
            .state
            .read()
            .profiles
            .values()
            .find(|p| p.email == email)
            .cloned())
    }
}
