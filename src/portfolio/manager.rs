use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::portfolio::engine::{Transition, evaluate_all};
use crate::portfolio::price_feed::PriceFeed;
use crate::portfolio::stats::PortfolioStats;
use crate::portfolio::store::PortfolioStore;
use crate::portfolio::types::{
    CloseReason, PortfolioError, PortfolioEvent, Position, PositionStatus,
};

/// Result of one polling tick
#[derive(Debug)]
pub enum TickOutcome {
    /// A previous tick was still running
    Skipped,
    Completed(TickReport),
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub evaluated: usize,
    pub priced_symbols: usize,
    pub events: Vec<PortfolioEvent>,
    /// Active positions re-read after transitions, `None` when nothing changed
    pub refreshed: Option<Vec<Position>>,
}

/// Drives the position lifecycle: polls prices, applies transitions,
/// credits rewards and emits notifications.
pub struct PortfolioManager {
    store: Arc<dyn PortfolioStore>,
    feed: Arc<dyn PriceFeed>,
    events: mpsc::UnboundedSender<PortfolioEvent>,
    poll_interval: Duration,
    tick_guard: Mutex<()>,
    is_running: RwLock<bool>,
}

impl PortfolioManager {
    pub fn new(
        store: Arc<dyn PortfolioStore>,
        feed: Arc<dyn PriceFeed>,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PortfolioEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let manager = Self {
            store,
            feed,
            events,
            poll_interval,
            tick_guard: Mutex::new(()),
            is_running: RwLock::new(false),
        };
        (manager, receiver)
    }

    /// Run the polling loop until [`stop`](Self::stop) is called
    pub async fn start(&self) -> Result<(), PortfolioError> {
        {
            let mut is_running = self.is_running.write().await;
            if *is_running {
                return Ok(());
            }
            *is_running = true;
        }

        info!("Starting portfolio manager, polling every {:?}", self.poll_interval);

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while *self.is_running.read().await {
            ticker.tick().await;
            if !*self.is_running.read().await {
                break;
            }
            match self.tick().await {
                Ok(TickOutcome::Skipped) => debug!("Previous tick still running, skipping"),
                Ok(TickOutcome::Completed(report)) => {
                    if !report.events.is_empty() {
                        info!(
                            "Tick applied {} transitions over {} positions",
                            report.events.len(),
                            report.evaluated
                        );
                    }
                }
                Err(e) => error!("Portfolio tick failed: {}", e),
            }
        }

        info!("Portfolio manager stopped");
        Ok(())
    }

    pub async fn stop(&self) {
        let mut is_running = self.is_running.write().await;
        *is_running = false;
        info!("Portfolio manager stop signal sent");
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// One evaluation pass over every active position
    pub async fn tick(&self) -> Result<TickOutcome, PortfolioError> {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            return Ok(TickOutcome::Skipped);
        };
        let started = Instant::now();

        let positions = self.store.active_positions(None).await?;
        if positions.is_empty() {
            return Ok(TickOutcome::Completed(TickReport::default()));
        }

        let symbols: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
        let prices = self.feed.fetch_prices(&symbols).await;

        let now = Utc::now();
        let mut report = TickReport {
            evaluated: positions.len(),
            priced_symbols: prices.len(),
            ..TickReport::default()
        };

        let by_id: HashMap<Uuid, &Position> = positions.iter().map(|p| (p.id, p)).collect();
        for (id, transition) in evaluate_all(&positions, &prices, now) {
            let Some(position) = by_id.get(&id) else {
                continue;
            };
            let mut position = (*position).clone();
            match self.commit(&mut position, transition, now).await {
                Ok(event) => report.events.push(event),
                Err(PortfolioError::Conflict(id)) => {
                    debug!("Position {} changed during tick, retrying next tick", id);
                }
                Err(e) => warn!("Failed to apply {:?} to position {}: {}", transition, id, e),
            }
        }

        if !report.events.is_empty() {
            report.refreshed = Some(self.store.active_positions(None).await?);
        }

        debug!(
            "Tick evaluated {} positions ({} priced symbols) in {:?}",
            report.evaluated,
            report.priced_symbols,
            started.elapsed()
        );
        Ok(TickOutcome::Completed(report))
    }

    /// Apply a transition, persist it and emit the event.
    ///
    /// A close is settled together with the reward credit, so a failed write
    /// leaves the position active and the profile untouched for the next tick.
    async fn commit(
        &self,
        position: &mut Position,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<PortfolioEvent, PortfolioError> {
        let expected = transition.expected_status(position);
        let mut updated = position.clone();
        let event = transition.apply(&mut updated, now)?;

        if updated.status == PositionStatus::Closed {
            self.store.settle_position(&updated, expected).await?;
        } else {
            self.store.update_position(&updated, expected).await?;
        }
        *position = updated;

        debug!("Position {}: {}", position.id, event.message());
        if let Err(e) = self.events.send(event.clone()) {
            warn!("Failed to publish portfolio event: {}", e);
        }
        Ok(event)
    }

    /// Close a position on user request.
    ///
    /// Uses `price` when given, otherwise the live price of the symbol.
    pub async fn close_position(
        &self,
        user_id: Uuid,
        position_id: Uuid,
        price: Option<f64>,
    ) -> Result<Position, PortfolioError> {
        let mut position = self
            .store
            .position(position_id)
            .await?
            .filter(|p| p.user_id == user_id)
            .ok_or_else(|| PortfolioError::NotFound(format!("Position {}", position_id)))?;

        if !position.status.is_active() {
            return Err(PortfolioError::InvalidTransition {
                id: position.id,
                from: position.status,
                to: PositionStatus::Closed,
            });
        }

        let price = match (price, position.status) {
            (Some(price), _) => price,
            (None, PositionStatus::Pending) => position.entry_price(),
            (None, _) => self.feed.ticker(&position.symbol).await?.last_price,
        };

        let transition = Transition::Close { reason: CloseReason::Manual, price };
        self.commit(&mut position, transition, Utc::now()).await?;
        Ok(position)
    }

    pub async fn active_positions(&self, user_id: Uuid) -> Result<Vec<Position>, PortfolioError> {
        self.store.active_positions(Some(user_id)).await
    }

    pub async fn history(&self, user_id: Uuid) -> Result<Vec<Position>, PortfolioError> {
        self.store.trade_history(user_id).await
    }

    pub async fn stats(&self, user_id: Uuid) -> Result<PortfolioStats, PortfolioError> {
        let history = self.store.trade_history(user_id).await?;
        let active = self.store.active_positions(Some(user_id)).await?;
        Ok(PortfolioStats::compute(&history, &active))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::portfolio::price_feed::fixtures::StaticPriceFeed;
    use crate::portfolio::store::MemoryStore;
    use crate::portfolio::types::fixtures::new_position;
    use crate::portfolio::types::{
        Direction, GeneratedSignal, RiskProfile, SignalStatus, TradingMode, UserProfile,
    };

    /// Memory store whose settlement can be switched to fail
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_settle: AtomicBool,
    }

    #[async_trait]
    impl PortfolioStore for FlakyStore {
        async fn insert_position(&self, position: &Position) -> Result<(), PortfolioError> {
            self.inner.insert_position(position).await
        }

        async fn position(&self, id: Uuid) -> Result<Option<Position>, PortfolioError> {
            self.inner.position(id).await
        }

        async fn active_positions(&self, user_id: Option<Uuid>) -> Result<Vec<Position>, PortfolioError> {
            self.inner.active_positions(user_id).await
        }

        async fn update_position(
            &self,
            position: &Position,
            expected: PositionStatus,
        ) -> Result<(), PortfolioError> {
            self.inner.update_position(position, expected).await
        }

        async fn settle_position(
            &self,
            position: &Position,
            expected: PositionStatus,
        ) -> Result<(), PortfolioError> {
            if self.fail_settle.load(Ordering::SeqCst) {
                return Err(PortfolioError::Storage("connection reset".to_string()));
            }
            self.inner.settle_position(position, expected).await
        }

        async fn trade_history(&self, user_id: Uuid) -> Result<Vec<Position>, PortfolioError> {
            self.inner.trade_history(user_id).await
        }

        async fn insert_signal(&self, signal: &GeneratedSignal) -> Result<(), PortfolioError> {
            self.inner.insert_signal(signal).await
        }

        async fn signal(&self, id: Uuid) -> Result<Option<GeneratedSignal>, PortfolioError> {
            self.inner.signal(id).await
        }

        async fn signals(&self, user_id: Uuid) -> Result<Vec<GeneratedSignal>, PortfolioError> {
            self.inner.signals(user_id).await
        }

        async fn update_signal(
            &self,
            signal: &GeneratedSignal,
            expected: SignalStatus,
        ) -> Result<(), PortfolioError> {
            self.inner.update_signal(signal, expected).await
        }

        async fn record_execution(
            &self,
            signal: &GeneratedSignal,
            position: &Position,
        ) -> Result<(), PortfolioError> {
            self.inner.record_execution(signal, position).await
        }

        async fn create_profile(&self, profile: &UserProfile) -> Result<(), PortfolioError> {
            self.inner.create_profile(profile).await
        }

        async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, PortfolioError> {
            self.inner.profile(user_id).await
        }

        async fn profile_by_email(&self, email: &str) -> Result<Option<UserProfile>, PortfolioError> {
            self.inner.profile_by_email(email).await
        }
    }

    struct Harness {
        manager: PortfolioManager,
        events: mpsc::UnboundedReceiver<PortfolioEvent>,
        store: Arc<MemoryStore>,
        feed: Arc<StaticPriceFeed>,
        user_id: Uuid,
    }

    async fn harness(prices: &[(&str, f64)]) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let feed = Arc::new(StaticPriceFeed::with(prices));
        let profile = UserProfile::new("trader@example.com".to_string(), "x".to_string(), Utc::now());
        store.create_profile(&profile).await.unwrap();

        let (manager, events) = PortfolioManager::new(
            store.clone(),
            feed.clone(),
            Duration::from_millis(10),
        );
        Harness { manager, events, store, feed, user_id: profile.user_id }
    }

    async fn insert(h: &Harness, mut position: Position) -> Position {
        position.user_id = h.user_id;
        h.store.insert_position(&position).await.unwrap();
        position
    }

    fn completed(outcome: TickOutcome) -> TickReport {
        match outcome {
            TickOutcome::Completed(report) => report,
            TickOutcome::Skipped => panic!("tick unexpectedly skipped"),
        }
    }

    #[tokio::test]
    async fn test_pending_fills_then_take_profit_credits_profile() {
        let mut h = harness(&[("BTCUSDT", 100.5)]).await;
        let mut params = new_position(Direction::Buy, 100.0, 95.0, 110.0);
        params.trading_mode = TradingMode::Swing;
        params.risk_profile = RiskProfile::High;
        params.size = 5.0;
        let position = insert(&h, Position::pending(params, Utc::now())).await;

        let report = completed(h.manager.tick().await.unwrap());
        assert!(report.events.is_empty());
        assert!(report.refreshed.is_none());

        h.feed.set("BTCUSDT", 99.9);
        let report = completed(h.manager.tick().await.unwrap());
        assert!(matches!(report.events[0], PortfolioEvent::Filled { .. }));
        let refreshed = report.refreshed.unwrap();
        assert_eq!(refreshed[0].status, PositionStatus::Open);

        h.feed.set("BTCUSDT", 110.0);
        let report = completed(h.manager.tick().await.unwrap());
        match &report.events[0] {
            PortfolioEvent::Closed { reason, pnl, rewards, .. } => {
                assert_eq!(*reason, CloseReason::TakeProfit);
                assert_eq!(*pnl, 50.0);
                assert_eq!(rewards.xp, 98);
                assert_eq!(rewards.airdrop_points, 99);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(report.refreshed.unwrap().len(), 0);

        let stored = h.store.position(position.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Closed);
        assert_eq!(stored.close_price, Some(110.0));

        let profile = h.store.profile(h.user_id).await.unwrap().unwrap();
        assert_eq!(profile.weekly_points, 98);
        assert_eq!(profile.airdrop_points, 99);

        let mut received = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            received.push(event);
        }
        assert_eq!(received.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_price_leaves_positions_for_next_tick() {
        let h = harness(&[]).await;
        let position = insert(
            &h,
            Position::open_now(new_position(Direction::Sell, 100.0, 105.0, 90.0), Utc::now()),
        )
        .await;

        let report = completed(h.manager.tick().await.unwrap());
        assert_eq!(report.priced_symbols, 0);
        assert!(report.events.is_empty());

        h.feed.set("BTCUSDT", 105.0);
        let report = completed(h.manager.tick().await.unwrap());
        assert_eq!(report.events.len(), 1);
        let stored = h.store.position(position.id).await.unwrap().unwrap();
        assert_eq!(stored.pnl, Some(-5.0));
        assert_eq!(stored.close_reason, Some(CloseReason::StopLoss));
    }

    #[tokio::test]
    async fn test_expired_pending_is_archived_without_price() {
        let h = harness(&[]).await;
        let mut params = new_position(Direction::Buy, 100.0, 95.0, 110.0);
        params.expires_at = Some(Utc::now() - ChronoDuration::minutes(5));
        let position = insert(&h, Position::pending(params, Utc::now())).await;

        let report = completed(h.manager.tick().await.unwrap());
        assert!(matches!(report.events[0], PortfolioEvent::Expired { .. }));

        let stored = h.store.position(position.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Archived);
        assert!(h.manager.active_positions(h.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let h = harness(&[]).await;
        let _guard = h.manager.tick_guard.lock().await;

        assert!(matches!(h.manager.tick().await.unwrap(), TickOutcome::Skipped));
    }

    #[tokio::test]
    async fn test_manual_close_uses_live_price() {
        let h = harness(&[("BTCUSDT", 104.0)]).await;
        let position = insert(
            &h,
            Position::open_now(new_position(Direction::Buy, 100.0, 95.0, 110.0), Utc::now()),
        )
        .await;

        let closed = h.manager.close_position(h.user_id, position.id, None).await.unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.pnl, Some(4.0));
        assert_eq!(closed.close_reason.map(|r| r.label()), Some("Position Closed Manually"));

        let err = h.manager.close_position(h.user_id, position.id, None).await.unwrap_err();
        assert!(matches!(err, PortfolioError::InvalidTransition { .. }));

        let stats = h.manager.stats(h.user_id).await.unwrap();
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.total_pnl, 4.0);
    }

    #[tokio::test]
    async fn test_manual_close_of_pending_order() {
        let h = harness(&[]).await;
        let position = insert(
            &h,
            Position::pending(new_position(Direction::Buy, 100.0, 95.0, 110.0), Utc::now()),
        )
        .await;

        let closed = h.manager.close_position(h.user_id, position.id, None).await.unwrap();
        assert_eq!(closed.pnl, Some(0.0));
        assert_eq!(closed.rewards.map(|r| r.xp), Some(0));
    }

    #[tokio::test]
    async fn test_manual_close_rejects_other_users() {
        let h = harness(&[("BTCUSDT", 104.0)]).await;
        let position = insert(
            &h,
            Position::open_now(new_position(Direction::Buy, 100.0, 95.0, 110.0), Utc::now()),
        )
        .await;

        let err = h.manager.close_position(Uuid::new_v4(), position.id, None).await.unwrap_err();
        assert!(matches!(err, PortfolioError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_manual_close_wins_race_against_stale_tick() {
        let h = harness(&[("BTCUSDT", 111.0)]).await;
        let position = insert(
            &h,
            Position::open_now(new_position(Direction::Buy, 100.0, 95.0, 110.0), Utc::now()),
        )
        .await;
        let stale = position.clone();

        h.manager.close_position(h.user_id, position.id, Some(103.0)).await.unwrap();

        let mut copy = stale;
        let transition = Transition::Close { reason: CloseReason::TakeProfit, price: 111.0 };
        let err = h.manager.commit(&mut copy, transition, Utc::now()).await.unwrap_err();
        assert!(matches!(err, PortfolioError::Conflict(_)));

        let stored = h.store.position(position.id).await.unwrap().unwrap();
        assert_eq!(stored.close_price, Some(103.0));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let h = harness(&[]).await;
        let manager = Arc::new(h.manager);
        let runner = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.start().await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(manager.is_running().await);
        manager.stop().await;

        let joined = tokio::time::timeout(Duration::from_secs(1), runner).await;
        assert!(joined.is_ok());
        assert!(!manager.is_running().await);
    }

    #[tokio::test]
    async fn test_failed_settlement_keeps_position_open_and_profile_uncredited() {
        let store = Arc::new(FlakyStore::default());
        let feed = Arc::new(StaticPriceFeed::with(&[("BTCUSDT", 110.0)]));
        let profile = UserProfile::new("flaky@example.com".to_string(), "x".to_string(), Utc::now());
        store.create_profile(&profile).await.unwrap();
        let (manager, mut events) = PortfolioManager::new(store.clone(), feed, Duration::from_millis(10));

        let mut params = new_position(Direction::Buy, 100.0, 95.0, 110.0);
        params.user_id = profile.user_id;
        let position = Position::open_now(params, Utc::now());
        store.insert_position(&position).await.unwrap();

        store.fail_settle.store(true, Ordering::SeqCst);
        let report = completed(manager.tick().await.unwrap());
        assert!(report.events.is_empty());
        assert!(events.try_recv().is_err());
        let stored = store.position(position.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Open);
        assert_eq!(store.profile(profile.user_id).await.unwrap().unwrap().weekly_points, 0);

        store.fail_settle.store(false, Ordering::SeqCst);
        let report = completed(manager.tick().await.unwrap());
        assert_eq!(report.events.len(), 1);
        assert!(events.try_recv().is_ok());
        let closed = store.position(position.id).await.unwrap().unwrap();
        let credited = store.profile(profile.user_id).await.unwrap().unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(credited.weekly_points, closed.rewards.unwrap().xp);
        assert!(credited.weekly_points > 0);
    }

    #[tokio::test]
    async fn test_pending_sell_waits_while_price_is_missing() {
        let h = harness(&[("BTCUSDT", 101.0)]).await;
        let position = insert(
            &h,
            Position::pending(new_position(Direction::Sell, 100.0, 105.0, 90.0), Utc::now()),
        )
        .await;

        h.feed.remove("BTCUSDT");
        let report = completed(h.manager.tick().await.unwrap());
        assert!(report.events.is_empty());
        let stored = h.store.position(position.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Pending);

        h.feed.set("BTCUSDT", 100.2);
        let report = completed(h.manager.tick().await.unwrap());
        assert!(matches!(report.events[0], PortfolioEvent::Filled { .. }));
    }
}
