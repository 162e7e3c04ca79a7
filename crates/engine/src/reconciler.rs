//! Reconciliation of locally tracked positions against broker truth.
//!
//! The remote positions list is eventually consistent, so a single absence
//! means nothing. Each tracked deal id carries a miss counter: absence
//! increments it, presence resets it, and only when the counter reaches
//! the threshold does a direct single-position lookup decide. A confirmed
//! disappearance recovers the realized PnL from the activity history and
//! books it; a stale list is never grounds for destructive local action.

use goldbot_core::state::RuntimeState;
use goldbot_core::traits::BrokerApi;
use goldbot_core::types::Position;
use goldbot_data::{PersistEvent, PersistHandle, TradeClose};
use goldbot_notify::Notifier;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cross-checks tracked positions against the platform.
pub struct Reconciler<B> {
    threshold: u32,
    state: Arc<RuntimeState>,
    broker: Arc<B>,
    persist: PersistHandle,
    notifier: Notifier,
    misses: Mutex<HashMap<String, u32>>,
}

impl<B: BrokerApi> Reconciler<B> {
    #[must_use]
    pub fn new(
        threshold: u32,
        state: Arc<RuntimeState>,
        broker: Arc<B>,
        persist: PersistHandle,
        notifier: Notifier,
    ) -> Self {
        Self {
            threshold,
            state,
            broker,
            persist,
            notifier,
            misses: Mutex::new(HashMap::new()),
        }
    }

    /// One reconcile cycle. Transient list failures skip the cycle without
    /// touching any counter.
    pub async fn run_cycle(&self, now_ms: i64) {
        let tracked = self.state.positions();

        // Garbage-collect counters for deals we no longer track.
        {
            let tracked_ids: HashSet<&str> =
                tracked.iter().map(|p| p.deal_id.as_str()).collect();
            self.misses
                .lock()
                .retain(|deal_id, _| tracked_ids.contains(deal_id.as_str()));
        }

        if tracked.is_empty() {
            return;
        }

        let remote_ids: HashSet<String> = match self.broker.list_positions().await {
            Ok(positions) => positions.into_iter().map(|p| p.deal_id).collect(),
            Err(e) => {
                warn!(error = %e, "Positions list fetch failed, skipping cycle");
                return;
            }
        };

        for pos in tracked {
            if remote_ids.contains(&pos.deal_id) {
                self.misses.lock().insert(pos.deal_id.clone(), 0);
                continue;
            }

            let miss_count = {
                let mut misses = self.misses.lock();
                let count = misses.entry(pos.deal_id.clone()).or_insert(0);
                *count += 1;
                *count
            };
            debug!(deal_id = %pos.deal_id, miss_count, "Tracked position absent from list");

            if miss_count < self.threshold {
                continue;
            }

            // At the threshold: only a direct lookup may decide.
            match self.broker.get_position(&pos.deal_id).await {
                Ok(Some(_)) => {
                    debug!(deal_id = %pos.deal_id, "Direct fetch found position; list was stale");
                    self.misses.lock().insert(pos.deal_id.clone(), 0);
                }
                Ok(None) => self.handle_broker_closed(&pos, now_ms).await,
                Err(e) => {
                    // Inconclusive: keep the counter where it is and retry
                    // next cycle.
                    warn!(error = %e, deal_id = %pos.deal_id, "Direct fetch failed");
                }
            }
        }
    }

    /// The platform confirmed the deal no longer exists: drop it locally
    /// and recover the realized PnL from the activity history.
    async fn handle_broker_closed(&self, pos: &Position, now_ms: i64) {
        info!(deal_id = %pos.deal_id, "Position closed on platform side");
        self.state.remove_position(&pos.deal_id);
        self.misses.lock().remove(&pos.deal_id);

        let pnl = match self.broker.activity_since(pos.opened_at).await {
            Ok(events) => events
                .iter()
                .find(|e| e.deal_id == pos.deal_id && e.closed && e.ts >= pos.opened_at)
                .and_then(|e| e.profit),
            Err(e) => {
                warn!(error = %e, "Activity lookup failed during recovery");
                None
            }
        };

        if let Some(pnl) = pnl {
            self.state.update_pnl(pnl);
        } else {
            warn!(deal_id = %pos.deal_id, "No recoverable PnL in activity history");
        }

        self.persist.record(PersistEvent::TradeClosed(TradeClose {
            deal_id: pos.deal_id.clone(),
            ts: now_ms,
            reason: "BROKER_CLOSE".into(),
            pnl,
        }));
        self.notifier.send(match pnl {
            Some(pnl) => format!("BROKER_CLOSE {} | pnl {pnl:+.2}", pos.deal_id),
            None => format!("BROKER_CLOSE {} | pnl unknown", pos.deal_id),
        });
    }

    /// Current miss count for a deal id (tests and status reporting).
    #[must_use]
    pub fn miss_count(&self, deal_id: &str) -> u32 {
        self.misses.lock().get(deal_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::StubBroker;
    use goldbot_core::config::TradingConfig;
    use goldbot_core::types::{ActivityEvent, BrokerPosition, Direction, TradeMode};

    fn position(deal_id: &str) -> Position {
        Position {
            mode: TradeMode::Scalp,
            direction: Direction::Buy,
            size: 1.0,
            entry: 2010.0,
            sl: 2008.0,
            tp1: 2012.0,
            tp2: 2014.0,
            tp1_done: false,
            deal_id: deal_id.into(),
            deal_reference: format!("ref-{deal_id}"),
            opened_at: 1_000,
        }
    }

    fn broker_position(deal_id: &str) -> BrokerPosition {
        BrokerPosition {
            deal_id: deal_id.into(),
            direction: Direction::Buy,
            size: 1.0,
            level: Some(2010.0),
            stop_level: Some(2008.0),
            limit_level: Some(2014.0),
            created_at: Some(1_000),
        }
    }

    fn reconciler(
        broker: Arc<StubBroker>,
        state: Arc<RuntimeState>,
    ) -> Reconciler<StubBroker> {
        Reconciler::new(
            3,
            state,
            broker,
            PersistHandle::disabled(),
            Notifier::disabled(),
        )
    }

    // ==================== False Miss Tests ====================

    #[tokio::test]
    async fn transient_absence_never_removes() {
        let broker = Arc::new(StubBroker::default());
        let state = Arc::new(RuntimeState::new(TradingConfig::default()));
        state.adopt_position(position("D1"));
        let rec = reconciler(Arc::clone(&broker), Arc::clone(&state));

        // Absent twice: tolerated.
        rec.run_cycle(10_000).await;
        rec.run_cycle(11_000).await;
        assert_eq!(rec.miss_count("D1"), 2);
        assert_eq!(state.positions().len(), 1);

        // Present on the third cycle: counter resets.
        broker.listed.lock().push(broker_position("D1"));
        rec.run_cycle(12_000).await;
        assert_eq!(rec.miss_count("D1"), 0);
        assert_eq!(state.positions().len(), 1);
    }

    #[tokio::test]
    async fn stale_list_with_live_direct_fetch_resets() {
        let broker = Arc::new(StubBroker::default());
        // Direct lookup keeps finding the deal even though the list is empty.
        broker
            .direct
            .lock()
            .insert("D1".into(), broker_position("D1"));
        let state = Arc::new(RuntimeState::new(TradingConfig::default()));
        state.adopt_position(position("D1"));
        let rec = reconciler(Arc::clone(&broker), Arc::clone(&state));

        for i in 0..3 {
            rec.run_cycle(10_000 + i).await;
        }
        assert_eq!(rec.miss_count("D1"), 0);
        assert_eq!(state.positions().len(), 1);
    }

    // ==================== Broker-Closed Recovery Tests ====================

    #[tokio::test]
    async fn confirmed_disappearance_recovers_pnl_from_activity() {
        let broker = Arc::new(StubBroker::default());
        broker.activity.lock().push(ActivityEvent {
            deal_id: "D2".into(),
            ts: 5_000,
            kind: "POSITION".into(),
            closed: true,
            profit: Some(-3.2),
        });
        let state = Arc::new(RuntimeState::new(TradingConfig::default()));
        state.adopt_position(position("D2"));
        let rec = reconciler(Arc::clone(&broker), Arc::clone(&state));

        // Three consecutive misses; direct fetch returns 404.
        for i in 0..3 {
            rec.run_cycle(10_000 + i).await;
        }

        assert!(state.positions().is_empty());
        let counters = state.snapshot().counters;
        assert!((counters.realized_pnl + 3.2).abs() < 1e-9);
        assert_eq!(counters.consecutive_losses, 1);
    }

    #[tokio::test]
    async fn unrecoverable_pnl_removes_without_booking() {
        let broker = Arc::new(StubBroker::default());
        let state = Arc::new(RuntimeState::new(TradingConfig::default()));
        state.adopt_position(position("D3"));
        let rec = reconciler(Arc::clone(&broker), Arc::clone(&state));

        for i in 0..3 {
            rec.run_cycle(10_000 + i).await;
        }

        assert!(state.positions().is_empty());
        assert_eq!(state.snapshot().counters.realized_pnl, 0.0);
        assert_eq!(state.snapshot().counters.consecutive_losses, 0);
    }

    // ==================== Idempotency / Hygiene Tests ====================

    #[tokio::test]
    async fn repeated_cycles_with_stable_remote_are_idempotent() {
        let broker = Arc::new(StubBroker::default());
        broker.listed.lock().push(broker_position("D1"));
        let state = Arc::new(RuntimeState::new(TradingConfig::default()));
        state.adopt_position(position("D1"));
        let rec = reconciler(Arc::clone(&broker), Arc::clone(&state));

        for i in 0..10 {
            rec.run_cycle(10_000 + i).await;
        }
        assert_eq!(rec.miss_count("D1"), 0);
        assert_eq!(state.positions().len(), 1);
        assert_eq!(state.snapshot().counters.realized_pnl, 0.0);
    }

    #[tokio::test]
    async fn list_failure_skips_cycle_without_counting() {
        let broker = Arc::new(StubBroker { fail_list: true, ..StubBroker::default() });
        let state = Arc::new(RuntimeState::new(TradingConfig::default()));
        state.adopt_position(position("D1"));
        let rec = reconciler(Arc::clone(&broker), Arc::clone(&state));

        for i in 0..5 {
            rec.run_cycle(10_000 + i).await;
        }
        assert_eq!(rec.miss_count("D1"), 0);
        assert_eq!(state.positions().len(), 1);
    }

    #[tokio::test]
    async fn counters_for_untracked_deals_are_collected() {
        let broker = Arc::new(StubBroker::default());
        let state = Arc::new(RuntimeState::new(TradingConfig::default()));
        state.adopt_position(position("D1"));
        let rec = reconciler(Arc::clone(&broker), Arc::clone(&state));

        rec.run_cycle(10_000).await;
        assert_eq!(rec.miss_count("D1"), 1);

        // The deal is removed out-of-band (e.g. by the manager).
        state.remove_position("D1");
        rec.run_cycle(11_000).await;
        assert_eq!(rec.miss_count("D1"), 0);
    }
}
