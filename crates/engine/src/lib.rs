//! The GoldBot runtime: candle store, position manager, reconciler, and
//! the scheduler that drives them.
//!
//! [`Engine::bootstrap`] performs the startup sequence (daily reset with
//! live equity, candle history, adoption of pre-existing platform
//! positions); [`Engine::spawn_jobs`] starts the polling loops. Shutdown
//! is cooperative through one shared stop flag.

pub mod candles;
pub mod manager;
pub mod reconciler;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testsupport;

use anyhow::{Context, Result};
use candles::CandleStore;
use chrono::Utc;
use goldbot_core::config::AppConfig;
use goldbot_core::state::RuntimeState;
use goldbot_core::traits::BrokerApi;
use goldbot_core::types::{Position, Timeframe, TradeMode};
use goldbot_data::{PersistEvent, PersistHandle, QuoteRecord};
use goldbot_ml::MlGate;
use goldbot_notify::Notifier;
use goldbot_strategy::{MarketView, StrategyEngine};
use manager::PositionManager;
use reconciler::Reconciler;
use scheduler::{spawn_daily_reset, spawn_job};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Everything the bot runs at steady state.
pub struct Engine<B> {
    cfg: AppConfig,
    broker: Arc<B>,
    state: Arc<RuntimeState>,
    store: Arc<CandleStore>,
    strategy: StrategyEngine<B>,
    manager: PositionManager<B>,
    reconciler: Reconciler<B>,
    ml: Arc<MlGate>,
    persist: PersistHandle,
    notifier: Notifier,
    stop: Arc<AtomicBool>,
}

impl<B: BrokerApi + 'static> Engine<B> {
    #[must_use]
    pub fn new(
        cfg: AppConfig,
        broker: Arc<B>,
        ml: Arc<MlGate>,
        persist: PersistHandle,
        notifier: Notifier,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let state = Arc::new(RuntimeState::new(cfg.trading.clone()));
        let store = Arc::new(CandleStore::new(cfg.poll.history_bars));

        let strategy = StrategyEngine::new(
            cfg.capital.epic.clone(),
            cfg.strategy.clone(),
            cfg.trading.clone(),
            cfg.ml.clone(),
            Arc::clone(&state),
            Arc::clone(&broker),
            Arc::clone(&ml),
            persist.clone(),
            notifier.clone(),
        );
        let manager = PositionManager::new(
            cfg.trading.clone(),
            Arc::clone(&state),
            Arc::clone(&broker),
            persist.clone(),
            notifier.clone(),
        );
        let reconciler = Reconciler::new(
            cfg.poll.reconcile_miss_threshold,
            Arc::clone(&state),
            Arc::clone(&broker),
            persist.clone(),
            notifier.clone(),
        );

        Self {
            cfg,
            broker,
            state,
            store,
            strategy,
            manager,
            reconciler,
            ml,
            persist,
            notifier,
            stop,
        }
    }

    #[must_use]
    pub fn state(&self) -> Arc<RuntimeState> {
        Arc::clone(&self.state)
    }

    /// Timeframes the bot keeps current. H4 only matters in swing mode.
    #[must_use]
    pub fn active_timeframes(&self) -> Vec<Timeframe> {
        let mut tfs = vec![Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::H1];
        if self.cfg.trading.swing_enabled {
            tfs.push(Timeframe::H4);
        }
        tfs
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Startup sequence: daily counters from live equity, candle history,
    /// and adoption of positions already open on the platform.
    ///
    /// # Errors
    /// Returns an error when the history load fails outright; equity and
    /// adoption problems degrade to warnings.
    pub async fn bootstrap(&self) -> Result<()> {
        let equity = match self.broker.account().await {
            Ok(account) => account.available,
            Err(e) => {
                warn!(error = %e, "Could not fetch account equity");
                0.0
            }
        };
        self.state.daily_reset(equity);

        for tf in self.active_timeframes() {
            let bars = self
                .broker
                .get_candles(tf, self.cfg.poll.history_bars + 1)
                .await
                .with_context(|| format!("history load for {tf}"))?;
            self.store.seed(tf, bars, now_ms());
        }

        let adopted = self.adopt_platform_positions().await;
        if adopted > 0 {
            self.notifier.send(format!("Adopted {adopted} platform position(s)"));
        }
        Ok(())
    }

    /// Reconstructs tracked positions from whatever is already open on the
    /// platform. A position without an entry level or stop is left alone
    /// (its own platform SL/TP keeps managing it).
    pub async fn adopt_platform_positions(&self) -> usize {
        let listed = match self.broker.list_positions().await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(error = %e, "Could not list platform positions");
                return 0;
            }
        };

        let mut adopted = 0;
        for remote in listed {
            if self.state.position(&remote.deal_id).is_some() {
                continue;
            }
            let (Some(entry), Some(sl)) = (remote.level, remote.stop_level) else {
                warn!(
                    deal_id = %remote.deal_id,
                    "Skipping adoption: no entry or stop on platform position"
                );
                continue;
            };
            let r = (entry - sl).abs();
            if r <= 0.0 {
                warn!(deal_id = %remote.deal_id, "Skipping adoption: degenerate stop distance");
                continue;
            }
            let sign = remote.direction.sign();
            let tp2 = remote.limit_level.unwrap_or(entry + sign * 2.0 * r);
            let position = Position {
                mode: TradeMode::Adopted,
                direction: remote.direction,
                size: remote.size,
                entry,
                sl,
                tp1: entry + sign * r,
                tp2,
                tp1_done: false,
                deal_id: remote.deal_id.clone(),
                deal_reference: remote.deal_id,
                opened_at: remote.created_at.unwrap_or_else(now_ms),
            };
            self.persist.record(PersistEvent::TradeOpened(position.clone()));
            self.state.adopt_position(position);
            adopted += 1;
        }
        adopted
    }

    // =========================================================================
    // Job bodies
    // =========================================================================

    async fn tick_once(self: &Arc<Self>) {
        let quote = match self.broker.get_quote().await {
            Ok(quote) => quote,
            Err(e) => {
                warn!(error = %e, "Tick quote fetch failed");
                return;
            }
        };
        let now = now_ms();
        self.persist.record(PersistEvent::Quote(QuoteRecord {
            ts: now,
            bid: quote.bid,
            ask: quote.ask,
            spread: quote.spread(),
            status: quote.status.as_str().to_string(),
        }));
        self.manager.on_tick(&quote, now).await;
    }

    async fn update_timeframe(self: &Arc<Self>, tf: Timeframe) {
        let fetched = match self
            .broker
            .get_candles(tf, self.cfg.poll.incremental_bars + 1)
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                warn!(error = %e, tf = %tf, "Candle fetch failed");
                return;
            }
        };

        if !self.store.ingest(tf, fetched, now_ms()) {
            return;
        }
        if let Some(bar) = self.store.get(tf).last() {
            self.persist.record(PersistEvent::Candle { tf, bar: *bar });
        }

        match tf {
            Timeframe::M5 => {
                info!("M5 candle closed, running scalp logic");
                self.run_strategy(TradeMode::Scalp).await;
            }
            Timeframe::H1 if self.cfg.trading.swing_enabled => {
                info!("H1 candle closed, running swing logic");
                self.run_strategy(TradeMode::Swing).await;
            }
            _ => {}
        }
    }

    async fn run_strategy(self: &Arc<Self>, mode: TradeMode) {
        let quote = match self.broker.get_quote().await {
            Ok(quote) => quote,
            Err(e) => {
                warn!(error = %e, "Quote fetch failed, skipping evaluation");
                return;
            }
        };
        let view = MarketView {
            now_ms: now_ms(),
            quote,
            m1: self.store.get(Timeframe::M1),
            m5: self.store.get(Timeframe::M5),
            m15: self.store.get(Timeframe::M15),
            h1: self.store.get(Timeframe::H1),
            h4: self.store.get(Timeframe::H4),
        };
        self.strategy.on_bar_close(mode, &view).await;
    }

    async fn status_once(self: &Arc<Self>) {
        let snap = self.state.snapshot();
        info!(
            trades = snap.counters.trades_today,
            max_trades = self.cfg.trading.max_trades_per_day,
            day_pnl = format!("{:+.2}", snap.counters.realized_pnl),
            positions = snap.open_positions,
            consec_losses = snap.counters.consecutive_losses,
            "Status"
        );
    }

    async fn daily_reset_once(self: &Arc<Self>) {
        let equity = match self.broker.account().await {
            Ok(account) => account.available,
            Err(e) => {
                warn!(error = %e, "Equity fetch failed at daily boundary");
                0.0
            }
        };
        self.state.daily_reset(equity);
        // Pick up any model promoted overnight.
        self.ml.reload();
        self.notifier.send(format!("Daily reset | start equity {equity:.2}"));
    }

    // =========================================================================
    // Scheduling & shutdown
    // =========================================================================

    /// Starts every polling loop. Handles are joined at shutdown.
    #[must_use]
    pub fn spawn_jobs(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let poll = self.cfg.poll.clone();
        let mut handles = Vec::new();

        let engine = Arc::clone(self);
        handles.push(spawn_job(
            "tick",
            Duration::from_secs(poll.tick_secs),
            Arc::clone(&self.stop),
            move || {
                let engine = Arc::clone(&engine);
                async move { engine.tick_once().await }
            },
        ));

        let cadences = [
            (Timeframe::M1, poll.m1_secs),
            (Timeframe::M5, poll.m5_secs),
            (Timeframe::M15, poll.m15_secs),
            (Timeframe::H1, poll.h1_secs),
            (Timeframe::H4, poll.h4_secs),
        ];
        for (tf, secs) in cadences {
            if !self.active_timeframes().contains(&tf) {
                continue;
            }
            let engine = Arc::clone(self);
            handles.push(spawn_job(
                tf.as_str(),
                Duration::from_secs(secs),
                Arc::clone(&self.stop),
                move || {
                    let engine = Arc::clone(&engine);
                    async move { engine.update_timeframe(tf).await }
                },
            ));
        }

        let engine = Arc::clone(self);
        handles.push(spawn_job(
            "reconcile",
            Duration::from_secs(poll.reconcile_secs),
            Arc::clone(&self.stop),
            move || {
                let engine = Arc::clone(&engine);
                async move { engine.reconciler.run_cycle(now_ms()).await }
            },
        ));

        let engine = Arc::clone(self);
        handles.push(spawn_job(
            "status",
            Duration::from_secs(poll.status_secs),
            Arc::clone(&self.stop),
            move || {
                let engine = Arc::clone(&engine);
                async move { engine.status_once().await }
            },
        ));

        let engine = Arc::clone(self);
        handles.push(spawn_job(
            "session-refresh",
            Duration::from_secs(poll.session_refresh_secs),
            Arc::clone(&self.stop),
            move || {
                let engine = Arc::clone(&engine);
                async move {
                    if let Err(e) = engine.broker.refresh_session().await {
                        warn!(error = %e, "Session refresh failed");
                    }
                }
            },
        ));

        let engine = Arc::clone(self);
        handles.push(spawn_daily_reset(Arc::clone(&self.stop), move || {
            let engine = Arc::clone(&engine);
            async move { engine.daily_reset_once().await }
        }));

        handles
    }

    /// Cooperative shutdown: raise the flag, tear the session down, and
    /// let every loop drain on its next tick.
    pub async fn shutdown(&self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down");
        self.broker.end_session().await;
        self.notifier.send_now("GoldBot stopped").await;
    }
}
