//! Runtime state: daily counters, live setups, and tracked positions.
//!
//! A single owner guards everything behind one mutex and exposes only
//! operations, so every mutation the strategy, position manager, and
//! reconciler perform is atomic. Long-running I/O must never happen while
//! holding this lock; callers snapshot, call out, then commit.

use crate::config::TradingConfig;
use crate::types::{Position, Setup, TradeMode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Daily counters, reset at the UTC day boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyCounters {
    pub realized_pnl: f64,
    /// Newly opened positions only; adoptions and TP1 re-entries excluded.
    pub trades_today: u32,
    pub consecutive_losses: u32,
    pub start_equity: f64,
}

/// Read-only view of the state for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub counters: DailyCounters,
    pub open_positions: usize,
    pub scalp_setup: Option<Setup>,
    pub swing_setup: Option<Setup>,
}

#[derive(Debug, Default)]
struct Inner {
    counters: DailyCounters,
    scalp_setup: Option<Setup>,
    swing_setup: Option<Setup>,
    positions: Vec<Position>,
}

/// Shared runtime state of the bot.
#[derive(Debug)]
pub struct RuntimeState {
    limits: TradingConfig,
    inner: Mutex<Inner>,
}

impl RuntimeState {
    #[must_use]
    pub fn new(limits: TradingConfig) -> Self {
        Self {
            limits,
            inner: Mutex::new(Inner::default()),
        }
    }

    // =========================================================================
    // Risk gates
    // =========================================================================

    /// Whether a new entry is allowed under the daily risk limits.
    #[must_use]
    pub fn risk_ok(&self) -> bool {
        let inner = self.inner.lock();
        let c = &inner.counters;
        if c.trades_today >= self.limits.max_trades_per_day {
            warn!(
                trades = c.trades_today,
                max = self.limits.max_trades_per_day,
                "Daily trade limit reached"
            );
            return false;
        }
        if c.realized_pnl <= -self.limits.daily_loss_limit {
            warn!(day_pnl = c.realized_pnl, "Daily loss limit reached");
            return false;
        }
        if c.consecutive_losses >= self.limits.max_consecutive_losses {
            warn!(streak = c.consecutive_losses, "Max consecutive losses reached");
            return false;
        }
        true
    }

    // =========================================================================
    // Position tracking
    // =========================================================================

    /// Tracks a freshly opened position and counts it against the daily
    /// trade budget.
    pub fn add_position(&self, pos: Position) {
        let mut inner = self.inner.lock();
        inner.counters.trades_today += 1;
        info!(
            mode = %pos.mode,
            direction = %pos.direction,
            deal_id = %pos.deal_id,
            trades_today = inner.counters.trades_today,
            "Position added"
        );
        inner.positions.push(pos);
    }

    /// Tracks a position reconstructed from the platform at startup.
    /// Does not touch the daily counters.
    pub fn adopt_position(&self, pos: Position) {
        let mut inner = self.inner.lock();
        info!(deal_id = %pos.deal_id, size = pos.size, "Position adopted");
        inner.positions.push(pos);
    }

    /// Swaps a tracked position for its TP1 remainder. Does not touch the
    /// daily counters.
    pub fn replace_position(&self, old_deal_id: &str, new_pos: Position) {
        let mut inner = self.inner.lock();
        inner.positions.retain(|p| p.deal_id != old_deal_id);
        info!(old = old_deal_id, new = %new_pos.deal_id, "Position replaced");
        inner.positions.push(new_pos);
    }

    /// Removes a position; returns it if it was tracked.
    pub fn remove_position(&self, deal_id: &str) -> Option<Position> {
        let mut inner = self.inner.lock();
        let idx = inner.positions.iter().position(|p| p.deal_id == deal_id)?;
        Some(inner.positions.swap_remove(idx))
    }

    /// Marks TP1 handled on a position that stays open at full size,
    /// optionally moving its tracked stop.
    pub fn mark_tp1_done(&self, deal_id: &str, new_sl: Option<f64>) {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.positions.iter_mut().find(|p| p.deal_id == deal_id) {
            pos.tp1_done = true;
            if let Some(sl) = new_sl {
                pos.sl = sl;
            }
        }
    }

    /// Snapshot of all tracked positions.
    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        self.inner.lock().positions.clone()
    }

    /// Looks up a tracked position by deal id.
    #[must_use]
    pub fn position(&self, deal_id: &str) -> Option<Position> {
        self.inner
            .lock()
            .positions
            .iter()
            .find(|p| p.deal_id == deal_id)
            .cloned()
    }

    // =========================================================================
    // P&L tracking
    // =========================================================================

    /// Adds realized PnL. A strictly negative delta extends the loss
    /// streak; anything else resets it.
    pub fn update_pnl(&self, delta: f64) {
        let mut inner = self.inner.lock();
        inner.counters.realized_pnl += delta;
        if delta < 0.0 {
            inner.counters.consecutive_losses += 1;
        } else {
            inner.counters.consecutive_losses = 0;
        }
        info!(
            delta,
            day_pnl = inner.counters.realized_pnl,
            streak = inner.counters.consecutive_losses,
            "PnL updated"
        );
    }

    // =========================================================================
    // Setups
    // =========================================================================

    /// Current setup for a mode (`Scalp` or `Swing`).
    #[must_use]
    pub fn setup(&self, mode: TradeMode) -> Option<Setup> {
        let inner = self.inner.lock();
        match mode {
            TradeMode::Swing => inner.swing_setup,
            _ => inner.scalp_setup,
        }
    }

    pub fn set_setup(&self, mode: TradeMode, setup: Option<Setup>) {
        let mut inner = self.inner.lock();
        match mode {
            TradeMode::Swing => inner.swing_setup = setup,
            _ => inner.scalp_setup = setup,
        }
    }

    // =========================================================================
    // Daily boundary
    // =========================================================================

    /// Zeroes the counters, clears both setups, and records the new
    /// start-of-day equity. Open positions stay tracked.
    pub fn daily_reset(&self, equity: f64) {
        let mut inner = self.inner.lock();
        inner.counters = DailyCounters {
            start_equity: equity,
            ..DailyCounters::default()
        };
        inner.scalp_setup = None;
        inner.swing_setup = None;
        info!(equity, "Daily reset");
    }

    /// Read-only snapshot for the status emitter.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock();
        StateSnapshot {
            counters: inner.counters,
            open_positions: inner.positions.len(),
            scalp_setup: inner.scalp_setup,
            swing_setup: inner.swing_setup,
        }
    }
}
