//! Tick-driven position management: stop-loss, TP1 partial close with
//! remainder re-entry, and TP2.
//!
//! Runs on every price tick regardless of market status (protective exits
//! must not wait for the market to reopen). Exits evaluate against the
//! closing side of the book: bid for longs, ask for shorts.

use goldbot_core::config::TradingConfig;
use goldbot_core::state::RuntimeState;
use goldbot_core::traits::BrokerApi;
use goldbot_core::types::{DealOutcome, Direction, Position, Quote};
use goldbot_data::{PersistEvent, PersistHandle, TradeClose};
use goldbot_notify::Notifier;
use std::sync::Arc;
use tracing::{info, warn};

/// Manages tracked positions against live quotes.
pub struct PositionManager<B> {
    trading: TradingConfig,
    state: Arc<RuntimeState>,
    broker: Arc<B>,
    persist: PersistHandle,
    notifier: Notifier,
}

impl<B: BrokerApi> PositionManager<B> {
    #[must_use]
    pub fn new(
        trading: TradingConfig,
        state: Arc<RuntimeState>,
        broker: Arc<B>,
        persist: PersistHandle,
        notifier: Notifier,
    ) -> Self {
        Self { trading, state, broker, persist, notifier }
    }

    /// One management pass over all tracked positions.
    pub async fn on_tick(&self, quote: &Quote, now_ms: i64) {
        for pos in self.state.positions() {
            let exit = quote.exit_price(pos.direction);

            let sl_hit = match pos.direction {
                Direction::Buy => exit <= pos.sl,
                Direction::Sell => exit >= pos.sl,
            };
            if sl_hit {
                self.handle_sl(&pos, exit, now_ms).await;
                continue;
            }

            let profitable_side = |level: f64| match pos.direction {
                Direction::Buy => exit >= level,
                Direction::Sell => exit <= level,
            };

            if !pos.tp1_done && profitable_side(pos.tp1) {
                self.handle_tp1(&pos, exit, now_ms).await;
                continue;
            }

            if profitable_side(pos.tp2) {
                self.handle_tp2(&pos, exit, now_ms).await;
            }
        }
    }

    // =========================================================================
    // Terminal exits
    // =========================================================================

    async fn handle_sl(&self, pos: &Position, exit: f64, now_ms: i64) {
        info!(deal_id = %pos.deal_id, exit, "SL hit");
        let outcome = match self.broker.close_position(&pos.deal_id).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, deal_id = %pos.deal_id, "Close failed (may already be closed)");
                None
            }
        };

        let pnl = self.resolve_pnl(pos, outcome.as_ref(), exit, pos.size).await;
        self.state.update_pnl(pnl);
        self.state.remove_position(&pos.deal_id);
        self.persist.record(PersistEvent::TradeClosed(TradeClose {
            deal_id: pos.deal_id.clone(),
            ts: now_ms,
            reason: "SL".into(),
            pnl: Some(pnl),
        }));
        self.notifier.send(format!(
            "SL {} {} @ {exit:.2} | pnl {pnl:+.2}",
            pos.direction, pos.deal_id
        ));
    }

    async fn handle_tp2(&self, pos: &Position, exit: f64, now_ms: i64) {
        info!(deal_id = %pos.deal_id, exit, "TP2 hit");
        let outcome = match self.broker.close_position(&pos.deal_id).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, deal_id = %pos.deal_id, "TP2 close failed (may already be closed)");
                None
            }
        };

        let pnl = self.resolve_pnl(pos, outcome.as_ref(), exit, pos.size).await;
        self.state.update_pnl(pnl);
        self.state.remove_position(&pos.deal_id);
        self.persist.record(PersistEvent::TradeClosed(TradeClose {
            deal_id: pos.deal_id.clone(),
            ts: now_ms,
            reason: "TP2".into(),
            pnl: Some(pnl),
        }));
        self.notifier.send(format!(
            "TP2 {} {} @ {exit:.2} | pnl {pnl:+.2}",
            pos.direction, pos.deal_id
        ));
    }

    // =========================================================================
    // TP1 partial close + remainder re-entry
    // =========================================================================

    async fn handle_tp1(&self, pos: &Position, exit: f64, now_ms: i64) {
        info!(deal_id = %pos.deal_id, exit, "TP1 hit");
        let close_size = (pos.size * self.trading.partial_close_frac).floor();

        // Too small to split: keep the position whole, optionally move the
        // stop to break-even, and never look at TP1 again.
        if close_size < 1.0 {
            let new_sl = self.trading.move_sl_to_breakeven.then_some(pos.entry);
            if let Some(sl) = new_sl {
                if let Err(e) = self.broker.update_position(&pos.deal_id, Some(sl), None).await {
                    warn!(error = %e, deal_id = %pos.deal_id, "Break-even stop update failed");
                }
            }
            self.state.mark_tp1_done(&pos.deal_id, new_sl);
            self.notifier.send(format!(
                "TP1 {} {} @ {exit:.2} (stop to break-even)",
                pos.direction, pos.deal_id
            ));
            return;
        }

        // The platform only closes in full: close everything, then re-open
        // the remainder at market.
        if let Err(e) = self.broker.close_position(&pos.deal_id).await {
            warn!(error = %e, deal_id = %pos.deal_id, "TP1 close failed");
            self.state.mark_tp1_done(&pos.deal_id, None);
            return;
        }

        let pnl = pos.directional_pnl(exit, close_size);
        self.state.update_pnl(pnl);
        self.persist.record(PersistEvent::TradeClosed(TradeClose {
            deal_id: pos.deal_id.clone(),
            ts: now_ms,
            reason: "TP1_PARTIAL".into(),
            pnl: Some(pnl),
        }));

        let remaining = pos.size - close_size;
        if remaining < 1.0 {
            self.state.remove_position(&pos.deal_id);
            self.notifier.send(format!(
                "TP1 {} {} @ {exit:.2} | pnl {pnl:+.2} (fully closed)",
                pos.direction, pos.deal_id
            ));
            return;
        }

        let new_sl = if self.trading.move_sl_to_breakeven {
            pos.entry
        } else {
            pos.sl
        };
        match self
            .broker
            .open_position(pos.direction, remaining, new_sl, pos.tp2)
            .await
        {
            Ok(DealOutcome { deal_id, deal_reference, .. }) => {
                let follower = Position {
                    mode: pos.mode,
                    direction: pos.direction,
                    size: remaining,
                    entry: exit,
                    sl: new_sl,
                    tp1: pos.tp1,
                    tp2: pos.tp2,
                    tp1_done: true,
                    deal_id: deal_id.clone(),
                    deal_reference,
                    opened_at: now_ms,
                };
                self.state.replace_position(&pos.deal_id, follower.clone());
                self.persist.record(PersistEvent::TradeOpened(follower));
                self.notifier.send(format!(
                    "TP1 {} {} @ {exit:.2} | pnl {pnl:+.2} | runner {remaining} -> {deal_id}",
                    pos.direction, pos.deal_id
                ));
            }
            Err(e) => {
                // No recursive retry; the reconciler will eventually see
                // that the remote position is gone.
                warn!(error = %e, deal_id = %pos.deal_id, "TP1 re-entry failed");
                self.state.mark_tp1_done(&pos.deal_id, None);
            }
        }
    }

    // =========================================================================
    // PnL resolution
    // =========================================================================

    /// Realized-PnL source priority: broker-confirmed profit, then the
    /// activity history, then directional math as a logged last resort.
    async fn resolve_pnl(
        &self,
        pos: &Position,
        outcome: Option<&DealOutcome>,
        exit: f64,
        size: f64,
    ) -> f64 {
        if let Some(profit) = outcome.and_then(|o| o.profit) {
            return profit;
        }

        match self.broker.activity_since(pos.opened_at).await {
            Ok(events) => {
                let recovered = events
                    .iter()
                    .find(|e| e.deal_id == pos.deal_id && e.closed && e.ts >= pos.opened_at)
                    .and_then(|e| e.profit);
                if let Some(profit) = recovered {
                    return profit;
                }
            }
            Err(e) => warn!(error = %e, "Activity lookup failed"),
        }

        warn!(deal_id = %pos.deal_id, "PnL from directional math fallback");
        pos.directional_pnl(exit, size)
    }
}
