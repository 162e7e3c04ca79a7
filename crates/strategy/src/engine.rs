//! The strategy engine: one gated evaluation per freshly closed entry bar.
//!
//! The chain runs in a fixed order and the first failing gate labels the
//! outcome. Whatever happens, exactly one signal record per evaluation is
//! journaled (finally-flush): the record is assembled from the gate that
//! halted the chain, the feature bag, and any classifier scores.

use crate::features;
use crate::gates;
use crate::setup;
use crate::view::MarketView;
use goldbot_core::config::{MlConfig, StrategyConfig, TradingConfig};
use goldbot_core::state::RuntimeState;
use goldbot_core::traits::BrokerApi;
use goldbot_core::types::{
    Direction, Position, SignalAction, SignalRecord, TradeMode, Trend,
};
use goldbot_data::{PersistEvent, PersistHandle, PredictionRow};
use goldbot_ml::{MlGate, Scored};
use goldbot_notify::Notifier;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Mutable scratch space threaded through the gate chain.
struct Eval {
    reasons: BTreeMap<String, String>,
    champion: Option<Scored>,
    challenger: Option<Scored>,
}

impl Eval {
    fn note(&mut self, key: &str, value: impl ToString) {
        self.reasons.insert(key.to_string(), value.to_string());
    }
}

/// Drives the setup -> BOS -> micro-confirm -> ML -> order pipeline.
pub struct StrategyEngine<B> {
    epic: String,
    cfg: StrategyConfig,
    trading: TradingConfig,
    ml_cfg: MlConfig,
    state: Arc<RuntimeState>,
    broker: Arc<B>,
    ml: Arc<MlGate>,
    persist: PersistHandle,
    notifier: Notifier,
}

impl<B: BrokerApi> StrategyEngine<B> {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        epic: impl Into<String>,
        cfg: StrategyConfig,
        trading: TradingConfig,
        ml_cfg: MlConfig,
        state: Arc<RuntimeState>,
        broker: Arc<B>,
        ml: Arc<MlGate>,
        persist: PersistHandle,
        notifier: Notifier,
    ) -> Self {
        Self {
            epic: epic.into(),
            cfg,
            trading,
            ml_cfg,
            state,
            broker,
            ml,
            persist,
            notifier,
        }
    }

    /// Runs one evaluation against a consistent market view and journals
    /// the outcome. Called once per new closed M5 bar (scalp) or H1 bar
    /// (swing).
    pub async fn on_bar_close(&self, mode: TradeMode, view: &MarketView) -> SignalRecord {
        let mut eval = Eval {
            reasons: BTreeMap::new(),
            champion: None,
            challenger: None,
        };
        let features = features::build(view, mode, &self.cfg);
        let action = self.run_gates(mode, view, &features, &mut eval).await;

        let ts = view
            .entry_bars(mode)
            .last()
            .map_or(view.now_ms, |b| b.t);
        let record = SignalRecord {
            ts,
            epic: self.epic.clone(),
            mode,
            action,
            reasons: eval.reasons,
            features,
            model_version: eval.champion.as_ref().map(|s| s.version.clone()),
            model_score: eval.champion.as_ref().map(|s| s.score),
        };

        let mut predictions = Vec::new();
        if let Some(champion) = &eval.champion {
            predictions.push(PredictionRow {
                model_version: champion.version.clone(),
                p_win: champion.score,
                acted: true,
                shadow: false,
            });
        }
        if let Some(challenger) = &eval.challenger {
            predictions.push(PredictionRow {
                model_version: challenger.version.clone(),
                p_win: challenger.score,
                acted: false,
                shadow: true,
            });
        }

        info!(mode = %mode, action = %record.action.label(), "Signal");
        self.persist.record(PersistEvent::Signal {
            record: record.clone(),
            predictions,
        });
        record
    }

    async fn run_gates(
        &self,
        mode: TradeMode,
        view: &MarketView,
        features: &BTreeMap<String, f64>,
        eval: &mut Eval,
    ) -> SignalAction {
        let scalp = mode != TradeMode::Swing;
        let entry_bars = view.entry_bars(mode);
        let quote = view.quote;
        let spread = quote.spread();

        // 1. Daily risk gates. A lockout also tears down the setup.
        if !self.state.risk_ok() {
            self.state.set_setup(mode, None);
            return SignalAction::SkipRisk;
        }

        // 2. Market must be open for new entries.
        if !quote.status.allows_entries() {
            eval.note("market_status", quote.status.as_str());
            return SignalAction::SkipMarketClosed;
        }

        // 3. Dynamic spread ceiling (equality allowed).
        let atr_entry = gates::entry_atr(entry_bars, &self.cfg);
        let cap = gates::dynamic_spread_cap(&self.cfg, atr_entry);
        eval.note("spread", format!("{spread:.4}"));
        eval.note("spread_cap", format!("{cap:.4}"));
        if spread > cap {
            return SignalAction::SkipSpread;
        }

        // 4. Context-timeframe trend.
        let trend = gates::trend_filter(view.context_bars(mode), self.cfg.ema_trend_period);
        eval.note("trend", format!("{trend:?}"));
        if trend == Trend::Neutral {
            self.state.set_setup(mode, None);
            return SignalAction::SkipTrend;
        }

        // 5. Chop filter on the entry timeframe.
        match gates::ema_spread_atr(entry_bars, &self.cfg) {
            Some(chop) if chop >= self.cfg.chop_ema_dist_atr_min => {
                eval.note("ema_spread_atr", format!("{chop:.3}"));
            }
            _ => return SignalAction::SkipChop,
        }

        // 6. No setup yet: try to arm one and stop.
        let Some(mut armed) = self.state.setup(mode) else {
            return match setup::try_create(entry_bars, trend, &self.cfg) {
                Some(created) => {
                    self.state.set_setup(mode, Some(created));
                    eval.note("pullback_extreme", format!("{:.4}", created.pullback_extreme));
                    SignalAction::Candidate(created.direction)
                }
                None => SignalAction::Watching(trend.direction().unwrap_or(Direction::Buy)),
            };
        };
        let direction = armed.direction;

        // 7. Setup still valid: trend, alignment, mean break, expiry.
        if !trend.supports(direction) {
            self.state.set_setup(mode, None);
            return SignalAction::SkipTrendFlip;
        }
        if gates::ema_aligned(entry_bars, direction, &self.cfg) != Some(true) {
            self.state.set_setup(mode, None);
            return SignalAction::SkipEmaAlignment;
        }
        if gates::mean_broken(entry_bars, direction, &self.cfg) == Some(true) {
            self.state.set_setup(mode, None);
            return SignalAction::SkipMeanBreak;
        }
        let expiry = if scalp {
            self.cfg.setup_expiry_bars_scalp
        } else {
            self.cfg.setup_expiry_bars_swing
        };
        if setup::is_expired(entry_bars, &armed, expiry) {
            self.state.set_setup(mode, None);
            return SignalAction::SkipExpired;
        }

        // 8. Track the deepest retracement.
        if let Some(last) = entry_bars.last() {
            if last.t > armed.created_at {
                armed.absorb_bar(last);
            }
        }
        self.state.set_setup(mode, Some(armed));

        // 9. H1 macro alignment (scalp only).
        if scalp && !gates::h1_macro_ok(&view.h1, direction, &self.cfg) {
            return SignalAction::SkipH1Macro;
        }

        // 10. Context strength and slope (scalp only).
        if scalp && !gates::m15_strength_ok(&view.m15, trend, &self.cfg) {
            return SignalAction::SkipM15Strength;
        }

        // 11. Break of structure.
        let lookback = if scalp {
            self.cfg.bos_lookback_scalp
        } else {
            self.cfg.bos_lookback_swing
        };
        match setup::bos_triggered(entry_bars, &armed, lookback, spread, &self.cfg) {
            Some(true) => {}
            _ => return SignalAction::Watching(direction),
        }
        // The trigger consumes the setup no matter how the rest plays out.
        self.state.set_setup(mode, None);

        // 12. Momentum agreement.
        if gates::rsi_ok(entry_bars, direction, &self.cfg) != Some(true) {
            return SignalAction::SkipRsi(direction);
        }

        // 13. Volatility regime.
        if gates::atr_regime_ok(entry_bars, &self.cfg) != Some(true) {
            return SignalAction::SkipAtrRatio(direction);
        }

        // 14. Conviction body on the trigger bar.
        if gates::body_ok(entry_bars, &self.cfg) != Some(true) {
            return SignalAction::SkipBody(direction);
        }

        // 15. M1 micro-confirmation; short M1 history blocks.
        match gates::m1_confirm(&view.m1, direction, &self.cfg) {
            Some(true) => {}
            Some(false) => return SignalAction::SkipM1(direction),
            None => {
                eval.note("m1", "insufficient history");
                return SignalAction::SkipM1(direction);
            }
        }

        // 16. Classifier gate. Only the champion can block; the challenger
        // is always shadow-scored once the chain reaches this step.
        eval.champion = self.ml.score_champion(features);
        eval.challenger = self.ml.score_challenger(features);
        if let Some(champion) = &eval.champion {
            let pass = match direction {
                Direction::Buy => champion.score >= self.ml_cfg.buy_threshold,
                Direction::Sell => champion.score <= self.ml_cfg.sell_threshold,
            };
            if !pass {
                eval.note("ml_score", format!("{:.4}", champion.score));
                return SignalAction::SkipMl(direction);
            }
        }

        // 17. Order issue.
        let Some(atr) = atr_entry else {
            return SignalAction::Watching(direction);
        };
        let entry = quote.entry_price(direction);
        let levels = setup::compute_levels(&armed, entry, atr, !scalp, &self.cfg);
        if (levels.tp1 - entry).abs() < self.trading.min_tp1_spread_mult * spread {
            eval.note("tp1_distance", format!("{:.4}", (levels.tp1 - entry).abs()));
            return SignalAction::SkipTpTooTight(direction);
        }

        let size = if scalp {
            self.trading.scalp_size
        } else {
            self.trading.swing_size
        };
        match self
            .broker
            .open_position(direction, size, levels.sl, levels.tp2)
            .await
        {
            Ok(outcome) => {
                let position = Position {
                    mode,
                    direction,
                    size,
                    entry,
                    sl: levels.sl,
                    tp1: levels.tp1,
                    tp2: levels.tp2,
                    tp1_done: false,
                    deal_id: outcome.deal_id.clone(),
                    deal_reference: outcome.deal_reference,
                    opened_at: view.now_ms,
                };
                eval.note("deal_id", &outcome.deal_id);
                eval.note("entry", format!("{entry:.4}"));
                eval.note("sl", format!("{:.4}", levels.sl));
                eval.note("tp1", format!("{:.4}", levels.tp1));
                eval.note("tp2", format!("{:.4}", levels.tp2));
                self.state.add_position(position.clone());
                self.persist.record(PersistEvent::TradeOpened(position));
                self.notifier.send(format!(
                    "{} {} {} @ {:.2} | SL {:.2} TP1 {:.2} TP2 {:.2}",
                    mode, direction, size, entry, levels.sl, levels.tp1, levels.tp2
                ));
                SignalAction::Exec(direction)
            }
            Err(e) => {
                warn!(error = %e, "Order placement failed");
                eval.note("order_error", e.to_string());
                SignalAction::Candidate(direction)
            }
        }
    }
}
