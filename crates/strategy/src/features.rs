//! Feature extraction for the classifier and the signal journal.
//!
//! The bag is an open record: a feature that cannot be computed is simply
//! absent, never NaN. Keys are stable across releases because the offline
//! trainer joins on them.

use crate::view::{closes, highs, lows, MarketView};
use goldbot_core::config::StrategyConfig;
use goldbot_core::types::TradeMode;
use goldbot_indicators as ind;
use std::collections::BTreeMap;

/// Inserts a feature only when it is present and finite.
fn put(bag: &mut BTreeMap<String, f64>, key: &str, value: Option<f64>) {
    if let Some(v) = value {
        if v.is_finite() {
            bag.insert(key.to_string(), v);
        }
    }
}

/// Builds the feature bag for one evaluation.
#[must_use]
pub fn build(view: &MarketView, mode: TradeMode, cfg: &StrategyConfig) -> BTreeMap<String, f64> {
    let mut bag = BTreeMap::new();

    let entry = view.entry_bars(mode);
    let context = view.context_bars(mode);
    let entry_closes = closes(entry);
    let entry_highs = highs(entry);
    let entry_lows = lows(entry);

    put(&mut bag, "spread", Some(view.quote.spread()));

    let atr = ind::atr(&entry_highs, &entry_lows, &entry_closes, cfg.atr_period);
    put(&mut bag, "atr", atr);
    put(
        &mut bag,
        "atr_ratio",
        ind::atr_ratio(
            &entry_highs,
            &entry_lows,
            &entry_closes,
            cfg.atr_period,
            cfg.atr_ratio_window,
        ),
    );
    put(&mut bag, "rsi", ind::rsi(&entry_closes, cfg.rsi_period));
    put(
        &mut bag,
        "boll_width",
        ind::bollinger_width(&entry_closes, cfg.ema_fast_period),
    );

    let ema20 = ind::ema(&entry_closes, cfg.ema_fast_period);
    let ema50 = ind::ema(&entry_closes, cfg.ema_pullback_period);
    if let (Some(e20), Some(e50), Some(atr)) = (ema20, ema50, atr) {
        if atr > 0.0 {
            put(&mut bag, "ema_spread_atr", Some((e20 - e50).abs() / atr));
        }
    }
    if let (Some(last), Some(atr)) = (entry.last(), atr) {
        if atr > 0.0 {
            put(&mut bag, "body_atr", Some(last.body() / atr));
            if let Some(e50) = ema50 {
                put(&mut bag, "close_ema50_atr", Some((last.c - e50) / atr));
            }
        }
    }

    // Context timeframe: distance from the regime EMA and its slope.
    let ctx_closes = closes(context);
    let ctx_atr = ind::atr(&highs(context), &lows(context), &ctx_closes, cfg.atr_period);
    if let (Some(ema200), Some(ctx_atr), Some(close)) = (
        ind::ema(&ctx_closes, cfg.ema_trend_period),
        ctx_atr,
        ctx_closes.last().copied(),
    ) {
        if ctx_atr > 0.0 {
            put(&mut bag, "ctx_dist_ema200_atr", Some((close - ema200) / ctx_atr));
            put(
                &mut bag,
                "ctx_ema200_slope",
                ind::ema_slope(&ctx_closes, cfg.ema_trend_period, cfg.slope_lookback, ctx_atr),
            );
        }
    }

    // H1 regime (also informative for swing, where it is the entry tf).
    put(&mut bag, "rsi_h1", ind::rsi(&closes(&view.h1), cfg.rsi_period));

    // Time of day matters for XAUUSD liquidity.
    if let Some(last) = entry.last() {
        let hour = (last.t / 3_600_000).rem_euclid(24);
        put(&mut bag, "hour_utc", Some(hour as f64));
    }

    bag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::zigzag_bars;
    use goldbot_core::types::{MarketStatus, Quote};

    fn view() -> MarketView {
        MarketView {
            now_ms: 0,
            quote: Quote { bid: 2000.0, ask: 2000.2, status: MarketStatus::Tradeable },
            m1: zigzag_bars(120, 2000.0, 0.3, 0.2),
            m5: zigzag_bars(240, 1990.0, 0.9, 0.5),
            m15: zigzag_bars(260, 1900.0, 1.2, 0.8),
            h1: zigzag_bars(260, 1800.0, 2.0, 1.2),
            h4: zigzag_bars(260, 1700.0, 3.0, 2.0),
        }
    }

    #[test]
    fn bag_contains_core_features_when_warm() {
        let bag = build(&view(), TradeMode::Scalp, &StrategyConfig::default());
        for key in [
            "spread",
            "atr",
            "atr_ratio",
            "rsi",
            "ema_spread_atr",
            "body_atr",
            "ctx_dist_ema200_atr",
            "rsi_h1",
            "hour_utc",
        ] {
            assert!(bag.contains_key(key), "missing {key}");
        }
        assert!(bag.values().all(|v| v.is_finite()));
    }

    #[test]
    fn cold_history_yields_sparse_bag_not_nans() {
        let mut v = view();
        v.m5.truncate(5);
        v.m15.truncate(5);
        v.h1.truncate(5);
        let bag = build(&v, TradeMode::Scalp, &StrategyConfig::default());
        assert!(!bag.contains_key("atr"));
        assert!(!bag.contains_key("rsi"));
        // What is present is still finite.
        assert!(bag.values().all(|v| v.is_finite()));
        assert!(bag.contains_key("spread"));
    }
}
