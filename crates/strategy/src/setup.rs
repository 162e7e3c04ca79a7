//! Pullback setup construction and lifecycle checks.

use goldbot_core::config::StrategyConfig;
use goldbot_core::types::{Bar, Direction, EmaTouch, Setup, Trend};
use goldbot_indicators as ind;
use tracing::{debug, info};

use crate::gates::{ema_spread_atr, entry_atr};
use crate::view::closes;

/// Attempts to create a setup from the freshly closed bar.
///
/// Requires warm indicators, a non-choppy EMA spread aligned with the
/// trend, a pullback touch of EMA50 (or EMA20 in a fast trend) within the
/// adaptive tolerance, and a rejection candle in the trend direction.
#[must_use]
pub fn try_create(bars: &[Bar], trend: Trend, cfg: &StrategyConfig) -> Option<Setup> {
    let direction = trend.direction()?;
    let bar = bars.last()?;

    let closes_v = closes(bars);
    let ema20 = ind::ema(&closes_v, cfg.ema_fast_period)?;
    let ema50 = ind::ema(&closes_v, cfg.ema_pullback_period)?;
    let atr = entry_atr(bars, cfg)?;
    let spread_atr = ema_spread_atr(bars, cfg)?;

    if spread_atr < cfg.chop_ema_dist_atr_min {
        return None;
    }
    let aligned = match direction {
        Direction::Buy => ema20 > ema50,
        Direction::Sell => ema20 < ema50,
    };
    if !aligned {
        return None;
    }

    // Adaptive tolerance widens with the trend's EMA spread.
    let tol50 = cfg
        .tol_max
        .min(cfg.tol_base + cfg.tol_k * (spread_atr - cfg.chop_ema_dist_atr_min).max(0.0))
        * atr;
    let tol20 = (spread_atr >= cfg.fast_trend_min).then_some(cfg.fast_tol * atr);

    let probe = match direction {
        Direction::Buy => bar.l,
        Direction::Sell => bar.h,
    };
    let touch = if (probe - ema50).abs() <= tol50 {
        Some((EmaTouch::Ema50, ema50))
    } else {
        match tol20 {
            Some(tol20) if (probe - ema20).abs() <= tol20 => Some((EmaTouch::Ema20, ema20)),
            _ => None,
        }
    };
    let (touch, ref_ema) = touch?;

    if !is_rejection(bar, direction, cfg) {
        return None;
    }

    info!(
        direction = %direction,
        probe,
        ref_ema,
        tol = tol50,
        touch = ?touch,
        "Setup formed"
    );
    Some(Setup {
        direction,
        created_at: bar.t,
        pullback_extreme: probe,
        touch,
        ref_ema,
    })
}

/// Rejection candle: the bar must close in the trend direction with both a
/// strong close location and a meaningful adverse wick.
#[must_use]
pub fn is_rejection(bar: &Bar, direction: Direction, cfg: &StrategyConfig) -> bool {
    let range = bar.range();
    if range <= 0.0 {
        return false;
    }
    match direction {
        Direction::Buy => {
            bar.c > bar.o
                && (bar.c - bar.l) / range >= cfg.rejection_close_pct
                && (bar.o.min(bar.c) - bar.l) / range >= cfg.rejection_wick_pct
        }
        Direction::Sell => {
            bar.c < bar.o
                && (bar.h - bar.c) / range >= cfg.rejection_close_pct
                && (bar.h - bar.o.max(bar.c)) / range >= cfg.rejection_wick_pct
        }
    }
}

/// A setup expires once more than `expiry_bars` bars have closed since it
/// was formed.
#[must_use]
pub fn is_expired(bars: &[Bar], setup: &Setup, expiry_bars: usize) -> bool {
    let bars_since = bars.iter().filter(|b| b.t > setup.created_at).count();
    let expired = bars_since > expiry_bars;
    if expired {
        debug!(bars_since, expiry_bars, "Setup expired");
    }
    expired
}

/// Break-of-structure trigger on the freshly closed bar.
///
/// Skips exhaustion bars (range strictly beyond `big_candle_atr_max`*ATR),
/// then requires the close to clear the lookback extreme by the margin
/// `max(spread, atr_margin_mult*ATR)`.
#[must_use]
pub fn bos_triggered(
    bars: &[Bar],
    setup: &Setup,
    lookback: usize,
    spread: f64,
    cfg: &StrategyConfig,
) -> Option<bool> {
    if bars.len() < lookback + 1 {
        return Some(false);
    }
    let atr = entry_atr(bars, cfg)?;
    let bar = bars.last()?;

    if bar.range() > cfg.big_candle_atr_max * atr {
        debug!(range = bar.range(), atr, "BOS bar too large, skipping");
        return Some(false);
    }

    let prev = &bars[..bars.len() - 1];
    let margin = spread.max(cfg.atr_margin_mult * atr);

    let triggered = match setup.direction {
        Direction::Buy => {
            let level = ind::highest_high(&prev.iter().map(|b| b.h).collect::<Vec<_>>(), lookback)?;
            bar.c > level + margin
        }
        Direction::Sell => {
            let level = ind::lowest_low(&prev.iter().map(|b| b.l).collect::<Vec<_>>(), lookback)?;
            bar.c < level - margin
        }
    };
    if triggered {
        info!(direction = %setup.direction, close = bar.c, margin, "BOS triggered");
    }
    Some(triggered)
}

/// Stop and targets for an order about to be placed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Levels {
    pub sl: f64,
    pub tp1: f64,
    pub tp2: f64,
}

/// Computes SL/TP levels. Scalp targets are ATR multiples of the entry;
/// swing targets are R multiples of the entry-to-stop distance.
#[must_use]
pub fn compute_levels(
    setup: &Setup,
    entry: f64,
    atr: f64,
    swing: bool,
    cfg: &StrategyConfig,
) -> Levels {
    let sign = setup.direction.sign();
    let sl = setup.pullback_extreme - sign * cfg.sl_buffer_atr * atr;
    if swing {
        let r = (entry - sl).abs();
        Levels {
            sl,
            tp1: entry + sign * r,
            tp2: entry + sign * cfg.tp2_r_swing * r,
        }
    } else {
        Levels {
            sl,
            tp1: entry + sign * cfg.tp1_atr_scalp * atr,
            tp2: entry + sign * cfg.tp2_atr_scalp * atr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{bar, zigzag_bars, M5_MS};
    use goldbot_core::types::Trend;
    use goldbot_indicators as ind;

    fn cfg() -> StrategyConfig {
        StrategyConfig::default()
    }

    /// An uptrending zigzag long enough to warm every indicator, ending
    /// with a pullback bar whose low tags the EMA50 with a bullish
    /// rejection shape.
    fn buy_setup_bars() -> Vec<Bar> {
        let mut bars = zigzag_bars(240, 1990.0, 0.9, 0.5);
        let ema50 = goldbot_indicators::ema(&crate::view::closes(&bars), 50).unwrap();
        let t = bars.last().unwrap().t + M5_MS;
        // low = ema50 + 0.05, bullish body closing in the top of the range.
        let low = ema50 + 0.05;
        let open = low + 0.40;
        let close = low + 0.80;
        let high = low + 1.00;
        bars.push(bar(t, open, high, low, close));
        bars
    }

    // ==================== Rejection Candle Tests ====================

    #[test]
    fn bullish_rejection_shape() {
        let cfg = cfg();
        // range 1.0, close at 0.8 above low, wick 0.4.
        let b = bar(0, 100.4, 101.0, 100.0, 100.8);
        assert!(is_rejection(&b, Direction::Buy, &cfg));
        // Bearish body fails.
        let b = bar(0, 100.8, 101.0, 100.0, 100.4);
        assert!(!is_rejection(&b, Direction::Buy, &cfg));
        // Weak close location fails.
        let b = bar(0, 100.41, 101.0, 100.0, 100.5);
        assert!(!is_rejection(&b, Direction::Buy, &cfg));
    }

    #[test]
    fn bearish_rejection_is_symmetric() {
        let cfg = cfg();
        let b = bar(0, 100.6, 101.0, 100.0, 100.2);
        assert!(is_rejection(&b, Direction::Sell, &cfg));
        assert!(!is_rejection(&b, Direction::Buy, &cfg));
    }

    #[test]
    fn zero_range_bar_never_rejects() {
        let b = bar(0, 100.0, 100.0, 100.0, 100.0);
        assert!(!is_rejection(&b, Direction::Buy, &cfg()));
        assert!(!is_rejection(&b, Direction::Sell, &cfg()));
    }

    // ==================== Setup Creation Tests ====================

    #[test]
    fn buy_setup_forms_on_ema50_touch_with_rejection() {
        let bars = buy_setup_bars();
        let setup = try_create(&bars, Trend::Up, &cfg()).expect("setup should form");
        assert_eq!(setup.direction, Direction::Buy);
        assert_eq!(setup.touch, EmaTouch::Ema50);
        assert_eq!(setup.pullback_extreme, bars.last().unwrap().l);
        assert_eq!(setup.created_at, bars.last().unwrap().t);
    }

    #[test]
    fn no_setup_without_trend() {
        let bars = buy_setup_bars();
        assert!(try_create(&bars, Trend::Neutral, &cfg()).is_none());
    }

    #[test]
    fn no_setup_when_price_far_from_emas() {
        let mut bars = zigzag_bars(240, 1990.0, 0.9, 0.5);
        let t = bars.last().unwrap().t + M5_MS;
        let prev_close = bars.last().unwrap().c;
        // Bar far above both EMAs, bullish shape but no touch.
        let low = prev_close + 10.0;
        bars.push(bar(t, low + 0.4, low + 1.0, low, low + 0.8));
        assert!(try_create(&bars, Trend::Up, &cfg()).is_none());
    }

    #[test]
    fn no_setup_against_alignment() {
        // Downward drifting series: EMA20 < EMA50, so a BUY setup (Trend::Up)
        // cannot form.
        let bars = zigzag_bars(240, 2100.0, 0.5, 0.9);
        assert!(try_create(&bars, Trend::Up, &cfg()).is_none());
    }

    // ==================== Expiry Tests ====================

    #[test]
    fn setup_expires_after_budgeted_bars() {
        let bars = zigzag_bars(240, 1990.0, 0.9, 0.5);
        let setup = Setup {
            direction: Direction::Buy,
            created_at: bars[bars.len() - 8].t,
            pullback_extreme: 2000.0,
            touch: EmaTouch::Ema50,
            ref_ema: 2000.0,
        };
        // 7 bars closed after creation: beyond the 6-bar scalp budget.
        assert!(is_expired(&bars, &setup, 6));
        assert!(!is_expired(&bars, &setup, 7));
    }

    // ==================== BOS Tests ====================

    fn armed_setup(bars: &[Bar]) -> Setup {
        Setup {
            direction: Direction::Buy,
            created_at: bars[bars.len() - 2].t,
            pullback_extreme: bars[bars.len() - 2].l,
            touch: EmaTouch::Ema50,
            ref_ema: 0.0,
        }
    }

    #[test]
    fn bos_fires_above_level_plus_margin() {
        let cfg = cfg();
        let mut bars = zigzag_bars(240, 1990.0, 0.9, 0.5);
        // A spread large enough to dominate the ATR term pins the margin.
        let spread = 0.2_f64;
        let hh = ind::highest_high(
            &bars.iter().map(|b| b.h).collect::<Vec<_>>(),
            cfg.bos_lookback_scalp,
        )
        .unwrap();

        let t = bars.last().unwrap().t + M5_MS;
        let close = hh + spread + 0.05;
        bars.push(bar(t, close - 0.5, close + 0.1, close - 0.7, close));

        let setup = armed_setup(&bars);
        assert_eq!(
            bos_triggered(&bars, &setup, cfg.bos_lookback_scalp, spread, &cfg),
            Some(true)
        );
    }

    #[test]
    fn bos_does_not_fire_inside_margin() {
        let cfg = cfg();
        let mut bars = zigzag_bars(240, 1990.0, 0.9, 0.5);
        let spread = 0.2_f64;
        let hh = ind::highest_high(
            &bars.iter().map(|b| b.h).collect::<Vec<_>>(),
            cfg.bos_lookback_scalp,
        )
        .unwrap();

        let t = bars.last().unwrap().t + M5_MS;
        // Exactly at level + margin: strict inequality means no trigger.
        let close = hh + spread;
        bars.push(bar(t, close - 0.5, close + 0.1, close - 0.7, close));

        let setup = armed_setup(&bars);
        assert_eq!(
            bos_triggered(&bars, &setup, cfg.bos_lookback_scalp, spread, &cfg),
            Some(false)
        );
    }

    #[test]
    fn exhaustion_bar_is_skipped_only_beyond_cap() {
        let cfg = cfg();
        let mut bars = zigzag_bars(240, 1990.0, 0.9, 0.5);
        let atr_before = entry_atr(&bars, &cfg).unwrap();
        let hh = ind::highest_high(
            &bars.iter().map(|b| b.h).collect::<Vec<_>>(),
            cfg.bos_lookback_scalp,
        )
        .unwrap();
        let t = bars.last().unwrap().t + M5_MS;

        // The cap is measured against the ATR that includes the trigger
        // bar itself. With TR = range, the self-consistent boundary is
        // range = cap <=> range = big_k*(13*atr + range)/14.
        let n = cfg.atr_period as f64;
        let boundary =
            cfg.big_candle_atr_max * (n - 1.0) * atr_before / (n - cfg.big_candle_atr_max);

        // Just inside the cap: not skipped, BOS fires.
        let close = hh + 1.0;
        let range = boundary - 1e-6;
        bars.push(bar(t, close - 0.2, close, close - range, close));
        let setup = armed_setup(&bars);
        assert_eq!(
            bos_triggered(&bars, &setup, cfg.bos_lookback_scalp, 0.2, &cfg),
            Some(true)
        );

        // Clearly beyond the cap: skipped.
        let last = bars.last_mut().unwrap();
        last.l = close - (boundary + 0.3);
        assert_eq!(
            bos_triggered(&bars, &setup, cfg.bos_lookback_scalp, 0.2, &cfg),
            Some(false)
        );
    }

    // ==================== Level Computation Tests ====================

    #[test]
    fn scalp_levels_are_atr_multiples() {
        let cfg = cfg();
        let setup = Setup {
            direction: Direction::Buy,
            created_at: 0,
            pullback_extreme: 2009.8,
            touch: EmaTouch::Ema50,
            ref_ema: 2010.0,
        };
        let levels = compute_levels(&setup, 2012.0, 1.0, false, &cfg);
        assert!((levels.sl - (2009.8 - 0.10)).abs() < 1e-9);
        assert!((levels.tp1 - (2012.0 + 0.8)).abs() < 1e-9);
        assert!((levels.tp2 - (2012.0 + 1.6)).abs() < 1e-9);
    }

    #[test]
    fn swing_levels_are_r_multiples() {
        let cfg = cfg();
        let setup = Setup {
            direction: Direction::Sell,
            created_at: 0,
            pullback_extreme: 2020.0,
            touch: EmaTouch::Ema50,
            ref_ema: 2019.0,
        };
        let levels = compute_levels(&setup, 2015.0, 2.0, true, &cfg);
        // sl = 2020 + 0.2 = 2020.2, R = 5.2.
        assert!((levels.sl - 2020.2).abs() < 1e-9);
        assert!((levels.tp1 - (2015.0 - 5.2)).abs() < 1e-9);
        assert!((levels.tp2 - (2015.0 - 15.6)).abs() < 1e-9);
    }
}
