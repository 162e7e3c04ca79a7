//! Signal-quality filters of the gate chain.
//!
//! Each gate is a pure function over the market view; the engine wires them
//! together in order and labels the first failure.

use goldbot_core::config::StrategyConfig;
use goldbot_core::types::{Bar, Direction, Trend};
use goldbot_indicators as ind;

use crate::view::{closes, highs, lows};

/// Close vs EMA200 trend classification on a context timeframe.
#[must_use]
pub fn trend_filter(bars: &[Bar], period: usize) -> Trend {
    let closes = closes(bars);
    let Some(ema200) = ind::ema(&closes, period) else {
        return Trend::Neutral;
    };
    let close = match closes.last() {
        Some(c) => *c,
        None => return Trend::Neutral,
    };
    if close > ema200 {
        Trend::Up
    } else if close < ema200 {
        Trend::Down
    } else {
        Trend::Neutral
    }
}

/// EMA spread in ATR units on the entry timeframe; the chop measure.
/// `None` while indicators are warming up.
#[must_use]
pub fn ema_spread_atr(bars: &[Bar], cfg: &StrategyConfig) -> Option<f64> {
    let closes = closes(bars);
    let ema20 = ind::ema(&closes, cfg.ema_fast_period)?;
    let ema50 = ind::ema(&closes, cfg.ema_pullback_period)?;
    let atr = entry_atr(bars, cfg)?;
    if atr <= 0.0 {
        return None;
    }
    Some((ema20 - ema50).abs() / atr)
}

/// ATR of the entry timeframe.
#[must_use]
pub fn entry_atr(bars: &[Bar], cfg: &StrategyConfig) -> Option<f64> {
    ind::atr(&highs(bars), &lows(bars), &closes(bars), cfg.atr_period)
}

/// Dynamic spread ceiling: `min(SPREAD_MAX, max(SPREAD_MIN, k*ATR))`,
/// degrading to the static ceiling when the ATR is unavailable.
#[must_use]
pub fn dynamic_spread_cap(cfg: &StrategyConfig, atr: Option<f64>) -> f64 {
    match atr {
        Some(atr) => cfg
            .spread_max
            .min(cfg.spread_min.max(cfg.spread_atr_mult * atr)),
        None => cfg.spread_max,
    }
}

/// Whether EMA20/EMA50 are stacked the way `direction` requires.
#[must_use]
pub fn ema_aligned(bars: &[Bar], direction: Direction, cfg: &StrategyConfig) -> Option<bool> {
    let closes = closes(bars);
    let ema20 = ind::ema(&closes, cfg.ema_fast_period)?;
    let ema50 = ind::ema(&closes, cfg.ema_pullback_period)?;
    Some(match direction {
        Direction::Buy => ema20 > ema50,
        Direction::Sell => ema20 < ema50,
    })
}

/// Whether the close has broken through EMA50 against the setup by more
/// than the invalidation buffer.
#[must_use]
pub fn mean_broken(bars: &[Bar], direction: Direction, cfg: &StrategyConfig) -> Option<bool> {
    let closes = closes(bars);
    let ema50 = ind::ema(&closes, cfg.ema_pullback_period)?;
    let atr = entry_atr(bars, cfg)?;
    let close = *closes.last()?;
    let buffer = cfg.invalidation_atr * atr;
    Some(match direction {
        Direction::Buy => close < ema50 - buffer,
        Direction::Sell => close > ema50 + buffer,
    })
}

/// H1 macro alignment for scalp entries: H1 close on the setup side of the
/// H1 EMA200 and H1 RSI inside the sane band.
#[must_use]
pub fn h1_macro_ok(h1: &[Bar], direction: Direction, cfg: &StrategyConfig) -> bool {
    let closes = closes(h1);
    let (Some(ema200), Some(rsi), Some(close)) = (
        ind::ema(&closes, cfg.ema_trend_period),
        ind::rsi(&closes, cfg.rsi_period),
        closes.last().copied(),
    ) else {
        return false;
    };
    let side_ok = match direction {
        Direction::Buy => close > ema200,
        Direction::Sell => close < ema200,
    };
    side_ok && rsi >= cfg.h1_rsi_oversold && rsi <= cfg.h1_rsi_overbought
}

/// M15 strength and slope: the context close must sit far enough from its
/// EMA200 (in M15 ATR units) and the EMA200 slope must agree with the trend.
#[must_use]
pub fn m15_strength_ok(m15: &[Bar], trend: Trend, cfg: &StrategyConfig) -> bool {
    let closes_v = closes(m15);
    let (Some(ema200), Some(atr), Some(close)) = (
        ind::ema(&closes_v, cfg.ema_trend_period),
        ind::atr(&highs(m15), &lows(m15), &closes_v, cfg.atr_period),
        closes_v.last().copied(),
    ) else {
        return false;
    };
    if atr <= 0.0 {
        return false;
    }
    let strength = (close - ema200).abs() / atr;
    if strength < cfg.m15_strength_min {
        return false;
    }
    let Some(slope) = ind::ema_slope(&closes_v, cfg.ema_trend_period, cfg.slope_lookback, atr)
    else {
        return false;
    };
    match trend {
        Trend::Up => slope > 0.0,
        Trend::Down => slope < 0.0,
        Trend::Neutral => false,
    }
}

/// Entry-timeframe RSI momentum gate.
#[must_use]
pub fn rsi_ok(bars: &[Bar], direction: Direction, cfg: &StrategyConfig) -> Option<bool> {
    let rsi = ind::rsi(&closes(bars), cfg.rsi_period)?;
    Some(match direction {
        Direction::Buy => rsi >= cfg.rsi_buy_min,
        Direction::Sell => rsi <= cfg.rsi_sell_max,
    })
}

/// Volatility floor: absolute ATR and ATR expansion ratio.
#[must_use]
pub fn atr_regime_ok(bars: &[Bar], cfg: &StrategyConfig) -> Option<bool> {
    let atr = entry_atr(bars, cfg)?;
    let ratio = ind::atr_ratio(
        &highs(bars),
        &lows(bars),
        &closes(bars),
        cfg.atr_period,
        cfg.atr_ratio_window,
    )?;
    Some(atr >= cfg.atr_abs_min && ratio >= cfg.atr_ratio_min)
}

/// Conviction gate: the trigger bar's body must be a real share of the ATR.
#[must_use]
pub fn body_ok(bars: &[Bar], cfg: &StrategyConfig) -> Option<bool> {
    let atr = entry_atr(bars, cfg)?;
    let bar = bars.last()?;
    Some(bar.body() >= cfg.body_atr_min * atr)
}

/// M1 micro-confirmation. `None` means the M1 history is too short, which
/// blocks the entry.
#[must_use]
pub fn m1_confirm(m1: &[Bar], direction: Direction, cfg: &StrategyConfig) -> Option<bool> {
    let closes = closes(m1);
    let ema20 = ind::ema(&closes, cfg.ema_fast_period)?;
    let ema50 = ind::ema(&closes, cfg.ema_pullback_period)?;
    let close = *closes.last()?;
    Some(match direction {
        Direction::Buy => ema20 > ema50 && close > ema20,
        Direction::Sell => ema20 < ema50 && close < ema20,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{bar, drift_bars};

    fn cfg() -> StrategyConfig {
        StrategyConfig::default()
    }

    // ==================== Trend Filter Tests ====================

    #[test]
    fn trend_neutral_without_history() {
        assert_eq!(trend_filter(&drift_bars(50, 2000.0, 0.1), 200), Trend::Neutral);
    }

    #[test]
    fn rising_series_is_uptrend() {
        let bars = drift_bars(260, 1900.0, 0.5);
        assert_eq!(trend_filter(&bars, 200), Trend::Up);
    }

    #[test]
    fn falling_series_is_downtrend() {
        let bars = drift_bars(260, 2100.0, -0.5);
        assert_eq!(trend_filter(&bars, 200), Trend::Down);
    }

    // ==================== Spread Cap Tests ====================

    #[test]
    fn spread_cap_clamps_between_min_and_max() {
        let cfg = cfg();
        // k*ATR below floor.
        assert_eq!(dynamic_spread_cap(&cfg, Some(0.1)), cfg.spread_min);
        // k*ATR above ceiling.
        assert_eq!(dynamic_spread_cap(&cfg, Some(10.0)), cfg.spread_max);
        // In between: 0.35 * 1.0 = 0.35.
        assert!((dynamic_spread_cap(&cfg, Some(1.0)) - 0.35).abs() < 1e-12);
        // No ATR: static ceiling.
        assert_eq!(dynamic_spread_cap(&cfg, None), cfg.spread_max);
    }

    // ==================== Alignment / Mean-Break Tests ====================

    #[test]
    fn uptrend_alignment_supports_buy() {
        let bars = drift_bars(120, 2000.0, 0.5);
        assert_eq!(ema_aligned(&bars, Direction::Buy, &cfg()), Some(true));
        assert_eq!(ema_aligned(&bars, Direction::Sell, &cfg()), Some(false));
    }

    #[test]
    fn deep_break_below_ema50_invalidates_buy() {
        let mut bars = drift_bars(120, 2000.0, 0.3);
        // Crash the last close far below the pullback EMA.
        let last_t = bars.last().unwrap().t;
        bars.push(bar(last_t + 300_000, 2000.0, 2000.5, 1980.0, 1980.5));
        assert_eq!(mean_broken(&bars, Direction::Buy, &cfg()), Some(true));
    }

    #[test]
    fn shallow_dip_does_not_invalidate() {
        let bars = drift_bars(120, 2000.0, 0.3);
        assert_eq!(mean_broken(&bars, Direction::Buy, &cfg()), Some(false));
    }

    // ==================== M1 Confirm Tests ====================

    #[test]
    fn m1_confirm_blocks_on_short_history() {
        let bars = drift_bars(10, 2000.0, 0.2);
        assert_eq!(m1_confirm(&bars, Direction::Buy, &cfg()), None);
    }

    #[test]
    fn m1_confirm_follows_micro_trend() {
        let rising = drift_bars(120, 2000.0, 0.2);
        assert_eq!(m1_confirm(&rising, Direction::Buy, &cfg()), Some(true));
        assert_eq!(m1_confirm(&rising, Direction::Sell, &cfg()), Some(false));

        let falling = drift_bars(120, 2000.0, -0.2);
        assert_eq!(m1_confirm(&falling, Direction::Sell, &cfg()), Some(true));
    }
}
