//! Pure indicator functions over `f64` slices.
//!
//! All functions are order-preserving, never mutate their inputs, and
//! return `None` while a warmup requirement is unmet. Smoothing follows
//! the classical definitions: EMA seeded by the SMA of the first period,
//! ATR and RSI with Wilder's RMA (`alpha = 1/n`).

/// Full EMA series. Entries before the seed index are `None`; the seed is
/// the SMA of the first `period` values, smoothed with `k = 2/(period+1)`.
#[must_use]
pub fn ema_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);
    let mut prev = seed;
    for i in period..values.len() {
        prev = values[i] * k + prev * (1.0 - k);
        out[i] = Some(prev);
    }
    out
}

/// Last value of the EMA series.
#[must_use]
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied().flatten()
}

/// Simple mean of the last `period` values.
#[must_use]
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let tail = &values[values.len() - period..];
    Some(tail.iter().sum::<f64>() / period as f64)
}

/// True ranges of a bar sequence; the first bar's TR is its high-low range.
#[must_use]
pub fn true_ranges(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let n = highs.len().min(lows.len()).min(closes.len());
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let hl = highs[i] - lows[i];
        if i == 0 {
            out.push(hl);
        } else {
            let prev_close = closes[i - 1];
            out.push(
                hl.max((highs[i] - prev_close).abs())
                    .max((lows[i] - prev_close).abs()),
            );
        }
    }
    out
}

/// Full Wilder-smoothed ATR series: seeded by the SMA of the first
/// `period` true ranges, then `atr = (prev*(n-1) + tr) / n`.
#[must_use]
pub fn atr_series(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let trs = true_ranges(highs, lows, closes);
    let mut out = vec![None; trs.len()];
    if period == 0 || trs.len() < period {
        return out;
    }
    let seed: f64 = trs[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);
    let mut prev = seed;
    let n = period as f64;
    for i in period..trs.len() {
        prev = (prev * (n - 1.0) + trs[i]) / n;
        out[i] = Some(prev);
    }
    out
}

/// Most recent Wilder-smoothed ATR.
#[must_use]
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    atr_series(highs, lows, closes, period).last().copied().flatten()
}

/// Wilder RSI over the diffs of `values`. Returns 100.0 when the average
/// loss is zero.
#[must_use]
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }
    let diffs: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = diffs[..period].iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss =
        diffs[..period].iter().filter(|d| **d < 0.0).map(|d| -d).sum::<f64>() / period as f64;

    let n = period as f64;
    for d in &diffs[period..] {
        let gain = d.max(0.0);
        let loss = (-d).max(0.0);
        avg_gain = (avg_gain * (n - 1.0) + gain) / n;
        avg_loss = (avg_loss * (n - 1.0) + loss) / n;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Bollinger band width over the last `period` values: `4sigma / SMA`.
#[must_use]
pub fn bollinger_width(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let tail = &values[values.len() - period..];
    let mean = tail.iter().sum::<f64>() / period as f64;
    if mean == 0.0 {
        return None;
    }
    let variance = tail.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
    Some(4.0 * variance.sqrt() / mean)
}

/// Current ATR relative to the SMA of the trailing ATR series over
/// `window` entries. Values above 1 mean volatility is expanding.
#[must_use]
pub fn atr_ratio(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
    window: usize,
) -> Option<f64> {
    let series: Vec<f64> = atr_series(highs, lows, closes, period)
        .into_iter()
        .flatten()
        .collect();
    if window == 0 || series.len() < window {
        return None;
    }
    let current = *series.last()?;
    let base = sma(&series, window)?;
    if base == 0.0 {
        return None;
    }
    Some(current / base)
}

/// Slope of the EMA in ATR units per bar over the last `k` bars:
/// `(EMA[last] - EMA[last-k]) / (k * atr)`.
#[must_use]
pub fn ema_slope(values: &[f64], period: usize, k: usize, atr_value: f64) -> Option<f64> {
    if k == 0 || atr_value <= 0.0 {
        return None;
    }
    let series = ema_series(values, period);
    let last = (*series.last()?)?;
    let earlier = (*series.get(series.len().checked_sub(k + 1)?)?)?;
    Some((last - earlier) / (k as f64 * atr_value))
}

/// Highest value among the last `n` entries.
#[must_use]
pub fn highest_high(highs: &[f64], n: usize) -> Option<f64> {
    if n == 0 || highs.len() < n {
        return None;
    }
    highs[highs.len() - n..]
        .iter()
        .copied()
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
}

/// Lowest value among the last `n` entries.
#[must_use]
pub fn lowest_low(lows: &[f64], n: usize) -> Option<f64> {
    if n == 0 || lows.len() < n {
        return None;
    }
    lows[lows.len() - n..]
        .iter()
        .copied()
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    // ==================== EMA Tests ====================

    #[test]
    fn ema_none_below_period() {
        assert_eq!(ema(&[1.0, 2.0], 3), None);
    }

    #[test]
    fn ema_seeded_by_sma() {
        // Seed = mean(1,2,3) = 2, k = 0.5.
        // next: 4*0.5 + 2*0.5 = 3; then 5*0.5 + 3*0.5 = 4.
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_close(ema(&v, 3).unwrap(), 4.0);
    }

    #[test]
    fn ema_series_has_none_prefix() {
        let series = ema_series(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(series[0], None);
        assert_eq!(series[1], None);
        assert_close(series[2].unwrap(), 2.0);
        assert_close(series[3].unwrap(), 3.0);
    }

    #[test]
    fn ema_is_deterministic_and_non_mutating() {
        let v = vec![3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0];
        let before = v.clone();
        let a = ema(&v, 4);
        let b = ema(&v, 4);
        assert_eq!(a, b);
        assert_eq!(v, before);
    }

    // ==================== SMA Tests ====================

    #[test]
    fn sma_uses_only_the_tail() {
        assert_close(sma(&[100.0, 1.0, 2.0, 3.0], 3).unwrap(), 2.0);
        assert_eq!(sma(&[1.0], 2), None);
    }

    // ==================== ATR Tests ====================

    #[test]
    fn true_range_first_bar_is_high_low() {
        let tr = true_ranges(&[10.0, 12.0], &[8.0, 9.0], &[9.0, 11.0]);
        assert_close(tr[0], 2.0);
        // max(12-9, |12-9|, |9-9|) = 3.
        assert_close(tr[1], 3.0);
    }

    #[test]
    fn true_range_gap_down_uses_prev_close() {
        // Gap: prev close 100, next bar high 95 low 94.
        let tr = true_ranges(&[101.0, 95.0], &[99.0, 94.0], &[100.0, 94.5]);
        assert_close(tr[1], 6.0); // |94 - 100|
    }

    #[test]
    fn atr_wilder_smoothing() {
        // Constant TR of 2.0 on every bar: ATR must stay at 2.0.
        let highs = [10.0, 10.0, 10.0, 10.0, 10.0];
        let lows = [8.0, 8.0, 8.0, 8.0, 8.0];
        let closes = [9.0, 9.0, 9.0, 9.0, 9.0];
        assert_close(atr(&highs, &lows, &closes, 3).unwrap(), 2.0);
    }

    #[test]
    fn atr_none_below_period() {
        assert_eq!(atr(&[10.0], &[8.0], &[9.0], 3), None);
    }

    // ==================== RSI Tests ====================

    #[test]
    fn rsi_all_gains_is_100() {
        let v: Vec<f64> = (0..20).map(f64::from).collect();
        assert_close(rsi(&v, 14).unwrap(), 100.0);
    }

    #[test]
    fn rsi_all_losses_near_zero() {
        let v: Vec<f64> = (0..20).rev().map(f64::from).collect();
        assert!(rsi(&v, 14).unwrap() < 1e-9);
    }

    #[test]
    fn rsi_balanced_is_50() {
        // Alternate +1/-1 forever: average gain equals average loss.
        let mut v = vec![10.0];
        for i in 0..30 {
            let last = *v.last().unwrap();
            v.push(if i % 2 == 0 { last + 1.0 } else { last - 1.0 });
        }
        let r = rsi(&v, 14).unwrap();
        assert!((r - 50.0).abs() < 2.0, "rsi {r}");
    }

    #[test]
    fn rsi_none_below_period() {
        assert_eq!(rsi(&[1.0, 2.0, 3.0], 14), None);
    }

    // ==================== Width / Ratio / Slope Tests ====================

    #[test]
    fn bollinger_width_zero_on_flat_series() {
        let v = [5.0; 25];
        assert_close(bollinger_width(&v, 20).unwrap(), 0.0);
    }

    #[test]
    fn atr_ratio_is_one_on_constant_volatility() {
        let n = 60;
        let highs = vec![10.0; n];
        let lows = vec![8.0; n];
        let closes = vec![9.0; n];
        assert_close(atr_ratio(&highs, &lows, &closes, 14, 20).unwrap(), 1.0);
    }

    #[test]
    fn ema_slope_positive_on_uptrend() {
        let v: Vec<f64> = (0..60).map(|i| 100.0 + f64::from(i)).collect();
        let slope = ema_slope(&v, 20, 5, 1.0).unwrap();
        assert!(slope > 0.0);
    }

    #[test]
    fn ema_slope_requires_history_beyond_k() {
        let v = [1.0, 2.0, 3.0];
        assert_eq!(ema_slope(&v, 3, 5, 1.0), None);
    }

    // ==================== Extremes Tests ====================

    #[test]
    fn extremes_over_last_n() {
        let h = [5.0, 9.0, 7.0, 8.0];
        assert_close(highest_high(&h, 2).unwrap(), 8.0);
        assert_close(highest_high(&h, 4).unwrap(), 9.0);
        assert_eq!(highest_high(&h, 5), None);

        let l = [5.0, 2.0, 7.0, 3.0];
        assert_close(lowest_low(&l, 2).unwrap(), 3.0);
        assert_close(lowest_low(&l, 4).unwrap(), 2.0);
    }
}
