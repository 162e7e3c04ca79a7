//! Synthetic bar builders shared by the strategy tests.

use goldbot_core::types::Bar;

pub const M5_MS: i64 = 300_000;

/// A single bar with zero volume.
#[must_use]
pub fn bar(t: i64, o: f64, h: f64, l: f64, c: f64) -> Bar {
    Bar { t, o, h, l, c, v: 0.0 }
}

/// `n` bars whose closes drift by `step` each bar, with a small fixed
/// range around the body. Strictly monotone closes (RSI saturates).
#[must_use]
pub fn drift_bars(n: usize, start: f64, step: f64) -> Vec<Bar> {
    let mut out = Vec::with_capacity(n);
    let mut prev_close = start;
    for i in 0..n {
        let close = start + step * (i as f64 + 1.0);
        let open = prev_close;
        let high = open.max(close) + 0.3;
        let low = open.min(close) - 0.3;
        out.push(bar(i as i64 * M5_MS, open, high, low, close));
        prev_close = close;
    }
    out
}

/// `n` bars alternating `+up` and `-down` moves. Net drift is
/// `(up - down) / 2` per bar and RSI stays off the rails.
#[must_use]
pub fn zigzag_bars(n: usize, start: f64, up: f64, down: f64) -> Vec<Bar> {
    let mut out = Vec::with_capacity(n);
    let mut prev_close = start;
    for i in 0..n {
        let delta = if i % 2 == 0 { up } else { -down };
        let close = prev_close + delta;
        let open = prev_close;
        let high = open.max(close) + 0.2;
        let low = open.min(close) - 0.2;
        out.push(bar(i as i64 * M5_MS, open, high, low, close));
        prev_close = close;
    }
    out
}
