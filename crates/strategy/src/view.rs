//! The consistent market view a strategy evaluation runs against.
//!
//! Sampled once at handler entry: quote and candle snapshots never change
//! underneath a running evaluation.

use goldbot_core::types::{Bar, Quote, TradeMode};

/// Snapshot of everything one evaluation may read.
#[derive(Debug, Clone)]
pub struct MarketView {
    /// Wall time at handler entry, epoch ms.
    pub now_ms: i64,
    pub quote: Quote,
    pub m1: Vec<Bar>,
    pub m5: Vec<Bar>,
    pub m15: Vec<Bar>,
    pub h1: Vec<Bar>,
    pub h4: Vec<Bar>,
}

impl MarketView {
    /// Bars of the entry timeframe for a mode (M5 scalp / H1 swing).
    #[must_use]
    pub fn entry_bars(&self, mode: TradeMode) -> &[Bar] {
        match mode {
            TradeMode::Swing => &self.h1,
            _ => &self.m5,
        }
    }

    /// Bars of the context timeframe for a mode (M15 scalp / H4 swing).
    #[must_use]
    pub fn context_bars(&self, mode: TradeMode) -> &[Bar] {
        match mode {
            TradeMode::Swing => &self.h4,
            _ => &self.m15,
        }
    }
}

/// Close series of a bar slice.
#[must_use]
pub fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.c).collect()
}

/// High series of a bar slice.
#[must_use]
pub fn highs(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.h).collect()
}

/// Low series of a bar slice.
#[must_use]
pub fn lows(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.l).collect()
}
