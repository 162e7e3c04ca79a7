//! Rows and events flowing into the persistence writer.

use goldbot_core::types::{Bar, Position, SignalRecord, Timeframe};
use serde::{Deserialize, Serialize};

/// One classifier score attached to a signal. `acted` marks the score that
/// actually gated the decision; `shadow` marks challenger output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub model_version: String,
    pub p_win: f64,
    pub acted: bool,
    pub shadow: bool,
}

/// One bid/ask tick for the quotes table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub ts: i64,
    pub bid: f64,
    pub ask: f64,
    pub spread: f64,
    pub status: String,
}

/// Terminal update for a trade row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeClose {
    pub deal_id: String,
    pub ts: i64,
    /// `SL` / `TP1_PARTIAL` / `TP2` / `BROKER_CLOSE`.
    pub reason: String,
    pub pnl: Option<f64>,
}

/// Everything the engine ever persists. Quotes are buffered and flushed in
/// batches; the rest is written as it arrives.
#[derive(Debug, Clone)]
pub enum PersistEvent {
    Candle { tf: Timeframe, bar: Bar },
    Signal { record: SignalRecord, predictions: Vec<PredictionRow> },
    TradeOpened(Position),
    TradeClosed(TradeClose),
    Quote(QuoteRecord),
}
