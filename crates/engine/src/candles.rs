//! Per-timeframe store of closed OHLC bars.
//!
//! Only bars that have fully closed by the wall clock are ever stored; the
//! platform's trailing in-progress candle is dropped on every fetch. The
//! ingest path is pure so the ordering invariants are directly testable.

use goldbot_core::types::{Bar, Timeframe};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct TfStore {
    bars: Vec<Bar>,
    /// Open time of the newest stored bar, epoch ms.
    last_closed_at: i64,
}

/// Thread-safe store of closed bars for every active timeframe.
#[derive(Debug)]
pub struct CandleStore {
    retention: usize,
    inner: Mutex<HashMap<Timeframe, TfStore>>,
}

impl CandleStore {
    #[must_use]
    pub fn new(retention: usize) -> Self {
        Self {
            retention,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Seeds a timeframe from a startup history fetch: drops in-progress
    /// bars, sorts ascending, dedupes by open time.
    pub fn seed(&self, tf: Timeframe, fetched: Vec<Bar>, now_ms: i64) {
        let mut closed: Vec<Bar> = fetched
            .into_iter()
            .filter(|b| b.is_closed_at(now_ms, tf))
            .collect();
        closed.sort_by_key(|b| b.t);
        closed.dedup_by_key(|b| b.t);
        if closed.len() > self.retention {
            closed.drain(..closed.len() - self.retention);
        }

        let last_closed_at = closed.last().map_or(0, |b| b.t);
        info!(tf = %tf, bars = closed.len(), "Candle history seeded");
        self.inner
            .lock()
            .insert(tf, TfStore { bars: closed, last_closed_at });
    }

    /// Merges an incremental fetch. Appends only bars strictly newer than
    /// the newest stored bar, trims to retention, and reports whether at
    /// least one new bar closed.
    pub fn ingest(&self, tf: Timeframe, fetched: Vec<Bar>, now_ms: i64) -> bool {
        let mut closed: Vec<Bar> = fetched
            .into_iter()
            .filter(|b| b.is_closed_at(now_ms, tf))
            .collect();
        closed.sort_by_key(|b| b.t);

        let mut inner = self.inner.lock();
        let store = inner.entry(tf).or_default();

        let mut appended = 0usize;
        for bar in closed {
            if bar.t > store.last_closed_at {
                store.last_closed_at = bar.t;
                store.bars.push(bar);
                appended += 1;
            }
        }
        if appended > 0 {
            if store.bars.len() > self.retention {
                let excess = store.bars.len() - self.retention;
                store.bars.drain(..excess);
            }
            debug!(tf = %tf, appended, "New closed bars");
        }
        appended > 0
    }

    /// Snapshot of the closed-bar sequence for a timeframe.
    #[must_use]
    pub fn get(&self, tf: Timeframe) -> Vec<Bar> {
        self.inner
            .lock()
            .get(&tf)
            .map(|s| s.bars.clone())
            .unwrap_or_default()
    }

    /// Open time of the newest stored bar for a timeframe.
    #[must_use]
    pub fn last_closed_at(&self, tf: Timeframe) -> i64 {
        self.inner.lock().get(&tf).map_or(0, |s| s.last_closed_at)
    }
}
