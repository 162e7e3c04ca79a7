//! Fire-and-forget persistence.
//!
//! The decision path hands events to [`PersistHandle::record`], which is a
//! bounded `try_send` and never awaits. One writer task drains the channel:
//! quote ticks accumulate in memory and flush as a batch on an interval
//! (and once more at shutdown); everything else is written as it arrives.
//! Every failure is logged and swallowed; with no database configured the
//! handle is inert.

use crate::database::Db;
use crate::records::{PersistEvent, QuoteRecord};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Channel capacity between the engine and the writer task.
const CHANNEL_CAPACITY: usize = 1024;

/// Cloneable, non-blocking entry point to the persistence layer.
#[derive(Clone)]
pub struct PersistHandle {
    tx: Option<mpsc::Sender<PersistEvent>>,
}

impl PersistHandle {
    /// A handle that drops everything (persistence disabled).
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Whether a sink is attached.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queues an event for the writer. Loss-tolerant by design: a full
    /// channel or disabled sink drops the event with a debug log.
    pub fn record(&self, event: PersistEvent) {
        let Some(tx) = &self.tx else { return };
        if let Err(e) = tx.try_send(event) {
            debug!(error = %e, "Persistence event dropped");
        }
    }
}

/// Spawns the writer task. Returns the handle the engine records through
/// and the task handle to join at shutdown.
#[must_use]
pub fn spawn_writer(
    db: Option<Db>,
    flush_interval: Duration,
    stop: Arc<AtomicBool>,
) -> (PersistHandle, Option<JoinHandle<()>>) {
    let Some(db) = db else {
        return (PersistHandle::disabled(), None);
    };

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = tokio::spawn(run_writer(db, rx, flush_interval, stop));
    (PersistHandle { tx: Some(tx) }, Some(handle))
}

async fn run_writer(
    db: Db,
    mut rx: mpsc::Receiver<PersistEvent>,
    flush_interval: Duration,
    stop: Arc<AtomicBool>,
) {
    let mut quote_buffer: Vec<QuoteRecord> = Vec::new();
    let mut flush_timer = tokio::time::interval(flush_interval);

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(PersistEvent::Quote(quote)) => quote_buffer.push(quote),
                    Some(event) => write_event(&db, event).await,
                    None => break,
                }
            }

            _ = flush_timer.tick() => {
                flush_quotes(&db, &mut quote_buffer).await;
                if stop.load(Ordering::Relaxed) {
                    break;
                }
            }
        }
    }

    // Drain whatever is still queued, then flush the quote buffer.
    while let Ok(event) = rx.try_recv() {
        match event {
            PersistEvent::Quote(quote) => quote_buffer.push(quote),
            event => write_event(&db, event).await,
        }
    }
    flush_quotes(&db, &mut quote_buffer).await;
    debug!("Persistence writer stopped");
}

async fn write_event(db: &Db, event: PersistEvent) {
    let result = match &event {
        PersistEvent::Candle { tf, bar } => db.insert_candle(*tf, bar).await,
        PersistEvent::Signal { record, predictions } => {
            db.insert_signal(record, predictions).await
        }
        PersistEvent::TradeOpened(pos) => db.insert_trade_open(pos).await,
        PersistEvent::TradeClosed(close) => db.update_trade_close(close).await,
        PersistEvent::Quote(_) => unreachable!("quotes are buffered"),
    };
    if let Err(e) = result {
        warn!(error = %e, "Persistence insert failed");
    }
}

async fn flush_quotes(db: &Db, buffer: &mut Vec<QuoteRecord>) {
    if buffer.is_empty() {
        return;
    }
    if let Err(e) = db.insert_quotes_batch(buffer).await {
        warn!(error = %e, count = buffer.len(), "Quote batch flush failed");
    }
    buffer.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_handle_swallows_events() {
        let handle = PersistHandle::disabled();
        assert!(!handle.is_enabled());
        // Must not panic or block.
        handle.record(PersistEvent::Quote(QuoteRecord {
            ts: 0,
            bid: 1.0,
            ask: 1.1,
            spread: 0.1,
            status: "TRADEABLE".into(),
        }));
    }

    #[tokio::test]
    async fn spawn_without_db_yields_inert_handle() {
        let stop = Arc::new(AtomicBool::new(false));
        let (handle, task) = spawn_writer(None, Duration::from_secs(1), stop);
        assert!(!handle.is_enabled());
        assert!(task.is_none());
    }
}
