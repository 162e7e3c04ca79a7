//! Periodic job plumbing.
//!
//! Every job is its own tokio task running its body inline on an interval
//! with skipped missed ticks, which is exactly the non-overlap guarantee
//! the engine relies on: a slow iteration silently swallows the ticks it
//! covered instead of running concurrently with itself. All loops observe
//! the shared stop flag and exit promptly.

use chrono::{DateTime, NaiveTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Spawns a periodic job. The body runs to completion before the next
/// tick is considered; ticks that fire while the body is still running
/// are dropped.
pub fn spawn_job<F, Fut>(
    name: &'static str,
    period: Duration,
    stop: Arc<AtomicBool>,
    mut body: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately; consume it
        // so every job starts one period after launch.
        interval.tick().await;

        loop {
            interval.tick().await;
            if stop.load(Ordering::Relaxed) {
                break;
            }
            body().await;
            if stop.load(Ordering::Relaxed) {
                break;
            }
        }
        debug!(job = name, "Job stopped");
    })
}

/// Milliseconds from `now` until the next UTC midnight.
#[must_use]
pub fn ms_until_utc_midnight(now: DateTime<Utc>) -> i64 {
    let next_midnight = now
        .date_naive()
        .succ_opt()
        .expect("date overflow")
        .and_time(NaiveTime::MIN)
        .and_utc();
    (next_midnight - now).num_milliseconds().max(0)
}

/// A one-shot alarm that waits for the next UTC midnight, fires `body`,
/// and re-arms itself. Sleeps in short slices so shutdown stays
/// responsive.
pub fn spawn_daily_reset<F, Fut>(stop: Arc<AtomicBool>, mut body: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let target = now + chrono::Duration::milliseconds(ms_until_utc_midnight(now));
            debug!(minutes = (target - now).num_minutes(), "Daily reset armed");

            loop {
                let remaining_ms = (target - Utc::now()).num_milliseconds();
                if remaining_ms <= 0 {
                    break;
                }
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                let slice = remaining_ms.min(60_000);
                tokio::time::sleep(Duration::from_millis(slice as u64)).await;
            }
            if stop.load(Ordering::Relaxed) {
                return;
            }
            body().await;
        }
    })
}
