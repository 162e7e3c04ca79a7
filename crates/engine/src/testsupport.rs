//! In-memory broker stub shared by the engine tests.

use anyhow::Result;
use async_trait::async_trait;
use goldbot_core::traits::BrokerApi;
use goldbot_core::types::{
    AccountSnapshot, ActivityEvent, Bar, BrokerPosition, DealOutcome, Direction, MarketStatus,
    Quote, Timeframe,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub struct OpenCall {
    pub direction: Direction,
    pub size: f64,
    pub stop: f64,
    pub profit: f64,
}

/// Scriptable [`BrokerApi`] implementation recording every call.
#[derive(Default)]
pub struct StubBroker {
    pub candles: Mutex<HashMap<Timeframe, Vec<Bar>>>,
    pub quote: Mutex<Option<Quote>>,
    pub equity: Mutex<f64>,
    /// What the positions list endpoint returns.
    pub listed: Mutex<Vec<BrokerPosition>>,
    /// Scripted direct-lookup responses by deal id; unscripted ids
    /// resolve to `None` (404).
    pub direct: Mutex<HashMap<String, BrokerPosition>>,
    pub activity: Mutex<Vec<ActivityEvent>>,
    pub opens: Mutex<Vec<OpenCall>>,
    pub closes: Mutex<Vec<String>>,
    pub updates: Mutex<Vec<(String, Option<f64>, Option<f64>)>>,
    pub fail_open: bool,
    pub fail_close: bool,
    pub fail_list: bool,
    /// Profit attached to close confirmations.
    pub close_profit: Option<f64>,
    pub next_deal: AtomicUsize,
}

#[async_trait]
impl BrokerApi for StubBroker {
    async fn get_candles(&self, tf: Timeframe, _max: usize) -> Result<Vec<Bar>> {
        Ok(self.candles.lock().get(&tf).cloned().unwrap_or_default())
    }

    async fn get_quote(&self) -> Result<Quote> {
        Ok(self.quote.lock().unwrap_or(Quote {
            bid: 2000.0,
            ask: 2000.2,
            status: MarketStatus::Tradeable,
        }))
    }

    async fn account(&self) -> Result<AccountSnapshot> {
        Ok(AccountSnapshot { available: *self.equity.lock() })
    }

    async fn open_position(
        &self,
        direction: Direction,
        size: f64,
        stop_level: f64,
        profit_level: f64,
    ) -> Result<DealOutcome> {
        if self.fail_open {
            anyhow::bail!("simulated open rejection");
        }
        self.opens.lock().push(OpenCall {
            direction,
            size,
            stop: stop_level,
            profit: profit_level,
        });
        let n = self.next_deal.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(DealOutcome {
            deal_id: format!("STUB-{n}"),
            deal_reference: format!("stubref-{n}"),
            profit: None,
        })
    }

    async fn close_position(&self, deal_id: &str) -> Result<DealOutcome> {
        if self.fail_close {
            anyhow::bail!("simulated close failure");
        }
        self.closes.lock().push(deal_id.to_string());
        Ok(DealOutcome {
            deal_id: deal_id.to_string(),
            deal_reference: "close-ref".into(),
            profit: self.close_profit,
        })
    }

    async fn update_position(
        &self,
        deal_id: &str,
        stop_level: Option<f64>,
        profit_level: Option<f64>,
    ) -> Result<()> {
        self.updates
            .lock()
            .push((deal_id.to_string(), stop_level, profit_level));
        Ok(())
    }

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>> {
        if self.fail_list {
            anyhow::bail!("simulated list failure");
        }
        Ok(self.listed.lock().clone())
    }

    async fn get_position(&self, deal_id: &str) -> Result<Option<BrokerPosition>> {
        Ok(self.direct.lock().get(deal_id).cloned())
    }

    async fn activity_since(&self, from_ts: i64) -> Result<Vec<ActivityEvent>> {
        Ok(self
            .activity
            .lock()
            .iter()
            .filter(|e| e.ts >= from_ts)
            .cloned()
            .collect())
    }
}
