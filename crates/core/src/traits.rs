//! The seam between the trading engine and the brokerage REST client.
//!
//! Everything the engine needs from the platform goes through [`BrokerApi`]
//! so the strategy, position manager, and reconciler can be exercised
//! against in-memory fakes.

use crate::types::{
    AccountSnapshot, ActivityEvent, Bar, BrokerPosition, DealOutcome, Direction, Quote, Timeframe,
};
use anyhow::Result;
use async_trait::async_trait;

/// Brokerage operations used by the engine. The implementing client owns
/// the instrument (epic), session tokens, and price rounding.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Most recent `max` bars for the configured epic, ascending by open
    /// time. May include the in-progress bar; the candle store drops it.
    async fn get_candles(&self, tf: Timeframe, max: usize) -> Result<Vec<Bar>>;

    /// Current bid/ask and market status.
    async fn get_quote(&self) -> Result<Quote>;

    /// Available account equity.
    async fn account(&self) -> Result<AccountSnapshot>;

    /// Places a market order with platform-held stop and profit levels,
    /// then polls the confirm endpoint until the deal resolves.
    async fn open_position(
        &self,
        direction: Direction,
        size: f64,
        stop_level: f64,
        profit_level: f64,
    ) -> Result<DealOutcome>;

    /// Closes a position in full and confirms the outcome.
    async fn close_position(&self, deal_id: &str) -> Result<DealOutcome>;

    /// Amends the platform-held stop and/or profit level.
    async fn update_position(
        &self,
        deal_id: &str,
        stop_level: Option<f64>,
        profit_level: Option<f64>,
    ) -> Result<()>;

    /// All open positions on the account.
    async fn list_positions(&self) -> Result<Vec<BrokerPosition>>;

    /// Direct single-position lookup; `Ok(None)` when the platform reports
    /// the deal does not exist.
    async fn get_position(&self, deal_id: &str) -> Result<Option<BrokerPosition>>;

    /// Account activity since `from_ts` (epoch ms), used for PnL recovery.
    async fn activity_since(&self, from_ts: i64) -> Result<Vec<ActivityEvent>>;

    /// Re-authenticates the platform session in place. Implementations
    /// without session state keep the no-op default.
    async fn refresh_session(&self) -> Result<()> {
        Ok(())
    }

    /// Tears the platform session down at shutdown; best-effort.
    async fn end_session(&self) {}
}
