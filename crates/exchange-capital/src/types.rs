//! Wire types for the Capital.com REST API and their conversions into the
//! core domain types. The platform quotes every OHLC leg as bid/ask; the
//! bot works on the mid.

use chrono::NaiveDateTime;
use goldbot_core::types::{ActivityEvent, Bar, BrokerPosition, Direction, MarketStatus, Quote};
use serde::Deserialize;

// =============================================================================
// Session
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    #[serde(default)]
    pub account_info: Option<SessionAccountInfo>,
    #[serde(default)]
    pub current_account_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionAccountInfo {
    #[serde(default)]
    pub preferred: Option<String>,
}

// =============================================================================
// Prices & candles
// =============================================================================

/// A bid/ask price leg on a candle.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PriceLeg {
    pub bid: f64,
    pub ask: f64,
}

impl PriceLeg {
    #[must_use]
    pub fn mid(self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCandle {
    #[serde(default)]
    pub snapshot_time_utc: Option<String>,
    #[serde(default)]
    pub snapshot_time: Option<String>,
    pub open_price: PriceLeg,
    pub high_price: PriceLeg,
    pub low_price: PriceLeg,
    pub close_price: PriceLeg,
    #[serde(default)]
    pub last_traded_volume: f64,
}

impl RawCandle {
    /// Converts the candle into a domain [`Bar`] on the mid price.
    /// Candles with an unparseable timestamp are dropped by the caller.
    #[must_use]
    pub fn into_bar(self) -> Option<Bar> {
        let raw_time = self
            .snapshot_time_utc
            .as_deref()
            .or(self.snapshot_time.as_deref())?;
        let t = parse_snapshot_time(raw_time)?;
        Some(Bar {
            t,
            o: self.open_price.mid(),
            h: self.high_price.mid(),
            l: self.low_price.mid(),
            c: self.close_price.mid(),
            v: self.last_traded_volume,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricesResponse {
    #[serde(default)]
    pub prices: Vec<RawCandle>,
}

/// Parses the platform's `YYYY/MM/DD HH:MM:SS` (or ISO-8601) UTC snapshot
/// time into epoch milliseconds.
#[must_use]
pub fn parse_snapshot_time(s: &str) -> Option<i64> {
    let normalized = s.replace('/', "-").replace('T', " ");
    let trimmed = normalized.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

// =============================================================================
// Market snapshot
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketResponse {
    pub snapshot: MarketSnapshot,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub bid: f64,
    /// The platform names the ask leg `offer`.
    pub offer: f64,
    #[serde(default)]
    pub market_status: Option<String>,
    /// Number of decimal places for prices on this epic.
    #[serde(default)]
    pub decimal_places_factor: Option<u32>,
}

impl MarketSnapshot {
    #[must_use]
    pub fn to_quote(&self) -> Quote {
        Quote {
            bid: self.bid,
            ask: self.offer,
            status: self
                .market_status
                .as_deref()
                .map_or(MarketStatus::Unknown, MarketStatus::parse),
        }
    }
}

// =============================================================================
// Accounts
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AccountsResponse {
    #[serde(default)]
    pub accounts: Vec<RawAccount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAccount {
    pub balance: RawBalance,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBalance {
    #[serde(default)]
    pub available: f64,
}

// =============================================================================
// Positions
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PositionsResponse {
    #[serde(default)]
    pub positions: Vec<PositionWrapper>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionWrapper {
    pub position: RawPosition,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPosition {
    pub deal_id: String,
    pub direction: String,
    #[serde(default)]
    pub size: f64,
    #[serde(default)]
    pub level: Option<f64>,
    #[serde(default)]
    pub stop_level: Option<f64>,
    #[serde(default)]
    pub limit_level: Option<f64>,
    #[serde(default)]
    pub created_date_utc: Option<String>,
}

impl RawPosition {
    #[must_use]
    pub fn into_domain(self) -> BrokerPosition {
        let direction = if self.direction.eq_ignore_ascii_case("SELL") {
            Direction::Sell
        } else {
            Direction::Buy
        };
        BrokerPosition {
            deal_id: self.deal_id,
            direction,
            size: self.size,
            level: self.level,
            stop_level: self.stop_level,
            limit_level: self.limit_level,
            created_at: self.created_date_utc.as_deref().and_then(parse_snapshot_time),
        }
    }
}

// =============================================================================
// Two-phase deal flow
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealReferenceResponse {
    #[serde(default)]
    pub deal_reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    #[serde(default)]
    pub deal_status: Option<String>,
    #[serde(default)]
    pub deal_id: Option<String>,
    #[serde(default)]
    pub affected_deals: Vec<AffectedDeal>,
    #[serde(default)]
    pub profit: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedDeal {
    #[serde(default)]
    pub deal_id: Option<String>,
}

impl ConfirmResponse {
    /// The deal id may sit at the top level or inside the first affected
    /// deal.
    #[must_use]
    pub fn resolved_deal_id(&self) -> Option<String> {
        self.deal_id
            .clone()
            .or_else(|| self.affected_deals.first().and_then(|d| d.deal_id.clone()))
    }
}

// =============================================================================
// Activity history
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityResponse {
    #[serde(default)]
    pub activities: Vec<RawActivity>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawActivity {
    #[serde(default)]
    pub deal_id: Option<String>,
    #[serde(default)]
    pub date_utc: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Profit sometimes appears at the top level...
    #[serde(default)]
    pub profit: Option<f64>,
    /// ...and sometimes nested under `details`.
    #[serde(default)]
    pub details: Option<ActivityDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityDetails {
    #[serde(default)]
    pub profit: Option<f64>,
}

impl RawActivity {
    /// Converts into the domain event; activities without a deal id are
    /// dropped by the caller.
    #[must_use]
    pub fn into_domain(self) -> Option<ActivityEvent> {
        let deal_id = self.deal_id?;
        let ts = self
            .date_utc
            .as_deref()
            .or(self.date.as_deref())
            .and_then(parse_snapshot_time)
            .unwrap_or(0);
        let kind = self.kind.unwrap_or_default();
        let closed = kind.contains("CLOSE")
            || self
                .status
                .as_deref()
                .is_some_and(|s| s.contains("CLOSED"));
        let profit = self.profit.or(self.details.and_then(|d| d.profit));
        Some(ActivityEvent { deal_id, ts, kind, closed, profit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Time Parsing Tests ====================

    #[test]
    fn parses_slash_format() {
        let ms = parse_snapshot_time("2026/01/02 03:04:05").unwrap();
        assert_eq!(ms, 1_767_323_045_000);
    }

    #[test]
    fn parses_iso_format() {
        let a = parse_snapshot_time("2026-01-02T03:04:05").unwrap();
        let b = parse_snapshot_time("2026/01/02 03:04:05").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_garbage_time() {
        assert_eq!(parse_snapshot_time("not a time"), None);
        assert_eq!(parse_snapshot_time(""), None);
    }

    // ==================== Candle Conversion Tests ====================

    #[test]
    fn candle_uses_mid_of_bid_ask() {
        let raw: RawCandle = serde_json::from_value(serde_json::json!({
            "snapshotTimeUTC": "2026/01/02 03:00:00",
            "openPrice": {"bid": 2000.0, "ask": 2000.4},
            "highPrice": {"bid": 2001.0, "ask": 2001.4},
            "lowPrice": {"bid": 1999.0, "ask": 1999.4},
            "closePrice": {"bid": 2000.5, "ask": 2000.9},
            "lastTradedVolume": 123.0
        }))
        .unwrap();
        let bar = raw.into_bar().unwrap();
        assert!((bar.o - 2000.2).abs() < 1e-9);
        assert!((bar.h - 2001.2).abs() < 1e-9);
        assert!((bar.l - 1999.2).abs() < 1e-9);
        assert!((bar.c - 2000.7).abs() < 1e-9);
        assert_eq!(bar.v, 123.0);
    }

    #[test]
    fn candle_without_timestamp_is_dropped() {
        let raw: RawCandle = serde_json::from_value(serde_json::json!({
            "openPrice": {"bid": 1.0, "ask": 1.0},
            "highPrice": {"bid": 1.0, "ask": 1.0},
            "lowPrice": {"bid": 1.0, "ask": 1.0},
            "closePrice": {"bid": 1.0, "ask": 1.0}
        }))
        .unwrap();
        assert!(raw.into_bar().is_none());
    }

    // ==================== Market Snapshot Tests ====================

    #[test]
    fn snapshot_maps_offer_to_ask() {
        let snap: MarketSnapshot = serde_json::from_value(serde_json::json!({
            "bid": 2000.0,
            "offer": 2000.3,
            "marketStatus": "TRADEABLE"
        }))
        .unwrap();
        let quote = snap.to_quote();
        assert_eq!(quote.ask, 2000.3);
        assert_eq!(quote.status, MarketStatus::Tradeable);
    }

    // ==================== Position Conversion Tests ====================

    #[test]
    fn position_direction_parsing() {
        let raw: RawPosition = serde_json::from_value(serde_json::json!({
            "dealId": "D1",
            "direction": "SELL",
            "size": 2.0,
            "level": 2000.0,
            "stopLevel": 2005.0
        }))
        .unwrap();
        let pos = raw.into_domain();
        assert_eq!(pos.direction, Direction::Sell);
        assert_eq!(pos.stop_level, Some(2005.0));
        assert_eq!(pos.limit_level, None);
    }

    // ==================== Confirm Tests ====================

    #[test]
    fn deal_id_resolves_from_affected_deals() {
        let confirm: ConfirmResponse = serde_json::from_value(serde_json::json!({
            "dealStatus": "ACCEPTED",
            "affectedDeals": [{"dealId": "D42"}]
        }))
        .unwrap();
        assert_eq!(confirm.resolved_deal_id().as_deref(), Some("D42"));
    }

    #[test]
    fn top_level_deal_id_wins() {
        let confirm: ConfirmResponse = serde_json::from_value(serde_json::json!({
            "dealStatus": "ACCEPTED",
            "dealId": "TOP",
            "affectedDeals": [{"dealId": "NESTED"}]
        }))
        .unwrap();
        assert_eq!(confirm.resolved_deal_id().as_deref(), Some("TOP"));
    }

    // ==================== Activity Tests ====================

    #[test]
    fn activity_profit_nested_under_details() {
        let raw: RawActivity = serde_json::from_value(serde_json::json!({
            "dealId": "D2",
            "dateUtc": "2026/01/02 03:00:00",
            "type": "POSITION",
            "status": "POSITION_CLOSED",
            "details": {"profit": -3.2}
        }))
        .unwrap();
        let event = raw.into_domain().unwrap();
        assert!(event.closed);
        assert_eq!(event.profit, Some(-3.2));
    }

    #[test]
    fn activity_top_level_profit_preferred() {
        let raw: RawActivity = serde_json::from_value(serde_json::json!({
            "dealId": "D3",
            "type": "POSITION_CLOSED",
            "profit": 1.5,
            "details": {"profit": 9.9}
        }))
        .unwrap();
        let event = raw.into_domain().unwrap();
        assert_eq!(event.profit, Some(1.5));
        assert!(event.closed);
    }
}
