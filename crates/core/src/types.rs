//! Core domain types shared across the workspace.
//!
//! Bars, timeframes, setups, tracked positions, decision outcomes, and the
//! broker-side records the engine consumes through [`crate::traits::BrokerApi`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cushion subtracted from a timeframe period when deciding whether a bar
/// has closed (absorbs clock skew between us and the platform).
pub const CLOSE_EPSILON_MS: i64 = 1_000;

// =============================================================================
// Timeframes & bars
// =============================================================================

/// Fixed aggregation window for OHLC bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
}

impl Timeframe {
    /// Bar period in milliseconds.
    #[must_use]
    pub const fn period_ms(self) -> i64 {
        match self {
            Self::M1 => 60_000,
            Self::M5 => 300_000,
            Self::M15 => 900_000,
            Self::H1 => 3_600_000,
            Self::H4 => 14_400_000,
        }
    }

    /// Resolution string used by the Capital.com prices endpoint.
    #[must_use]
    pub const fn resolution(self) -> &'static str {
        match self {
            Self::M1 => "MINUTE",
            Self::M5 => "MINUTE_5",
            Self::M15 => "MINUTE_15",
            Self::H1 => "HOUR",
            Self::H4 => "HOUR_4",
        }
    }

    /// Short label used in logs and persistence keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "M1",
            Self::M5 => "M5",
            Self::M15 => "M15",
            Self::H1 => "H1",
            Self::H4 => "H4",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A closed OHLC bar. `t` is the bar open time in epoch milliseconds; prices
/// are the mid of the platform's bid/ask legs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub t: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

impl Bar {
    /// High-low range of the bar.
    #[must_use]
    pub fn range(&self) -> f64 {
        self.h - self.l
    }

    /// Absolute body size of the bar.
    #[must_use]
    pub fn body(&self) -> f64 {
        (self.c - self.o).abs()
    }

    /// Whether the bar had fully closed at wall time `now_ms`.
    #[must_use]
    pub fn is_closed_at(&self, now_ms: i64, tf: Timeframe) -> bool {
        now_ms - self.t >= tf.period_ms() - CLOSE_EPSILON_MS
    }
}

// =============================================================================
// Directions & modes
// =============================================================================

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// +1.0 for buys, -1.0 for sells; lets SL/TP math stay branch-free.
    #[must_use]
    pub const fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }

    /// Wire string expected by the platform order endpoints.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Higher-timeframe trend classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Up,
    Down,
    Neutral,
}

impl Trend {
    /// The trade direction this trend supports, if any.
    #[must_use]
    pub const fn direction(self) -> Option<Direction> {
        match self {
            Self::Up => Some(Direction::Buy),
            Self::Down => Some(Direction::Sell),
            Self::Neutral => None,
        }
    }

    /// Whether the trend supports trading in `direction`.
    #[must_use]
    pub fn supports(self, direction: Direction) -> bool {
        self.direction() == Some(direction)
    }
}

/// How a tracked position came to exist.
///
/// `Adopted` marks positions reconstructed from the platform at startup;
/// they are never counted against the daily trade budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeMode {
    Scalp,
    Swing,
    Adopted,
}

impl TradeMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scalp => "SCALP",
            Self::Swing => "SWING",
            Self::Adopted => "ADOPTED",
        }
    }
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Quotes & market status
// =============================================================================

/// Platform market status as reported by the market snapshot endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    Tradeable,
    Closed,
    EditsOnly,
    Offline,
    Suspended,
    Unknown,
}

impl MarketStatus {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "TRADEABLE" => Self::Tradeable,
            "CLOSED" => Self::Closed,
            "EDITS_ONLY" => Self::EditsOnly,
            "OFFLINE" => Self::Offline,
            "SUSPENDED" => Self::Suspended,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tradeable => "TRADEABLE",
            Self::Closed => "CLOSED",
            Self::EditsOnly => "EDITS_ONLY",
            Self::Offline => "OFFLINE",
            Self::Suspended => "SUSPENDED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// New entries are allowed only while the market is tradeable; open
    /// positions keep being managed regardless.
    #[must_use]
    pub const fn allows_entries(self) -> bool {
        matches!(self, Self::Tradeable)
    }
}

/// A bid/ask snapshot with the current market status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub status: MarketStatus,
}

impl Quote {
    #[must_use]
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    #[must_use]
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Price at which a position in `direction` would currently exit
    /// (bid for longs, ask for shorts).
    #[must_use]
    pub const fn exit_price(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Buy => self.bid,
            Direction::Sell => self.ask,
        }
    }

    /// Price at which a new position in `direction` would be filled.
    #[must_use]
    pub const fn entry_price(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Buy => self.ask,
            Direction::Sell => self.bid,
        }
    }
}

// =============================================================================
// Setups & positions
// =============================================================================

/// Which moving average the pullback touched when the setup formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmaTouch {
    Ema20,
    Ema50,
}

/// A latent pullback setup waiting for a break of structure.
///
/// Tracked per mode; the pullback extreme only ever deepens (monotone toward
/// the adverse side) while the setup stays alive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Setup {
    pub direction: Direction,
    /// Open time of the bar that formed the setup, epoch ms.
    pub created_at: i64,
    pub pullback_extreme: f64,
    pub touch: EmaTouch,
    /// Value of the touched EMA when the setup formed.
    pub ref_ema: f64,
}

impl Setup {
    /// Deepens the pullback extreme with a new bar, never retreating.
    pub fn absorb_bar(&mut self, bar: &Bar) {
        match self.direction {
            Direction::Buy => self.pullback_extreme = self.pullback_extreme.min(bar.l),
            Direction::Sell => self.pullback_extreme = self.pullback_extreme.max(bar.h),
        }
    }
}

/// A position tracked by the bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub mode: TradeMode,
    pub direction: Direction,
    pub size: f64,
    pub entry: f64,
    pub sl: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub tp1_done: bool,
    pub deal_id: String,
    pub deal_reference: String,
    /// Epoch ms when the deal was opened (or adopted).
    pub opened_at: i64,
}

impl Position {
    /// Signed PnL of exiting `size_units` at `exit` (directional math, the
    /// lowest-priority PnL source).
    #[must_use]
    pub fn directional_pnl(&self, exit: f64, size_units: f64) -> f64 {
        (exit - self.entry) * self.direction.sign() * size_units
    }
}

// =============================================================================
// Decision outcomes
// =============================================================================

/// Outcome of one strategy evaluation. Every decision bar maps to exactly
/// one of these, recorded in the signal journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    SkipRisk,
    SkipMarketClosed,
    SkipSpread,
    SkipTrend,
    SkipChop,
    SkipTrendFlip,
    SkipEmaAlignment,
    SkipMeanBreak,
    SkipExpired,
    SkipH1Macro,
    SkipM15Strength,
    Watching(Direction),
    Candidate(Direction),
    SkipRsi(Direction),
    SkipAtrRatio(Direction),
    SkipBody(Direction),
    SkipM1(Direction),
    SkipMl(Direction),
    SkipTpTooTight(Direction),
    Exec(Direction),
}

impl SignalAction {
    /// Journal label, e.g. `BUY_EXEC`, `SELL_WATCHING`, `SKIP_TREND_FLIP`.
    #[must_use]
    pub fn label(self) -> String {
        match self {
            Self::SkipRisk => "SKIP_RISK".into(),
            Self::SkipMarketClosed => "SKIP_MARKET_CLOSED".into(),
            Self::SkipSpread => "SKIP_SPREAD".into(),
            Self::SkipTrend => "SKIP_TREND".into(),
            Self::SkipChop => "SKIP_CHOP".into(),
            Self::SkipTrendFlip => "SKIP_TREND_FLIP".into(),
            Self::SkipEmaAlignment => "SKIP_EMA_ALIGNMENT".into(),
            Self::SkipMeanBreak => "SKIP_MEAN_BREAK".into(),
            Self::SkipExpired => "SKIP_EXPIRED".into(),
            Self::SkipH1Macro => "SKIP_H1_MACRO".into(),
            Self::SkipM15Strength => "SKIP_M15_STRENGTH".into(),
            Self::Watching(d) => format!("{d}_WATCHING"),
            Self::Candidate(d) => format!("{d}_CANDIDATE"),
            Self::SkipRsi(_) => "SKIP_RSI".into(),
            Self::SkipAtrRatio(_) => "SKIP_ATR_RATIO".into(),
            Self::SkipBody(_) => "SKIP_BODY".into(),
            Self::SkipM1(_) => "SKIP_M1".into(),
            Self::SkipMl(_) => "SKIP_ML".into(),
            Self::SkipTpTooTight(_) => "SKIP_TP_TOO_TIGHT".into(),
            Self::Exec(d) => format!("{d}_EXEC"),
        }
    }

    /// True only for the action that actually placed an order.
    #[must_use]
    pub const fn is_exec(self) -> bool {
        matches!(self, Self::Exec(_))
    }
}

/// One journal row per strategy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub ts: i64,
    pub epic: String,
    pub mode: TradeMode,
    pub action: SignalAction,
    /// Human-readable context for the decision (gate readings, levels).
    pub reasons: BTreeMap<String, String>,
    /// Feature bag: absent keys mean "not observed", values are finite.
    pub features: BTreeMap<String, f64>,
    pub model_version: Option<String>,
    pub model_score: Option<f64>,
}

// =============================================================================
// Broker-side records
// =============================================================================

/// A position as reported by the platform positions endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub deal_id: String,
    pub direction: Direction,
    pub size: f64,
    /// Entry level.
    pub level: Option<f64>,
    pub stop_level: Option<f64>,
    pub limit_level: Option<f64>,
    /// Epoch ms the platform opened the deal, when reported.
    pub created_at: Option<i64>,
}

/// Result of a confirmed two-phase deal (create or close).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealOutcome {
    pub deal_id: String,
    pub deal_reference: String,
    /// Realized profit the platform attached to the confirmation, if any.
    pub profit: Option<f64>,
}

/// A single account-activity event, pre-filtered to the fields we use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub deal_id: String,
    pub ts: i64,
    /// Activity type string, e.g. `POSITION` / `POSITION_CLOSED`.
    pub kind: String,
    /// True when the event represents a position being closed.
    pub closed: bool,
    pub profit: Option<f64>,
}

/// Account equity snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub available: f64,
}
