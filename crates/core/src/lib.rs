//! Shared domain types, configuration, runtime state, and the broker seam
//! for the GoldBot trading agent.

pub mod config;
pub mod state;
pub mod traits;
pub mod types;

pub use config::{AppConfig, CapitalConfig, DatabaseConfig, MlConfig, PollConfig,
    StrategyConfig, TelegramConfig, TradingConfig};
pub use state::{RuntimeState, StateSnapshot};
pub use traits::BrokerApi;
pub use types::{
    AccountSnapshot, ActivityEvent, Bar, BrokerPosition, DealOutcome, Direction, EmaTouch,
    MarketStatus, Position, Quote, Setup, SignalAction, SignalRecord, Timeframe, TradeMode, Trend,
};
