//! Capital.com REST client for GoldBot.
//!
//! Implements the [`goldbot_core::traits::BrokerApi`] seam: session
//! management, OHLC candles on the mid price, market snapshots, the
//! two-phase deal flow, position lookups, and account activity.

pub mod client;
pub mod error;
pub mod types;

pub use client::CapitalClient;
pub use error::{CapitalError, Result};
