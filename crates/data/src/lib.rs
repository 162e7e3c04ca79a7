//! Persistence adapters for GoldBot: loss-tolerant, append-only Postgres
//! sinks behind a non-blocking writer task.
//!
//! Expected schema (composite keys absorb retried inserts):
//!
//! ```sql
//! CREATE TABLE candles (
//!     epic TEXT NOT NULL, tf TEXT NOT NULL, ts TIMESTAMPTZ NOT NULL,
//!     open DOUBLE PRECISION, high DOUBLE PRECISION,
//!     low DOUBLE PRECISION, close DOUBLE PRECISION, volume DOUBLE PRECISION,
//!     PRIMARY KEY (epic, tf, ts)
//! );
//! CREATE TABLE signals (
//!     id BIGSERIAL PRIMARY KEY, epic TEXT NOT NULL, ts TIMESTAMPTZ NOT NULL,
//!     mode TEXT NOT NULL, action TEXT NOT NULL,
//!     reasons JSONB NOT NULL, features JSONB NOT NULL,
//!     model_version TEXT, model_score DOUBLE PRECISION
//! );
//! CREATE TABLE predictions (
//!     id BIGSERIAL PRIMARY KEY, signal_id BIGINT REFERENCES signals(id),
//!     model_version TEXT NOT NULL, p_win DOUBLE PRECISION NOT NULL,
//!     acted BOOLEAN NOT NULL, shadow BOOLEAN NOT NULL, ts TIMESTAMPTZ NOT NULL
//! );
//! CREATE TABLE trades (
//!     deal_id TEXT PRIMARY KEY, epic TEXT NOT NULL, mode TEXT NOT NULL,
//!     direction TEXT NOT NULL, size DOUBLE PRECISION NOT NULL,
//!     entry DOUBLE PRECISION, sl DOUBLE PRECISION,
//!     tp1 DOUBLE PRECISION, tp2 DOUBLE PRECISION,
//!     opened_ts TIMESTAMPTZ NOT NULL, closed_ts TIMESTAMPTZ,
//!     close_reason TEXT, pnl DOUBLE PRECISION, status TEXT NOT NULL
//! );
//! CREATE TABLE quotes (
//!     epic TEXT NOT NULL, ts TIMESTAMPTZ NOT NULL,
//!     bid DOUBLE PRECISION, ask DOUBLE PRECISION,
//!     spread DOUBLE PRECISION, status TEXT,
//!     PRIMARY KEY (epic, ts)
//! );
//! ```

pub mod database;
pub mod records;
pub mod writer;

pub use database::Db;
pub use records::{PersistEvent, PredictionRow, QuoteRecord, TradeClose};
pub use writer::{spawn_writer, PersistHandle};
