//! Postgres sinks for candles, signals, predictions, trades, and quotes.
//!
//! Inserts are append-only; composite unique keys absorb retries
//! (`(epic, tf, ts)` for candles, `(epic, ts)` for quotes, the deal id for
//! trades). Callers go through the writer task in [`crate::writer`], never
//! directly from the decision path.

use crate::records::{PredictionRow, QuoteRecord, TradeClose};
use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use goldbot_core::types::{Bar, Position, SignalRecord, Timeframe};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

fn ts_from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// Database client bound to one epic.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
    epic: String,
}

impl Db {
    /// Connects to the configured Postgres instance.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn connect(url: &str, max_connections: u32, epic: impl Into<String>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool, epic: epic.into() })
    }

    /// Wraps an existing pool (tests).
    #[must_use]
    pub fn from_pool(pool: PgPool, epic: impl Into<String>) -> Self {
        Self { pool, epic: epic.into() }
    }

    /// Inserts a closed candle; duplicate `(epic, tf, ts)` rows are ignored.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_candle(&self, tf: Timeframe, bar: &Bar) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO candles (epic, tf, ts, open, high, low, close, volume)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (epic, tf, ts) DO NOTHING
            ",
        )
        .bind(&self.epic)
        .bind(tf.as_str())
        .bind(ts_from_ms(bar.t))
        .bind(bar.o)
        .bind(bar.h)
        .bind(bar.l)
        .bind(bar.c)
        .bind(bar.v)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts a signal record and its predictions in one transaction.
    ///
    /// # Errors
    /// Returns an error if any insert fails.
    pub async fn insert_signal(
        &self,
        record: &SignalRecord,
        predictions: &[PredictionRow],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let (signal_id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO signals
                (epic, ts, mode, action, reasons, features, model_version, model_score)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            ",
        )
        .bind(&record.epic)
        .bind(ts_from_ms(record.ts))
        .bind(record.mode.as_str())
        .bind(record.action.label())
        .bind(serde_json::to_value(&record.reasons)?)
        .bind(serde_json::to_value(&record.features)?)
        .bind(&record.model_version)
        .bind(record.model_score)
        .fetch_one(&mut *tx)
        .await?;

        for prediction in predictions {
            sqlx::query(
                r"
                INSERT INTO predictions (signal_id, model_version, p_win, acted, shadow, ts)
                VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(signal_id)
            .bind(&prediction.model_version)
            .bind(prediction.p_win)
            .bind(prediction.acted)
            .bind(prediction.shadow)
            .bind(ts_from_ms(record.ts))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Records an opened (or adopted) position; the deal id absorbs retries.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_trade_open(&self, pos: &Position) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO trades
                (deal_id, epic, mode, direction, size, entry, sl, tp1, tp2, opened_ts, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'OPEN')
            ON CONFLICT (deal_id) DO NOTHING
            ",
        )
        .bind(&pos.deal_id)
        .bind(&self.epic)
        .bind(pos.mode.as_str())
        .bind(pos.direction.as_str())
        .bind(pos.size)
        .bind(pos.entry)
        .bind(pos.sl)
        .bind(pos.tp1)
        .bind(pos.tp2)
        .bind(ts_from_ms(pos.opened_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marks a trade closed with its terminal reason and realized PnL.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn update_trade_close(&self, close: &TradeClose) -> Result<()> {
        sqlx::query(
            r"
            UPDATE trades
            SET closed_ts = $2, close_reason = $3, pnl = $4, status = 'CLOSED'
            WHERE deal_id = $1
            ",
        )
        .bind(&close.deal_id)
        .bind(ts_from_ms(close.ts))
        .bind(&close.reason)
        .bind(close.pnl)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flushes a batch of quote ticks in one transaction; duplicate
    /// `(epic, ts)` rows are ignored.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_quotes_batch(&self, quotes: &[QuoteRecord]) -> Result<()> {
        if quotes.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for quote in quotes {
            sqlx::query(
                r"
                INSERT INTO quotes (epic, ts, bid, ask, spread, status)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (epic, ts) DO NOTHING
                ",
            )
            .bind(&self.epic)
            .bind(ts_from_ms(quote.ts))
            .bind(quote.bid)
            .bind(quote.ask)
            .bind(quote.spread)
            .bind(&quote.status)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
