//! Sqlite-backed candle and trade store.
//!
//! Prices are stored as TEXT and re-parsed into `Decimal` so no precision is
//! lost through the database round trip. Candle upserts are idempotent on
//! the `(symbol, timeframe, timestamp)` primary key.

use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::info;

use crate::market::{Candle, Timeframe};
use crate::types::{Direction, ExitReason};

use super::{
    gross_pnl, CandleStore, NewTrade, StoreError, TradeRecord, TradeStats, TradeStatus, TradeStore,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and run schema migration. The database file is created when
    /// missing.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StoreError::Database)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(url = database_url, "Candle/trade store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                symbol            TEXT    NOT NULL,
                timeframe         TEXT    NOT NULL,
                timestamp         INTEGER NOT NULL,
                open              TEXT    NOT NULL,
                high              TEXT    NOT NULL,
                low               TEXT    NOT NULL,
                close             TEXT    NOT NULL,
                volume            TEXT    NOT NULL,
                taker_buy_volume  TEXT,
                PRIMARY KEY (symbol, timeframe, timestamp)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol       TEXT    NOT NULL,
                direction    TEXT    NOT NULL,
                entry_time   INTEGER NOT NULL,
                entry_price  TEXT    NOT NULL,
                size         TEXT    NOT NULL,
                stop_loss    TEXT    NOT NULL,
                take_profit  TEXT    NOT NULL,
                exit_time    INTEGER,
                exit_price   TEXT,
                exit_reason  TEXT,
                pnl          TEXT,
                pnl_percent  TEXT,
                status       TEXT    NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw).map_err(|e| StoreError::InvalidData(format!("decimal '{raw}': {e}")))
}

fn candle_from_row(row: &SqliteRow) -> Result<Candle, StoreError> {
    let timeframe: String = row.try_get("timeframe")?;
    let taker: Option<String> = row.try_get("taker_buy_volume")?;
    Ok(Candle {
        timestamp: row.try_get("timestamp")?,
        symbol: row.try_get("symbol")?,
        timeframe: timeframe.parse().map_err(StoreError::InvalidData)?,
        open: parse_decimal(&row.try_get::<String, _>("open")?)?,
        high: parse_decimal(&row.try_get::<String, _>("high")?)?,
        low: parse_decimal(&row.try_get::<String, _>("low")?)?,
        close: parse_decimal(&row.try_get::<String, _>("close")?)?,
        volume: parse_decimal(&row.try_get::<String, _>("volume")?)?,
        taker_buy_volume: taker.as_deref().map(parse_decimal).transpose()?,
    })
}

fn trade_from_row(row: &SqliteRow) -> Result<TradeRecord, StoreError> {
    let direction: String = row.try_get("direction")?;
    let status: String = row.try_get("status")?;
    let exit_price: Option<String> = row.try_get("exit_price")?;
    let exit_reason: Option<String> = row.try_get("exit_reason")?;
    let pnl: Option<String> = row.try_get("pnl")?;
    let pnl_percent: Option<String> = row.try_get("pnl_percent")?;
    Ok(TradeRecord {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        direction: Direction::from_str(&direction).map_err(StoreError::InvalidData)?,
        entry_time: row.try_get("entry_time")?,
        entry_price: parse_decimal(&row.try_get::<String, _>("entry_price")?)?,
        size: parse_decimal(&row.try_get::<String, _>("size")?)?,
        stop_loss: parse_decimal(&row.try_get::<String, _>("stop_loss")?)?,
        take_profit: parse_decimal(&row.try_get::<String, _>("take_profit")?)?,
        exit_time: row.try_get("exit_time")?,
        exit_price: exit_price.as_deref().map(parse_decimal).transpose()?,
        exit_reason: exit_reason
            .as_deref()
            .map(|r| ExitReason::from_str(r).map_err(StoreError::InvalidData))
            .transpose()?,
        pnl: pnl.as_deref().map(parse_decimal).transpose()?,
        pnl_percent: pnl_percent.as_deref().map(parse_decimal).transpose()?,
        status: TradeStatus::from_str(&status).map_err(StoreError::InvalidData)?,
    })
}

#[async_trait]
impl CandleStore for SqliteStore {
    async fn count_in_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM candles
             WHERE symbol = ? AND timeframe = ? AND timestamp BETWEEN ? AND ?",
        )
        .bind(symbol)
        .bind(timeframe.token())
        .bind(start_ms)
        .bind(end_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("cnt")? as u64)
    }

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM candles
             WHERE symbol = ? AND timeframe = ? AND timestamp BETWEEN ? AND ?
             ORDER BY timestamp ASC",
        )
        .bind(symbol)
        .bind(timeframe.token())
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(candle_from_row).collect()
    }

    async fn get_last_candle(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Candle>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM candles WHERE symbol = ? AND timeframe = ?
             ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(symbol)
        .bind(timeframe.token())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(candle_from_row).transpose()
    }

    async fn save_candles(&self, candles: &[Candle]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for candle in candles {
            sqlx::query(
                r#"
                INSERT INTO candles
                    (symbol, timeframe, timestamp, open, high, low, close, volume, taker_buy_volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (symbol, timeframe, timestamp) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    taker_buy_volume = excluded.taker_buy_volume
                "#,
            )
            .bind(&candle.symbol)
            .bind(candle.timeframe.token())
            .bind(candle.timestamp)
            .bind(candle.open.to_string())
            .bind(candle.high.to_string())
            .bind(candle.low.to_string())
            .bind(candle.close.to_string())
            .bind(candle.volume.to_string())
            .bind(candle.taker_buy_volume.map(|v| v.to_string()))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl TradeStore for SqliteStore {
    async fn save_trade(&self, trade: NewTrade) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO trades
                (symbol, direction, entry_time, entry_price, size, stop_loss, take_profit, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&trade.symbol)
        .bind(trade.direction.to_string())
        .bind(trade.entry_time)
        .bind(trade.entry_price.to_string())
        .bind(trade.size.to_string())
        .bind(trade.stop_loss.to_string())
        .bind(trade.take_profit.to_string())
        .bind(TradeStatus::Open.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn close_trade(
        &self,
        id: i64,
        exit_price: Decimal,
        exit_time: i64,
        reason: ExitReason,
    ) -> Result<TradeRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM trades WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::TradeNotFound(id))?;
        let mut trade = trade_from_row(&row)?;

        let pnl = gross_pnl(trade.direction, trade.entry_price, exit_price, trade.size);
        let notional = trade.entry_price * trade.size;
        let pnl_percent = if notional.is_zero() {
            Decimal::ZERO
        } else {
            pnl / notional * Decimal::ONE_HUNDRED
        };

        sqlx::query(
            r#"
            UPDATE trades SET
                exit_time = ?, exit_price = ?, exit_reason = ?,
                pnl = ?, pnl_percent = ?, status = ?
            WHERE id = ?
            "#,
        )
        .bind(exit_time)
        .bind(exit_price.to_string())
        .bind(reason.to_string())
        .bind(pnl.to_string())
        .bind(pnl_percent.to_string())
        .bind(TradeStatus::Closed.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;

        trade.exit_time = Some(exit_time);
        trade.exit_price = Some(exit_price);
        trade.exit_reason = Some(reason);
        trade.pnl = Some(pnl);
        trade.pnl_percent = Some(pnl_percent);
        trade.status = TradeStatus::Closed;
        Ok(trade)
    }

    async fn get_open_trades(&self, symbol: &str) -> Result<Vec<TradeRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM trades WHERE symbol = ? AND status = ?")
            .bind(symbol)
            .bind(TradeStatus::Open.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn get_trade_history(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<TradeRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM trades WHERE symbol = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn get_trade_stats(&self, symbol: &str) -> Result<TradeStats, StoreError> {
        let rows = sqlx::query("SELECT * FROM trades WHERE symbol = ?")
            .bind(symbol)
            .fetch_all(&self.pool)
            .await?;
        let trades = rows
            .iter()
            .map(trade_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TradeStats::from_closed_trades(trades.iter()))
    }

    async fn clear_trades(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM trades").execute(&self.pool).await?;
        Ok(())
    }
}
