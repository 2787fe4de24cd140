//! Persistence contracts.
//!
//! Two durable stores back the system: the candle store caches downloaded
//! history (idempotent on `(symbol, timeframe, timestamp)`), the trade store
//! records order fills and closes. The backtest driver writes candles, the
//! execution engine writes trades; both go through these traits so the
//! sqlite and in-memory backends are interchangeable.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::market::{Candle, Timeframe};
use crate::types::{Direction, ExitReason};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid stored data: {0}")]
    InvalidData(String),
    #[error("trade not found: {0}")]
    TradeNotFound(i64),
}

/// Lifecycle status of a persisted trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
    Cancelled,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeStatus::Open => write!(f, "OPEN"),
            TradeStatus::Closed => write!(f, "CLOSED"),
            TradeStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(TradeStatus::Open),
            "CLOSED" => Ok(TradeStatus::Closed),
            "CANCELLED" => Ok(TradeStatus::Cancelled),
            other => Err(format!("unknown trade status: {other}")),
        }
    }
}

/// Persisted trade row. `id` is assigned by the store on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: i64,
    pub symbol: String,
    pub direction: Direction,
    pub entry_time: i64,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub exit_time: Option<i64>,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    /// Gross PnL, computed by the store at close time.
    pub pnl: Option<Decimal>,
    pub pnl_percent: Option<Decimal>,
    pub status: TradeStatus,
}

/// Input for [`TradeStore::save_trade`]; everything but the id.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub symbol: String,
    pub direction: Direction,
    pub entry_time: i64,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// Aggregate statistics over closed trades.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeStats {
    pub total: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: Decimal,
    pub total_pnl: Decimal,
    /// Gross profit over gross loss; zero when no losses were taken.
    pub profit_factor: Decimal,
}

impl TradeStats {
    /// Fold closed trades into the aggregate. Shared by every backend so
    /// the numbers cannot diverge between sqlite and memory.
    #[must_use]
    pub fn from_closed_trades<'a>(trades: impl Iterator<Item = &'a TradeRecord>) -> Self {
        let mut total = 0u64;
        let mut wins = 0u64;
        let mut losses = 0u64;
        let mut total_pnl = Decimal::ZERO;
        let mut gross_profit = Decimal::ZERO;
        let mut gross_loss = Decimal::ZERO;

        for trade in trades.filter(|t| t.status == TradeStatus::Closed) {
            let pnl = trade.pnl.unwrap_or_default();
            total += 1;
            total_pnl += pnl;
            if pnl > Decimal::ZERO {
                wins += 1;
                gross_profit += pnl;
            } else if pnl < Decimal::ZERO {
                losses += 1;
                gross_loss += pnl.abs();
            }
        }

        let win_rate = if total == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(wins) / Decimal::from(total) * Decimal::ONE_HUNDRED
        };
        let profit_factor = if gross_loss.is_zero() {
            Decimal::ZERO
        } else {
            gross_profit / gross_loss
        };

        Self {
            total,
            wins,
            losses,
            win_rate,
            total_pnl,
            profit_factor,
        }
    }
}

/// Gross PnL of a closed trade: `sign * size * (exit - entry)`.
#[must_use]
pub fn gross_pnl(direction: Direction, entry: Decimal, exit: Decimal, size: Decimal) -> Decimal {
    direction.pnl_sign() * size * (exit - entry)
}

/// Candle cache, idempotent on `(symbol, timeframe, timestamp)`.
#[async_trait]
pub trait CandleStore: Send + Sync {
    async fn count_in_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<u64, StoreError>;

    /// Candles with `start_ms <= timestamp <= end_ms`, oldest first.
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, StoreError>;

    async fn get_last_candle(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Candle>, StoreError>;

    /// Upsert a batch; re-saving the same candles is a no-op.
    async fn save_candles(&self, candles: &[Candle]) -> Result<(), StoreError>;
}

/// Trade journal.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Insert an open trade, returning its persistent id.
    async fn save_trade(&self, trade: NewTrade) -> Result<i64, StoreError>;

    /// Close a trade; PnL and PnL-percent are computed store-side from the
    /// recorded entry.
    async fn close_trade(
        &self,
        id: i64,
        exit_price: Decimal,
        exit_time: i64,
        reason: ExitReason,
    ) -> Result<TradeRecord, StoreError>;

    async fn get_open_trades(&self, symbol: &str) -> Result<Vec<TradeRecord>, StoreError>;

    /// Most recent trades first, up to `limit`.
    async fn get_trade_history(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<TradeRecord>, StoreError>;

    async fn get_trade_stats(&self, symbol: &str) -> Result<TradeStats, StoreError>;

    async fn clear_trades(&self) -> Result<(), StoreError>;
}
