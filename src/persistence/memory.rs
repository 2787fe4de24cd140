//! In-memory store for paper sessions and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::market::{Candle, Timeframe};
use crate::types::ExitReason;

use super::{
    gross_pnl, CandleStore, NewTrade, StoreError, TradeRecord, TradeStats, TradeStatus, TradeStore,
};

#[derive(Default)]
struct Inner {
    /// (symbol, timeframe) -> timestamp -> candle.
    candles: HashMap<(String, Timeframe), BTreeMap<i64, Candle>>,
    trades: Vec<TradeRecord>,
    next_trade_id: i64,
}

/// Volatile implementation of both store traits.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CandleStore for MemoryStore {
    async fn count_in_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<u64, StoreError> {
        let inner = self.inner.lock().expect("store mutex");
        Ok(inner
            .candles
            .get(&(symbol.to_string(), timeframe))
            .map_or(0, |m| m.range(start_ms..=end_ms).count() as u64))
    }

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, StoreError> {
        let inner = self.inner.lock().expect("store mutex");
        Ok(inner
            .candles
            .get(&(symbol.to_string(), timeframe))
            .map_or_else(Vec::new, |m| {
                m.range(start_ms..=end_ms).map(|(_, c)| c.clone()).collect()
            }))
    }

    async fn get_last_candle(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Candle>, StoreError> {
        let inner = self.inner.lock().expect("store mutex");
        Ok(inner
            .candles
            .get(&(symbol.to_string(), timeframe))
            .and_then(|m| m.values().next_back().cloned()))
    }

    async fn save_candles(&self, candles: &[Candle]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex");
        for candle in candles {
            inner
                .candles
                .entry((candle.symbol.clone(), candle.timeframe))
                .or_default()
                .insert(candle.timestamp, candle.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn save_trade(&self, trade: NewTrade) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex");
        inner.next_trade_id += 1;
        let id = inner.next_trade_id;
        inner.trades.push(TradeRecord {
            id,
            symbol: trade.symbol,
            direction: trade.direction,
            entry_time: trade.entry_time,
            entry_price: trade.entry_price,
            size: trade.size,
            stop_loss: trade.stop_loss,
            take_profit: trade.take_profit,
            exit_time: None,
            exit_price: None,
            exit_reason: None,
            pnl: None,
            pnl_percent: None,
            status: TradeStatus::Open,
        });
        Ok(id)
    }

    async fn close_trade(
        &self,
        id: i64,
        exit_price: Decimal,
        exit_time: i64,
        reason: ExitReason,
    ) -> Result<TradeRecord, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex");
        let trade = inner
            .trades
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(StoreError::TradeNotFound(id))?;

        let pnl = gross_pnl(trade.direction, trade.entry_price, exit_price, trade.size);
        let notional = trade.entry_price * trade.size;
        trade.exit_time = Some(exit_time);
        trade.exit_price = Some(exit_price);
        trade.exit_reason = Some(reason);
        trade.pnl = Some(pnl);
        trade.pnl_percent = Some(if notional.is_zero() {
            Decimal::ZERO
        } else {
            pnl / notional * Decimal::ONE_HUNDRED
        });
        trade.status = TradeStatus::Closed;
        Ok(trade.clone())
    }

    async fn get_open_trades(&self, symbol: &str) -> Result<Vec<TradeRecord>, StoreError> {
        let inner = self.inner.lock().expect("store mutex");
        Ok(inner
            .trades
            .iter()
            .filter(|t| t.symbol == symbol && t.status == TradeStatus::Open)
            .cloned()
            .collect())
    }

    async fn get_trade_history(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<TradeRecord>, StoreError> {
        let inner = self.inner.lock().expect("store mutex");
        Ok(inner
            .trades
            .iter()
            .rev()
            .filter(|t| t.symbol == symbol)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_trade_stats(&self, symbol: &str) -> Result<TradeStats, StoreError> {
        let inner = self.inner.lock().expect("store mutex");
        Ok(TradeStats::from_closed_trades(
            inner.trades.iter().filter(|t| t.symbol == symbol),
        ))
    }

    async fn clear_trades(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex");
        inner.trades.clear();
        inner.next_trade_id = 0;
        Ok(())
    }
}
