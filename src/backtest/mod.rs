//! Backtest driver.
//!
//! Ensures candle coverage in the store (downloading gaps from the feed),
//! then replays history behind a single minute-granular cursor. Every symbol
//! finishes its (onMarketData → generateSignal → placeOrder) tick for minute
//! `t` before the cursor advances, and the strategy only ever sees bars that
//! closed at or before `t`, never the bar being executed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Settings;
use crate::exchange::{ExchangeError, MarketDataFeed, MAX_CANDLES_PER_FETCH};
use crate::execution::ExecutionEngine;
use crate::market::{Candle, Timeframe, MINUTE_MS};
use crate::persistence::{CandleStore, TradeStats, TradeStore};
use crate::portfolio::PortfolioManager;
use crate::strategy::{utc_day_start_ms, RangeBreakStrategy};
use crate::types::ExitReason;

/// Minimum stored coverage before the driver skips the gap download.
const COVERAGE_THRESHOLD: f64 = 0.95;
/// 5m bars handed to the strategy each tick.
const WINDOW_5M: usize = 300;
/// 1m bars handed to the strategy each tick (one UTC day for session VWAP).
const WINDOW_1M: usize = 1440;

/// Aggregate outcome of one backtest run.
#[derive(Debug, Serialize)]
pub struct BacktestReport {
    pub start_ms: i64,
    pub end_ms: i64,
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    pub net_profit: Decimal,
    pub roi_percent: Decimal,
    pub max_drawdown_percent: Decimal,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate_percent: Decimal,
    pub profit_factor: Decimal,
    pub per_symbol: Vec<SymbolReport>,
}

#[derive(Debug, Serialize)]
pub struct SymbolReport {
    pub symbol: String,
    #[serde(flatten)]
    pub stats: TradeStats,
}

struct SymbolData {
    candles_1m: Vec<Candle>,
    candles_5m: Vec<Candle>,
    /// Count of 1m candles with `timestamp <= cursor`.
    idx_1m: usize,
    /// Count of 5m candles whose close time is `<= cursor`.
    idx_5m_closed: usize,
}

pub struct BacktestDriver {
    settings: Settings,
    feed: Arc<dyn MarketDataFeed>,
    candle_store: Arc<dyn CandleStore>,
    trade_store: Arc<dyn TradeStore>,
    portfolio: Arc<Mutex<PortfolioManager>>,
}

impl BacktestDriver {
    #[must_use]
    pub fn new(
        settings: Settings,
        feed: Arc<dyn MarketDataFeed>,
        candle_store: Arc<dyn CandleStore>,
        trade_store: Arc<dyn TradeStore>,
    ) -> Self {
        let portfolio = Arc::new(Mutex::new(PortfolioManager::new(&settings)));
        Self {
            settings,
            feed,
            candle_store,
            trade_store,
            portfolio,
        }
    }

    /// Run the backtest over `[start_ms, end_ms]` for all symbols.
    pub async fn run(
        &self,
        symbols: &[String],
        start_ms: i64,
        end_ms: i64,
    ) -> anyhow::Result<BacktestReport> {
        if symbols.is_empty() {
            bail!("no symbols given");
        }
        let mut sorted: Vec<String> = symbols.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut data: BTreeMap<String, SymbolData> = BTreeMap::new();
        for symbol in &sorted {
            for timeframe in [Timeframe::M1, Timeframe::M5] {
                self.ensure_history(symbol, timeframe, start_ms, end_ms)
                    .await
                    .with_context(|| format!("history for {symbol} {timeframe}"))?;
            }
            let candles_1m = self
                .candle_store
                .get_candles(symbol, Timeframe::M1, start_ms, end_ms)
                .await?;
            let candles_5m = self
                .candle_store
                .get_candles(symbol, Timeframe::M5, start_ms, end_ms)
                .await?;
            if candles_1m.is_empty() || candles_5m.is_empty() {
                bail!("no stored candles for {symbol}");
            }
            info!(
                symbol,
                candles_1m = candles_1m.len(),
                candles_5m = candles_5m.len(),
                "History loaded"
            );
            data.insert(
                symbol.clone(),
                SymbolData {
                    candles_1m,
                    candles_5m,
                    idx_1m: 0,
                    idx_5m_closed: 0,
                },
            );
        }

        let min_time = data
            .values()
            .map(|d| d.candles_5m[0].timestamp)
            .min()
            .expect("non-empty");
        let max_time = data
            .values()
            .map(|d| d.candles_1m[d.candles_1m.len() - 1].timestamp)
            .max()
            .expect("non-empty");
        let warmup_ms = self.settings.warmup_bars_5m as i64 * Timeframe::M5.duration_ms();
        let cursor_start = min_time + warmup_ms;
        info!(
            cursor_start,
            max_time,
            minutes = (max_time - cursor_start) / MINUTE_MS,
            "Starting replay"
        );

        let mut strategy = RangeBreakStrategy::new(self.settings.clone());
        let mut engine = ExecutionEngine::new(
            self.settings.clone(),
            self.portfolio.clone(),
            self.trade_store.clone(),
        );

        let mut last_day = i64::MIN;
        let mut cursor = cursor_start;
        while cursor <= max_time {
            let day = utc_day_start_ms(cursor);
            if day != last_day {
                let mut portfolio = self.portfolio.lock().expect("portfolio mutex");
                portfolio.reset_daily_stats(cursor);
                portfolio.snapshot_equity(cursor);
                last_day = day;
            }

            for (symbol, series) in data.iter_mut() {
                Self::tick(&mut strategy, &mut engine, symbol, series, cursor).await?;
            }
            cursor += MINUTE_MS;
        }

        // Realize whatever is still open so the report reflects it.
        for symbol in &sorted {
            engine
                .force_close_position(symbol, ExitReason::ForceClosed)
                .await?;
        }

        self.build_report(&sorted, start_ms, end_ms).await
    }

    /// One (symbol, minute) step in the fixed order:
    /// onMarketData → generateSignal → placeOrder.
    async fn tick(
        strategy: &mut RangeBreakStrategy,
        engine: &mut ExecutionEngine,
        symbol: &str,
        series: &mut SymbolData,
        cursor: i64,
    ) -> anyhow::Result<()> {
        while series.idx_1m < series.candles_1m.len()
            && series.candles_1m[series.idx_1m].timestamp <= cursor
        {
            series.idx_1m += 1;
        }
        while series.idx_5m_closed < series.candles_5m.len()
            && series.candles_5m[series.idx_5m_closed].close_time() <= cursor
        {
            series.idx_5m_closed += 1;
        }

        // Execution sees the bar that opened at exactly `cursor`.
        let current_1m = series
            .idx_1m
            .checked_sub(1)
            .and_then(|i| series.candles_1m.get(i))
            .filter(|c| c.timestamp == cursor);
        if let Some(candle) = current_1m {
            engine.on_market_data(candle).await?;
        }

        // The strategy sees only bars strictly before the execution bar.
        let strategy_1m_end = if current_1m.is_some() {
            series.idx_1m - 1
        } else {
            series.idx_1m
        };
        let window_1m = tail(&series.candles_1m[..strategy_1m_end], WINDOW_1M);
        let window_5m = tail(&series.candles_5m[..series.idx_5m_closed], WINDOW_5M);

        let signal =
            strategy.generate_signal(symbol, window_5m, window_1m, cursor, engine.snapshot(symbol));
        if let Some(signal) = signal {
            match engine.place_order(signal).await {
                Ok(()) => strategy.mark_order_placed(symbol, cursor),
                Err(err) => warn!(symbol, %err, "Signal not placed"),
            }
        }
        Ok(())
    }

    /// Make sure the store covers `[start_ms, end_ms]`; download the gap
    /// from the feed when coverage is below 95% of the expected bar count.
    /// Download failures leave the stored data in charge.
    pub async fn ensure_history(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> anyhow::Result<()> {
        let expected = ((end_ms - start_ms) / timeframe.duration_ms()).max(0) as u64 + 1;
        let stored = self
            .candle_store
            .count_in_range(symbol, timeframe, start_ms, end_ms)
            .await?;
        if stored as f64 >= expected as f64 * COVERAGE_THRESHOLD {
            info!(symbol, tf = %timeframe, stored, expected, "Coverage sufficient");
            return Ok(());
        }

        // Resume from the most recent stored candle when it helps.
        let mut cursor = match self.candle_store.get_last_candle(symbol, timeframe).await? {
            Some(last) if last.timestamp > start_ms => last.timestamp,
            _ => start_ms,
        };
        info!(symbol, tf = %timeframe, stored, expected, from = cursor, "Downloading history");

        while cursor <= end_ms {
            let batch = match self
                .feed
                .fetch_candles(symbol, timeframe, MAX_CANDLES_PER_FETCH, Some(cursor))
                .await
            {
                Ok(batch) => batch,
                Err(err @ ExchangeError::RetriesExhausted(_)) => {
                    warn!(symbol, %err, "Download aborted, continuing with stored data");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            if batch.is_empty() {
                break;
            }
            let last_ts = batch[batch.len() - 1].timestamp;
            self.candle_store.save_candles(&batch).await?;
            if last_ts < cursor + timeframe.duration_ms() {
                break;
            }
            cursor = last_ts + timeframe.duration_ms();
        }
        Ok(())
    }

    async fn build_report(
        &self,
        symbols: &[String],
        start_ms: i64,
        end_ms: i64,
    ) -> anyhow::Result<BacktestReport> {
        let mut per_symbol = Vec::new();
        let mut all_trades = Vec::new();
        for symbol in symbols {
            let stats = self.trade_store.get_trade_stats(symbol).await?;
            all_trades.extend(self.trade_store.get_trade_history(symbol, u32::MAX).await?);
            per_symbol.push(SymbolReport {
                symbol: symbol.clone(),
                stats,
            });
        }
        let overall = TradeStats::from_closed_trades(all_trades.iter());

        let (initial_balance, final_balance, max_drawdown) = {
            let portfolio = self.portfolio.lock().expect("portfolio mutex");
            (
                self.settings.initial_balance,
                portfolio.balance(),
                portfolio.max_drawdown(),
            )
        };
        let net_profit = final_balance - initial_balance;
        let roi_percent = if initial_balance.is_zero() {
            Decimal::ZERO
        } else {
            net_profit / initial_balance * Decimal::ONE_HUNDRED
        };

        Ok(BacktestReport {
            start_ms,
            end_ms,
            initial_balance,
            final_balance,
            net_profit,
            roi_percent,
            max_drawdown_percent: max_drawdown * Decimal::ONE_HUNDRED,
            total_trades: overall.total,
            winning_trades: overall.wins,
            losing_trades: overall.losses,
            win_rate_percent: overall.win_rate,
            profit_factor: overall.profit_factor,
            per_symbol,
        })
    }
}

/// Last `limit` elements of a slice.
fn tail<T>(slice: &[T], limit: usize) -> &[T] {
    &slice[slice.len().saturating_sub(limit)..]
}
