//! Live driver.
//!
//! Polls the exchange on a fixed interval, maintains sliding candle buffers
//! per timeframe, and feeds the same strategy/execution path the backtest
//! uses, restricted to fully closed bars. A failed tick is logged, backed
//! off, and the loop continues; only the stop flag ends it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::exchange::MarketDataFeed;
use crate::execution::ExecutionEngine;
use crate::market::{CandleBuffer, Timeframe};
use crate::persistence::TradeStore;
use crate::portfolio::PortfolioManager;
use crate::strategy::RangeBreakStrategy;

pub struct LiveDriver {
    settings: Settings,
    feed: Arc<dyn MarketDataFeed>,
    trade_store: Arc<dyn TradeStore>,
    portfolio: Arc<Mutex<PortfolioManager>>,
    stop: Arc<AtomicBool>,
}

impl LiveDriver {
    #[must_use]
    pub fn new(
        settings: Settings,
        feed: Arc<dyn MarketDataFeed>,
        trade_store: Arc<dyn TradeStore>,
    ) -> Self {
        let portfolio = Arc::new(Mutex::new(PortfolioManager::new(&settings)));
        Self {
            settings,
            feed,
            trade_store,
            portfolio,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for requesting a graceful stop from another task.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run the polling loop for one symbol until the stop flag is set.
    pub async fn run(&self, symbol: &str) -> anyhow::Result<()> {
        let history = self.settings.live.history_limit;
        let mut buffer_1m = CandleBuffer::new(history);
        let mut buffer_5m = CandleBuffer::new(history);

        // Initial load so indicators have context from the first tick.
        let initial_1m = self
            .feed
            .fetch_candles(symbol, Timeframe::M1, history as u32, None)
            .await
            .context("initial 1m load")?;
        let initial_5m = self
            .feed
            .fetch_candles(symbol, Timeframe::M5, history as u32, None)
            .await
            .context("initial 5m load")?;
        buffer_1m.extend(initial_1m);
        buffer_5m.extend(initial_5m);
        info!(
            symbol,
            candles_1m = buffer_1m.len(),
            candles_5m = buffer_5m.len(),
            "Live buffers primed"
        );

        let mut strategy = RangeBreakStrategy::new(self.settings.clone());
        let mut engine = ExecutionEngine::new(
            self.settings.clone(),
            self.portfolio.clone(),
            self.trade_store.clone(),
        );

        let tick_interval = Duration::from_millis(self.settings.live.tick_interval_ms);
        let backoff = Duration::from_millis(self.settings.live.error_backoff_ms);
        let mut last_processed_1m = i64::MIN;

        while !self.stop.load(Ordering::SeqCst) {
            match self
                .tick(
                    symbol,
                    &mut buffer_1m,
                    &mut buffer_5m,
                    &mut strategy,
                    &mut engine,
                    &mut last_processed_1m,
                )
                .await
            {
                Ok(()) => tokio::time::sleep(tick_interval).await,
                Err(err) => {
                    error!(symbol, error = %format!("{err:#}"), "Tick failed, backing off");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        let stats = self.trade_store.get_trade_stats(symbol).await?;
        info!(
            symbol,
            trades = stats.total,
            wins = stats.wins,
            losses = stats.losses,
            total_pnl = %stats.total_pnl,
            "Stop requested, live loop ending"
        );
        Ok(())
    }

    async fn tick(
        &self,
        symbol: &str,
        buffer_1m: &mut CandleBuffer,
        buffer_5m: &mut CandleBuffer,
        strategy: &mut RangeBreakStrategy,
        engine: &mut ExecutionEngine,
        last_processed_1m: &mut i64,
    ) -> anyhow::Result<()> {
        // Two bars cover the forming candle plus a possibly just-closed one.
        let fresh_1m = self
            .feed
            .fetch_candles(symbol, Timeframe::M1, 2, None)
            .await?;
        let fresh_5m = self
            .feed
            .fetch_candles(symbol, Timeframe::M5, 2, None)
            .await?;
        buffer_1m.extend(fresh_1m);
        buffer_5m.extend(fresh_5m);

        let now_ms = chrono::Utc::now().timestamp_millis();
        self.portfolio
            .lock()
            .expect("portfolio mutex")
            .reset_daily_stats(now_ms);

        // Advance execution once per newly closed 1m bar.
        let Some(latest_closed) = buffer_1m.last_closed_at(now_ms).cloned() else {
            return Ok(());
        };
        if latest_closed.timestamp <= *last_processed_1m {
            return Ok(());
        }
        *last_processed_1m = latest_closed.timestamp;
        engine.on_market_data(&latest_closed).await?;

        // Strategy sees closed bars strictly before the execution bar.
        let closed_5m = buffer_5m.closed_at(latest_closed.timestamp);
        let mut closed_1m = buffer_1m.closed_at(latest_closed.timestamp);
        closed_1m.retain(|c| c.timestamp < latest_closed.timestamp);

        let signal = strategy.generate_signal(
            symbol,
            &closed_5m,
            &closed_1m,
            latest_closed.timestamp,
            engine.snapshot(symbol),
        );
        if let Some(signal) = signal {
            match engine.place_order(signal).await {
                Ok(()) => strategy.mark_order_placed(symbol, latest_closed.timestamp),
                Err(err) => warn!(symbol, %err, "Signal not placed"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeError;
    use crate::market::Candle;
    use crate::persistence::MemoryStore;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct StaticFeed;

    #[async_trait]
    impl MarketDataFeed for StaticFeed {
        async fn fetch_candles(
            &self,
            symbol: &str,
            timeframe: Timeframe,
            limit: u32,
            _start_time_ms: Option<i64>,
        ) -> Result<Vec<Candle>, ExchangeError> {
            let now = chrono::Utc::now().timestamp_millis();
            let dur = timeframe.duration_ms();
            let aligned = now - now % dur;
            Ok((0..limit.min(5) as i64)
                .rev()
                .map(|back| Candle {
                    timestamp: aligned - back * dur,
                    symbol: symbol.to_string(),
                    timeframe,
                    open: dec!(100),
                    high: dec!(101),
                    low: dec!(99),
                    close: dec!(100),
                    volume: dec!(10),
                    taker_buy_volume: None,
                })
                .collect())
        }

        async fn current_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
            Ok(dec!(100))
        }
    }

    #[tokio::test]
    async fn stop_flag_ends_loop() {
        let store = Arc::new(MemoryStore::new());
        let mut settings = Settings::default();
        settings.live.tick_interval_ms = 10;
        let driver = LiveDriver::new(settings, Arc::new(StaticFeed), store);
        let stop = driver.stop_handle();

        let handle = tokio::spawn(async move { driver.run("BTCUSDT").await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.store(true, Ordering::SeqCst);
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop must observe the stop flag")
            .expect("join");
        assert!(result.is_ok());
    }
}
