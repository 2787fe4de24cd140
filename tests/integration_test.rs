//! End-to-end scenarios through the backtest driver.
//!
//! A synthetic market is seeded into the candle store: a long flat warm-up,
//! a consolidation bracket under the 1000 level, an impulsive breakout bar,
//! then a scripted 1m pullback / fill / take-profit sequence. The driver
//! replays it minute by minute exactly as it would replay real history.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use rangebreak::backtest::BacktestDriver;
use rangebreak::config::Settings;
use rangebreak::exchange::{ExchangeError, MarketDataFeed};
use rangebreak::market::{Candle, Timeframe};
use rangebreak::persistence::{CandleStore, MemoryStore, TradeStatus, TradeStore};
use rangebreak::types::{Direction, ExitReason};

const M1: i64 = 60_000;
const M5: i64 = 300_000;

/// The store is fully seeded, so the feed must never be asked for data.
struct NoFeed;

#[async_trait]
impl MarketDataFeed for NoFeed {
    async fn fetch_candles(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        _limit: u32,
        _start_time_ms: Option<i64>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        Ok(Vec::new())
    }

    async fn current_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(dec!(0))
    }
}

fn bar(
    tf: Timeframe,
    ts: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
) -> Candle {
    Candle {
        timestamp: ts,
        symbol: "BTCUSDT".to_string(),
        timeframe: tf,
        open,
        high,
        low,
        close,
        volume,
        taker_buy_volume: None,
    }
}

/// 5m series: 219 flat bars, a 30-bar consolidation bracketing [995, 1000],
/// an impulsive breakout close at 1002, then quiet follow-through.
fn seed_5m() -> Vec<Candle> {
    let mut candles = Vec::new();
    for i in 0..219i64 {
        candles.push(bar(
            Timeframe::M5,
            i * M5,
            dec!(997),
            dec!(998),
            dec!(996),
            dec!(997),
            dec!(100),
        ));
    }
    for i in 219..249i64 {
        let c = if (i - 219) % 2 == 0 {
            // upper half of the bracket, high pinned at 1000
            bar(Timeframe::M5, i * M5, dec!(998), dec!(1000), dec!(997), dec!(998.5), dec!(110))
        } else {
            // lower half, low pinned at 995
            bar(Timeframe::M5, i * M5, dec!(997), dec!(998), dec!(995), dec!(996.5), dec!(100))
        };
        candles.push(c);
    }
    // breakout bar: 85% body, double volume, closes beyond 1000 + 0.1*ATR
    candles.push(bar(
        Timeframe::M5,
        249 * M5,
        dec!(998),
        dec!(1002.5),
        dec!(997.8),
        dec!(1002),
        dec!(200),
    ));
    for i in 250..261i64 {
        candles.push(bar(
            Timeframe::M5,
            i * M5,
            dec!(1001),
            dec!(1002),
            dec!(1000),
            dec!(1001),
            dec!(100),
        ));
    }
    candles
}

/// 1m series covering every minute of the 5m span, with the post-breakout
/// pullback, fill and take-profit bars scripted explicitly.
///
/// With the range high at 1000 and session VWAP far below it, the limit
/// rests at 1000 * 0.998 = 998, the stop at 998 * 0.995 = 993.01 and the
/// target at 998 + 2.5 * 4.99 = 1010.475.
fn seed_1m(fill_and_exit: bool) -> Vec<Candle> {
    let mut candles = Vec::new();
    for m in 0..1250i64 {
        candles.push(bar(
            Timeframe::M1,
            m * M1,
            dec!(997),
            dec!(997.5),
            dec!(996.5),
            dec!(997),
            dec!(20),
        ));
    }
    // breakout follow-through
    candles.push(bar(Timeframe::M1, 1250 * M1, dec!(1001.2), dec!(1002), dec!(1001), dec!(1001.5), dec!(30)));
    // pullback to the broken level: close 1000.5 is within 0.2% of 1000
    candles.push(bar(Timeframe::M1, 1251 * M1, dec!(1001.3), dec!(1001.5), dec!(1000.2), dec!(1000.5), dec!(25)));
    // drift above the limit price
    candles.push(bar(Timeframe::M1, 1252 * M1, dec!(1000.6), dec!(1000.8), dec!(1000.4), dec!(1000.6), dec!(20)));

    if fill_and_exit {
        // dips through the 998 limit
        candles.push(bar(Timeframe::M1, 1253 * M1, dec!(999), dec!(1000), dec!(997.5), dec!(999.5), dec!(40)));
        // spikes through the 1010.475 target
        candles.push(bar(Timeframe::M1, 1254 * M1, dec!(1005), dec!(1011), dec!(1004), dec!(1010), dec!(50)));
        for m in 1255..1305i64 {
            candles.push(bar(Timeframe::M1, m * M1, dec!(1010), dec!(1010.5), dec!(1009.5), dec!(1010), dec!(20)));
        }
    } else {
        // price walks away without ever touching the limit, long enough for
        // the order to expire (120 minutes) and the setup to recycle
        for m in 1253..1390i64 {
            candles.push(bar(Timeframe::M1, m * M1, dec!(1004), dec!(1006), dec!(1003.5), dec!(1005), dec!(20)));
        }
    }
    candles
}

/// Regime filter wide open (the synthetic consolidation has near-zero ADX by
/// construction); friction removed so fills land on exact levels.
fn pipeline_settings() -> Settings {
    let mut settings = Settings::default();
    settings.adx.min = dec!(0);
    settings.slippage = Decimal::ZERO;
    settings
}

async fn seeded_store(fill_and_exit: bool) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.save_candles(&seed_5m()).await.unwrap();
    store.save_candles(&seed_1m(fill_and_exit)).await.unwrap();
    store
}

#[tokio::test]
async fn breakout_long_fills_and_hits_take_profit() {
    let store = seeded_store(true).await;
    let end_ms = 1304 * M1;
    let driver = BacktestDriver::new(
        pipeline_settings(),
        Arc::new(NoFeed),
        store.clone(),
        store.clone(),
    );

    let report = driver
        .run(&["BTCUSDT".to_string()], 0, end_ms)
        .await
        .unwrap();

    assert_eq!(report.total_trades, 1);
    assert_eq!(report.winning_trades, 1);
    assert!(report.final_balance > report.initial_balance);

    let trade = &store.get_trade_history("BTCUSDT", 1).await.unwrap()[0];
    assert_eq!(trade.status, TradeStatus::Closed);
    assert_eq!(trade.direction, Direction::Long);
    // limit = 1000 * 0.998, frictionless fill
    assert_eq!(trade.entry_price, dec!(998));
    assert_eq!(trade.stop_loss, dec!(993.01));
    assert_eq!(trade.take_profit, dec!(1010.475));
    assert_eq!(trade.exit_price, Some(dec!(1010.475)));
    assert_eq!(trade.exit_reason, Some(ExitReason::TakeProfit));
    // gross pnl = (tp - entry) * size
    assert_eq!(trade.pnl, Some(dec!(12.475) * trade.size));

    // no look-ahead: the fill bar follows the pullback, the exit follows the
    // fill, and everything follows the breakout bar's close
    let breakout_close_time = 249 * M5 + M5;
    assert_eq!(trade.entry_time, 1253 * M1);
    assert_eq!(trade.exit_time, Some(1254 * M1));
    assert!(trade.entry_time >= breakout_close_time);
    assert!(trade.exit_time.unwrap() > trade.entry_time);
}

#[tokio::test]
async fn weak_regime_blocks_the_same_breakout() {
    let store = seeded_store(true).await;
    let end_ms = 1304 * M1;
    // default ADX floor of 15: the flat synthetic market never qualifies
    let mut settings = Settings::default();
    settings.slippage = Decimal::ZERO;
    let driver = BacktestDriver::new(settings, Arc::new(NoFeed), store.clone(), store.clone());

    let report = driver
        .run(&["BTCUSDT".to_string()], 0, end_ms)
        .await
        .unwrap();
    assert_eq!(report.total_trades, 0);
    assert_eq!(report.final_balance, report.initial_balance);
}

#[tokio::test]
async fn untouched_limit_order_expires_without_a_trade() {
    let store = seeded_store(false).await;
    let end_ms = 1389 * M1;
    let driver = BacktestDriver::new(
        pipeline_settings(),
        Arc::new(NoFeed),
        store.clone(),
        store.clone(),
    );

    let report = driver
        .run(&["BTCUSDT".to_string()], 0, end_ms)
        .await
        .unwrap();
    assert_eq!(report.total_trades, 0);
    assert!(store.get_open_trades("BTCUSDT").await.unwrap().is_empty());
    assert_eq!(report.final_balance, report.initial_balance);
}

#[tokio::test]
async fn multi_symbol_replay_keeps_symbols_independent() {
    let store = Arc::new(MemoryStore::new());
    store.save_candles(&seed_5m()).await.unwrap();
    store.save_candles(&seed_1m(true)).await.unwrap();
    // second symbol: the same tape, shifted in price, never breaking out
    let eth_5m: Vec<Candle> = seed_5m()
        .into_iter()
        .map(|mut c| {
            c.symbol = "ETHUSDT".to_string();
            if c.timestamp >= 249 * M5 {
                // flatten the breakout bar into the bracket
                c.open = dec!(997);
                c.high = dec!(998);
                c.low = dec!(996);
                c.close = dec!(997);
                c.volume = dec!(100);
            }
            c
        })
        .collect();
    let eth_1m: Vec<Candle> = seed_1m(true)
        .into_iter()
        .map(|mut c| {
            c.symbol = "ETHUSDT".to_string();
            c
        })
        .collect();
    store.save_candles(&eth_5m).await.unwrap();
    store.save_candles(&eth_1m).await.unwrap();

    let driver = BacktestDriver::new(
        pipeline_settings(),
        Arc::new(NoFeed),
        store.clone(),
        store.clone(),
    );
    let report = driver
        .run(
            &["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            0,
            1304 * M1,
        )
        .await
        .unwrap();

    // only the breaking symbol trades
    assert_eq!(report.total_trades, 1);
    let btc = store.get_trade_history("BTCUSDT", 10).await.unwrap();
    let eth = store.get_trade_history("ETHUSDT", 10).await.unwrap();
    assert_eq!(btc.len(), 1);
    assert!(eth.is_empty());
}
