//! Backtest command handler.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;

use crate::backtest::{BacktestDriver, BacktestReport};
use crate::cli::parse_symbols;
use crate::config::Settings;
use crate::exchange::BinanceFuturesClient;
use crate::persistence::{SqliteStore, TradeStore};

const DAY_MS: i64 = 86_400_000;

/// Run a backtest over the last `days` days for the given symbols and write
/// the results JSON into `output_dir`.
pub async fn run_backtest(
    settings: Settings,
    symbols_raw: &str,
    days: u32,
    output_dir: &str,
) -> anyhow::Result<()> {
    let symbols = parse_symbols(symbols_raw);
    if symbols.is_empty() {
        bail!("no symbols given");
    }
    if days == 0 {
        bail!("days must be >= 1");
    }

    let end_ms = chrono::Utc::now().timestamp_millis();
    // Reach further back so the warm-up does not eat into the tested window.
    let warmup_ms = settings.warmup_bars_5m as i64 * 300_000;
    let start_ms = end_ms - days as i64 * DAY_MS - warmup_ms;

    info!(?symbols, days, "Starting backtest");

    let store = Arc::new(
        SqliteStore::connect(&Settings::database_url())
            .await
            .context("candle/trade store unavailable")?,
    );
    store.clear_trades().await?;
    let feed = Arc::new(BinanceFuturesClient::new()?);

    let driver = BacktestDriver::new(settings, feed, store.clone(), store);
    let report = driver.run(&symbols, start_ms, end_ms).await?;

    print_report(&report);
    write_report(&report, output_dir)?;
    Ok(())
}

fn print_report(report: &BacktestReport) {
    info!("--- Backtest Results ---");
    info!("Initial Balance: {}", report.initial_balance);
    info!("Final Balance:   {}", report.final_balance);
    info!("Net Profit:      {}", report.net_profit);
    info!("ROI:             {}%", report.roi_percent);
    info!("Max Drawdown:    {}%", report.max_drawdown_percent);
    info!("Total Trades:    {}", report.total_trades);
    info!("Win Rate:        {}%", report.win_rate_percent);
    info!("Profit Factor:   {}", report.profit_factor);
    for symbol in &report.per_symbol {
        info!(
            "  {}: trades={} pnl={} win_rate={}%",
            symbol.symbol, symbol.stats.total, symbol.stats.total_pnl, symbol.stats.win_rate
        );
    }
    info!("------------------------");
}

fn write_report(report: &BacktestReport, output_dir: &str) -> anyhow::Result<()> {
    fs::create_dir_all(output_dir)?;
    let path = Path::new(output_dir).join("results.json");
    let mut file = File::create(&path)?;
    file.write_all(serde_json::to_string_pretty(report)?.as_bytes())?;
    info!(path = %path.display(), "Results written");
    Ok(())
}
