//! Live command handler.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::Settings;
use crate::exchange::BinanceFuturesClient;
use crate::live::LiveDriver;
use crate::persistence::SqliteStore;

/// Run the live loop for one symbol until Ctrl-C.
pub async fn run_live(
    mut settings: Settings,
    symbol: &str,
    tick_interval_ms: Option<u64>,
) -> anyhow::Result<()> {
    if let Some(interval) = tick_interval_ms {
        settings.live.tick_interval_ms = interval;
    }
    let symbol = symbol.to_uppercase();
    info!(symbol, tick_interval_ms = settings.live.tick_interval_ms, "Starting live driver");

    let store = Arc::new(
        SqliteStore::connect(&Settings::database_url())
            .await
            .context("candle/trade store unavailable")?,
    );
    let feed = Arc::new(BinanceFuturesClient::new()?);

    let driver = LiveDriver::new(settings, feed, store);
    let stop = driver.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after current tick");
            stop.store(true, Ordering::SeqCst);
        }
    });

    driver.run(&symbol).await
}
