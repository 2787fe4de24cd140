//! CLI argument parsing using clap.

use clap::{Parser, Subcommand};

/// Rangebreak - range-breakout-pullback trading engine
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log verbosity (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub verbose: String,

    /// Path to the JSON settings file
    #[arg(long, global = true, default_value = "rangebreak.json")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay historical candles through the strategy
    Backtest {
        /// Symbols to backtest, comma-separated (e.g. "BTCUSDT,ETHUSDT")
        #[arg(long, default_value = "BTCUSDT,ETHUSDT,SOLUSDT")]
        symbols: String,
        /// Days of history to replay
        #[arg(long, default_value_t = 7)]
        days: u32,
        /// Output directory for the results JSON
        #[arg(long, default_value = "backtest_results")]
        output_dir: String,
    },

    /// Trade live market data through the simulator
    Live {
        /// Symbol to trade
        #[arg(long, default_value = "BTCUSDT")]
        symbol: String,
        /// Poll interval in milliseconds
        #[arg(long)]
        tick_interval_ms: Option<u64>,
    },
}

/// Split a comma-separated symbol list, dropping empties.
#[must_use]
pub fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
