use clap::Parser;
use dotenv::dotenv;
use tracing::error;
use tracing_subscriber::EnvFilter;

use rangebreak::cli::{Cli, Commands};
use rangebreak::commands;
use rangebreak::config::Settings;

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rangebreak={}", cli.verbose)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = match Settings::load(&cli.config) {
        Ok(settings) => settings,
        Err(err) => {
            error!(%err, "Configuration error");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Backtest {
            symbols,
            days,
            output_dir,
        } => commands::run_backtest(settings, &symbols, days, &output_dir).await,
        Commands::Live {
            symbol,
            tick_interval_ms,
        } => commands::run_live(settings, &symbol, tick_interval_ms).await,
    };

    if let Err(err) = result {
        error!(error = %format!("{err:#}"), "Fatal");
        std::process::exit(1);
    }
}
