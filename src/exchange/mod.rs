//! Exchange abstraction layer.
//!
//! Drivers consume market data through [`MarketDataFeed`]; live order
//! routing goes through [`ExecutionGateway`]. Implementations classify
//! failures as transient or permanent so the shared retry helper knows what
//! is worth repeating.

pub mod binance;

pub use binance::BinanceFuturesClient;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::market::{Candle, Timeframe};
use crate::types::Direction;

/// Maximum candles one `fetch_candles` call may request.
pub const MAX_CANDLES_PER_FETCH: u32 = 1000;
/// Per-call HTTP timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Retry attempts for transient failures.
pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Network(String),
    #[error("http status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),
}

impl ExchangeError {
    /// Transient failures are retried with back-off; the rest surface
    /// immediately.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ExchangeError::Network(_) => true,
            ExchangeError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        ExchangeError::Network(err.to_string())
    }
}

/// Retry a transient-failing operation with linear back-off (1s, 2s, 3s).
pub async fn with_retry<T, F, Fut>(label: &str, operation: F) -> Result<T, ExchangeError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    let mut last_error = None;
    for attempt in 1..=MAX_RETRIES {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                warn!(label, attempt, %err, "Transient exchange error, backing off");
                last_error = Some(err);
                if attempt < MAX_RETRIES {
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(ExchangeError::RetriesExhausted(format!(
        "{label}: {}",
        last_error.map_or_else(|| "unknown".to_string(), |e| e.to_string())
    )))
}

/// Read-only market data source.
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Fetch up to `limit` (≤ 1000) candles, oldest first. With
    /// `start_time_ms` set, the batch starts at the first candle whose open
    /// time is at or after it; otherwise the most recent candles return.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
        start_time_ms: Option<i64>,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Latest traded price (live mode only).
    async fn current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;
}

/// Order routing surface used by live execution-gateway variants. The
/// backtest never touches this; it fills against the internal simulator.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn place_order(
        &self,
        symbol: &str,
        direction: Direction,
        quantity: Decimal,
        limit_price: Option<Decimal>,
    ) -> Result<String, ExchangeError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;

    /// Signed position size; zero when flat.
    async fn get_position(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    async fn close_position(&self, symbol: &str) -> Result<(), ExchangeError>;
}
