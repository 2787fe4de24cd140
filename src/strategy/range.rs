//! Range detection over the 5m stream.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::indicators::atr;
use crate::market::Candle;

/// A frozen consolidation bracket. Immutable once created; only a strategy
/// reset discards it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRange {
    pub high: Decimal,
    pub low: Decimal,
    /// Epoch-ms timestamp of the candle that completed the formation window.
    pub formed_at: i64,
}

impl MarketRange {
    #[must_use]
    pub fn size(&self) -> Decimal {
        self.high - self.low
    }

    #[must_use]
    pub fn contains(&self, price: Decimal) -> bool {
        price >= self.low && price <= self.high
    }
}

#[derive(Debug, Clone)]
pub struct RangeDetector {
    window: usize,
    atr_period: usize,
    min_size_multiplier: Decimal,
    max_size_multiplier: Decimal,
}

impl RangeDetector {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            window: settings.range.window,
            atr_period: settings.atr_period,
            min_size_multiplier: settings.range.min_size_multiplier,
            max_size_multiplier: settings.range.max_size_multiplier,
        }
    }

    /// Scan the trailing window for a bracket `[min(low), max(high)]` and
    /// validate its size against the ATR band. Returns `None` when the window
    /// is short, ATR is unavailable, or the size falls outside
    /// `[min_mult * ATR, max_mult * ATR]`.
    #[must_use]
    pub fn detect(&self, candles_5m: &[Candle]) -> Option<MarketRange> {
        if candles_5m.len() < self.window {
            return None;
        }
        let window = &candles_5m[candles_5m.len() - self.window..];
        let atr_value = atr(candles_5m, self.atr_period);
        if atr_value.is_zero() {
            return None;
        }

        let high = window.iter().map(|c| c.high).max()?;
        let low = window.iter().map(|c| c.low).min()?;
        let size = high - low;

        if size < self.min_size_multiplier * atr_value
            || size > self.max_size_multiplier * atr_value
        {
            return None;
        }

        Some(MarketRange {
            high,
            low,
            formed_at: window[window.len() - 1].timestamp,
        })
    }
}
