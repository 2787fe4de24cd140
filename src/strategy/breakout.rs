//! Breakout detection against a frozen range.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::market::Candle;
use crate::types::Direction;

use super::range::MarketRange;

/// A confirmed directional break of a frozen range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutSignal {
    pub direction: Direction,
    /// Distance from the broken boundary to the break close.
    pub impulse: Decimal,
    pub impulse_high: Decimal,
    pub impulse_low: Decimal,
    /// Epoch-ms timestamp of the break candle.
    pub timestamp: i64,
    pub break_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct BreakoutDetector {
    atr_multiplier: Decimal,
    min_body_percent: Decimal,
    min_volume_multiplier: Decimal,
}

impl BreakoutDetector {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            atr_multiplier: settings.breakout.atr_multiplier,
            min_body_percent: settings.breakout.min_body_percent,
            min_volume_multiplier: settings.breakout.min_volume_multiplier,
        }
    }

    /// Test a just-closed 5m candle against the frozen range.
    ///
    /// LONG: `close > high + atr_mult * ATR`, body% and volume confirmed.
    /// SHORT is symmetric below the low. Returns `None` when no side breaks
    /// or confirmation fails.
    #[must_use]
    pub fn detect(
        &self,
        candle: &Candle,
        range: &MarketRange,
        atr_value: Decimal,
        volume_sma: Decimal,
    ) -> Option<BreakoutSignal> {
        let margin = self.atr_multiplier * atr_value;

        let direction = if candle.close > range.high + margin {
            Direction::Long
        } else if candle.close < range.low - margin {
            Direction::Short
        } else {
            return None;
        };

        if candle.body_percent() < self.min_body_percent {
            return None;
        }
        if candle.volume <= self.min_volume_multiplier * volume_sma {
            return None;
        }

        let boundary = match direction {
            Direction::Long => range.high,
            Direction::Short => range.low,
        };

        Some(BreakoutSignal {
            direction,
            impulse: (candle.close - boundary).abs(),
            impulse_high: candle.high,
            impulse_low: candle.low,
            timestamp: candle.timestamp,
            break_price: candle.close,
        })
    }
}
