//! Pullback validation on the 1m stream.
//!
//! After a confirmed breakout the strategy waits for price to come back to
//! the broken level (or the session VWAP when it sits beyond it) without
//! giving back too much of the impulse.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::market::Candle;
use crate::types::Direction;

use super::breakout::BreakoutSignal;
use super::range::MarketRange;

/// Candle pattern observed on the validating 1m bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullbackPattern {
    /// Rejection wick at least twice the body against the pullback.
    Pinbar,
    /// Strong directional body (engulfing approximation).
    Engulfing,
    None,
}

/// Accepted pullback with the level the entry order should work from.
#[derive(Debug, Clone, PartialEq)]
pub struct PullbackCheck {
    /// Entry anchor: `max(range.high, vwap)` long, `min(range.low, vwap)` short.
    pub level: Decimal,
    pub vwap: Decimal,
    /// Penetration beyond the broken level as percent of the impulse.
    pub depth_percent: Decimal,
    pub pattern: PullbackPattern,
}

#[derive(Debug, Clone)]
pub struct PullbackValidator {
    max_depth_percent: Decimal,
    price_tolerance_percent: Decimal,
}

impl PullbackValidator {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_depth_percent: settings.pullback.max_depth_percent,
            price_tolerance_percent: settings.pullback.price_tolerance_percent,
        }
    }

    /// Validate the latest closed 1m candle against the breakout.
    ///
    /// LONG: the bar's low may penetrate at most `max_depth_percent` of the
    /// impulse below the broken high, and the close must sit within
    /// `price_tolerance_percent` of `max(range.high, vwap)`. SHORT symmetric.
    #[must_use]
    pub fn validate(
        &self,
        candles_1m: &[Candle],
        breakout: &BreakoutSignal,
        range: &MarketRange,
        session_vwap: Decimal,
    ) -> Option<PullbackCheck> {
        let current = candles_1m.last()?;
        if breakout.impulse.is_zero() {
            return None;
        }

        let (level, penetration) = match breakout.direction {
            Direction::Long => {
                let level = range.high.max(session_vwap);
                (level, range.high - current.low)
            }
            Direction::Short => {
                let level = if session_vwap > Decimal::ZERO {
                    range.low.min(session_vwap)
                } else {
                    range.low
                };
                (level, current.high - range.low)
            }
        };
        if level <= Decimal::ZERO {
            return None;
        }

        let depth_percent =
            penetration.max(Decimal::ZERO) / breakout.impulse * Decimal::ONE_HUNDRED;
        if depth_percent > self.max_depth_percent {
            return None;
        }

        let proximity = (current.close - level).abs() / level * Decimal::ONE_HUNDRED;
        if proximity > self.price_tolerance_percent {
            return None;
        }

        Some(PullbackCheck {
            level,
            vwap: session_vwap,
            depth_percent,
            pattern: classify_pattern(current, breakout.direction),
        })
    }
}

/// Optional confirmation pattern on the validating bar.
fn classify_pattern(candle: &Candle, direction: Direction) -> PullbackPattern {
    let body = candle.body();
    let rejection_wick = match direction {
        Direction::Long => candle.lower_wick(),
        Direction::Short => candle.upper_wick(),
    };
    if body > Decimal::ZERO && rejection_wick > Decimal::TWO * body {
        return PullbackPattern::Pinbar;
    }
    if candle.body_percent() > rust_decimal_macros::dec!(70) {
        return PullbackPattern::Engulfing;
    }
    PullbackPattern::None
}
