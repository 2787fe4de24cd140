//! Market data model.
//!
//! Candles are created by a driver (backtest loader or live poller) and are
//! read-only afterwards. Derived attributes (body, wicks, taker split) are
//! computed on demand so the stored record stays minimal.

mod buffer;

pub use buffer::CandleBuffer;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Milliseconds in one minute.
pub const MINUTE_MS: i64 = 60_000;

/// Candle timeframe tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
}

impl Timeframe {
    /// Duration of one bar in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        match self {
            Timeframe::M1 => MINUTE_MS,
            Timeframe::M5 => 5 * MINUTE_MS,
        }
    }

    /// Exchange interval token ("1m", "5m").
    #[must_use]
    pub fn token(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            other => Err(format!("unsupported timeframe: {other}")),
        }
    }
}

/// Immutable OHLCV record.
///
/// `timestamp` is the bar open time in epoch milliseconds; the bar is closed
/// once `timestamp + timeframe.duration_ms()` has passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Volume bought by takers, when the venue reports it.
    pub taker_buy_volume: Option<Decimal>,
}

impl Candle {
    /// Bar close time in epoch milliseconds.
    #[must_use]
    pub fn close_time(&self) -> i64 {
        self.timestamp + self.timeframe.duration_ms()
    }

    /// Whether this bar has fully closed at wall-clock `now_ms`.
    #[must_use]
    pub fn is_closed_at(&self, now_ms: i64) -> bool {
        self.close_time() <= now_ms
    }

    /// Absolute candle body `|close - open|`.
    #[must_use]
    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    /// Body as a percentage of the full candle range. Zero-range candles
    /// (high == low) report 0.
    #[must_use]
    pub fn body_percent(&self) -> Decimal {
        let range = self.high - self.low;
        if range.is_zero() {
            return Decimal::ZERO;
        }
        self.body() / range * Decimal::ONE_HUNDRED
    }

    /// Wick above the body.
    #[must_use]
    pub fn upper_wick(&self) -> Decimal {
        self.high - self.open.max(self.close)
    }

    /// Wick below the body.
    #[must_use]
    pub fn lower_wick(&self) -> Decimal {
        self.open.min(self.close) - self.low
    }

    #[must_use]
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Taker buy/sell volume split, when reported.
    #[must_use]
    pub fn volume_split(&self) -> Option<(Decimal, Decimal)> {
        self.taker_buy_volume
            .map(|buy| (buy, (self.volume - buy).max(Decimal::ZERO)))
    }

    /// Signed taker delta: buy volume minus sell volume.
    #[must_use]
    pub fn volume_delta(&self) -> Option<Decimal> {
        self.volume_split().map(|(buy, sell)| buy - sell)
    }

    /// Typical price `(H + L + C) / 3` used by VWAP.
    #[must_use]
    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / rust_decimal_macros::dec!(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            timestamp: 1_700_000_000_000,
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::M5,
            open,
            high,
            low,
            close,
            volume: dec!(10),
            taker_buy_volume: Some(dec!(7)),
        }
    }

    #[test]
    fn body_and_wicks() {
        let c = candle(dec!(100), dec!(110), dec!(95), dec!(105));
        assert_eq!(c.body(), dec!(5));
        assert_eq!(c.upper_wick(), dec!(5));
        assert_eq!(c.lower_wick(), dec!(5));
        assert!(c.is_bullish());
    }

    #[test]
    fn body_percent_of_range() {
        let c = candle(dec!(100), dec!(110), dec!(100), dec!(107));
        // body 7 over range 10
        assert_eq!(c.body_percent(), dec!(70));
    }

    #[test]
    fn zero_range_candle_reports_zero_body_percent() {
        let c = candle(dec!(100), dec!(100), dec!(100), dec!(100));
        assert_eq!(c.body_percent(), Decimal::ZERO);
    }

    #[test]
    fn taker_split_and_delta() {
        let c = candle(dec!(100), dec!(110), dec!(95), dec!(105));
        assert_eq!(c.volume_split(), Some((dec!(7), dec!(3))));
        assert_eq!(c.volume_delta(), Some(dec!(4)));
    }

    #[test]
    fn close_time_depends_on_timeframe() {
        let mut c = candle(dec!(1), dec!(1), dec!(1), dec!(1));
        assert_eq!(c.close_time(), c.timestamp + 300_000);
        c.timeframe = Timeframe::M1;
        assert_eq!(c.close_time(), c.timestamp + 60_000);
        assert!(c.is_closed_at(c.timestamp + 60_000));
        assert!(!c.is_closed_at(c.timestamp + 59_999));
    }
}
