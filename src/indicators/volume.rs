//! Volume primitives: windowed VWAP and volume SMA.

use rust_decimal::Decimal;

use crate::market::Candle;

use super::trend::sma;

/// Volume-weighted average price over the window:
/// `sum(typical * volume) / sum(volume)` with typical = (H + L + C) / 3.
/// Zero-volume windows report 0.
#[must_use]
pub fn vwap(candles: &[Candle]) -> Decimal {
    let total_volume: Decimal = candles.iter().map(|c| c.volume).sum();
    if total_volume.is_zero() {
        return Decimal::ZERO;
    }
    let weighted: Decimal = candles.iter().map(|c| c.typical_price() * c.volume).sum();
    weighted / total_volume
}

/// SMA of candle volumes over the trailing `period`.
#[must_use]
pub fn volume_sma(candles: &[Candle], period: usize) -> Decimal {
    let volumes: Vec<Decimal> = candles.iter().map(|c| c.volume).collect();
    sma(&volumes, period)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Timeframe;
    use rust_decimal_macros::dec;

    fn candle(high: Decimal, low: Decimal, close: Decimal, volume: Decimal) -> Candle {
        Candle {
            timestamp: 0,
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::M1,
            open: close,
            high,
            low,
            close,
            volume,
            taker_buy_volume: None,
        }
    }

    #[test]
    fn vwap_weights_by_volume() {
        let candles = [
            // typical 100, volume 1
            candle(dec!(101), dec!(99), dec!(100), dec!(1)),
            // typical 200, volume 3
            candle(dec!(201), dec!(199), dec!(200), dec!(3)),
        ];
        assert_eq!(vwap(&candles), dec!(175));
    }

    #[test]
    fn vwap_zero_volume_is_zero() {
        let candles = [candle(dec!(101), dec!(99), dec!(100), dec!(0))];
        assert_eq!(vwap(&candles), Decimal::ZERO);
        assert_eq!(vwap(&[]), Decimal::ZERO);
    }

    #[test]
    fn volume_sma_tail_window() {
        let candles: Vec<Candle> = [dec!(10), dec!(20), dec!(30)]
            .into_iter()
            .map(|v| candle(dec!(1), dec!(1), dec!(1), v))
            .collect();
        assert_eq!(volume_sma(&candles, 2), dec!(25));
        assert_eq!(volume_sma(&candles, 4), Decimal::ZERO);
    }
}
