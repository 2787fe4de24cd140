//! Volatility primitives: true range, Wilder ATR, population stddev, z-score.

use rust_decimal::{Decimal, MathematicalOps};

use crate::market::Candle;

use super::trend::sma;

/// True range of candle `i` given its predecessor:
/// `max(high - low, |high - prev_close|, |low - prev_close|)`.
#[must_use]
pub fn true_range(current: &Candle, previous: &Candle) -> Decimal {
    let hl = current.high - current.low;
    let hc = (current.high - previous.close).abs();
    let lc = (current.low - previous.close).abs();
    hl.max(hc).max(lc)
}

/// Average True Range with Wilder smoothing.
///
/// Seed is the SMA of the first `period` true ranges; each subsequent value
/// follows `ATR_k = ((period - 1) * ATR_{k-1} + TR_k) / period`. Requires
/// `period + 1` candles (true ranges need a previous close).
#[must_use]
pub fn atr(candles: &[Candle], period: usize) -> Decimal {
    if period == 0 || candles.len() < period + 1 {
        return Decimal::ZERO;
    }
    let trs: Vec<Decimal> = candles
        .windows(2)
        .map(|w| true_range(&w[1], &w[0]))
        .collect();

    let period_dec = Decimal::from(period as u64);
    let mut value = trs[..period].iter().sum::<Decimal>() / period_dec;
    for tr in &trs[period..] {
        value = (value * (period_dec - Decimal::ONE) + tr) / period_dec;
    }
    value
}

/// Population standard deviation of the whole slice.
#[must_use]
pub fn stddev(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    let n = Decimal::from(values.len() as u64);
    let mean = values.iter().sum::<Decimal>() / n;
    let variance = values
        .iter()
        .map(|v| {
            let d = *v - mean;
            d * d
        })
        .sum::<Decimal>()
        / n;
    variance.sqrt().unwrap_or(Decimal::ZERO)
}

/// Z-score of the last value against the trailing `period` window:
/// `(last - SMA) / sigma`. Zero when the window is short or flat.
#[must_use]
pub fn zscore(values: &[Decimal], period: usize) -> Decimal {
    if period == 0 || values.len() < period {
        return Decimal::ZERO;
    }
    let window = &values[values.len() - period..];
    let sigma = stddev(window);
    if sigma.is_zero() {
        return Decimal::ZERO;
    }
    let last = window[window.len() - 1];
    (last - sma(window, period)) / sigma
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Timeframe;
    use rust_decimal_macros::dec;

    fn candle(high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            timestamp: 0,
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::M5,
            open: close,
            high,
            low,
            close,
            volume: dec!(1),
            taker_buy_volume: None,
        }
    }

    #[test]
    fn true_range_uses_previous_close() {
        let prev = candle(dec!(10), dec!(8), dec!(9));
        // gap up: high-low = 1, but |low - prev_close| = 3
        let cur = candle(dec!(13), dec!(12), dec!(12.5));
        assert_eq!(true_range(&cur, &prev), dec!(4));
    }

    #[test]
    fn atr_insufficient_input_is_zero() {
        let candles: Vec<Candle> = (0..14).map(|_| candle(dec!(2), dec!(1), dec!(1.5))).collect();
        assert_eq!(atr(&candles, 14), Decimal::ZERO);
        assert_eq!(atr(&candles, 0), Decimal::ZERO);
    }

    #[test]
    fn atr_of_constant_range_equals_range() {
        // Every bar spans exactly 2.0 with no gaps, so every TR is 2.
        let candles: Vec<Candle> = (0..40).map(|_| candle(dec!(102), dec!(100), dec!(101))).collect();
        assert_eq!(atr(&candles, 14), dec!(2));
    }

    #[test]
    fn atr_follows_wilder_recurrence() {
        let mut candles: Vec<Candle> = (0..15).map(|_| candle(dec!(102), dec!(100), dec!(101))).collect();
        let prev_atr = atr(&candles, 14);
        // append a wider bar: TR = 6
        candles.push(candle(dec!(105), dec!(99), dec!(100)));
        let next_atr = atr(&candles, 14);
        let expected = (prev_atr * dec!(13) + dec!(6)) / dec!(14);
        assert_eq!(next_atr, expected);
    }

    #[test]
    fn stddev_population() {
        let values = [dec!(2), dec!(4), dec!(4), dec!(4), dec!(5), dec!(5), dec!(7), dec!(9)];
        assert_eq!(stddev(&values), dec!(2));
    }

    #[test]
    fn zscore_flat_window_is_zero() {
        let values = [dec!(5); 20];
        assert_eq!(zscore(&values, 10), Decimal::ZERO);
    }

    #[test]
    fn zscore_sign_tracks_deviation() {
        let mut values = vec![dec!(10); 19];
        values.push(dec!(20));
        assert!(zscore(&values, 20) > Decimal::ZERO);
    }
}
