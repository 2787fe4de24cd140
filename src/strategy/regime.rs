//! Market-regime filter.
//!
//! Gates setup formation by trend strength (ADX) and volatility bands so the
//! range detector only runs in markets where a breakout can follow through.

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::Settings;
use crate::indicators::{adx, atr};
use crate::market::Candle;

/// Minimum 5m candles before the filter produces a verdict.
const MIN_CANDLES: usize = 30;

#[derive(Debug, Clone)]
pub struct RegimeFilter {
    adx_period: usize,
    atr_period: usize,
    adx_min: Decimal,
    adx_max: Decimal,
    vol_min_percent: Decimal,
    vol_max_percent: Decimal,
}

impl RegimeFilter {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            adx_period: settings.adx_period,
            atr_period: settings.atr_period,
            adx_min: settings.adx.min,
            adx_max: settings.adx.max,
            vol_min_percent: settings.volatility.min_percent,
            vol_max_percent: settings.volatility.max_percent,
        }
    }

    /// True iff the market is tradable: ADX and ATR-derived volatility both
    /// inside their configured bands. Short windows are rejected.
    #[must_use]
    pub fn is_tradable(&self, candles_5m: &[Candle]) -> bool {
        if candles_5m.len() < MIN_CANDLES {
            return false;
        }
        let last_close = candles_5m[candles_5m.len() - 1].close;
        if last_close <= Decimal::ZERO {
            return false;
        }

        let adx_value = adx(candles_5m, self.adx_period);
        let atr_value = atr(candles_5m, self.atr_period);
        let vol_percent = atr_value / last_close * Decimal::ONE_HUNDRED;

        let adx_ok = adx_value >= self.adx_min && adx_value <= self.adx_max;
        let vol_ok = vol_percent >= self.vol_min_percent && vol_percent <= self.vol_max_percent;

        if !adx_ok || !vol_ok {
            debug!(
                adx = %adx_value,
                vol_percent = %vol_percent,
                "Regime filter rejected market"
            );
        }
        adx_ok && vol_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Timeframe;
    use rust_decimal_macros::dec;

    fn filter() -> RegimeFilter {
        RegimeFilter::from_settings(&Settings::default())
    }

    fn candle(i: i64, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            timestamp: i * 300_000,
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::M5,
            open: close,
            high,
            low,
            close,
            volume: dec!(100),
            taker_buy_volume: None,
        }
    }

    /// Two bars up, one bar down, shifting by `step` each bar with a bar
    /// range of `2 * step`. Directional movement splits 2:1, so ADX settles
    /// near 33 while volatility scales with `step / price`.
    fn grinding_candles(n: i64, step: Decimal) -> Vec<Candle> {
        let mut base = dec!(1000);
        (0..n)
            .map(|i| {
                base += if i % 3 == 2 { -step } else { step };
                candle(i, base + step, base - step, base)
            })
            .collect()
    }

    #[test]
    fn short_window_is_rejected() {
        let candles = grinding_candles(29, dec!(1));
        assert!(!filter().is_tradable(&candles));
    }

    #[test]
    fn trending_market_with_normal_volatility_passes() {
        // ADX ~33, ATR ~2 on a ~1000 price: 0.2% volatility
        let candles = grinding_candles(60, dec!(1));
        assert!(filter().is_tradable(&candles));
    }

    #[test]
    fn dead_flat_market_fails_on_adx() {
        // oscillation with zero net direction: ADX collapses under min
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let wiggle = if i % 2 == 0 { dec!(0.6) } else { dec!(-0.6) };
                candle(i, dec!(1001) + wiggle, dec!(999) + wiggle, dec!(1000) + wiggle)
            })
            .collect();
        assert!(!filter().is_tradable(&candles));
    }

    #[test]
    fn excessive_volatility_fails() {
        // same directional texture, but bars span several percent of price
        let candles = grinding_candles(60, dec!(25));
        assert!(!filter().is_tradable(&candles));
    }
}
