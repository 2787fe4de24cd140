//! Property-based tests for the numeric core.
//!
//! These verify invariants across many random inputs: Wilder smoothing
//! recurrences, PnL sign conventions, and kill-switch monotonicity.

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use rangebreak::config::Settings;
use rangebreak::indicators::{atr, ema, rsi, sma, stddev, true_range, zscore};
use rangebreak::market::{Candle, Timeframe};
use rangebreak::persistence::gross_pnl;
use rangebreak::portfolio::PortfolioManager;
use rangebreak::types::Direction;

/// Build a well-formed candle from three raw price points.
fn candle_from_points(ts: i64, a: i64, b: i64, c: i64) -> Candle {
    let prices = [Decimal::new(a, 2), Decimal::new(b, 2), Decimal::new(c, 2)];
    let high = *prices.iter().max().unwrap();
    let low = *prices.iter().min().unwrap();
    let close = prices[2].clamp(low, high);
    Candle {
        timestamp: ts,
        symbol: "BTCUSDT".to_string(),
        timeframe: Timeframe::M5,
        open: prices[0].clamp(low, high),
        high,
        low,
        close,
        volume: dec!(10),
        taker_buy_volume: None,
    }
}

fn candles_strategy(len: usize) -> impl Strategy<Value = Vec<Candle>> {
    prop::collection::vec((10_000i64..20_000, 10_000i64..20_000, 10_000i64..20_000), len)
        .prop_map(|points| {
            points
                .into_iter()
                .enumerate()
                .map(|(i, (a, b, c))| candle_from_points(i as i64 * 300_000, a, b, c))
                .collect()
        })
}

proptest! {
    /// ATR follows the Wilder recurrence:
    /// `ATR_k = ((period - 1) * ATR_{k-1} + TR_k) / period`.
    #[test]
    fn atr_wilder_recurrence(candles in candles_strategy(40)) {
        let period = 14usize;
        let prev = atr(&candles[..candles.len() - 1], period);
        prop_assume!(!prev.is_zero());

        let tr = true_range(
            &candles[candles.len() - 1],
            &candles[candles.len() - 2],
        );
        let expected = (prev * Decimal::from(period as u64 - 1) + tr)
            / Decimal::from(period as u64);
        prop_assert_eq!(atr(&candles, period), expected);
    }

    /// Indicators are deterministic bit-for-bit on identical input.
    #[test]
    fn indicators_are_deterministic(candles in candles_strategy(35)) {
        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        prop_assert_eq!(atr(&candles, 14), atr(&candles, 14));
        prop_assert_eq!(ema(&closes, 10), ema(&closes, 10));
        prop_assert_eq!(rsi(&closes, 14), rsi(&closes, 14));
        prop_assert_eq!(zscore(&closes, 20), zscore(&closes, 20));
    }

    /// ATR is never negative and zero only on short input.
    #[test]
    fn atr_is_non_negative(candles in candles_strategy(40)) {
        prop_assert!(atr(&candles, 14) >= Decimal::ZERO);
        prop_assert_eq!(atr(&candles[..10], 14), Decimal::ZERO);
    }

    /// Population stddev is non-negative; sigma of a constant series is 0.
    #[test]
    fn stddev_properties(values in prop::collection::vec(-100_000i64..100_000, 2..60)) {
        let decimals: Vec<Decimal> = values.iter().map(|v| Decimal::new(*v, 2)).collect();
        prop_assert!(stddev(&decimals) >= Decimal::ZERO);

        let constant = vec![decimals[0]; decimals.len()];
        prop_assert_eq!(stddev(&constant), Decimal::ZERO);
    }

    /// SMA of the tail window always sits between the window's min and max.
    #[test]
    fn sma_is_bounded_by_window(values in prop::collection::vec(1i64..1_000_000, 5..50)) {
        let decimals: Vec<Decimal> = values.iter().map(|v| Decimal::new(*v, 3)).collect();
        let period = 5usize;
        let window = &decimals[decimals.len() - period..];
        let mean = sma(&decimals, period);
        prop_assert!(mean >= *window.iter().min().unwrap());
        prop_assert!(mean <= *window.iter().max().unwrap());
    }

    /// RSI stays inside [0, 100].
    #[test]
    fn rsi_is_bounded(values in prop::collection::vec(1i64..1_000_000, 20..60)) {
        let decimals: Vec<Decimal> = values.iter().map(|v| Decimal::new(*v, 2)).collect();
        let r = rsi(&decimals, 14);
        prop_assert!(r >= Decimal::ZERO && r <= Decimal::ONE_HUNDRED);
    }

    /// sign(pnl) = sign((exit - entry) * direction).
    #[test]
    fn pnl_sign_convention(
        entry in 1i64..10_000_000,
        exit in 1i64..10_000_000,
        size in 1i64..1_000_000,
        long in any::<bool>()
    ) {
        let direction = if long { Direction::Long } else { Direction::Short };
        let entry = Decimal::new(entry, 2);
        let exit = Decimal::new(exit, 2);
        let size = Decimal::new(size, 4);

        let pnl = gross_pnl(direction, entry, exit, size);
        let favorable = match direction {
            Direction::Long => exit > entry,
            Direction::Short => exit < entry,
        };
        if exit == entry {
            prop_assert_eq!(pnl, Decimal::ZERO);
        } else if favorable {
            prop_assert!(pnl > Decimal::ZERO);
        } else {
            prop_assert!(pnl < Decimal::ZERO);
        }
    }

    /// Once the kill switch trips, it stays off for the rest of the day no
    /// matter what results follow.
    #[test]
    fn kill_switch_is_monotone(pnls in prop::collection::vec(-300i64..300i64, 1..80)) {
        let mut portfolio = PortfolioManager::new(&Settings::default());
        portfolio.reset_daily_stats(0);

        let mut tripped = false;
        for (i, raw) in pnls.iter().enumerate() {
            let pnl = Decimal::new(*raw, 0);
            portfolio.apply_trade_result(pnl, pnl, i as i64 * 1_000);
            if tripped {
                prop_assert!(!portfolio.can_trade(), "kill switch re-armed mid-day");
            }
            tripped = tripped || !portfolio.can_trade();
        }
    }
}
