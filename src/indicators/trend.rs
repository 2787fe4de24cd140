//! Trend primitives: SMA, EMA, Wilder RSI, Wilder ADX.

use rust_decimal::Decimal;

use crate::market::Candle;

use super::volatility::true_range;

/// Simple moving average of the last `period` values.
#[must_use]
pub fn sma(values: &[Decimal], period: usize) -> Decimal {
    if period == 0 || values.len() < period {
        return Decimal::ZERO;
    }
    let window = &values[values.len() - period..];
    window.iter().sum::<Decimal>() / Decimal::from(period as u64)
}

/// Exponential moving average seeded with the SMA of the first `period`
/// values, then smoothed with `alpha = 2 / (period + 1)`.
#[must_use]
pub fn ema(values: &[Decimal], period: usize) -> Decimal {
    if period == 0 || values.len() < period {
        return Decimal::ZERO;
    }
    let period_dec = Decimal::from(period as u64);
    let alpha = Decimal::TWO / (period_dec + Decimal::ONE);
    let mut value = values[..period].iter().sum::<Decimal>() / period_dec;
    for v in &values[period..] {
        value = (*v - value) * alpha + value;
    }
    value
}

/// Wilder's Relative Strength Index over closing values.
///
/// Average gain/loss seeded with the SMA of the first `period` moves, then
/// Wilder-smoothed. A loss-free window saturates at 100.
#[must_use]
pub fn rsi(values: &[Decimal], period: usize) -> Decimal {
    if period == 0 || values.len() < period + 1 {
        return Decimal::ZERO;
    }
    let period_dec = Decimal::from(period as u64);
    let moves: Vec<Decimal> = values.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = moves[..period]
        .iter()
        .map(|m| m.max(&Decimal::ZERO))
        .sum::<Decimal>()
        / period_dec;
    let mut avg_loss = moves[..period]
        .iter()
        .map(|m| (-*m).max(Decimal::ZERO))
        .sum::<Decimal>()
        / period_dec;

    for m in &moves[period..] {
        let gain = m.max(&Decimal::ZERO);
        let loss = (-*m).max(Decimal::ZERO);
        avg_gain = (avg_gain * (period_dec - Decimal::ONE) + gain) / period_dec;
        avg_loss = (avg_loss * (period_dec - Decimal::ONE) + loss) / period_dec;
    }

    if avg_loss.is_zero() {
        return Decimal::ONE_HUNDRED;
    }
    let rs = avg_gain / avg_loss;
    Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED / (Decimal::ONE + rs)
}

/// Wilder's Average Directional Index.
///
/// +DM/-DM/TR are Wilder-smoothed over `period`, the DI pair derives a DX
/// series, and ADX is the Wilder-smoothed DX. Needs `2 * period + 1` candles
/// for one fully smoothed value.
#[must_use]
pub fn adx(candles: &[Candle], period: usize) -> Decimal {
    if period == 0 || candles.len() < 2 * period + 1 {
        return Decimal::ZERO;
    }
    let period_dec = Decimal::from(period as u64);

    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);
    let mut trs = Vec::with_capacity(candles.len() - 1);
    for w in candles.windows(2) {
        let up = w[1].high - w[0].high;
        let down = w[0].low - w[1].low;
        plus_dm.push(if up > down && up > Decimal::ZERO {
            up
        } else {
            Decimal::ZERO
        });
        minus_dm.push(if down > up && down > Decimal::ZERO {
            down
        } else {
            Decimal::ZERO
        });
        trs.push(true_range(&w[1], &w[0]));
    }

    // Wilder running sums: seed with the plain sum of the first period,
    // then smoothed_k = smoothed_{k-1} - smoothed_{k-1}/period + x_k.
    let mut sm_plus = plus_dm[..period].iter().sum::<Decimal>();
    let mut sm_minus = minus_dm[..period].iter().sum::<Decimal>();
    let mut sm_tr = trs[..period].iter().sum::<Decimal>();

    let mut dx_values = Vec::new();
    dx_values.push(dx(sm_plus, sm_minus, sm_tr));

    for i in period..trs.len() {
        sm_plus = sm_plus - sm_plus / period_dec + plus_dm[i];
        sm_minus = sm_minus - sm_minus / period_dec + minus_dm[i];
        sm_tr = sm_tr - sm_tr / period_dec + trs[i];
        dx_values.push(dx(sm_plus, sm_minus, sm_tr));
    }

    if dx_values.len() < period {
        return Decimal::ZERO;
    }
    let mut adx_value = dx_values[..period].iter().sum::<Decimal>() / period_dec;
    for v in &dx_values[period..] {
        adx_value = (adx_value * (period_dec - Decimal::ONE) + v) / period_dec;
    }
    adx_value
}

fn dx(sm_plus: Decimal, sm_minus: Decimal, sm_tr: Decimal) -> Decimal {
    if sm_tr.is_zero() {
        return Decimal::ZERO;
    }
    let plus_di = sm_plus / sm_tr * Decimal::ONE_HUNDRED;
    let minus_di = sm_minus / sm_tr * Decimal::ONE_HUNDRED;
    let di_sum = plus_di + minus_di;
    if di_sum.is_zero() {
        return Decimal::ZERO;
    }
    (plus_di - minus_di).abs() / di_sum * Decimal::ONE_HUNDRED
}
