//! Technical indicator primitives.
//!
//! Pure functions over candle or value slices. Every function returns
//! `Decimal::ZERO` when the input is too short for the requested period and
//! never mutates its input, so results are deterministic bit-for-bit across
//! invocations.

mod trend;
mod volatility;
mod volume;

pub use trend::{adx, ema, rsi, sma};
pub use volatility::{atr, stddev, true_range, zscore};
pub use volume::{volume_sma, vwap};
