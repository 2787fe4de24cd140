//! Order execution.
//!
//! [`ExecutionEngine`] simulates the full order lifecycle against the candle
//! stream: one-bar-delayed market fills, touch-based limit fills with expiry,
//! and position management with liquidation taking precedence over the stop,
//! which takes precedence over the target. Both drivers run the same engine;
//! live mode simply feeds it live candles.

mod engine;

pub use engine::{ActivePosition, ExecutionEngine, OrderRejection, PendingOrder};
