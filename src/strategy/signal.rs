//! Trading signal emitted by the orchestrator.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Direction, OrderType};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignalError {
    #[error("stop distance must be positive")]
    ZeroStopDistance,
    #[error("stop-loss on the wrong side of entry")]
    StopOnWrongSide,
    #[error("take-profit on the wrong side of entry")]
    TargetOnWrongSide,
    #[error("price must be positive")]
    NonPositivePrice,
}

/// Fully specified entry intent for one symbol.
///
/// Invariants (checked by [`TradingSignal::validate`]): LONG requires
/// `stop_loss < price < take_profit`, SHORT the mirror, and the stop distance
/// is strictly positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub symbol: String,
    pub direction: Direction,
    pub order_type: OrderType,
    pub price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Emission time, epoch milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TradingSignal {
    /// Distance between entry and stop.
    #[must_use]
    pub fn stop_distance(&self) -> Decimal {
        (self.price - self.stop_loss).abs()
    }

    /// Check construction invariants. A violating signal is discarded by the
    /// orchestrator, never executed.
    pub fn validate(&self) -> Result<(), SignalError> {
        if self.price <= Decimal::ZERO {
            return Err(SignalError::NonPositivePrice);
        }
        if self.stop_distance().is_zero() {
            return Err(SignalError::ZeroStopDistance);
        }
        match self.direction {
            Direction::Long => {
                if self.stop_loss >= self.price {
                    return Err(SignalError::StopOnWrongSide);
                }
                if self.take_profit <= self.price {
                    return Err(SignalError::TargetOnWrongSide);
                }
            }
            Direction::Short => {
                if self.stop_loss <= self.price {
                    return Err(SignalError::StopOnWrongSide);
                }
                if self.take_profit >= self.price {
                    return Err(SignalError::TargetOnWrongSide);
                }
            }
        }
        Ok(())
    }
}
