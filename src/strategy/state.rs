//! Per-symbol strategy state machine.
//!
//! The transition graph is encoded as data and enforced at a single choke
//! point; an illegal request leaves the machine untouched and is reported to
//! the caller, which decides whether to retry or force a reset.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Lifecycle states of the range-break-pullback setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyState {
    Idle,
    RangeDefined,
    BreakoutDetected,
    WaitPullback,
    LimitOrderPlaced,
    InPosition,
    Exit,
    Reset,
}

impl std::fmt::Display for StrategyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StrategyState::Idle => "IDLE",
            StrategyState::RangeDefined => "RANGE_DEFINED",
            StrategyState::BreakoutDetected => "BREAKOUT_DETECTED",
            StrategyState::WaitPullback => "WAIT_PULLBACK",
            StrategyState::LimitOrderPlaced => "LIMIT_ORDER_PLACED",
            StrategyState::InPosition => "IN_POSITION",
            StrategyState::Exit => "EXIT",
            StrategyState::Reset => "RESET",
        };
        write!(f, "{name}")
    }
}

/// Allowed successor states, the whole graph as data.
#[must_use]
pub fn allowed_transitions(from: StrategyState) -> &'static [StrategyState] {
    use StrategyState::*;
    match from {
        Idle => &[RangeDefined],
        RangeDefined => &[BreakoutDetected, Reset],
        BreakoutDetected => &[WaitPullback, Reset],
        WaitPullback => &[LimitOrderPlaced, Reset],
        LimitOrderPlaced => &[InPosition, Reset],
        InPosition => &[Exit, Reset],
        Exit => &[Reset],
        Reset => &[Idle],
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: StrategyState,
    pub to: StrategyState,
}

/// State holder for one symbol; records when the current state was entered so
/// higher layers can enforce market-time timeouts.
#[derive(Debug, Clone)]
pub struct StateMachine {
    symbol: String,
    state: StrategyState,
    entered_at: i64,
}

impl StateMachine {
    #[must_use]
    pub fn new(symbol: impl Into<String>, now_ms: i64) -> Self {
        Self {
            symbol: symbol.into(),
            state: StrategyState::Idle,
            entered_at: now_ms,
        }
    }

    #[must_use]
    pub fn state(&self) -> StrategyState {
        self.state
    }

    /// Epoch-ms timestamp at which the current state was entered.
    #[must_use]
    pub fn entered_at(&self) -> i64 {
        self.entered_at
    }

    /// Market-time milliseconds spent in the current state.
    #[must_use]
    pub fn time_in_state(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.entered_at)
    }

    /// Request a transition. Illegal requests are rejected without touching
    /// the machine and logged at warn level.
    pub fn transition(
        &mut self,
        to: StrategyState,
        now_ms: i64,
    ) -> Result<(), TransitionError> {
        if !allowed_transitions(self.state).contains(&to) {
            warn!(
                symbol = %self.symbol,
                from = %self.state,
                to = %to,
                "Rejected illegal state transition"
            );
            return Err(TransitionError {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.entered_at = now_ms;
        Ok(())
    }

    /// Drive the machine through RESET back to IDLE from any resettable
    /// state. A machine already in IDLE stays put.
    pub fn force_reset(&mut self, now_ms: i64) {
        if self.state == StrategyState::Idle {
            return;
        }
        if self.state != StrategyState::Reset {
            // Every non-idle state has a RESET edge.
            let _ = self.transition(StrategyState::Reset, now_ms);
        }
        let _ = self.transition(StrategyState::Idle, now_ms);
    }
}
