//! Range-break-pullback strategy.
//!
//! Leaf detectors (regime, range, breakout, pullback) feed a per-symbol
//! state machine; the orchestrator coordinates both timeframes and emits
//! entry signals.

pub mod breakout;
pub mod context;
pub mod orchestrator;
pub mod pullback;
pub mod range;
pub mod regime;
pub mod signal;
pub mod state;

pub use breakout::{BreakoutDetector, BreakoutSignal};
pub use orchestrator::{session_vwap, utc_day_start_ms, ExecutionSnapshot, RangeBreakStrategy};
pub use pullback::{PullbackCheck, PullbackPattern, PullbackValidator};
pub use range::{MarketRange, RangeDetector};
pub use regime::RegimeFilter;
pub use signal::{SignalError, TradingSignal};
pub use state::{allowed_transitions, StateMachine, StrategyState, TransitionError};
