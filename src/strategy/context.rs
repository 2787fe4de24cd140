//! Per-symbol strategy context.

use rust_decimal::Decimal;

use super::breakout::BreakoutSignal;
use super::range::MarketRange;
use super::state::StateMachine;

/// Cached 5m indicator values, refreshed once per closed 5m bar.
#[derive(Debug, Clone, Default)]
pub struct IndicatorSnapshot {
    pub atr: Decimal,
    pub ema_trend: Decimal,
    pub volume_sma: Decimal,
}

/// Everything the orchestrator tracks for one symbol.
#[derive(Debug)]
pub struct SymbolContext {
    pub machine: StateMachine,
    /// Frozen at the transition into RANGE_DEFINED.
    pub range: Option<MarketRange>,
    pub breakout: Option<BreakoutSignal>,
    pub snapshot: IndicatorSnapshot,
    /// Open time of the last fully processed 5m bar.
    pub last_processed_bar_5m: i64,
}

impl SymbolContext {
    #[must_use]
    pub fn new(symbol: impl Into<String>, now_ms: i64) -> Self {
        Self {
            machine: StateMachine::new(symbol, now_ms),
            range: None,
            breakout: None,
            snapshot: IndicatorSnapshot::default(),
            last_processed_bar_5m: i64::MIN,
        }
    }

    /// Drop the setup and return the machine to IDLE. The 5m watermark and
    /// indicator snapshot survive; they describe the market, not the setup.
    pub fn reset(&mut self, now_ms: i64) {
        self.range = None;
        self.breakout = None;
        self.machine.force_reset(now_ms);
    }
}
