//! Strategy orchestrator.
//!
//! Drives one state machine per symbol across the synchronized 5m/1m candle
//! streams and emits at most one [`TradingSignal`] per symbol per tick. The
//! caller passes only closed candles, excluding the bar currently being
//! processed by the execution engine, so no decision ever sees the bar it
//! will be executed against.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::indicators::{ema, volume_sma, vwap};
use crate::market::Candle;
use crate::types::{Direction, OrderType};

use super::breakout::BreakoutDetector;
use super::context::{IndicatorSnapshot, SymbolContext};
use super::pullback::PullbackValidator;
use super::range::RangeDetector;
use super::regime::RegimeFilter;
use super::signal::TradingSignal;
use super::state::StrategyState;

/// Stop distance floor as a multiple of 5m ATR.
const STOP_ATR_MULT: Decimal = dec!(0.4);
/// Stop distance floor as a fraction of the entry price.
const STOP_MIN_FRACTION: Decimal = dec!(0.005);

/// What the execution engine currently holds for a symbol. The orchestrator
/// uses it to advance past order placement and position exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionSnapshot {
    pub has_position: bool,
    pub has_pending_order: bool,
}

pub struct RangeBreakStrategy {
    settings: Settings,
    regime: RegimeFilter,
    range_detector: RangeDetector,
    breakout_detector: BreakoutDetector,
    pullback_validator: PullbackValidator,
    contexts: HashMap<String, SymbolContext>,
}

impl RangeBreakStrategy {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            regime: RegimeFilter::from_settings(&settings),
            range_detector: RangeDetector::from_settings(&settings),
            breakout_detector: BreakoutDetector::from_settings(&settings),
            pullback_validator: PullbackValidator::from_settings(&settings),
            contexts: HashMap::new(),
            settings,
        }
    }

    /// Current state for a symbol (IDLE before the first tick).
    #[must_use]
    pub fn state(&self, symbol: &str) -> StrategyState {
        self.contexts
            .get(symbol)
            .map_or(StrategyState::Idle, |c| c.machine.state())
    }

    /// Evaluate one tick for `symbol`.
    ///
    /// `candles_5m` must contain only closed 5m bars and `candles_1m` only
    /// closed 1m bars up to, but not including, the bar at `now_ms`.
    pub fn generate_signal(
        &mut self,
        symbol: &str,
        candles_5m: &[Candle],
        candles_1m: &[Candle],
        now_ms: i64,
        execution: ExecutionSnapshot,
    ) -> Option<TradingSignal> {
        let ctx = self
            .contexts
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolContext::new(symbol, now_ms));

        Self::sync_with_execution(ctx, execution, now_ms);
        Self::enforce_pullback_timeout(ctx, &self.settings, now_ms);

        if let Some(last_5m) = candles_5m.last() {
            if last_5m.timestamp > ctx.last_processed_bar_5m {
                Self::on_new_5m_bar(
                    ctx,
                    &self.settings,
                    &self.regime,
                    &self.range_detector,
                    &self.breakout_detector,
                    candles_5m,
                    now_ms,
                );
            }
        }

        if ctx.machine.state() == StrategyState::WaitPullback {
            return Self::evaluate_pullback(
                ctx,
                &self.settings,
                &self.pullback_validator,
                candles_1m,
                now_ms,
            );
        }
        None
    }

    /// Confirm that the engine accepted the emitted order; advances
    /// WAIT_PULLBACK into LIMIT_ORDER_PLACED. Called by the driver only after
    /// a successful `place_order`.
    pub fn mark_order_placed(&mut self, symbol: &str, now_ms: i64) {
        if let Some(ctx) = self.contexts.get_mut(symbol) {
            if ctx
                .machine
                .transition(StrategyState::LimitOrderPlaced, now_ms)
                .is_ok()
            {
                info!(symbol, state = %ctx.machine.state(), "Entry order working");
            }
        }
    }

    /// Driver- or operator-initiated reset; clears the whole setup context.
    pub fn reset(&mut self, symbol: &str, now_ms: i64) {
        if let Some(ctx) = self.contexts.get_mut(symbol) {
            info!(symbol, from = %ctx.machine.state(), "Strategy reset requested");
            ctx.reset(now_ms);
        }
    }

    /// Advance past fills and exits the execution engine performed since the
    /// previous tick.
    fn sync_with_execution(ctx: &mut SymbolContext, execution: ExecutionSnapshot, now_ms: i64) {
        match ctx.machine.state() {
            StrategyState::LimitOrderPlaced => {
                if execution.has_position {
                    let _ = ctx.machine.transition(StrategyState::InPosition, now_ms);
                    info!("Entry filled, position open");
                } else if !execution.has_pending_order {
                    // Order expired or was cancelled underneath us.
                    debug!("Working order gone without a fill, recycling setup");
                    ctx.reset(now_ms);
                }
            }
            StrategyState::InPosition => {
                if !execution.has_position {
                    let _ = ctx.machine.transition(StrategyState::Exit, now_ms);
                    ctx.reset(now_ms);
                }
            }
            _ => {}
        }
    }

    fn enforce_pullback_timeout(ctx: &mut SymbolContext, settings: &Settings, now_ms: i64) {
        if ctx.machine.state() == StrategyState::WaitPullback
            && ctx.machine.time_in_state(now_ms)
                > settings.pullback.max_wait_minutes * 60_000
        {
            warn!(
                waited_ms = ctx.machine.time_in_state(now_ms),
                "Pullback window expired, abandoning setup"
            );
            ctx.reset(now_ms);
        }
    }

    /// 5m housekeeping, run once per newly closed 5m bar.
    fn on_new_5m_bar(
        ctx: &mut SymbolContext,
        settings: &Settings,
        regime: &RegimeFilter,
        range_detector: &RangeDetector,
        breakout_detector: &BreakoutDetector,
        candles_5m: &[Candle],
        now_ms: i64,
    ) {
        let last_5m = candles_5m.last().expect("caller checked");
        ctx.last_processed_bar_5m = last_5m.timestamp;

        let closes: Vec<Decimal> = candles_5m.iter().map(|c| c.close).collect();
        ctx.snapshot = IndicatorSnapshot {
            atr: crate::indicators::atr(candles_5m, settings.atr_period),
            ema_trend: ema(&closes, settings.ema_trend_period),
            volume_sma: volume_sma(candles_5m, settings.breakout.volume_period),
        };

        match ctx.machine.state() {
            StrategyState::Idle => {
                if !regime.is_tradable(candles_5m) {
                    return;
                }
                if let Some(range) = range_detector.detect(candles_5m) {
                    info!(
                        high = %range.high,
                        low = %range.low,
                        size = %range.size(),
                        "Range frozen"
                    );
                    ctx.range = Some(range);
                    let _ = ctx.machine.transition(StrategyState::RangeDefined, now_ms);
                }
            }
            StrategyState::RangeDefined => {
                let Some(range) = ctx.range.clone() else {
                    ctx.reset(now_ms);
                    return;
                };
                let breakout = breakout_detector.detect(
                    last_5m,
                    &range,
                    ctx.snapshot.atr,
                    ctx.snapshot.volume_sma,
                );

                let confirmed = breakout.filter(|b| {
                    let trend_ok = match b.direction {
                        Direction::Long => last_5m.close > ctx.snapshot.ema_trend,
                        Direction::Short => last_5m.close < ctx.snapshot.ema_trend,
                    };
                    if !trend_ok {
                        debug!(
                            close = %last_5m.close,
                            ema = %ctx.snapshot.ema_trend,
                            "Breakout rejected by trend filter"
                        );
                    }
                    trend_ok
                });

                match confirmed {
                    Some(breakout) => {
                        info!(
                            direction = %breakout.direction,
                            impulse = %breakout.impulse,
                            "Breakout confirmed, waiting for pullback"
                        );
                        ctx.breakout = Some(breakout);
                        let _ = ctx
                            .machine
                            .transition(StrategyState::BreakoutDetected, now_ms);
                        let _ = ctx.machine.transition(StrategyState::WaitPullback, now_ms);
                    }
                    None => {
                        // A close that escaped the bracket without the full
                        // confirmation stack burns the frozen range.
                        let margin = settings.breakout.atr_multiplier * ctx.snapshot.atr;
                        let escaped = last_5m.close > range.high + margin
                            || last_5m.close < range.low - margin;
                        if escaped {
                            debug!(close = %last_5m.close, "Unconfirmed escape, burning range");
                            ctx.reset(now_ms);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// 1m evaluation inside WAIT_PULLBACK.
    fn evaluate_pullback(
        ctx: &mut SymbolContext,
        settings: &Settings,
        validator: &PullbackValidator,
        candles_1m: &[Candle],
        now_ms: i64,
    ) -> Option<TradingSignal> {
        let range = ctx.range.clone()?;
        let breakout = ctx.breakout.clone()?;
        let session = session_vwap(candles_1m, now_ms);

        let check = validator.validate(candles_1m, &breakout, &range, session)?;

        let offset = check.level * settings.limit_offset_percent / Decimal::ONE_HUNDRED;
        let price = match breakout.direction {
            Direction::Long => check.level - offset,
            Direction::Short => check.level + offset,
        };
        let stop_distance = (ctx.snapshot.atr * STOP_ATR_MULT).max(price * STOP_MIN_FRACTION);
        let (stop_loss, take_profit) = match breakout.direction {
            Direction::Long => (
                price - stop_distance,
                price + stop_distance * settings.rr_ratio,
            ),
            Direction::Short => (
                price + stop_distance,
                price - stop_distance * settings.rr_ratio,
            ),
        };

        let signal = TradingSignal {
            symbol: candles_1m.last()?.symbol.clone(),
            direction: breakout.direction,
            order_type: OrderType::Limit,
            price,
            stop_loss,
            take_profit,
            timestamp: now_ms,
            metadata: json!({
                "range_high": range.high.to_string(),
                "range_low": range.low.to_string(),
                "break_ts": breakout.timestamp,
                "vwap": check.vwap.to_string(),
                "pullback_depth_pct": check.depth_percent.to_string(),
                "pattern": format!("{:?}", check.pattern),
            }),
        };

        if let Err(err) = signal.validate() {
            warn!(%err, "Discarding malformed signal, abandoning setup");
            ctx.reset(now_ms);
            return None;
        }
        Some(signal)
    }
}

/// VWAP anchored to the UTC calendar day of `now_ms`. Falls back to the full
/// window when the day has produced no candles yet. Pure function of its
/// inputs, so reruns over the same data cannot drift.
#[must_use]
pub fn session_vwap(candles_1m: &[Candle], now_ms: i64) -> Decimal {
    let day_start = utc_day_start_ms(now_ms);
    let first_in_day = candles_1m.partition_point(|c| c.timestamp < day_start);
    if first_in_day == candles_1m.len() {
        vwap(candles_1m)
    } else {
        vwap(&candles_1m[first_in_day..])
    }
}

/// Epoch-ms of 00:00:00 UTC on the day containing `ts_ms`.
#[must_use]
pub fn utc_day_start_ms(ts_ms: i64) -> i64 {
    const DAY_MS: i64 = 86_400_000;
    ts_ms.div_euclid(DAY_MS) * DAY_MS
}
