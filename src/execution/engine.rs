//! The execution engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::market::Candle;
use crate::persistence::{NewTrade, StoreError, TradeStore};
use crate::portfolio::PortfolioManager;
use crate::strategy::{ExecutionSnapshot, SignalError, TradingSignal};
use crate::types::{Direction, ExitReason, OrderType};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderRejection {
    #[error("kill switch active")]
    KillSwitchActive,
    #[error("position already open for symbol")]
    PositionExists,
    #[error("pending order already exists for symbol")]
    PendingOrderExists,
    #[error("invalid signal: {0}")]
    InvalidSignal(#[from] SignalError),
    #[error("computed size is not positive")]
    ZeroSize,
}

/// A signal waiting for its fill, with the size locked in at placement.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub signal: TradingSignal,
    pub size: Decimal,
    /// Emission timestamp; the order may only fill on strictly later candles.
    pub enqueued_at: i64,
}

/// An open futures position.
#[derive(Debug, Clone)]
pub struct ActivePosition {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Timestamp of the entry candle; exits evaluate strictly after it.
    pub entry_time: i64,
    /// Taker fee paid at open, folded into net PnL at close.
    pub entry_fee: Decimal,
    pub trade_id: i64,
}

impl ActivePosition {
    /// Price at which the exchange force-closes the position:
    /// `entry * (1 - 1/L + m)` long, `entry * (1 + 1/L - m)` short.
    #[must_use]
    pub fn liquidation_price(&self, leverage: Decimal, maintenance_margin: Decimal) -> Decimal {
        let offset = Decimal::ONE / leverage - maintenance_margin;
        match self.direction {
            Direction::Long => self.entry_price * (Decimal::ONE - offset),
            Direction::Short => self.entry_price * (Decimal::ONE + offset),
        }
    }
}

pub struct ExecutionEngine {
    settings: Settings,
    portfolio: Arc<Mutex<PortfolioManager>>,
    trades: Arc<dyn TradeStore>,
    pending_limit: HashMap<String, PendingOrder>,
    pending_market: HashMap<String, PendingOrder>,
    positions: HashMap<String, ActivePosition>,
    last_candle: HashMap<String, Candle>,
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(
        settings: Settings,
        portfolio: Arc<Mutex<PortfolioManager>>,
        trades: Arc<dyn TradeStore>,
    ) -> Self {
        Self {
            settings,
            portfolio,
            trades,
            pending_limit: HashMap::new(),
            pending_market: HashMap::new(),
            positions: HashMap::new(),
            last_candle: HashMap::new(),
        }
    }

    /// What the strategy needs to know about this symbol.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> ExecutionSnapshot {
        ExecutionSnapshot {
            has_position: self.positions.contains_key(symbol),
            has_pending_order: self.pending_limit.contains_key(symbol)
                || self.pending_market.contains_key(symbol),
        }
    }

    #[must_use]
    pub fn position(&self, symbol: &str) -> Option<&ActivePosition> {
        self.positions.get(symbol)
    }

    #[must_use]
    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    /// Queue an order for the signal.
    ///
    /// Rejected (leaving the strategy where it is) when the kill switch is
    /// active, a position is open, or another order is already working for
    /// the symbol. LIMIT orders start working immediately; MARKET orders are
    /// deferred to the next bar's open.
    pub async fn place_order(&mut self, signal: TradingSignal) -> Result<(), OrderRejection> {
        signal.validate()?;

        if !self.portfolio.lock().expect("portfolio mutex").can_trade() {
            warn!(symbol = %signal.symbol, "Order rejected: kill switch active");
            return Err(OrderRejection::KillSwitchActive);
        }
        if self.positions.contains_key(&signal.symbol) {
            warn!(symbol = %signal.symbol, "Order rejected: position already open");
            return Err(OrderRejection::PositionExists);
        }
        if self.pending_limit.contains_key(&signal.symbol)
            || self.pending_market.contains_key(&signal.symbol)
        {
            warn!(symbol = %signal.symbol, "Order rejected: order already pending");
            return Err(OrderRejection::PendingOrderExists);
        }

        let size = self.position_size(&signal);
        if size <= Decimal::ZERO {
            warn!(symbol = %signal.symbol, "Order rejected: non-positive size");
            return Err(OrderRejection::ZeroSize);
        }

        let order = PendingOrder {
            enqueued_at: signal.timestamp,
            size,
            signal,
        };
        info!(
            symbol = %order.signal.symbol,
            direction = %order.signal.direction,
            order_type = %order.signal.order_type,
            price = %order.signal.price,
            size = %order.size,
            "Order queued"
        );
        match order.signal.order_type {
            OrderType::Limit => self.pending_limit.insert(order.signal.symbol.clone(), order),
            OrderType::Market => self.pending_market.insert(order.signal.symbol.clone(), order),
        };
        Ok(())
    }

    /// Remove any working order for the symbol.
    pub async fn cancel_order(&mut self, symbol: &str) {
        if self.pending_limit.remove(symbol).is_some()
            || self.pending_market.remove(symbol).is_some()
        {
            info!(symbol, "Pending order cancelled");
        }
    }

    /// Advance the pipeline for the candle's symbol: market fills, then
    /// limit fills and expiry, then position management.
    pub async fn on_market_data(&mut self, candle: &Candle) -> Result<(), StoreError> {
        self.fill_market_orders(candle).await?;
        self.process_limit_orders(candle).await?;
        self.manage_position(candle).await?;
        self.last_candle
            .insert(candle.symbol.clone(), candle.clone());
        Ok(())
    }

    /// Close an open position at the last seen close price. Fails silently
    /// when no candle history exists for the symbol.
    pub async fn force_close_position(
        &mut self,
        symbol: &str,
        reason: ExitReason,
    ) -> Result<(), StoreError> {
        let Some(position) = self.positions.get(symbol).cloned() else {
            return Ok(());
        };
        let Some(last) = self.last_candle.get(symbol).cloned() else {
            warn!(symbol, "Cannot force-close: no candle history");
            return Ok(());
        };
        let exit_price = self.slipped_exit_price(last.close, position.direction);
        info!(symbol, %reason, price = %exit_price, "Force-closing position");
        self.close_position(&position, exit_price, last.timestamp, reason)
            .await?;
        self.positions.remove(symbol);
        Ok(())
    }

    /// Fixed-fractional sizing: risk a configured fraction of the balance
    /// over the stop distance.
    fn position_size(&self, signal: &TradingSignal) -> Decimal {
        let balance = self.portfolio.lock().expect("portfolio mutex").balance();
        let risk_amount = balance * self.settings.risk_percent_per_trade / Decimal::ONE_HUNDRED;
        let stop_distance = signal.stop_distance();
        if stop_distance.is_zero() {
            return Decimal::ZERO;
        }
        risk_amount / stop_distance
    }

    async fn fill_market_orders(&mut self, candle: &Candle) -> Result<(), StoreError> {
        let Some(order) = self.pending_market.get(&candle.symbol) else {
            return Ok(());
        };
        // One-bar delay: never fill on the enqueueing bar.
        if candle.timestamp <= order.enqueued_at {
            return Ok(());
        }
        let order = self
            .pending_market
            .remove(&candle.symbol)
            .expect("checked above");

        let slip = self.settings.slippage;
        let fill_price = match order.signal.direction {
            Direction::Long => candle.open * (Decimal::ONE + slip),
            Direction::Short => candle.open * (Decimal::ONE - slip),
        };
        self.open_position(order, fill_price, candle.timestamp).await
    }

    async fn process_limit_orders(&mut self, candle: &Candle) -> Result<(), StoreError> {
        let Some(order) = self.pending_limit.get(&candle.symbol) else {
            return Ok(());
        };

        let age_ms = candle.timestamp - order.enqueued_at;
        if age_ms >= self.settings.order_expiry_minutes * 60_000 {
            info!(
                symbol = %candle.symbol,
                age_minutes = age_ms / 60_000,
                "Limit order expired"
            );
            self.pending_limit.remove(&candle.symbol);
            return Ok(());
        }
        if candle.timestamp <= order.enqueued_at {
            return Ok(());
        }

        let limit = order.signal.price;
        let touched = match order.signal.direction {
            Direction::Long => candle.low <= limit,
            Direction::Short => candle.high >= limit,
        };
        if !touched {
            return Ok(());
        }

        let order = self
            .pending_limit
            .remove(&candle.symbol)
            .expect("checked above");
        let half_slip = self.settings.slippage / Decimal::TWO;
        let fill_price = match order.signal.direction {
            Direction::Long => limit * (Decimal::ONE + half_slip),
            Direction::Short => limit * (Decimal::ONE - half_slip),
        };
        self.open_position(order, fill_price, candle.timestamp).await
    }

    async fn open_position(
        &mut self,
        order: PendingOrder,
        fill_price: Decimal,
        fill_time: i64,
    ) -> Result<(), StoreError> {
        let entry_fee = fill_price * order.size * self.settings.trading_fee_taker;
        {
            let mut portfolio = self.portfolio.lock().expect("portfolio mutex");
            portfolio.deduct_fee(entry_fee);
        }

        let trade_id = self
            .trades
            .save_trade(NewTrade {
                symbol: order.signal.symbol.clone(),
                direction: order.signal.direction,
                entry_time: fill_time,
                entry_price: fill_price,
                size: order.size,
                stop_loss: order.signal.stop_loss,
                take_profit: order.signal.take_profit,
            })
            .await?;

        info!(
            symbol = %order.signal.symbol,
            direction = %order.signal.direction,
            entry = %fill_price,
            size = %order.size,
            sl = %order.signal.stop_loss,
            tp = %order.signal.take_profit,
            trade_id,
            "Position opened"
        );
        self.positions.insert(
            order.signal.symbol.clone(),
            ActivePosition {
                symbol: order.signal.symbol,
                direction: order.signal.direction,
                entry_price: fill_price,
                size: order.size,
                stop_loss: order.signal.stop_loss,
                take_profit: order.signal.take_profit,
                entry_time: fill_time,
                entry_fee,
                trade_id,
            },
        );
        Ok(())
    }

    /// Exit checks in precedence order: liquidation, stop-loss, take-profit.
    async fn manage_position(&mut self, candle: &Candle) -> Result<(), StoreError> {
        let Some(position) = self.positions.get(&candle.symbol).cloned() else {
            return Ok(());
        };
        // Strictly after the entry candle; the entry bar cannot also exit.
        if candle.timestamp <= position.entry_time {
            return Ok(());
        }

        let liq_price =
            position.liquidation_price(self.settings.leverage, self.settings.maintenance_margin);
        let exit = match position.direction {
            Direction::Long => {
                if candle.low <= liq_price {
                    Some((liq_price, ExitReason::Liquidated))
                } else if candle.low <= position.stop_loss {
                    Some((position.stop_loss, ExitReason::StopLoss))
                } else if candle.high >= position.take_profit {
                    Some((position.take_profit, ExitReason::TakeProfit))
                } else {
                    None
                }
            }
            Direction::Short => {
                if candle.high >= liq_price {
                    Some((liq_price, ExitReason::Liquidated))
                } else if candle.high >= position.stop_loss {
                    Some((position.stop_loss, ExitReason::StopLoss))
                } else if candle.low <= position.take_profit {
                    Some((position.take_profit, ExitReason::TakeProfit))
                } else {
                    None
                }
            }
        };

        let Some((level, reason)) = exit else {
            return Ok(());
        };
        let exit_price = self.slipped_exit_price(level, position.direction);
        self.close_position(&position, exit_price, candle.timestamp, reason)
            .await?;
        self.positions.remove(&candle.symbol);
        Ok(())
    }

    /// Adverse exit slippage: longs receive less, shorts pay more.
    fn slipped_exit_price(&self, level: Decimal, direction: Direction) -> Decimal {
        match direction {
            Direction::Long => level * (Decimal::ONE - self.settings.slippage),
            Direction::Short => level * (Decimal::ONE + self.settings.slippage),
        }
    }

    async fn close_position(
        &mut self,
        position: &ActivePosition,
        exit_price: Decimal,
        exit_time: i64,
        reason: ExitReason,
    ) -> Result<(), StoreError> {
        let fee_rate = if reason.is_taker() {
            self.settings.trading_fee_taker
        } else {
            self.settings.trading_fee_maker
        };
        let exit_fee = exit_price * position.size * fee_rate;
        let gross_pnl = position.direction.pnl_sign()
            * position.size
            * (exit_price - position.entry_price);
        let net_pnl = gross_pnl - position.entry_fee - exit_fee;

        {
            let mut portfolio = self.portfolio.lock().expect("portfolio mutex");
            portfolio.deduct_fee(exit_fee);
            portfolio.apply_trade_result(gross_pnl, net_pnl, exit_time);
        }

        self.trades
            .close_trade(position.trade_id, exit_price, exit_time, reason)
            .await?;

        info!(
            symbol = %position.symbol,
            %reason,
            exit = %exit_price,
            gross = %gross_pnl,
            net = %net_pnl,
            "Position closed"
        );
        debug!(entry_fee = %position.entry_fee, exit_fee = %exit_fee, "Close fees");
        Ok(())
    }
}
