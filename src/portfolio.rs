//! Portfolio accounting and the kill switch.
//!
//! The only cross-symbol mutable state in the system. The execution engine
//! deducts fees and applies trade results; the driver triggers UTC-day
//! rollovers and equity snapshots. Scheduling is single-threaded per driver,
//! so a plain `Mutex` wrapper at the call site is sufficient.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Settings;
use crate::strategy::utc_day_start_ms;

/// One point of the equity curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub balance: Decimal,
}

#[derive(Debug)]
pub struct PortfolioManager {
    balance: Decimal,
    /// Accumulated absolute value of net losing PnL for the current UTC day.
    daily_loss: Decimal,
    consecutive_losses: u32,
    /// UTC day (start-of-day epoch ms) the daily counters belong to.
    last_day_processed: i64,
    peak_equity: Decimal,
    max_drawdown: Decimal,
    equity_curve: Vec<EquityPoint>,
    max_daily_loss_percent: Decimal,
    max_consecutive_losses: u32,
    /// Latched when a kill-switch threshold trips; cleared on day rollover.
    halted: bool,
}

impl PortfolioManager {
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            balance: settings.initial_balance,
            daily_loss: Decimal::ZERO,
            consecutive_losses: 0,
            last_day_processed: i64::MIN,
            peak_equity: settings.initial_balance,
            max_drawdown: Decimal::ZERO,
            equity_curve: Vec::new(),
            max_daily_loss_percent: settings.max_daily_loss_percent,
            max_consecutive_losses: settings.max_consecutive_losses,
            halted: false,
        }
    }

    #[must_use]
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    #[must_use]
    pub fn daily_loss(&self) -> Decimal {
        self.daily_loss
    }

    #[must_use]
    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    #[must_use]
    pub fn peak_equity(&self) -> Decimal {
        self.peak_equity
    }

    /// Largest peak-to-trough drawdown seen so far, as a fraction of peak.
    #[must_use]
    pub fn max_drawdown(&self) -> Decimal {
        self.max_drawdown
    }

    #[must_use]
    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    /// Kill switch. Once tripped within a UTC day it stays off until the
    /// next day rollover, regardless of later wins.
    #[must_use]
    pub fn can_trade(&self) -> bool {
        !self.halted
    }

    /// Roll daily counters when `timestamp` crosses into a new UTC day.
    pub fn reset_daily_stats(&mut self, timestamp: i64) {
        let day = utc_day_start_ms(timestamp);
        if day > self.last_day_processed {
            if self.last_day_processed != i64::MIN && self.halted {
                info!(day, "New UTC day, kill switch re-armed");
            }
            self.last_day_processed = day;
            self.daily_loss = Decimal::ZERO;
            self.consecutive_losses = 0;
            self.halted = false;
        }
    }

    /// Deduct an exchange fee from the balance.
    pub fn deduct_fee(&mut self, fee: Decimal) {
        self.balance -= fee;
    }

    /// Apply a closed trade.
    ///
    /// `gross_pnl` moves the balance (both fees were already deducted
    /// separately, so the round-trip balance delta equals net PnL exactly);
    /// `net_pnl` drives the loss counters and streak logic.
    pub fn apply_trade_result(&mut self, gross_pnl: Decimal, net_pnl: Decimal, timestamp: i64) {
        self.balance += gross_pnl;

        if net_pnl < Decimal::ZERO {
            self.daily_loss += net_pnl.abs();
            self.consecutive_losses += 1;
        } else if net_pnl > Decimal::ZERO {
            self.consecutive_losses = 0;
        }
        self.refresh_kill_switch();
        self.snapshot_equity(timestamp);
    }

    /// Record the current balance on the equity curve and update peak /
    /// drawdown tracking.
    pub fn snapshot_equity(&mut self, timestamp: i64) {
        if self.balance > self.peak_equity {
            self.peak_equity = self.balance;
        } else if self.peak_equity > Decimal::ZERO {
            let drawdown = (self.peak_equity - self.balance) / self.peak_equity;
            if drawdown > self.max_drawdown {
                self.max_drawdown = drawdown;
            }
        }
        self.equity_curve.push(EquityPoint {
            timestamp,
            balance: self.balance,
        });
    }

    fn refresh_kill_switch(&mut self) {
        if self.halted {
            return;
        }
        let loss_limit_hit = self.balance > Decimal::ZERO
            && self.daily_loss / self.balance * Decimal::ONE_HUNDRED >= self.max_daily_loss_percent;
        let streak_hit = self.consecutive_losses >= self.max_consecutive_losses;
        if loss_limit_hit || streak_hit {
            self.halted = true;
            warn!(
                daily_loss = %self.daily_loss,
                consecutive_losses = self.consecutive_losses,
                balance = %self.balance,
                "Kill switch tripped, no new trades until next UTC day"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn portfolio() -> PortfolioManager {
        PortfolioManager::new(&Settings::default())
    }

    #[test]
    fn fees_and_gross_pnl_compose_to_net_delta() {
        let mut p = portfolio();
        let start = p.balance();
        // open: entry fee, close: exit fee + gross
        p.deduct_fee(dec!(0.05));
        p.deduct_fee(dec!(0.0204));
        p.apply_trade_result(dec!(2), dec!(1.9296), 1_000);
        assert_eq!(p.balance() - start, dec!(1.9296));
    }

    #[test]
    fn losing_streak_trips_kill_switch() {
        let mut p = portfolio();
        p.reset_daily_stats(0);
        for i in 0..10 {
            assert!(p.can_trade(), "still armed after {i} losses");
            p.apply_trade_result(dec!(-10), dec!(-10.5), i * 1_000);
        }
        assert!(!p.can_trade());
        assert_eq!(p.consecutive_losses(), 10);
    }

    #[test]
    fn daily_loss_limit_trips_kill_switch() {
        let mut p = portfolio();
        p.reset_daily_stats(0);
        // lose just over 10% of the ~10k balance in one trade
        p.apply_trade_result(dec!(-1100), dec!(-1100), 1_000);
        assert!(!p.can_trade());
    }

    #[test]
    fn kill_switch_is_monotone_within_a_day() {
        let mut p = portfolio();
        p.reset_daily_stats(0);
        for i in 0..10 {
            p.apply_trade_result(dec!(-10), dec!(-10), i);
        }
        assert!(!p.can_trade());
        // a later winner that day does not re-arm
        p.apply_trade_result(dec!(500), dec!(499), 50_000);
        assert!(!p.can_trade());
    }

    #[test]
    fn day_rollover_rearms() {
        let mut p = portfolio();
        p.reset_daily_stats(0);
        for i in 0..10 {
            p.apply_trade_result(dec!(-10), dec!(-10), i);
        }
        assert!(!p.can_trade());

        // same day: no reset
        p.reset_daily_stats(86_399_999);
        assert!(!p.can_trade());

        // next UTC day clears counters
        p.reset_daily_stats(86_400_000);
        assert!(p.can_trade());
        assert_eq!(p.daily_loss(), Decimal::ZERO);
        assert_eq!(p.consecutive_losses(), 0);
    }

    #[test]
    fn win_resets_streak_but_not_daily_loss() {
        let mut p = portfolio();
        p.reset_daily_stats(0);
        p.apply_trade_result(dec!(-10), dec!(-10), 1);
        p.apply_trade_result(dec!(-10), dec!(-10), 2);
        p.apply_trade_result(dec!(20), dec!(19), 3);
        assert_eq!(p.consecutive_losses(), 0);
        assert_eq!(p.daily_loss(), dec!(20));
    }

    #[test]
    fn drawdown_tracks_peak_to_trough() {
        let mut p = portfolio();
        p.apply_trade_result(dec!(1000), dec!(1000), 1); // peak 11000
        p.apply_trade_result(dec!(-2200), dec!(-2200), 2); // trough 8800
        assert_eq!(p.peak_equity(), dec!(11000));
        assert_eq!(p.max_drawdown(), dec!(0.2));
        assert_eq!(p.equity_curve().len(), 2);
    }

    #[test]
    fn breakeven_trade_leaves_streak_untouched() {
        let mut p = portfolio();
        p.apply_trade_result(dec!(-10), dec!(-10), 1);
        p.apply_trade_result(dec!(0.01), dec!(0), 2);
        assert_eq!(p.consecutive_losses(), 1);
    }
}
