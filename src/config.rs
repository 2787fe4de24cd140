//! Runtime configuration.
//!
//! Every tunable of the strategy/execution pipeline lives in [`Settings`],
//! deserializable from an optional JSON file with per-field defaults so a
//! partial file only overrides what it names. Connection secrets stay in the
//! environment (`.env` via dotenv), never in the settings file.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level settings for both drivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Starting account balance (quote currency).
    pub initial_balance: Decimal,
    /// Fraction of balance risked per trade, in percent.
    pub risk_percent_per_trade: Decimal,
    /// Kill-switch threshold: daily loss as percent of balance.
    pub max_daily_loss_percent: Decimal,
    /// Kill-switch threshold: consecutive losing trades.
    pub max_consecutive_losses: u32,
    /// Take-profit distance as a multiple of the stop distance.
    pub rr_ratio: Decimal,
    pub trading_fee_maker: Decimal,
    pub trading_fee_taker: Decimal,
    /// Fractional price slippage applied to market-style fills.
    pub slippage: Decimal,
    pub leverage: Decimal,
    pub maintenance_margin: Decimal,
    /// ATR lookback used by the regime filter, range validation and stops.
    pub atr_period: usize,
    pub adx_period: usize,
    /// 5m EMA period for trend confirmation of breakouts.
    pub ema_trend_period: usize,
    /// 5m bars skipped before the backtest cursor starts trading.
    pub warmup_bars_5m: usize,
    /// Minutes before an unfilled limit order is cancelled.
    pub order_expiry_minutes: i64,
    /// Offset from the pullback level at which the limit order rests,
    /// in percent (0.2 => LONG rests 0.2% below the level).
    pub limit_offset_percent: Decimal,
    pub range: RangeSettings,
    pub breakout: BreakoutSettings,
    pub pullback: PullbackSettings,
    pub adx: AdxSettings,
    pub volatility: VolatilitySettings,
    pub live: LiveSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RangeSettings {
    /// Number of 5m candles scanned for the bracket.
    pub window: usize,
    /// Lower bound of range size as a multiple of ATR.
    pub min_size_multiplier: Decimal,
    /// Upper bound of range size as a multiple of ATR.
    pub max_size_multiplier: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakoutSettings {
    /// Close must clear the boundary by this multiple of ATR.
    pub atr_multiplier: Decimal,
    /// Minimum candle body as percent of its range.
    pub min_body_percent: Decimal,
    /// Volume SMA lookback for breakout volume confirmation.
    pub volume_period: usize,
    /// Break volume must exceed this multiple of the volume SMA.
    pub min_volume_multiplier: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PullbackSettings {
    /// Maximum retracement of the impulse, in percent.
    pub max_depth_percent: Decimal,
    /// Close must be within this percent of the broken level / VWAP.
    pub price_tolerance_percent: Decimal,
    /// Minutes of market time to wait for a pullback before reset.
    pub max_wait_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdxSettings {
    pub min: Decimal,
    pub max: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VolatilitySettings {
    pub min_percent: Decimal,
    pub max_percent: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LiveSettings {
    /// Poll interval of the live driver in milliseconds.
    pub tick_interval_ms: u64,
    /// Candles fetched per timeframe at startup; also the buffer capacity.
    pub history_limit: usize,
    /// Sleep applied after a failed tick before the loop continues.
    pub error_backoff_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            risk_percent_per_trade: dec!(1.0),
            max_daily_loss_percent: dec!(10),
            max_consecutive_losses: 10,
            rr_ratio: dec!(2.5),
            trading_fee_maker: dec!(0.0002),
            trading_fee_taker: dec!(0.0005),
            slippage: dec!(0.0001),
            leverage: dec!(10),
            maintenance_margin: dec!(0.005),
            atr_period: 14,
            adx_period: 14,
            ema_trend_period: 200,
            warmup_bars_5m: 200,
            order_expiry_minutes: 120,
            limit_offset_percent: dec!(0.2),
            range: RangeSettings::default(),
            breakout: BreakoutSettings::default(),
            pullback: PullbackSettings::default(),
            adx: AdxSettings::default(),
            volatility: VolatilitySettings::default(),
            live: LiveSettings::default(),
        }
    }
}

impl Default for RangeSettings {
    fn default() -> Self {
        Self {
            window: 30,
            min_size_multiplier: dec!(1.2),
            max_size_multiplier: dec!(3.5),
        }
    }
}

impl Default for BreakoutSettings {
    fn default() -> Self {
        Self {
            atr_multiplier: dec!(0.1),
            min_body_percent: dec!(50),
            volume_period: 20,
            min_volume_multiplier: dec!(0.8),
        }
    }
}

impl Default for PullbackSettings {
    fn default() -> Self {
        Self {
            max_depth_percent: dec!(50),
            price_tolerance_percent: dec!(0.2),
            max_wait_minutes: 120,
        }
    }
}

impl Default for AdxSettings {
    fn default() -> Self {
        Self {
            min: dec!(15),
            max: dec!(50),
        }
    }
}

impl Default for VolatilitySettings {
    fn default() -> Self {
        Self {
            min_percent: dec!(0.1),
            max_percent: dec!(1.5),
        }
    }
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5000,
            history_limit: 300,
            error_backoff_ms: 2000,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, or defaults if the file is absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let settings = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let settings: Settings = serde_json::from_str(&raw)?;
            info!(path = %path.display(), "Loaded settings file");
            settings
        } else {
            info!(path = %path.display(), "No settings file, using defaults");
            Settings::default()
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_balance <= Decimal::ZERO {
            return Err(ConfigError::Invalid("initial_balance must be > 0".into()));
        }
        if self.leverage < Decimal::ONE {
            return Err(ConfigError::Invalid("leverage must be >= 1".into()));
        }
        if self.rr_ratio <= Decimal::ZERO {
            return Err(ConfigError::Invalid("rr_ratio must be > 0".into()));
        }
        if self.range.min_size_multiplier > self.range.max_size_multiplier {
            return Err(ConfigError::Invalid(
                "range.min_size_multiplier must not exceed range.max_size_multiplier".into(),
            ));
        }
        if self.adx.min > self.adx.max {
            return Err(ConfigError::Invalid("adx.min must not exceed adx.max".into()));
        }
        if self.range.window == 0 || self.breakout.volume_period == 0 {
            return Err(ConfigError::Invalid("lookback windows must be > 0".into()));
        }
        Ok(())
    }

    /// Database URL from the environment, with a local sqlite default.
    #[must_use]
    pub fn database_url() -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://rangebreak.db?mode=rwc".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.risk_percent_per_trade, dec!(1.0));
        assert_eq!(s.max_daily_loss_percent, dec!(10));
        assert_eq!(s.max_consecutive_losses, 10);
        assert_eq!(s.rr_ratio, dec!(2.5));
        assert_eq!(s.trading_fee_maker, dec!(0.0002));
        assert_eq!(s.trading_fee_taker, dec!(0.0005));
        assert_eq!(s.slippage, dec!(0.0001));
        assert_eq!(s.leverage, dec!(10));
        assert_eq!(s.maintenance_margin, dec!(0.005));
        assert_eq!(s.range.window, 30);
        assert_eq!(s.breakout.min_body_percent, dec!(50));
        assert_eq!(s.pullback.max_wait_minutes, 120);
        assert_eq!(s.live.tick_interval_ms, 5000);
        s.validate().unwrap();
    }

    #[test]
    fn partial_file_only_overrides_named_fields() {
        let parsed: Settings =
            serde_json::from_str(r#"{"rr_ratio": "3.0", "range": {"window": 40}}"#).unwrap();
        assert_eq!(parsed.rr_ratio, dec!(3.0));
        assert_eq!(parsed.range.window, 40);
        // untouched defaults survive
        assert_eq!(parsed.range.min_size_multiplier, dec!(1.2));
        assert_eq!(parsed.max_consecutive_losses, 10);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<Settings>(r#"{"rr_ration": "3.0"}"#).is_err());
    }

    #[test]
    fn invalid_bounds_fail_validation() {
        let mut s = Settings::default();
        s.range.min_size_multiplier = dec!(4);
        assert!(s.validate().is_err());

        let mut s = Settings::default();
        s.leverage = dec!(0.5);
        assert!(s.validate().is_err());
    }
}
