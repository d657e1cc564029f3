//! Configuration management for the grid bot.
//!
//! Loads settings from environment variables and config files.

use crate::error::BotError;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Trading strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// Descending buy ladder with a single rising take-profit sell.
    Grid,
    /// Buy then liquidate (market or trailing) to generate volume.
    Volume,
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Arkham API credentials and endpoint
    #[serde(default)]
    pub api: ApiConfig,
    /// Trading parameters
    #[serde(default)]
    pub trading: TradingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API key identifier
    #[serde(default)]
    pub api_key: String,
    /// Base64-encoded signing secret
    #[serde(default)]
    pub api_secret: String,
    /// Override for the REST endpoint (tests point this at a local server)
    #[serde(default)]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Trading pair, e.g. "ETH_USDT"
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Capital to deploy, in quote currency
    #[serde(default = "default_capital")]
    pub capital: Decimal,
    /// Number of grid levels
    #[serde(default = "default_num_orders")]
    pub num_orders: u32,
    /// Total price drop covered by the grid, percent
    #[serde(default = "default_spread_pct")]
    pub spread_pct: Decimal,
    /// Offset of the first level below market, percent
    #[serde(default = "default_first_order_offset_pct")]
    pub first_order_offset_pct: Decimal,
    /// Upward price drift that forces a regrid / trailing adjustment, percent
    #[serde(default = "default_price_deviation_pct")]
    pub price_deviation_pct: Decimal,
    /// Strategy mode
    #[serde(default = "default_mode")]
    pub mode: TradingMode,

    // Grid mode
    /// Take-profit margin above average entry, percent
    #[serde(default = "default_target_profit_pct")]
    pub target_profit_pct: Decimal,

    // Volume mode
    /// Minimum pre-sell delay, seconds
    #[serde(default = "default_delay_min_secs")]
    pub delay_min_secs: f64,
    /// Maximum pre-sell delay, seconds
    #[serde(default = "default_delay_max_secs")]
    pub delay_max_secs: f64,
    /// Use a trailing limit sell instead of a market sell
    #[serde(default)]
    pub use_trailing: bool,
}

fn default_symbol() -> String {
    "ETH_USDT".to_string()
}

fn default_capital() -> Decimal {
    dec!(100)
}

fn default_num_orders() -> u32 {
    5
}

fn default_spread_pct() -> Decimal {
    dec!(5)
}

fn default_first_order_offset_pct() -> Decimal {
    dec!(1)
}

fn default_price_deviation_pct() -> Decimal {
    dec!(2)
}

fn default_mode() -> TradingMode {
    TradingMode::Grid
}

fn default_target_profit_pct() -> Decimal {
    dec!(1)
}

fn default_delay_min_secs() -> f64 {
    5.0
}

fn default_delay_max_secs() -> f64 {
    30.0
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            capital: default_capital(),
            num_orders: default_num_orders(),
            spread_pct: default_spread_pct(),
            first_order_offset_pct: default_first_order_offset_pct(),
            price_deviation_pct: default_price_deviation_pct(),
            mode: default_mode(),
            target_profit_pct: default_target_profit_pct(),
            delay_min_secs: default_delay_min_secs(),
            delay_max_secs: default_delay_max_secs(),
            use_trailing: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            trading: TradingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("ARKHAM"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Reject malformed parameters before any exchange call is made.
    pub fn validate(&self) -> std::result::Result<(), BotError> {
        let t = &self.trading;

        if t.symbol.is_empty() {
            return Err(BotError::Configuration("symbol must not be empty".into()));
        }
        if t.capital <= Decimal::ZERO {
            return Err(BotError::Configuration("capital must be positive".into()));
        }
        if t.num_orders == 0 {
            return Err(BotError::Configuration("num_orders must be at least 1".into()));
        }
        if t.spread_pct < Decimal::ZERO || t.spread_pct >= dec!(100) {
            return Err(BotError::Configuration(
                "spread_pct must be in [0, 100)".into(),
            ));
        }
        if t.first_order_offset_pct < Decimal::ZERO || t.first_order_offset_pct >= dec!(100) {
            return Err(BotError::Configuration(
                "first_order_offset_pct must be in [0, 100)".into(),
            ));
        }
        if t.price_deviation_pct < Decimal::ZERO {
            return Err(BotError::Configuration(
                "price_deviation_pct must not be negative".into(),
            ));
        }

        match t.mode {
            TradingMode::Grid => {
                if t.target_profit_pct <= Decimal::ZERO {
                    return Err(BotError::Configuration(
                        "target_profit_pct must be positive in grid mode".into(),
                    ));
                }
            }
            TradingMode::Volume => {
                if t.delay_min_secs < 0.0 || t.delay_max_secs < t.delay_min_secs {
                    return Err(BotError::Configuration(
                        "delay range must satisfy 0 <= min <= max".into(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Base asset of the configured pair ("ETH" for "ETH_USDT").
    pub fn base_currency(&self) -> String {
        let symbol = &self.trading.symbol;
        symbol
            .split(['_', '/'])
            .next()
            .unwrap_or(symbol)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_orders_rejected() {
        let mut config = Config::default();
        config.trading.num_orders = 0;
        assert!(matches!(
            config.validate(),
            Err(BotError::Configuration(_))
        ));
    }

    #[test]
    fn test_spread_bounds() {
        let mut config = Config::default();
        config.trading.spread_pct = dec!(100);
        assert!(config.validate().is_err());
        config.trading.spread_pct = dec!(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_delay_range_rejected() {
        let mut config = Config::default();
        config.trading.mode = TradingMode::Volume;
        config.trading.delay_min_secs = 30.0;
        config.trading.delay_max_secs = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_base_currency_extraction() {
        let mut config = Config::default();
        assert_eq!(config.base_currency(), "ETH");
        config.trading.symbol = "BTC/USDT".into();
        assert_eq!(config.base_currency(), "BTC");
    }
}
