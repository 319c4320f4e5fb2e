//! Bot configuration loaded from environment variables.
//!
//! Every value has a default; a value that is present but invalid is a fatal
//! startup error rather than a silent fallback.

use crate::domain::services::placement::StrategyConfig;
use crate::infrastructure::binance_client::BinanceConfig;
use crate::rate_limit::RateLimiterConfig;
use crate::secrets::ApiCredentials;
use rust_decimal::Decimal;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const ONE_HUNDRED: Decimal = Decimal::ONE_HUNDRED;
const MIN_INITIAL_CAPITAL: Decimal = Decimal::ONE_HUNDRED;
const MIN_ORDER_AMOUNT: Decimal = Decimal::TEN;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Runtime configuration of the bot
#[derive(Debug, Clone, PartialEq)]
pub struct BotConfig {
    pub use_testnet: bool,
    pub initial_usdt: Decimal,
    pub order_amount: Decimal,
    pub symbol: String,
    pub quote_asset: String,
    pub base_asset: String,
    pub initial_buy_percentage: Decimal,
    pub order_interval_minutes: u64,
    pub buy_percentages: Vec<Decimal>,
    pub sell_profit_percentage: Decimal,
    pub cycle_interval_seconds: u64,
    pub max_open_trades: usize,
    pub level_tolerance_percentage: Decimal,
    pub requests_per_minute: u32,
    pub recv_window_ms: u64,
    pub request_timeout_seconds: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            use_testnet: true,
            initial_usdt: Decimal::ONE_HUNDRED,
            order_amount: Decimal::TEN,
            symbol: "BTCUSDT".to_string(),
            quote_asset: "USDT".to_string(),
            base_asset: "BTC".to_string(),
            initial_buy_percentage: Decimal::ONE,
            order_interval_minutes: 2,
            buy_percentages: vec![
                Decimal::ONE,
                Decimal::TWO,
                Decimal::from(5),
                Decimal::TEN,
            ],
            sell_profit_percentage: Decimal::TWO,
            cycle_interval_seconds: 30,
            max_open_trades: 20,
            level_tolerance_percentage: Decimal::new(5, 1),
            requests_per_minute: 600,
            recv_window_ms: 5000,
            request_timeout_seconds: 10,
        }
    }
}

fn invalid(key: &'static str, value: &str, reason: impl Display) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse::<T>().map_err(|e| invalid(key, raw, e))
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(key, raw, "expected true or false")),
    }
}

fn parse_percentage_list(key: &'static str, raw: &str) -> Result<Vec<Decimal>, ConfigError> {
    let mut levels = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let level: Decimal = parse_value(key, part)?;
        if level <= Decimal::ZERO || level >= ONE_HUNDRED {
            return Err(invalid(key, raw, "each level must be between 0 and 100"));
        }
        levels.push(level);
    }
    if levels.is_empty() {
        return Err(invalid(key, raw, "at least one level is required"));
    }
    Ok(levels)
}

impl BotConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = get("USE_TESTNET") {
            config.use_testnet = parse_bool("USE_TESTNET", &raw)?;
        }
        if let Some(raw) = get("INITIAL_USDT") {
            config.initial_usdt = parse_value("INITIAL_USDT", &raw)?;
            if config.initial_usdt < MIN_INITIAL_CAPITAL {
                return Err(invalid("INITIAL_USDT", &raw, "must be at least 100"));
            }
        }
        if let Some(raw) = get("ORDER_AMOUNT") {
            config.order_amount = parse_value("ORDER_AMOUNT", &raw)?;
            if config.order_amount < MIN_ORDER_AMOUNT {
                return Err(invalid("ORDER_AMOUNT", &raw, "must be at least 10"));
            }
        }
        if let Some(raw) = get("SYMBOL") {
            config.symbol = raw.trim().to_uppercase();
        }
        if let Some(raw) = get("QUOTE_ASSET") {
            config.quote_asset = raw.trim().to_uppercase();
        }
        match get("BASE_ASSET") {
            Some(raw) => config.base_asset = raw.trim().to_uppercase(),
            None => {
                config.base_asset = config
                    .symbol
                    .strip_suffix(config.quote_asset.as_str())
                    .unwrap_or_default()
                    .to_string();
            }
        }
        if let Some(raw) = get("INITIAL_BUY_PERCENTAGE") {
            config.initial_buy_percentage = parse_value("INITIAL_BUY_PERCENTAGE", &raw)?;
            if config.initial_buy_percentage <= Decimal::ZERO
                || config.initial_buy_percentage >= ONE_HUNDRED
            {
                return Err(invalid(
                    "INITIAL_BUY_PERCENTAGE",
                    &raw,
                    "must be between 0 and 100",
                ));
            }
        }
        if let Some(raw) = get("ORDER_INTERVAL_MINUTES") {
            config.order_interval_minutes = parse_value("ORDER_INTERVAL_MINUTES", &raw)?;
            if config.order_interval_minutes == 0 {
                return Err(invalid("ORDER_INTERVAL_MINUTES", &raw, "must be positive"));
            }
        }
        if let Some(raw) = get("BUY_PERCENTAGES") {
            config.buy_percentages = parse_percentage_list("BUY_PERCENTAGES", &raw)?;
        }
        if let Some(raw) = get("SELL_PROFIT_PERCENTAGE") {
            config.sell_profit_percentage = parse_value("SELL_PROFIT_PERCENTAGE", &raw)?;
            if config.sell_profit_percentage <= Decimal::ZERO {
                return Err(invalid("SELL_PROFIT_PERCENTAGE", &raw, "must be positive"));
            }
        }
        if let Some(raw) = get("BOT_CYCLE_INTERVAL_SECONDS") {
            config.cycle_interval_seconds = parse_value("BOT_CYCLE_INTERVAL_SECONDS", &raw)?;
            if config.cycle_interval_seconds == 0 {
                return Err(invalid("BOT_CYCLE_INTERVAL_SECONDS", &raw, "must be positive"));
            }
        }
        if let Some(raw) = get("MAX_OPEN_TRADES") {
            config.max_open_trades = parse_value("MAX_OPEN_TRADES", &raw)?;
            if config.max_open_trades == 0 {
                return Err(invalid("MAX_OPEN_TRADES", &raw, "must be positive"));
            }
        }
        if let Some(raw) = get("ADDITIONAL_BUY_LEVEL_TOLERANCE_PERCENTAGE") {
            config.level_tolerance_percentage =
                parse_value("ADDITIONAL_BUY_LEVEL_TOLERANCE_PERCENTAGE", &raw)?;
            if config.level_tolerance_percentage < Decimal::ZERO {
                return Err(invalid(
                    "ADDITIONAL_BUY_LEVEL_TOLERANCE_PERCENTAGE",
                    &raw,
                    "must not be negative",
                ));
            }
        }
        if let Some(raw) = get("BINANCE_REQUESTS_PER_MINUTE") {
            config.requests_per_minute = parse_value("BINANCE_REQUESTS_PER_MINUTE", &raw)?;
            if config.requests_per_minute == 0 {
                return Err(invalid("BINANCE_REQUESTS_PER_MINUTE", &raw, "must be positive"));
            }
        }
        if let Some(raw) = get("BINANCE_RECV_WINDOW_MS") {
            config.recv_window_ms = parse_value("BINANCE_RECV_WINDOW_MS", &raw)?;
            if !(1..=60_000).contains(&config.recv_window_ms) {
                return Err(invalid(
                    "BINANCE_RECV_WINDOW_MS",
                    &raw,
                    "must be between 1 and 60000",
                ));
            }
        }
        if let Some(raw) = get("BINANCE_REQUEST_TIMEOUT_SECONDS") {
            config.request_timeout_seconds = parse_value("BINANCE_REQUEST_TIMEOUT_SECONDS", &raw)?;
            if config.request_timeout_seconds == 0 {
                return Err(invalid(
                    "BINANCE_REQUEST_TIMEOUT_SECONDS",
                    &raw,
                    "must be positive",
                ));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.is_empty() {
            return Err(ConfigError::Inconsistent("SYMBOL is empty".to_string()));
        }
        if !self.symbol.ends_with(&self.quote_asset) {
            return Err(ConfigError::Inconsistent(format!(
                "SYMBOL {} does not end with QUOTE_ASSET {}",
                self.symbol, self.quote_asset
            )));
        }
        if self.base_asset.is_empty() {
            return Err(ConfigError::Inconsistent(format!(
                "cannot derive BASE_ASSET from {}",
                self.symbol
            )));
        }
        if self.order_amount <= Decimal::ZERO || !(self.initial_usdt % self.order_amount).is_zero() {
            return Err(ConfigError::Inconsistent(format!(
                "INITIAL_USDT {} must be a multiple of ORDER_AMOUNT {}",
                self.initial_usdt, self.order_amount
            )));
        }
        Ok(())
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_seconds)
    }

    pub fn to_strategy_config(&self) -> StrategyConfig {
        StrategyConfig {
            symbol: self.symbol.clone(),
            base_asset: self.base_asset.clone(),
            quote_asset: self.quote_asset.clone(),
            initial_capital: self.initial_usdt,
            order_amount: self.order_amount,
            initial_buy_percentage: self.initial_buy_percentage,
            order_interval: chrono::Duration::minutes(self.order_interval_minutes as i64),
            buy_percentages: self.buy_percentages.clone(),
            sell_profit_percentage: self.sell_profit_percentage,
            max_open_trades: self.max_open_trades,
            level_tolerance_percentage: self.level_tolerance_percentage,
        }
    }

    pub fn binance_config(&self, credentials: ApiCredentials) -> BinanceConfig {
        BinanceConfig {
            recv_window_ms: self.recv_window_ms,
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
            rate_limit: RateLimiterConfig {
                requests_per_minute: self.requests_per_minute,
            },
            ..BinanceConfig::new(credentials, self.use_testnet)
        }
    }
}
