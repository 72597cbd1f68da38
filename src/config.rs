use std::str::FromStr;
use std::time::Duration;

use ::config::{Config as Settings, Environment, File};
use ethers_core::types::Address;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::allowlist::{parse_address, Allowlist};
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "cex-inflow-watch.toml";

/// Ethereum mainnet produces a block roughly every 12 seconds.
pub const BLOCKS_PER_DAY: u64 = 24 * 60 * 60 / 12;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub token_address: String,
    pub token_symbol: String,
    pub token_decimals: u32,
    pub price_api_url: String,
    pub price_symbol: String,
    pub allowlist: Vec<String>,
    pub threshold: String,
    pub poll_interval_secs: u64,
    pub backoff_secs: u64,
    pub request_timeout_secs: u64,
    pub lookback_blocks: u64,
    pub confirmations: u64,
    pub dedup_alerts: bool,
    pub database_url: String,
    pub csv_path: String,
    pub chart_path: String,
    pub kline_interval: String,
    pub kline_limit: u32,
}

impl Config {
    /// Layers built-in defaults, an optional TOML file and `WATCH_*` variables.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let file = path.unwrap_or(DEFAULT_CONFIG_FILE);
        let settings = Settings::builder()
            .set_default("rpc_url", "https://ethereum.publicnode.com")?
            .set_default("token_address", "0x2ba8349123de45e931a8c8264c332e6e9cf593f9")?
            .set_default("token_symbol", "OM")?
            .set_default("token_decimals", 18_i64)?
            .set_default("price_api_url", "https://api.binance.com/api/v3")?
            .set_default("price_symbol", "OMUSDT")?
            .set_default(
                "allowlist",
                vec![
                    "0x28C6c06298d514Db089934071355E5743bf21d60",
                    "0x21a31Ee1afC51d94C2eFcCAa2092aD1028285549",
                ],
            )?
            .set_default("threshold", "50000")?
            .set_default("poll_interval_secs", 3_i64)?
            .set_default("backoff_secs", 5_i64)?
            .set_default("request_timeout_secs", 10_i64)?
            .set_default("lookback_blocks", (3 * BLOCKS_PER_DAY) as i64)?
            .set_default("confirmations", 0_i64)?
            .set_default("dedup_alerts", true)?
            .set_default("database_url", "sqlite:./alerts.db")?
            .set_default("csv_path", "om_alerts.csv")?
            .set_default("chart_path", "om_chart.svg")?
            .set_default("kline_interval", "1h")?
            .set_default("kline_limit", 100_i64)?
            .add_source(File::with_name(file).required(path.is_some()))
            .add_source(
                Environment::with_prefix("WATCH")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowlist"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.token_address()?;
        self.allowlist()?;
        self.threshold()?;

        if self.token_decimals > 28 {
            return Err(ConfigError::Invalid(format!(
                "token_decimals {} exceeds the supported maximum of 28",
                self.token_decimals
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("poll_interval_secs must be positive".to_string()));
        }
        if self.backoff_secs == 0 {
            return Err(ConfigError::Invalid("backoff_secs must be positive".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be positive".to_string()));
        }
        if self.price_symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("price_symbol is empty".to_string()));
        }
        if !(1..=1000).contains(&self.kline_limit) {
            return Err(ConfigError::Invalid(format!(
                "kline_limit {} must be between 1 and 1000",
                self.kline_limit
            )));
        }
        Ok(())
    }

    pub fn token_address(&self) -> Result<Address, ConfigError> {
        parse_address(&self.token_address)
    }

    pub fn allowlist(&self) -> Result<Allowlist, ConfigError> {
        Allowlist::parse(&self.allowlist)
    }

    pub fn threshold(&self) -> Result<Decimal, ConfigError> {
        let threshold = Decimal::from_str(self.threshold.trim())
            .map_err(|_| ConfigError::InvalidThreshold(self.threshold.clone()))?;
        if threshold.is_sign_negative() {
            return Err(ConfigError::InvalidThreshold(self.threshold.clone()));
        }
        Ok(threshold)
    }

    /// Quote side of the price pair, e.g. `USDT` for `OMUSDT`.
    pub fn quote_currency(&self) -> &str {
        self.price_symbol
            .strip_prefix(self.token_symbol.as_str())
            .filter(|quote| !quote.is_empty())
            .unwrap_or(&self.price_symbol)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        rpc_url: "http://127.0.0.1:8545".to_string(),
        token_address: "0x2ba8349123de45e931a8c8264c332e6e9cf593f9".to_string(),
        token_symbol: "OM".to_string(),
        token_decimals: 18,
        price_api_url: "http://127.0.0.1:1".to_string(),
        price_symbol: "OMUSDT".to_string(),
        allowlist: vec!["0x28C6c06298d514Db089934071355E5743bf21d60".to_string()],
        threshold: "100000".to_string(),
        poll_interval_secs: 3,
        backoff_secs: 5,
        request_timeout_secs: 10,
        lookback_blocks: 100,
        confirmations: 0,
        dedup_alerts: true,
        database_url: "sqlite::memory:".to_string(),
        csv_path: "alerts.csv".to_string(),
        chart_path: "chart.svg".to_string(),
        kline_interval: "1h".to_string(),
        kline_limit: 100,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_valid() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn threshold_parses_as_decimal() {
        let mut config = test_config();
        config.threshold = "50000.5".to_string();
        assert_eq!(config.threshold().unwrap(), Decimal::from_str("50000.5").unwrap());
    }

    #[test]
    fn rejects_garbage_and_negative_threshold() {
        let mut config = test_config();
        config.threshold = "lots".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidThreshold(_))));
        config.threshold = "-1".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidThreshold(_))));
    }

    #[test]
    fn rejects_bad_allowlist_entry() {
        let mut config = test_config();
        config.allowlist.push("0xnot-an-address".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAddress { .. })));
    }

    #[test]
    fn quote_currency_from_pair() {
        let mut config = test_config();
        assert_eq!(config.quote_currency(), "USDT");
        config.price_symbol = "BTCUSDT".to_string();
        assert_eq!(config.quote_currency(), "BTCUSDT");
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let mut config = test_config();
        config.poll_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_backoff() {
        let mut config = test_config();
        config.backoff_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("backoff_secs")));
    }

    #[test]
    fn rejects_unrepresentable_decimals() {
        let mut config = test_config();
        config.token_decimals = 30;
        assert!(config.validate().is_err());
    }
}
