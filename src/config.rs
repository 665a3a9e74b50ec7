use std::collections::HashMap;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::risk::PromotionCriteria;
use crate::Result;

/// Default config file, looked up relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "sandbox.toml";

/// Top-level engine configuration
///
/// Every section falls back to its `Default`, so an empty file (or no file)
/// yields a working sandbox. Environment variables override file values, e.g.
/// `SANDBOX__TRADING__FEE_RATE=0.001`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub trading: TradingConfig,
    pub scheduler: SchedulerConfig,
    pub analytics: AnalyticsConfig,
    pub promotion: PromotionCriteria,
    pub database: DatabaseConfig,
    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Fee charged on notional at open and again at close (platform + referral)
    pub fee_rate: f64,
    /// Borrowing fee per leverage unit, charged once on leveraged opens
    pub leverage_fee_rate: f64,
    /// Quotes older than this are treated as unavailable
    pub max_price_age_secs: i64,
    /// Balance credited when an owner trades for the first time
    pub starting_balance: f64,
    /// Apply size-tiered slippage to entry prices
    pub slippage_enabled: bool,
    /// Refill balances that fall below `auto_topup_threshold` after a trade
    pub auto_topup_enabled: bool,
    pub auto_topup_threshold: f64,
    pub auto_topup_amount: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            fee_rate: 0.0026,           // 0.25% platform + 0.01% referral
            leverage_fee_rate: 0.0001,  // 0.01% per leverage unit
            max_price_age_secs: 60,
            starting_balance: 10_000.0,
            slippage_enabled: false,
            auto_topup_enabled: false,
            auto_topup_threshold: 1_000.0,
            auto_topup_amount: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    pub auto_promote_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            auto_promote_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Only the most recent N closed trades feed the metrics (None = all)
    pub history_limit: Option<usize>,
    /// Capital expressed in bet-sized units for the risk-of-ruin estimate
    pub risk_of_ruin_capital_units: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            history_limit: None,
            risk_of_ruin_capital_units: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub requests_per_minute: u32,
    /// Trading pair -> CoinGecko coin id
    pub coin_ids: HashMap<String, String>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        let coin_ids = [
            ("BTC/USDC", "bitcoin"),
            ("ETH/USDC", "ethereum"),
            ("SOL/USDC", "solana"),
            ("BONK/USDC", "bonk"),
            ("JUP/USDC", "jupiter-exchange-solana"),
        ]
        .into_iter()
        .map(|(pair, id)| (pair.to_string(), id.to_string()))
        .collect();

        Self {
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            api_key: None,
            requests_per_minute: 30, // Demo API limit
            coin_ids,
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional TOML file plus `SANDBOX__*` env vars
    pub fn load(path: Option<&str>) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path.unwrap_or(DEFAULT_CONFIG_FILE)).required(false))
            .add_source(Environment::with_prefix("SANDBOX").separator("__"))
            .build()?;

        let mut config: EngineConfig = settings.try_deserialize()?;

        // Fall back to the conventional DATABASE_URL used by sqlx tooling
        if config.database.url.is_none() {
            config.database.url = std::env::var("DATABASE_URL").ok();
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.trading.fee_rate, 0.0026);
        assert_eq!(config.trading.starting_balance, 10_000.0);
        assert!(!config.trading.slippage_enabled);
        assert!(!config.trading.auto_topup_enabled);
        assert_eq!(config.trading.auto_topup_threshold, 1_000.0);
        assert_eq!(config.trading.auto_topup_amount, 10_000.0);
        assert_eq!(config.scheduler.interval_secs, 30);
        assert_eq!(config.promotion.min_trades, 100);
        assert_eq!(
            config.oracle.coin_ids.get("BTC/USDC").map(String::as_str),
            Some("bitcoin")
        );
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = EngineConfig::load(Some("does-not-exist.toml")).unwrap();
        assert_eq!(config.trading.max_price_age_secs, 60);
        assert_eq!(config.analytics.risk_of_ruin_capital_units, 20.0);
    }
}
