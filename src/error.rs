use thiserror::Error;
use uuid::Uuid;

use crate::strategy::StrategyState;

/// Errors surfaced by the trading engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid leverage {0}x: must be between 1x and 20x")]
    InvalidLeverage(f64),

    #[error("invalid trade size {0}: must be a positive amount")]
    InvalidSize(f64),

    #[error("invalid limit price {0}: must be a positive amount")]
    InvalidLimitPrice(f64),

    #[error("invalid direction '{0}': expected BUY or SELL")]
    InvalidDirection(String),

    #[error("price unavailable for {pair}: {reason}")]
    PriceUnavailable { pair: String, reason: String },

    #[error("trade {0} not found or already closed")]
    TradeNotFoundOrAlreadyClosed(Uuid),

    #[error("insufficient balance: required ${required:.2}, available ${available:.2}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("trading is disabled for owner {0}")]
    TradingDisabled(Uuid),

    #[error("limit order {0} not found")]
    OrderNotFound(Uuid),

    #[error("limit order {0} is no longer pending")]
    OrderNotPending(Uuid),

    #[error("strategy '{0}' not found")]
    StrategyNotFound(String),

    #[error("strategy '{name}' cannot be promoted from {from}")]
    InvalidStrategyTransition { name: String, from: StrategyState },

    #[error("strategy '{name}' does not meet promotion criteria: {}", missing.join("; "))]
    PromotionCriteriaNotMet { name: String, missing: Vec<String> },

    #[error("invalid Kelly input: {0}")]
    InvalidKellyInput(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl EngineError {
    pub fn price_unavailable(pair: &str, reason: impl Into<String>) -> Self {
        Self::PriceUnavailable {
            pair: pair.to_string(),
            reason: reason.into(),
        }
    }

    /// Validation failures that a caller should fix rather than retry
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidLeverage(_)
                | Self::InvalidSize(_)
                | Self::InvalidLimitPrice(_)
                | Self::InvalidDirection(_)
                | Self::InvalidKellyInput(_)
        )
    }
}
