use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Direction, Position, PositionStatus};

/// Strategy recorded on trades submitted without one
pub const MANUAL_STRATEGY: &str = "manual";

/// Request to open a position (market or, when `leverage` is set, leveraged)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRequest {
    #[serde(default = "Uuid::new_v4")]
    pub session_id: Uuid,
    #[serde(default)]
    pub strategy_name: Option<String>,
    pub trading_pair: String,
    pub direction: Direction,
    pub size_usd: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub leverage: Option<f64>,
}

impl TradeRequest {
    pub fn new(trading_pair: &str, direction: Direction, size_usd: f64) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            strategy_name: None,
            trading_pair: trading_pair.to_string(),
            direction,
            size_usd,
            reasoning: String::new(),
            leverage: None,
        }
    }

    pub fn with_strategy(mut self, strategy_name: &str) -> Self {
        self.strategy_name = Some(strategy_name.to_string());
        self
    }

    pub fn with_leverage(mut self, leverage: f64) -> Self {
        self.leverage = Some(leverage);
        self
    }

    pub fn with_reasoning(mut self, reasoning: &str) -> Self {
        self.reasoning = reasoning.to_string();
        self
    }

    pub fn strategy(&self) -> String {
        self.strategy_name
            .clone()
            .unwrap_or_else(|| MANUAL_STRATEGY.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseTradeRequest {
    pub trade_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrderRequest {
    #[serde(flatten)]
    pub trade: TradeRequest,
    pub limit_price: f64,
}

/// Outward-facing view of a position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResponse {
    pub id: Uuid,
    pub trading_pair: String,
    pub direction: Direction,
    pub size: f64,
    pub leverage: f64,
    pub collateral: f64,
    pub entry_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquidation_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_loss_percent: Option<f64>,
    pub fees: f64,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    pub reasoning: String,
    pub trade_hash: String,
}

impl From<&Position> for TradeResponse {
    fn from(position: &Position) -> Self {
        Self {
            id: position.id,
            trading_pair: position.trading_pair.clone(),
            direction: position.direction,
            size: position.size,
            leverage: position.leverage,
            collateral: position.collateral,
            entry_price: position.entry_price,
            exit_price: position.exit_price,
            liquidation_price: position.liquidation_price,
            profit_loss: position.profit_loss,
            profit_loss_percent: position.profit_loss_percent,
            fees: position.fees,
            status: position.status,
            opened_at: position.opened_at,
            closed_at: position.closed_at,
            reasoning: position.reasoning.clone(),
            trade_hash: position.trade_hash.clone(),
        }
    }
}
