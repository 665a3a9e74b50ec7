use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::{Direction, LimitOrderRequest};
use crate::EngineError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(EngineError::DataIntegrity(format!(
                "unknown order status '{}'",
                other
            ))),
        }
    }
}

/// Limit order waiting for the market to reach `limit_price`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrder {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub session_id: Uuid,
    pub strategy_name: String,
    pub trading_pair: String,
    pub direction: Direction,
    pub size_usd: f64,
    pub leverage: f64,
    pub limit_price: f64,
    pub reasoning: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub position_id: Option<Uuid>,
}

impl LimitOrder {
    pub fn pending(owner_id: Uuid, request: &LimitOrderRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            session_id: request.trade.session_id,
            strategy_name: request.trade.strategy(),
            trading_pair: request.trade.trading_pair.clone(),
            direction: request.trade.direction,
            size_usd: request.trade.size_usd,
            leverage: request.trade.leverage.unwrap_or(1.0),
            limit_price: request.limit_price,
            reasoning: request.trade.reasoning.clone(),
            status: OrderStatus::Pending,
            created_at: Utc::now().trunc_subsecs(6),
            filled_at: None,
            position_id: None,
        }
    }

    /// BUY fills at or below the limit, SELL at or above
    pub fn is_triggered(&self, current_price: f64) -> bool {
        match self.direction {
            Direction::Buy => current_price <= self.limit_price,
            Direction::Sell => current_price >= self.limit_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeRequest;

    fn order(direction: Direction, limit_price: f64) -> LimitOrder {
        let request = LimitOrderRequest {
            trade: TradeRequest::new("ETH/USDC", direction, 1_000.0),
            limit_price,
        };
        LimitOrder::pending(Uuid::new_v4(), &request)
    }

    #[test]
    fn test_buy_trigger() {
        let order = order(Direction::Buy, 2_000.0);
        assert!(order.is_triggered(1_999.0));
        assert!(order.is_triggered(2_000.0));
        assert!(!order.is_triggered(2_000.01));
    }

    #[test]
    fn test_sell_trigger() {
        let order = order(Direction::Sell, 2_000.0);
        assert!(order.is_triggered(2_001.0));
        assert!(order.is_triggered(2_000.0));
        assert!(!order.is_triggered(1_999.99));
    }

    #[test]
    fn test_pending_defaults() {
        let order = order(Direction::Buy, 2_000.0);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.leverage, 1.0);
        assert_eq!(order.strategy_name, "manual");
        assert!(order.position_id.is_none());
    }
}
