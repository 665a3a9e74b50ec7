use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::EngineError;

pub mod account;
pub mod order;
pub mod position;
pub mod requests;

pub use account::Account;
pub use order::{LimitOrder, OrderStatus};
pub use position::{Position, PositionClose, PositionStatus, MAX_LEVERAGE, MIN_LEVERAGE};
pub use requests::{CloseTradeRequest, LimitOrderRequest, TradeRequest, TradeResponse};

/// Side of a trade
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// +1 for longs, -1 for shorts
    pub fn sign(self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "LONG" => Ok(Direction::Buy),
            "SELL" | "SHORT" => Ok(Direction::Sell),
            _ => Err(EngineError::InvalidDirection(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parsing() {
        assert_eq!("buy".parse::<Direction>().unwrap(), Direction::Buy);
        assert_eq!("SHORT".parse::<Direction>().unwrap(), Direction::Sell);
        assert!(matches!(
            "hold".parse::<Direction>(),
            Err(EngineError::InvalidDirection(_))
        ));
    }

    #[test]
    fn test_direction_serde() {
        assert_eq!(serde_json::to_string(&Direction::Sell).unwrap(), "\"SELL\"");
        let parsed: Direction = serde_json::from_str("\"BUY\"").unwrap();
        assert_eq!(parsed, Direction::Buy);
    }
}
