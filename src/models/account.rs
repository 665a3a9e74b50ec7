use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-owner sandbox account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub owner_id: Uuid,
    pub balance: f64,
    pub trading_enabled: bool,
    /// Sum of profit_loss over every closed position
    pub realized_pnl: f64,
    /// Starting balance plus every top-up
    pub total_deposits: f64,
}

impl Account {
    pub fn new(owner_id: Uuid, initial_balance: f64) -> Self {
        Self {
            owner_id,
            balance: initial_balance,
            trading_enabled: true,
            realized_pnl: 0.0,
            total_deposits: initial_balance,
        }
    }
}
