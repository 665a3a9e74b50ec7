use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use uuid::Uuid;

use super::Direction;
use crate::EngineError;

pub const MIN_LEVERAGE: f64 = 1.0;
pub const MAX_LEVERAGE: f64 = 20.0;

const COLLATERAL_EPSILON: f64 = 1e-9;
const LIQUIDATION_BUFFER: f64 = 0.05;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(PositionStatus::Open),
            "CLOSED" => Ok(PositionStatus::Closed),
            other => Err(EngineError::DataIntegrity(format!(
                "unknown position status '{}'",
                other
            ))),
        }
    }
}

/// A simulated position (a.k.a. trade)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub session_id: Uuid,
    pub strategy_name: String,
    pub trading_pair: String,
    pub direction: Direction,
    pub size: f64,       // Notional, quote currency
    pub leverage: f64,   // 1.0 ..= 20.0
    pub collateral: f64, // size / leverage
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub liquidation_price: Option<f64>,
    pub fees: f64, // Open fee while OPEN, open + close fee once CLOSED
    pub profit_loss: Option<f64>,
    pub profit_loss_percent: Option<f64>,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub reasoning: String,
    pub trade_hash: String,
}

/// Fields written together by the OPEN -> CLOSED transition
#[derive(Debug, Clone, PartialEq)]
pub struct PositionClose {
    pub exit_price: f64,
    pub fees: f64,
    pub profit_loss: f64,
    pub profit_loss_percent: f64,
    pub closed_at: DateTime<Utc>,
}

impl Position {
    /// Build a new OPEN position, stamping its creation time and content hash
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        owner_id: Uuid,
        session_id: Uuid,
        strategy_name: String,
        trading_pair: String,
        direction: Direction,
        size: f64,
        leverage: f64,
        entry_price: f64,
        open_fee: f64,
        reasoning: String,
    ) -> Self {
        // Postgres keeps microseconds; truncate so a reload compares equal
        let opened_at = Utc::now().trunc_subsecs(6);
        let trade_hash = Self::compute_hash(&trading_pair, direction, size, entry_price, opened_at);
        let collateral = size / leverage;
        let liquidation_price = (leverage > MIN_LEVERAGE).then(|| {
            Self::liquidation_price_for(direction, entry_price, size, collateral, open_fee)
        });

        Self {
            id: Uuid::new_v4(),
            owner_id,
            session_id,
            strategy_name,
            trading_pair,
            direction,
            size,
            leverage,
            collateral,
            entry_price,
            exit_price: None,
            liquidation_price,
            fees: open_fee,
            profit_loss: None,
            profit_loss_percent: None,
            status: PositionStatus::Open,
            opened_at,
            closed_at: None,
            reasoning,
            trade_hash,
        }
    }

    /// SHA-256 over the trade's identifying content, hex encoded
    pub fn compute_hash(
        trading_pair: &str,
        direction: Direction,
        size: f64,
        entry_price: f64,
        opened_at: DateTime<Utc>,
    ) -> String {
        let content = format!(
            "{}|{}|{:.8}|{:.8}|{}",
            trading_pair,
            direction,
            size,
            entry_price,
            opened_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
        );
        hex::encode(Sha256::digest(content.as_bytes()))
    }

    /// Price at which the collateral left after the open fee is exhausted,
    /// pulled in by a 5% buffer
    pub fn liquidation_price_for(
        direction: Direction,
        entry_price: f64,
        size: f64,
        collateral: f64,
        open_fee: f64,
    ) -> f64 {
        let max_loss = (collateral - open_fee).max(0.0);
        let move_to_liquidation = if size > 0.0 {
            max_loss / size * (1.0 - LIQUIDATION_BUFFER)
        } else {
            0.0
        };
        match direction {
            Direction::Buy => entry_price * (1.0 - move_to_liquidation),
            Direction::Sell => entry_price * (1.0 + move_to_liquidation),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Base-asset quantity implied by the notional at entry
    pub fn quantity(&self) -> f64 {
        if self.entry_price > 0.0 {
            self.size / self.entry_price
        } else {
            0.0
        }
    }

    /// P&L before fees if the position were closed at `exit_price`
    pub fn gross_pnl(&self, exit_price: f64) -> f64 {
        (exit_price - self.entry_price) * self.quantity() * self.direction.sign()
    }

    /// `collateral * leverage == size` within epsilon
    pub fn collateral_consistent(&self) -> bool {
        let drift = (self.collateral * self.leverage - self.size).abs();
        drift <= COLLATERAL_EPSILON * self.size.max(1.0)
    }

    pub fn apply_close(&mut self, close: &PositionClose) {
        self.exit_price = Some(close.exit_price);
        self.fees = close.fees;
        self.profit_loss = Some(close.profit_loss);
        self.profit_loss_percent = Some(close.profit_loss_percent);
        self.closed_at = Some(close.closed_at);
        self.status = PositionStatus::Closed;
    }
}
