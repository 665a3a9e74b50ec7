use crate::config::TradingConfig;
use crate::models::Direction;

/// Slippage never exceeds 0.5%
const MAX_SLIPPAGE_BPS: f64 = 50.0;

/// Fee and slippage model applied by the executor
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    pub fee_rate: f64,
    pub leverage_fee_rate: f64,
    pub slippage_enabled: bool,
}

impl FeeSchedule {
    pub fn from_config(config: &TradingConfig) -> Self {
        Self {
            fee_rate: config.fee_rate,
            leverage_fee_rate: config.leverage_fee_rate,
            slippage_enabled: config.slippage_enabled,
        }
    }

    /// Fee charged when opening; leveraged opens also pay a borrowing fee
    pub fn open_fee(&self, size: f64, leverage: Option<f64>) -> f64 {
        let trading_fee = size * self.fee_rate;
        match leverage {
            Some(leverage) => trading_fee + size * self.leverage_fee_rate * leverage,
            None => trading_fee,
        }
    }

    pub fn close_fee(&self, size: f64) -> f64 {
        size * self.fee_rate
    }

    /// Size-tiered slippage in basis points, +10% per leverage unit above 1x
    pub fn slippage_bps(&self, size: f64, leverage: f64) -> f64 {
        if !self.slippage_enabled {
            return 0.0;
        }

        let base = if size < 100.0 {
            1.0
        } else if size < 1_000.0 {
            2.0
        } else if size < 5_000.0 {
            3.5
        } else {
            5.0
        };

        (base * (1.0 + (leverage - 1.0).max(0.0) * 0.1)).min(MAX_SLIPPAGE_BPS)
    }

    /// Execution price after slippage: buys pay up, sells receive less
    pub fn entry_price(&self, quote: f64, direction: Direction, size: f64, leverage: f64) -> f64 {
        let slippage = self.slippage_bps(size, leverage) / 10_000.0;
        match direction {
            Direction::Buy => quote * (1.0 + slippage),
            Direction::Sell => quote * (1.0 - slippage),
        }
    }
}
