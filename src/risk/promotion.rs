use serde::{Deserialize, Serialize};

use super::StrategyMetrics;

/// Thresholds a sandboxed strategy must clear before going live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionCriteria {
    pub min_trades: usize,
    pub min_win_rate: f64,         // percent
    pub min_sharpe_ratio: f64,
    pub min_total_profit_loss: f64, // total P&L must exceed this
    pub max_drawdown_pct: f64,
    pub min_profit_factor: f64,
}

impl Default for PromotionCriteria {
    fn default() -> Self {
        Self {
            min_trades: 100,
            min_win_rate: 60.0,
            min_sharpe_ratio: 1.0,
            min_total_profit_loss: 0.0,
            max_drawdown_pct: 20.0,
            min_profit_factor: 1.5,
        }
    }
}

impl PromotionCriteria {
    /// Human-readable list of unmet criteria (empty when eligible)
    pub fn missing(&self, metrics: &StrategyMetrics) -> Vec<String> {
        if metrics.total_trades == 0 {
            return vec!["No trades executed yet".to_string()];
        }

        let mut missing = Vec::new();

        if metrics.total_trades < self.min_trades {
            missing.push(format!(
                "Need {} more trades (have {}, need {})",
                self.min_trades - metrics.total_trades,
                metrics.total_trades,
                self.min_trades
            ));
        }

        if metrics.win_rate < self.min_win_rate {
            missing.push(format!(
                "Win rate {:.1}% below {:.1}%",
                metrics.win_rate, self.min_win_rate
            ));
        }

        if metrics.sharpe_ratio < self.min_sharpe_ratio {
            missing.push(format!(
                "Sharpe ratio {:.2} below {:.2}",
                metrics.sharpe_ratio, self.min_sharpe_ratio
            ));
        }

        if metrics.total_profit_loss <= self.min_total_profit_loss {
            missing.push(format!(
                "Total P&L ${:.2} must exceed ${:.2}",
                metrics.total_profit_loss, self.min_total_profit_loss
            ));
        }

        if metrics.max_drawdown_pct > self.max_drawdown_pct {
            missing.push(format!(
                "Max drawdown {:.1}% exceeds {:.1}%",
                metrics.max_drawdown_pct, self.max_drawdown_pct
            ));
        }

        if metrics.profit_factor < self.min_profit_factor {
            missing.push(format!(
                "Profit factor {:.2} below {:.2}",
                metrics.profit_factor, self.min_profit_factor
            ));
        }

        missing
    }

    pub fn is_met(&self, metrics: &StrategyMetrics) -> bool {
        self.missing(metrics).is_empty()
    }
}
