use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::PromotionCriteria;
use crate::config::AnalyticsConfig;
use crate::db::PositionLedger;
use crate::models::Position;
use crate::Result;

/// Percentile used for the historical Value-at-Risk estimate
const VAR_PERCENTILE: f64 = 5.0;

/// Which closed trades feed a performance report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PerformanceScope {
    Owner(Uuid),
    Strategy(String),
}

impl PerformanceScope {
    pub fn label(&self) -> String {
        match self {
            PerformanceScope::Owner(owner_id) => format!("owner:{}", owner_id),
            PerformanceScope::Strategy(name) => name.clone(),
        }
    }
}

/// Performance and risk metrics over a set of closed trades
///
/// Every field is finite; degenerate inputs (no trades, no losses, zero
/// variance) collapse to 0 rather than NaN or infinity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub scope: String,

    // Trade statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64, // percent

    // P&L distribution
    pub total_profit_loss: f64,
    pub total_fees: f64,
    pub avg_profit: f64,
    pub avg_loss: f64, // magnitude
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64,

    // Risk
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub kelly_criterion: f64,
    pub var_5_percent: f64, // percent return
    pub risk_of_ruin: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    /// Distance of the final equity below its running peak
    pub current_drawdown: f64,
    pub current_drawdown_pct: f64,

    // Exposure
    pub avg_position_size: f64,
    pub max_position_size: f64,

    // Promotion
    pub can_promote_to_live: bool,
    pub missing_criteria: Vec<String>,

    pub last_updated: DateTime<Utc>,
}

impl StrategyMetrics {
    /// Metrics for a scope with no closed trades
    pub fn empty(scope: &str) -> Self {
        Self {
            scope: scope.to_string(),
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            total_profit_loss: 0.0,
            total_fees: 0.0,
            avg_profit: 0.0,
            avg_loss: 0.0,
            largest_win: 0.0,
            largest_loss: 0.0,
            profit_factor: 0.0,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            kelly_criterion: 0.0,
            var_5_percent: 0.0,
            risk_of_ruin: 0.0,
            max_drawdown: 0.0,
            max_drawdown_pct: 0.0,
            current_drawdown: 0.0,
            current_drawdown_pct: 0.0,
            avg_position_size: 0.0,
            max_position_size: 0.0,
            can_promote_to_live: false,
            missing_criteria: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Calculate metrics from closed positions, given in close order
    ///
    /// Open positions are ignored. `initial_capital` anchors the equity curve
    /// for drawdown; `capital_units` sizes the risk-of-ruin estimate.
    pub fn from_positions(
        scope: &str,
        positions: &[Position],
        initial_capital: f64,
        capital_units: f64,
    ) -> Self {
        let closed: Vec<(f64, f64, f64)> = positions
            .iter()
            .filter_map(|p| Some((p.profit_loss?, p.profit_loss_percent?, p.size)))
            .collect();

        let total_trades = closed.len();
        if total_trades == 0 {
            return Self::empty(scope);
        }

        let pnls: Vec<f64> = closed.iter().map(|(pnl, _, _)| *pnl).collect();
        let returns: Vec<f64> = closed.iter().map(|(_, pct, _)| *pct).collect();
        let sizes: Vec<f64> = closed.iter().map(|(_, _, size)| *size).collect();

        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();

        let total_profit: f64 = wins.iter().sum();
        let total_loss: f64 = losses.iter().map(|l| l.abs()).sum();

        let win_rate = wins.len() as f64 / total_trades as f64 * 100.0;
        let avg_profit = if wins.is_empty() {
            0.0
        } else {
            total_profit / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            total_loss / losses.len() as f64
        };

        let largest_win = wins.iter().copied().fold(0.0, f64::max);
        let largest_loss = losses.iter().copied().fold(0.0, f64::min);

        let profit_factor = if total_loss > 0.0 {
            total_profit / total_loss
        } else {
            0.0
        };

        let kelly_criterion = portfolio_kelly(win_rate / 100.0, avg_profit, avg_loss);
        let drawdown = calculate_drawdown(&pnls, initial_capital);
        let total_fees: f64 = positions.iter().filter(|p| !p.is_open()).map(|p| p.fees).sum();

        Self {
            scope: scope.to_string(),
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: finite_or_zero(win_rate),
            total_profit_loss: finite_or_zero(pnls.iter().sum()),
            total_fees: finite_or_zero(total_fees),
            avg_profit: finite_or_zero(avg_profit),
            avg_loss: finite_or_zero(avg_loss),
            largest_win: finite_or_zero(largest_win),
            largest_loss: finite_or_zero(largest_loss),
            profit_factor: finite_or_zero(profit_factor),
            sharpe_ratio: sharpe_ratio(&returns),
            sortino_ratio: sortino_ratio(&returns),
            kelly_criterion,
            var_5_percent: value_at_risk(&returns, VAR_PERCENTILE),
            risk_of_ruin: risk_of_ruin(kelly_criterion, capital_units),
            max_drawdown: finite_or_zero(drawdown.max),
            max_drawdown_pct: finite_or_zero(drawdown.max_pct),
            current_drawdown: finite_or_zero(drawdown.current),
            current_drawdown_pct: finite_or_zero(drawdown.current_pct),
            avg_position_size: finite_or_zero(mean(&sizes)),
            max_position_size: finite_or_zero(sizes.iter().copied().fold(0.0, f64::max)),
            can_promote_to_live: false,
            missing_criteria: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Fill in promotion eligibility against `criteria`
    pub fn with_promotion(mut self, criteria: &PromotionCriteria) -> Self {
        self.missing_criteria = criteria.missing(&self);
        self.can_promote_to_live = self.missing_criteria.is_empty();
        self
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let squared: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    (squared / (values.len() - 1) as f64).sqrt()
}

/// mean / stdev * sqrt(N), with a zero risk-free rate
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    let std_dev = sample_std_dev(returns);
    if returns.len() < 2 || std_dev <= 0.0 {
        return 0.0;
    }
    finite_or_zero(mean(returns) / std_dev * (returns.len() as f64).sqrt())
}

/// Like Sharpe, but only penalises downside volatility
///
/// Downside deviation is the root-mean-square of the negative returns.
pub fn sortino_ratio(returns: &[f64]) -> f64 {
    let negatives: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if returns.len() < 2 || negatives.is_empty() {
        return 0.0;
    }

    let downside_dev =
        (negatives.iter().map(|r| r * r).sum::<f64>() / negatives.len() as f64).sqrt();
    if downside_dev <= 0.0 {
        return 0.0;
    }

    finite_or_zero(mean(returns) / downside_dev * (returns.len() as f64).sqrt())
}

/// Kelly fraction from realised win rate and payoff, clamped to [0, 1]
pub fn portfolio_kelly(win_probability: f64, avg_profit: f64, avg_loss: f64) -> f64 {
    if avg_profit <= 0.0 {
        return 0.0;
    }
    let kelly = if avg_loss > 0.0 {
        let payoff = avg_profit / avg_loss;
        win_probability - (1.0 - win_probability) / payoff
    } else {
        win_probability
    };
    finite_or_zero(kelly).clamp(0.0, 1.0)
}

/// Linear-interpolated percentile of the returns (0 when empty)
pub fn value_at_risk(returns: &[f64], percentile: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }

    let mut sorted: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (percentile / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;

    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// ((1 - edge) / (1 + edge)) ^ units
///
/// Approximation only; reported as 0 when there is no positive edge.
pub fn risk_of_ruin(edge: f64, capital_units: f64) -> f64 {
    if edge <= 0.0 || !edge.is_finite() || capital_units <= 0.0 {
        return 0.0;
    }
    let edge = edge.min(1.0);
    finite_or_zero(((1.0 - edge) / (1.0 + edge)).powf(capital_units))
}

struct Drawdown {
    max: f64,
    max_pct: f64,
    current: f64,
    current_pct: f64,
}

/// Largest and latest peak-to-trough decline of the equity curve
fn calculate_drawdown(pnls: &[f64], initial_capital: f64) -> Drawdown {
    let mut peak = initial_capital;
    let mut equity = initial_capital;
    let mut max_dd = 0.0;
    let mut max_dd_pct = 0.0;

    for pnl in pnls {
        equity += pnl;
        if equity > peak {
            peak = equity;
        }

        let drawdown = peak - equity;
        if drawdown > max_dd {
            max_dd = drawdown;
        }
        if peak > 0.0 {
            let drawdown_pct = drawdown / peak * 100.0;
            if drawdown_pct > max_dd_pct {
                max_dd_pct = drawdown_pct;
            }
        }
    }

    let current = peak - equity;
    Drawdown {
        max: max_dd,
        max_pct: max_dd_pct,
        current,
        current_pct: if peak > 0.0 { current / peak * 100.0 } else { 0.0 },
    }
}

/// Per-strategy summary inside a master report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySummary {
    pub strategy_name: String,
    pub total_trades: usize,
    pub win_rate: f64,
    pub total_profit_loss: f64,
}

/// Aggregate view across every strategy an owner has traded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterMetrics {
    pub owner_id: Uuid,
    pub strategy_count: usize,
    pub total_trades: usize,
    pub total_profit_loss: f64,
    pub overall_win_rate: f64,
    pub best_strategy: Option<String>,
    pub worst_strategy: Option<String>,
    pub strategies: Vec<StrategySummary>,
}

/// Read-only analytics over the position ledger
pub struct RiskAnalytics {
    ledger: Arc<dyn PositionLedger>,
    config: AnalyticsConfig,
    criteria: PromotionCriteria,
    initial_capital: f64,
}

impl RiskAnalytics {
    pub fn new(
        ledger: Arc<dyn PositionLedger>,
        config: AnalyticsConfig,
        criteria: PromotionCriteria,
        initial_capital: f64,
    ) -> Self {
        Self {
            ledger,
            config,
            criteria,
            initial_capital,
        }
    }

    pub fn criteria(&self) -> &PromotionCriteria {
        &self.criteria
    }

    /// Performance and risk metrics for an owner or a strategy
    pub async fn get_performance(&self, scope: &PerformanceScope) -> Result<StrategyMetrics> {
        let limit = self.config.history_limit;
        let positions = match scope {
            PerformanceScope::Owner(owner_id) => self.ledger.list_closed(*owner_id, limit).await?,
            PerformanceScope::Strategy(name) => {
                self.ledger.list_closed_by_strategy(name, limit).await?
            }
        };

        let metrics = StrategyMetrics::from_positions(
            &scope.label(),
            &positions,
            self.initial_capital,
            self.config.risk_of_ruin_capital_units,
        )
        .with_promotion(&self.criteria);

        tracing::debug!(
            scope = %metrics.scope,
            trades = metrics.total_trades,
            "Computed performance (win rate {:.1}%, Sharpe {:.2})",
            metrics.win_rate,
            metrics.sharpe_ratio
        );

        Ok(metrics)
    }

    /// Roll up every strategy the owner has closed trades for
    pub async fn master_metrics(&self, owner_id: Uuid) -> Result<MasterMetrics> {
        let positions = self.ledger.list_closed(owner_id, None).await?;

        let mut by_strategy: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for position in &positions {
            if let Some(pnl) = position.profit_loss {
                by_strategy
                    .entry(position.strategy_name.as_str())
                    .or_default()
                    .push(pnl);
            }
        }

        let strategies: Vec<StrategySummary> = by_strategy
            .iter()
            .map(|(name, pnls)| StrategySummary {
                strategy_name: name.to_string(),
                total_trades: pnls.len(),
                win_rate: pnls.iter().filter(|p| **p > 0.0).count() as f64 / pnls.len() as f64
                    * 100.0,
                total_profit_loss: pnls.iter().sum(),
            })
            .collect();

        let total_trades: usize = strategies.iter().map(|s| s.total_trades).sum();
        let total_wins = positions
            .iter()
            .filter(|p| p.profit_loss.map(|pnl| pnl > 0.0).unwrap_or(false))
            .count();
        let overall_win_rate = if total_trades > 0 {
            total_wins as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let best_strategy = strategies
            .iter()
            .max_by(|a, b| a.total_profit_loss.total_cmp(&b.total_profit_loss))
            .map(|s| s.strategy_name.clone());
        let worst_strategy = strategies
            .iter()
            .min_by(|a, b| a.total_profit_loss.total_cmp(&b.total_profit_loss))
            .map(|s| s.strategy_name.clone());

        Ok(MasterMetrics {
            owner_id,
            strategy_count: strategies.len(),
            total_trades,
            total_profit_loss: finite_or_zero(strategies.iter().map(|s| s.total_profit_loss).sum()),
            overall_win_rate,
            best_strategy,
            worst_strategy,
            strategies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, PositionClose};

    fn create_closed_position(strategy: &str, pnl: f64) -> Position {
        let mut position = Position::open(
            Uuid::new_v4(),
            Uuid::new_v4(),
            strategy.to_string(),
            "TEST/USDC".to_string(),
            Direction::Buy,
            1_000.0,
            1.0,
            100.0,
            0.0,
            String::new(),
        );
        position.apply_close(&PositionClose {
            exit_price: 100.0 + pnl / 10.0,
            fees: 0.0,
            profit_loss: pnl,
            profit_loss_percent: pnl / 1_000.0 * 100.0,
            closed_at: Utc::now(),
        });
        position
    }

    fn metrics_for(pnls: &[f64]) -> StrategyMetrics {
        let positions: Vec<Position> =
            pnls.iter().map(|p| create_closed_position("s", *p)).collect();
        StrategyMetrics::from_positions("s", &positions, 10_000.0, 20.0)
    }

    fn assert_all_finite(m: &StrategyMetrics) {
        for value in [
            m.win_rate,
            m.total_profit_loss,
            m.avg_profit,
            m.avg_loss,
            m.largest_win,
            m.largest_loss,
            m.profit_factor,
            m.sharpe_ratio,
            m.sortino_ratio,
            m.kelly_criterion,
            m.var_5_percent,
            m.risk_of_ruin,
            m.max_drawdown,
            m.max_drawdown_pct,
            m.current_drawdown,
            m.current_drawdown_pct,
            m.avg_position_size,
            m.max_position_size,
        ] {
            assert!(value.is_finite());
        }
    }

    #[test]
    fn test_metrics_with_no_trades() {
        let metrics = metrics_for(&[]);

        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, 0.0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.sortino_ratio, 0.0);
        assert_eq!(metrics.kelly_criterion, 0.0);
        assert_eq!(metrics.var_5_percent, 0.0);
        assert_eq!(metrics.profit_factor, 0.0);
        assert_all_finite(&metrics);
    }

    #[test]
    fn test_metrics_with_winning_trades() {
        let metrics = metrics_for(&[100.0, 50.0, -30.0]);

        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 1);
        assert!((metrics.win_rate - 66.66).abs() < 0.1);
        assert!((metrics.total_profit_loss - 120.0).abs() < 0.01);
        assert!((metrics.avg_profit - 75.0).abs() < 1e-9);
        assert!((metrics.avg_loss - 30.0).abs() < 1e-9);
        assert_eq!(metrics.largest_win, 100.0);
        assert_eq!(metrics.largest_loss, -30.0);
    }

    #[test]
    fn test_profit_factor_calculation() {
        let metrics = metrics_for(&[200.0, 100.0, -50.0]);
        // 300 / 50
        assert!((metrics.profit_factor - 6.0).abs() < 0.01);
    }

    #[test]
    fn test_only_wins_has_no_infinite_ratios() {
        let metrics = metrics_for(&[10.0, 20.0, 30.0]);

        assert_eq!(metrics.profit_factor, 0.0);
        assert_eq!(metrics.sortino_ratio, 0.0);
        assert_eq!(metrics.kelly_criterion, 1.0);
        assert!(metrics.sharpe_ratio > 0.0);
        assert_all_finite(&metrics);
    }

    #[test]
    fn test_identical_returns_have_zero_sharpe() {
        let metrics = metrics_for(&[10.0, 10.0, 10.0, 10.0]);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_all_finite(&metrics);
    }

    #[test]
    fn test_single_trade_has_zero_sharpe_and_sortino() {
        let metrics = metrics_for(&[-40.0]);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.sortino_ratio, 0.0);
        assert_eq!(metrics.kelly_criterion, 0.0);
        assert_eq!(metrics.risk_of_ruin, 0.0);
    }

    #[test]
    fn test_drawdown_calculation() {
        let metrics = metrics_for(&[100.0, -200.0, 50.0]);
        // Peak 10_100, trough 9_900
        assert!((metrics.max_drawdown - 200.0).abs() < 0.01);
        assert!((metrics.max_drawdown_pct - 200.0 / 10_100.0 * 100.0).abs() < 1e-9);
        // Recovered 50 of the 200 so far
        assert!((metrics.current_drawdown - 150.0).abs() < 1e-9);
        assert!((metrics.current_drawdown_pct - 150.0 / 10_100.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_current_drawdown_is_zero_at_new_peak() {
        let metrics = metrics_for(&[-100.0, 300.0]);
        assert!((metrics.max_drawdown - 100.0).abs() < 1e-9);
        assert_eq!(metrics.current_drawdown, 0.0);
        assert_eq!(metrics.current_drawdown_pct, 0.0);
    }

    #[test]
    fn test_position_size_statistics() {
        let mut positions: Vec<Position> = [10.0, -5.0, 20.0]
            .iter()
            .map(|p| create_closed_position("s", *p))
            .collect();
        positions[1].size = 4_000.0;
        positions[2].size = 2_500.0;
        // Still open: excluded from every statistic
        positions.push(Position::open(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "s".to_string(),
            "TEST/USDC".to_string(),
            Direction::Buy,
            50_000.0,
            1.0,
            100.0,
            0.0,
            String::new(),
        ));

        let metrics = StrategyMetrics::from_positions("s", &positions, 10_000.0, 20.0);

        assert_eq!(metrics.total_trades, 3);
        assert!((metrics.avg_position_size - 2_500.0).abs() < 1e-9);
        assert_eq!(metrics.max_position_size, 4_000.0);
    }

    #[test]
    fn test_sharpe_matches_formula() {
        // returns (percent of 1_000 collateral): 10, -5, 15
        let returns = [10.0, -5.0, 15.0];
        let mean = 20.0 / 3.0;
        let variance = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / 2.0;
        let expected = mean / variance.sqrt() * 3f64.sqrt();

        assert!((sharpe_ratio(&returns) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_sortino_uses_downside_only() {
        let returns = [10.0, -5.0, 15.0, -10.0];
        let mean = 10.0 / 4.0;
        let downside = ((25.0 + 100.0) / 2.0f64).sqrt();
        let expected = mean / downside * 2.0;

        assert!((sortino_ratio(&returns) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_value_at_risk_interpolates() {
        let returns: Vec<f64> = (1..=21).map(|r| r as f64).collect();
        // rank = 0.05 * 20 = 1.0 -> second smallest
        assert_eq!(value_at_risk(&returns, 5.0), 2.0);

        let returns = [-10.0, 0.0, 10.0];
        // rank = 0.05 * 2 = 0.1 -> -10 + 10 * 0.1
        assert!((value_at_risk(&returns, 5.0) - -9.0).abs() < 1e-9);
    }

    #[test]
    fn test_portfolio_kelly_bounds() {
        assert!((portfolio_kelly(0.6, 100.0, 100.0) - 0.2).abs() < 1e-12);
        assert_eq!(portfolio_kelly(0.2, 10.0, 100.0), 0.0);
        assert_eq!(portfolio_kelly(0.5, 0.0, 10.0), 0.0);
        assert_eq!(portfolio_kelly(1.0, 10.0, 0.0), 1.0);
    }

    #[test]
    fn test_risk_of_ruin() {
        assert_eq!(risk_of_ruin(0.0, 20.0), 0.0);
        assert_eq!(risk_of_ruin(-0.2, 20.0), 0.0);
        let expected = (0.8f64 / 1.2).powf(10.0);
        assert!((risk_of_ruin(0.2, 10.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_open_positions_are_ignored() {
        let open = Position::open(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "s".to_string(),
            "TEST/USDC".to_string(),
            Direction::Sell,
            1_000.0,
            1.0,
            100.0,
            2.6,
            String::new(),
        );
        let positions = vec![open, create_closed_position("s", 25.0)];

        let metrics = StrategyMetrics::from_positions("s", &positions, 10_000.0, 20.0);
        assert_eq!(metrics.total_trades, 1);
        assert_eq!(metrics.total_fees, 0.0);
    }
}
