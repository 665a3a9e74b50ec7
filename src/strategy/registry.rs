use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use crate::db::StrategyStore;
use crate::risk::{PerformanceScope, RiskAnalytics, StrategyMetrics};
use crate::{EngineError, Result};

pub const DEFAULT_DECISION_LIMIT: usize = 50;

/// SANDBOX_ACTIVE <-> SANDBOX_DISABLED, SANDBOX_ACTIVE -> LIVE (one-way)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyState {
    SandboxActive,
    SandboxDisabled,
    Live,
}

impl StrategyState {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyState::SandboxActive => "SANDBOX_ACTIVE",
            StrategyState::SandboxDisabled => "SANDBOX_DISABLED",
            StrategyState::Live => "LIVE",
        }
    }
}

impl fmt::Display for StrategyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyState {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SANDBOX_ACTIVE" => Ok(StrategyState::SandboxActive),
            "SANDBOX_DISABLED" => Ok(StrategyState::SandboxDisabled),
            "LIVE" => Ok(StrategyState::Live),
            other => Err(EngineError::DataIntegrity(format!(
                "unknown strategy state '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub name: String,
    pub state: StrategyState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub promoted_at: Option<DateTime<Utc>>,
}

impl StrategyRecord {
    pub fn new(name: &str) -> Self {
        let now = Utc::now().trunc_subsecs(6);
        Self {
            name: name.to_string(),
            state: StrategyState::SandboxActive,
            created_at: now,
            updated_at: now,
            promoted_at: None,
        }
    }

    pub fn transition_to(&mut self, state: StrategyState) {
        let now = Utc::now().trunc_subsecs(6);
        if state == StrategyState::Live {
            self.promoted_at = Some(now);
        }
        self.state = state;
        self.updated_at = now;
    }
}

/// Result of a promotion eligibility check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionCheck {
    pub strategy_name: String,
    pub eligible: bool,
    pub missing_criteria: Vec<String>,
    pub metrics: StrategyMetrics,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecisionOutcome {
    Promote,
    Hold,
}

impl DecisionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionOutcome::Promote => "promote",
            DecisionOutcome::Hold => "hold",
        }
    }
}

impl FromStr for DecisionOutcome {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "promote" => Ok(DecisionOutcome::Promote),
            "hold" => Ok(DecisionOutcome::Hold),
            other => Err(EngineError::DataIntegrity(format!(
                "unknown promotion decision '{}'",
                other
            ))),
        }
    }
}

/// One auto-promotion verdict with the metrics it was based on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionDecision {
    pub id: Uuid,
    pub strategy_name: String,
    pub outcome: DecisionOutcome,
    pub reason: String,
    pub missing_criteria: Vec<String>,
    pub total_trades: usize,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub total_profit_loss: f64,
    pub decided_at: DateTime<Utc>,
}

impl PromotionDecision {
    pub fn from_check(check: &PromotionCheck) -> Self {
        let metrics = &check.metrics;
        let (outcome, reason) = if check.eligible {
            (
                DecisionOutcome::Promote,
                format!(
                    "All criteria met: {} trades, {:.1}% win rate, Sharpe {:.2}",
                    metrics.total_trades, metrics.win_rate, metrics.sharpe_ratio
                ),
            )
        } else {
            (
                DecisionOutcome::Hold,
                format!("Not ready: {} criteria unmet", check.missing_criteria.len()),
            )
        };

        Self {
            id: Uuid::new_v4(),
            strategy_name: check.strategy_name.clone(),
            outcome,
            reason,
            missing_criteria: check.missing_criteria.clone(),
            total_trades: metrics.total_trades,
            win_rate: metrics.win_rate,
            sharpe_ratio: metrics.sharpe_ratio,
            total_profit_loss: metrics.total_profit_loss,
            decided_at: Utc::now().trunc_subsecs(6),
        }
    }
}

/// Tracks each strategy's lifecycle state and gates promotion to live
pub struct StrategyRegistry {
    store: Arc<dyn StrategyStore>,
    analytics: Arc<RiskAnalytics>,
}

impl StrategyRegistry {
    pub fn new(store: Arc<dyn StrategyStore>, analytics: Arc<RiskAnalytics>) -> Self {
        Self { store, analytics }
    }

    /// Register a strategy (idempotent). New strategies start SANDBOX_ACTIVE.
    pub async fn register_strategy(&self, name: &str) -> Result<StrategyRecord> {
        self.store.register(name).await
    }

    pub async fn get_strategy(&self, name: &str) -> Result<StrategyRecord> {
        self.store
            .get(name)
            .await?
            .ok_or_else(|| EngineError::StrategyNotFound(name.to_string()))
    }

    pub async fn list_strategies(&self) -> Result<Vec<StrategyRecord>> {
        self.store.list().await
    }

    /// Enable or disable a sandboxed strategy
    ///
    /// LIVE strategies are left untouched. Returns the resulting state.
    pub async fn toggle_strategy(&self, name: &str, enabled: bool) -> Result<StrategyState> {
        let record = self.get_strategy(name).await?;

        if record.state == StrategyState::Live {
            tracing::info!(strategy = %name, "Toggle ignored: strategy is LIVE");
            return Ok(StrategyState::Live);
        }

        let target = if enabled {
            StrategyState::SandboxActive
        } else {
            StrategyState::SandboxDisabled
        };
        if record.state == target {
            return Ok(target);
        }

        if self.store.transition(name, record.state, target).await? {
            tracing::info!(strategy = %name, "Strategy {} -> {}", record.state, target);
            return Ok(target);
        }

        // Lost a race; report whatever state won
        Ok(self.get_strategy(name).await?.state)
    }

    /// Evaluate promotion criteria without changing any state
    pub async fn can_promote_strategy(&self, name: &str) -> Result<PromotionCheck> {
        let metrics = self
            .analytics
            .get_performance(&PerformanceScope::Strategy(name.to_string()))
            .await?;

        Ok(PromotionCheck {
            strategy_name: name.to_string(),
            eligible: metrics.can_promote_to_live,
            missing_criteria: metrics.missing_criteria.clone(),
            metrics,
        })
    }

    /// Move a SANDBOX_ACTIVE strategy to LIVE once it meets the criteria
    ///
    /// Already-LIVE strategies are returned unchanged. Disabled strategies
    /// must be re-enabled first.
    pub async fn promote_strategy(&self, name: &str) -> Result<StrategyRecord> {
        let record = self.get_strategy(name).await?;

        match record.state {
            StrategyState::Live => return Ok(record),
            StrategyState::SandboxDisabled => {
                return Err(EngineError::InvalidStrategyTransition {
                    name: name.to_string(),
                    from: record.state,
                })
            }
            StrategyState::SandboxActive => {}
        }

        let check = self.can_promote_strategy(name).await?;
        if !check.eligible {
            return Err(EngineError::PromotionCriteriaNotMet {
                name: name.to_string(),
                missing: check.missing_criteria,
            });
        }

        if !self
            .store
            .transition(name, StrategyState::SandboxActive, StrategyState::Live)
            .await?
        {
            let current = self.get_strategy(name).await?;
            if current.state == StrategyState::Live {
                return Ok(current);
            }
            return Err(EngineError::InvalidStrategyTransition {
                name: name.to_string(),
                from: current.state,
            });
        }

        tracing::info!(
            strategy = %name,
            "Promoted to LIVE after {} trades (win rate {:.1}%, Sharpe {:.2})",
            check.metrics.total_trades,
            check.metrics.win_rate,
            check.metrics.sharpe_ratio
        );

        self.get_strategy(name).await
    }

    /// Promote every eligible SANDBOX_ACTIVE strategy; returns the promoted names
    ///
    /// Every evaluated strategy leaves a [`PromotionDecision`] in the store,
    /// written before the state change is attempted.
    pub async fn auto_promote(&self) -> Result<Vec<String>> {
        let mut promoted = Vec::new();

        for record in self.store.list().await? {
            if record.state != StrategyState::SandboxActive {
                continue;
            }

            let check = match self.can_promote_strategy(&record.name).await {
                Ok(check) => check,
                Err(e) => {
                    tracing::warn!(strategy = %record.name, "Promotion check failed: {}", e);
                    continue;
                }
            };

            let decision = PromotionDecision::from_check(&check);
            if let Err(e) = self.store.record_decision(&decision).await {
                tracing::warn!(strategy = %record.name, "Failed to record decision: {}", e);
            }

            if !check.eligible {
                tracing::debug!(
                    strategy = %record.name,
                    "Not yet eligible: {}",
                    check.missing_criteria.join("; ")
                );
                continue;
            }

            match self.promote_strategy(&record.name).await {
                Ok(updated) if updated.state == StrategyState::Live => {
                    promoted.push(record.name)
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(strategy = %record.name, "Auto-promotion failed: {}", e);
                }
            }
        }

        Ok(promoted)
    }

    /// Auto-promotion decisions newest first; `limit` defaults to 50
    pub async fn recent_decisions(
        &self,
        strategy: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<PromotionDecision>> {
        self.store
            .list_decisions(strategy, limit.unwrap_or(DEFAULT_DECISION_LIMIT))
            .await
    }
}

/// Periodically auto-promote eligible strategies until `shutdown` flips to true
pub async fn run_auto_promotion(
    registry: Arc<StrategyRegistry>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("Auto-promotion monitor stopped");
                break;
            }
            _ = ticker.tick() => {
                match registry.auto_promote().await {
                    Ok(promoted) if !promoted.is_empty() => {
                        tracing::info!("Auto-promoted strategies: {}", promoted.join(", "));
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Auto-promotion sweep failed: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyticsConfig;
    use crate::db::{InMemoryStore, PositionLedger};
    use crate::models::{Direction, Position, PositionClose, PositionStatus};
    use crate::risk::PromotionCriteria;
    use uuid::Uuid;

    fn lenient_criteria() -> PromotionCriteria {
        PromotionCriteria {
            min_trades: 3,
            min_win_rate: 50.0,
            min_sharpe_ratio: 0.5,
            min_total_profit_loss: 0.0,
            max_drawdown_pct: 20.0,
            min_profit_factor: 1.5,
        }
    }

    fn registry(store: Arc<InMemoryStore>, criteria: PromotionCriteria) -> StrategyRegistry {
        let analytics = Arc::new(RiskAnalytics::new(
            store.clone(),
            AnalyticsConfig::default(),
            criteria,
            10_000.0,
        ));
        StrategyRegistry::new(store, analytics)
    }

    async fn record_closed_trade(store: &InMemoryStore, strategy: &str, pnl: f64) {
        let owner = Uuid::from_u128(7);
        store.open_account(owner, 1_000_000.0).await.unwrap();

        let position = Position::open(
            owner,
            Uuid::new_v4(),
            strategy.to_string(),
            "SOL/USDC".to_string(),
            Direction::Buy,
            1_000.0,
            1.0,
            100.0,
            0.0,
            String::new(),
        );
        store.create_position(&position, 1_000.0).await.unwrap();
        store
            .update_position_status(
                position.id,
                PositionStatus::Open,
                PositionStatus::Closed,
                &PositionClose {
                    exit_price: 100.0 + pnl / 10.0,
                    fees: 0.0,
                    profit_loss: pnl,
                    profit_loss_percent: pnl / 10.0,
                    closed_at: Utc::now(),
                },
                1_000.0 + pnl,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_register_starts_active_and_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry(store, PromotionCriteria::default());

        let first = registry.register_strategy("momentum").await.unwrap();
        registry.toggle_strategy("momentum", false).await.unwrap();
        let second = registry.register_strategy("momentum").await.unwrap();

        assert_eq!(first.state, StrategyState::SandboxActive);
        assert_eq!(second.state, StrategyState::SandboxDisabled);
    }

    #[tokio::test]
    async fn test_toggle_flips_sandbox_states() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry(store, PromotionCriteria::default());
        registry.register_strategy("dca").await.unwrap();

        assert_eq!(
            registry.toggle_strategy("dca", false).await.unwrap(),
            StrategyState::SandboxDisabled
        );
        assert_eq!(
            registry.toggle_strategy("dca", true).await.unwrap(),
            StrategyState::SandboxActive
        );
    }

    #[tokio::test]
    async fn test_toggle_unknown_strategy() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry(store, PromotionCriteria::default());

        let result = registry.toggle_strategy("ghost", true).await;
        assert!(matches!(result, Err(EngineError::StrategyNotFound(_))));
    }

    #[tokio::test]
    async fn test_promotion_blocked_without_trades() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry(store, PromotionCriteria::default());
        registry.register_strategy("fresh").await.unwrap();

        let check = registry.can_promote_strategy("fresh").await.unwrap();
        assert!(!check.eligible);
        assert_eq!(check.missing_criteria, vec!["No trades executed yet".to_string()]);

        let result = registry.promote_strategy("fresh").await;
        assert!(matches!(result, Err(EngineError::PromotionCriteriaNotMet { .. })));
        assert_eq!(
            registry.get_strategy("fresh").await.unwrap().state,
            StrategyState::SandboxActive
        );
    }

    #[tokio::test]
    async fn test_promote_then_toggle_is_noop() {
        let store = Arc::new(InMemoryStore::new());
        for pnl in [50.0, 40.0, 60.0, -10.0] {
            record_closed_trade(&store, "winner", pnl).await;
        }
        let registry = registry(store, lenient_criteria());
        registry.register_strategy("winner").await.unwrap();

        let promoted = registry.promote_strategy("winner").await.unwrap();
        assert_eq!(promoted.state, StrategyState::Live);
        assert!(promoted.promoted_at.is_some());

        // LIVE ignores toggles and repeat promotions
        assert_eq!(
            registry.toggle_strategy("winner", false).await.unwrap(),
            StrategyState::Live
        );
        assert_eq!(
            registry.promote_strategy("winner").await.unwrap().state,
            StrategyState::Live
        );
    }

    #[tokio::test]
    async fn test_disabled_strategy_cannot_be_promoted() {
        let store = Arc::new(InMemoryStore::new());
        for pnl in [50.0, 40.0, 60.0, -10.0] {
            record_closed_trade(&store, "paused", pnl).await;
        }
        let registry = registry(store, lenient_criteria());
        registry.register_strategy("paused").await.unwrap();
        registry.toggle_strategy("paused", false).await.unwrap();

        let result = registry.promote_strategy("paused").await;
        assert!(matches!(
            result,
            Err(EngineError::InvalidStrategyTransition {
                from: StrategyState::SandboxDisabled,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_auto_promote_only_eligible() {
        let store = Arc::new(InMemoryStore::new());
        for pnl in [50.0, 40.0, 60.0, -10.0] {
            record_closed_trade(&store, "winner", pnl).await;
        }
        for pnl in [-50.0, 10.0, -60.0] {
            record_closed_trade(&store, "loser", pnl).await;
        }
        let registry = registry(store, lenient_criteria());
        registry.register_strategy("winner").await.unwrap();
        registry.register_strategy("loser").await.unwrap();

        let promoted = registry.auto_promote().await.unwrap();

        assert_eq!(promoted, vec!["winner".to_string()]);
        assert_eq!(
            registry.get_strategy("loser").await.unwrap().state,
            StrategyState::SandboxActive
        );
    }

    #[tokio::test]
    async fn test_auto_promote_records_every_decision() {
        let store = Arc::new(InMemoryStore::new());
        for pnl in [50.0, 40.0, 60.0, -10.0] {
            record_closed_trade(&store, "winner", pnl).await;
        }
        for pnl in [-50.0, 10.0, -60.0] {
            record_closed_trade(&store, "loser", pnl).await;
        }
        let registry = registry(store, lenient_criteria());
        for name in ["winner", "loser", "idle"] {
            registry.register_strategy(name).await.unwrap();
        }
        registry.toggle_strategy("idle", false).await.unwrap();

        registry.auto_promote().await.unwrap();

        // Disabled strategies are not evaluated
        let decisions = registry.recent_decisions(None, None).await.unwrap();
        assert_eq!(decisions.len(), 2);

        let winner = registry.recent_decisions(Some("winner"), None).await.unwrap();
        assert_eq!(winner.len(), 1);
        assert_eq!(winner[0].outcome, DecisionOutcome::Promote);
        assert_eq!(winner[0].total_trades, 4);
        assert!(winner[0].reason.starts_with("All criteria met"));
        assert!(winner[0].missing_criteria.is_empty());

        let loser = registry.recent_decisions(Some("loser"), None).await.unwrap();
        assert_eq!(loser[0].outcome, DecisionOutcome::Hold);
        assert!(!loser[0].missing_criteria.is_empty());
        assert_eq!(
            loser[0].reason,
            format!("Not ready: {} criteria unmet", loser[0].missing_criteria.len())
        );

        // A second sweep only sees the still-sandboxed loser
        registry.auto_promote().await.unwrap();
        let latest = registry.recent_decisions(None, Some(1)).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].strategy_name, "loser");
        assert_eq!(registry.recent_decisions(None, None).await.unwrap().len(), 3);
    }

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            StrategyState::SandboxActive,
            StrategyState::SandboxDisabled,
            StrategyState::Live,
        ] {
            assert_eq!(state.as_str().parse::<StrategyState>().unwrap(), state);
        }
        assert_eq!(
            serde_json::to_string(&StrategyState::SandboxDisabled).unwrap(),
            "\"SANDBOX_DISABLED\""
        );
        assert_eq!("hold".parse::<DecisionOutcome>().unwrap(), DecisionOutcome::Hold);
        assert!("reject".parse::<DecisionOutcome>().is_err());
    }
}
