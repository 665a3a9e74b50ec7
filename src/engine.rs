use std::sync::Arc;

use crate::audit::AuditDispatcher;
use crate::config::EngineConfig;
use crate::db::{InMemoryStore, OrderStore, PositionLedger, StrategyStore};
use crate::execution::{KillSwitch, PriceOracle, TradeExecutor};
use crate::risk::RiskAnalytics;
use crate::strategy::StrategyRegistry;

/// The engine's services wired over one set of stores
pub struct SandboxEngine {
    pub config: EngineConfig,
    pub executor: Arc<TradeExecutor>,
    pub analytics: Arc<RiskAnalytics>,
    pub registry: Arc<StrategyRegistry>,
    pub kill_switch: KillSwitch,
}

impl SandboxEngine {
    pub fn new(
        config: EngineConfig,
        ledger: Arc<dyn PositionLedger>,
        orders: Arc<dyn OrderStore>,
        strategies: Arc<dyn StrategyStore>,
        oracle: Arc<dyn PriceOracle>,
        audit: AuditDispatcher,
    ) -> Self {
        let executor = Arc::new(
            TradeExecutor::new(ledger.clone(), orders, oracle, config.trading.clone())
                .with_audit(audit),
        );
        let analytics = Arc::new(RiskAnalytics::new(
            ledger,
            config.analytics.clone(),
            config.promotion.clone(),
            config.trading.starting_balance,
        ));
        let registry = Arc::new(StrategyRegistry::new(strategies, analytics.clone()));
        let kill_switch = KillSwitch::new(executor.clone());

        Self {
            config,
            executor,
            analytics,
            registry,
            kill_switch,
        }
    }

    /// Engine over a fresh in-memory store, without auditing
    pub fn in_memory(config: EngineConfig, oracle: Arc<dyn PriceOracle>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self::new(
            config,
            store.clone(),
            store.clone(),
            store,
            oracle,
            AuditDispatcher::disabled(),
        )
    }
}
