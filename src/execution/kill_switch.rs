use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::execution::executor::{BulkCloseReport, TradeExecutor};
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchRequest {
    pub owner_id: Uuid,
    #[serde(default = "default_true")]
    pub close_all: bool,
    #[serde(default = "default_true")]
    pub disable_trading: bool,
    #[serde(default)]
    pub reason: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct KillSwitchReport {
    pub positions_closed: usize,
    pub positions_failed: usize,
    pub trading_enabled: bool,
    pub message: String,
    pub elapsed_ms: u128,
}

/// Emergency stop: halt new trades and flatten open positions
pub struct KillSwitch {
    executor: Arc<TradeExecutor>,
}

impl KillSwitch {
    pub fn new(executor: Arc<TradeExecutor>) -> Self {
        Self { executor }
    }

    /// Partial close failures are reported, not returned as errors
    pub async fn activate(&self, request: &KillSwitchRequest) -> Result<KillSwitchReport> {
        let started = Instant::now();
        let ledger = self.executor.ledger();

        tracing::warn!(
            owner_id = %request.owner_id,
            "🚨 Kill switch activated: {}",
            if request.reason.is_empty() { "no reason given" } else { &request.reason }
        );

        if request.disable_trading {
            // Make sure the flag has an account to live on
            self.executor.balance(request.owner_id).await?;
            ledger.set_trading_enabled(request.owner_id, false).await?;
        }

        let report = if request.close_all {
            self.executor.close_all_trades(request.owner_id).await?
        } else {
            BulkCloseReport {
                total: 0,
                closed: Vec::new(),
                failures: Vec::new(),
            }
        };

        let trading_enabled = ledger.trading_enabled(request.owner_id).await?;
        let message = if report.failures.is_empty() {
            format!(
                "Closed {} position(s); trading {}",
                report.closed_count(),
                if trading_enabled { "enabled" } else { "disabled" }
            )
        } else {
            format!(
                "Closed {} of {} position(s), {} failed; trading {}",
                report.closed_count(),
                report.total,
                report.failed_count(),
                if trading_enabled { "enabled" } else { "disabled" }
            )
        };

        let elapsed_ms = started.elapsed().as_millis();
        tracing::warn!(owner_id = %request.owner_id, "{} ({}ms)", message, elapsed_ms);

        Ok(KillSwitchReport {
            positions_closed: report.closed_count(),
            positions_failed: report.failed_count(),
            trading_enabled,
            message,
            elapsed_ms,
        })
    }

    pub async fn resume_trading(&self, owner_id: Uuid) -> Result<bool> {
        self.executor.balance(owner_id).await?;
        let ledger = self.executor.ledger();
        ledger.set_trading_enabled(owner_id, true).await?;
        tracing::info!(owner_id = %owner_id, "Trading resumed");
        ledger.trading_enabled(owner_id).await
    }
}
