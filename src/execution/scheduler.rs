use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::execution::executor::TradeExecutor;
use crate::Result;

/// What a single scheduler pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub checked: usize,
    pub filled: usize,
    pub not_triggered: usize,
    pub price_unavailable: usize,
    pub failed: usize,
}

/// Periodically fills PENDING limit orders whose condition is met
pub struct OrderScheduler {
    executor: Arc<TradeExecutor>,
    interval: Duration,
    tick_guard: Mutex<()>,
}

impl OrderScheduler {
    pub fn new(executor: Arc<TradeExecutor>, interval: Duration) -> Self {
        Self {
            executor,
            interval,
            tick_guard: Mutex::new(()),
        }
    }

    /// Check every pending order once
    ///
    /// Returns `Ok(None)` without touching any order when another pass is
    /// still running.
    pub async fn run_once(&self) -> Result<Option<TickReport>> {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            tracing::debug!("Previous limit-order tick still running, skipping");
            return Ok(None);
        };

        let pending = self.executor.orders().list_pending().await?;
        let oracle = self.executor.oracle();
        let mut report = TickReport {
            checked: pending.len(),
            ..TickReport::default()
        };

        for order in pending {
            let quote = match oracle.get_price(&order.trading_pair).await {
                Ok(quote) => quote,
                Err(e) => {
                    tracing::debug!(
                        order_id = %order.id,
                        "No price for {}: {}",
                        order.trading_pair,
                        e
                    );
                    report.price_unavailable += 1;
                    continue;
                }
            };

            if !order.is_triggered(quote.price) {
                report.not_triggered += 1;
                continue;
            }

            match self.executor.fill_limit_order(&order).await {
                Ok(Some(_)) => report.filled += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(order_id = %order.id, "Limit order not filled: {}", e);
                    report.failed += 1;
                }
            }
        }

        if report.filled > 0 || report.failed > 0 {
            tracing::info!(
                "Limit-order tick: {} checked, {} filled, {} failed",
                report.checked,
                report.filled,
                report.failed
            );
        }

        Ok(Some(report))
    }

    /// Run `run_once` every interval on a background task
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!("Limit-order scheduler started ({:?} interval)", self.interval);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::error!("Limit-order tick failed: {}", e);
                        }
                    }
                }
            }

            tracing::info!("Limit-order scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the in-flight tick to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            tracing::error!("Limit-order scheduler task failed: {}", e);
        }
    }
}
