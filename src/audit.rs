use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::{Direction, Position};

const MAX_DELIVERY_ATTEMPTS: u32 = 3;
const RETRY_BASE_MS: u64 = 50;

/// Trade lifecycle event handed to the audit sink
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    TradeExecuted {
        position_id: Uuid,
        owner_id: Uuid,
        strategy_name: String,
        trading_pair: String,
        direction: Direction,
        size: f64,
        leverage: f64,
        entry_price: f64,
        fees: f64,
        trade_hash: String,
        at: DateTime<Utc>,
    },
    TradeClosed {
        position_id: Uuid,
        owner_id: Uuid,
        strategy_name: String,
        trading_pair: String,
        direction: Direction,
        size: f64,
        exit_price: f64,
        profit_loss: f64,
        fees: f64,
        trade_hash: String,
        at: DateTime<Utc>,
    },
}

impl AuditEvent {
    pub fn executed(position: &Position) -> Self {
        AuditEvent::TradeExecuted {
            position_id: position.id,
            owner_id: position.owner_id,
            strategy_name: position.strategy_name.clone(),
            trading_pair: position.trading_pair.clone(),
            direction: position.direction,
            size: position.size,
            leverage: position.leverage,
            entry_price: position.entry_price,
            fees: position.fees,
            trade_hash: position.trade_hash.clone(),
            at: position.opened_at,
        }
    }

    pub fn closed(position: &Position) -> Self {
        AuditEvent::TradeClosed {
            position_id: position.id,
            owner_id: position.owner_id,
            strategy_name: position.strategy_name.clone(),
            trading_pair: position.trading_pair.clone(),
            direction: position.direction,
            size: position.size,
            exit_price: position.exit_price.unwrap_or_default(),
            profit_loss: position.profit_loss.unwrap_or_default(),
            fees: position.fees,
            trade_hash: position.trade_hash.clone(),
            at: position.closed_at.unwrap_or_else(Utc::now),
        }
    }

    pub fn position_id(&self) -> Uuid {
        match self {
            AuditEvent::TradeExecuted { position_id, .. }
            | AuditEvent::TradeClosed { position_id, .. } => *position_id,
        }
    }
}

/// Append-only destination for audit events (external ledger, log, ...)
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> anyhow::Result<()>;
}

/// Writes audit events to the tracing log as JSON
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(target: "sandbox_trader::audit", "{}", payload);
        Ok(())
    }
}

/// Delivery counters for the audit worker
#[derive(Debug, Default)]
pub struct AuditStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditStatsSnapshot {
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl AuditStats {
    pub fn snapshot(&self) -> AuditStatsSnapshot {
        AuditStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Non-blocking handle for publishing audit events
///
/// Events go through a bounded channel to a background worker. A full or
/// closed channel drops the event and counts it; trading never waits on the
/// sink.
#[derive(Clone)]
pub struct AuditDispatcher {
    tx: Option<mpsc::Sender<AuditEvent>>,
    stats: Arc<AuditStats>,
}

impl AuditDispatcher {
    /// Dispatcher that discards every event
    pub fn disabled() -> Self {
        Self {
            tx: None,
            stats: Arc::new(AuditStats::default()),
        }
    }

    /// Start the delivery worker; it exits once every dispatcher clone is dropped
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(AuditStats::default());
        let handle = tokio::spawn(run_worker(rx, sink, stats.clone()));

        (
            Self {
                tx: Some(tx),
                stats,
            },
            handle,
        )
    }

    pub fn publish(&self, event: AuditEvent) {
        let Some(tx) = &self.tx else {
            return;
        };

        if let Err(e) = tx.try_send(event) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            let (reason, event) = match e {
                mpsc::error::TrySendError::Full(event) => ("queue full", event),
                mpsc::error::TrySendError::Closed(event) => ("worker stopped", event),
            };
            tracing::warn!(
                position_id = %event.position_id(),
                "Audit event dropped: {}",
                reason
            );
        }
    }

    pub fn stats(&self) -> AuditStatsSnapshot {
        self.stats.snapshot()
    }

    /// Counters that outlive the dispatcher, for reading after the worker drains
    pub fn stats_handle(&self) -> Arc<AuditStats> {
        self.stats.clone()
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<AuditEvent>,
    sink: Arc<dyn AuditSink>,
    stats: Arc<AuditStats>,
) {
    while let Some(event) = rx.recv().await {
        let mut attempt = 1;
        loop {
            match sink.record(&event).await {
                Ok(()) => {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                Err(e) if attempt < MAX_DELIVERY_ATTEMPTS => {
                    let backoff = RETRY_BASE_MS * 2u64.pow(attempt - 1);
                    tracing::warn!(
                        position_id = %event.position_id(),
                        "Audit write failed, retrying in {}ms (attempt {}/{}): {}",
                        backoff,
                        attempt,
                        MAX_DELIVERY_ATTEMPTS,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        position_id = %event.position_id(),
                        "Audit write failed after {} attempts: {}",
                        MAX_DELIVERY_ATTEMPTS,
                        e
                    );
                    break;
                }
            }
        }
    }

    tracing::debug!("Audit worker stopped");
}
