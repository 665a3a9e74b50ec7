use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{OrderStore, PositionLedger, StrategyStore};
use crate::models::{Account, LimitOrder, OrderStatus, Position, PositionClose, PositionStatus};
use crate::strategy::{PromotionDecision, StrategyRecord, StrategyState};
use crate::{EngineError, Result};

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    positions: HashMap<Uuid, Position>,
    opened: Vec<Uuid>, // insertion order
    closed: Vec<Uuid>, // close order
    orders: HashMap<Uuid, LimitOrder>,
    order_sequence: Vec<Uuid>,
    strategies: HashMap<String, StrategyRecord>,
    decisions: Vec<PromotionDecision>, // oldest first
}

/// In-process store backing tests and simulations
///
/// All reads and guarded writes run under one lock, so each position or
/// order transition is a single critical section.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn most_recent(mut positions: Vec<Position>, limit: Option<usize>) -> Vec<Position> {
    if let Some(limit) = limit {
        let skip = positions.len().saturating_sub(limit);
        positions.drain(..skip);
    }
    positions
}

#[async_trait]
impl PositionLedger for InMemoryStore {
    async fn open_account(&self, owner_id: Uuid, initial_balance: f64) -> Result<f64> {
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .entry(owner_id)
            .or_insert_with(|| Account::new(owner_id, initial_balance));
        Ok(account.balance)
    }

    async fn balance(&self, owner_id: Uuid) -> Result<Option<f64>> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(&owner_id).map(|a| a.balance))
    }

    async fn account(&self, owner_id: Uuid) -> Result<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(&owner_id).cloned())
    }

    async fn top_up_if_below(
        &self,
        owner_id: Uuid,
        threshold: f64,
        amount: f64,
    ) -> Result<Option<f64>> {
        let mut state = self.state.lock().await;
        match state.accounts.get_mut(&owner_id) {
            Some(account) if account.balance < threshold => {
                account.balance += amount;
                account.total_deposits += amount;
                Ok(Some(account.balance))
            }
            _ => Ok(None),
        }
    }

    async fn set_trading_enabled(&self, owner_id: Uuid, enabled: bool) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.accounts.get_mut(&owner_id) {
            Some(account) => {
                account.trading_enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn trading_enabled(&self, owner_id: Uuid) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .get(&owner_id)
            .map(|a| a.trading_enabled)
            .unwrap_or(true))
    }

    async fn create_position(&self, position: &Position, debit: f64) -> Result<()> {
        let mut state = self.state.lock().await;

        let available = state
            .accounts
            .get(&position.owner_id)
            .map(|a| a.balance)
            .unwrap_or(0.0);
        if available < debit {
            return Err(EngineError::InsufficientBalance {
                required: debit,
                available,
            });
        }

        if let Some(account) = state.accounts.get_mut(&position.owner_id) {
            account.balance -= debit;
        }
        state.positions.insert(position.id, position.clone());
        state.opened.push(position.id);

        Ok(())
    }

    async fn get_position(&self, id: Uuid) -> Result<Option<Position>> {
        let state = self.state.lock().await;
        Ok(state.positions.get(&id).cloned())
    }

    async fn update_position_status(
        &self,
        id: Uuid,
        expected: PositionStatus,
        new: PositionStatus,
        close: &PositionClose,
        credit: f64,
    ) -> Result<Option<Position>> {
        let mut state = self.state.lock().await;

        let updated = match state.positions.get_mut(&id) {
            Some(position) if position.status == expected => {
                if new == PositionStatus::Closed {
                    position.apply_close(close);
                } else {
                    position.status = new;
                }
                position.clone()
            }
            _ => return Ok(None),
        };

        if let Some(account) = state.accounts.get_mut(&updated.owner_id) {
            account.balance += credit;
            if new == PositionStatus::Closed {
                account.realized_pnl += close.profit_loss;
            }
        }
        if new == PositionStatus::Closed {
            state.closed.push(id);
        }

        Ok(Some(updated))
    }

    async fn list_open(&self, owner_id: Uuid) -> Result<Vec<Position>> {
        let state = self.state.lock().await;
        Ok(state
            .opened
            .iter()
            .filter_map(|id| state.positions.get(id))
            .filter(|p| p.owner_id == owner_id && p.is_open())
            .cloned()
            .collect())
    }

    async fn list_closed(&self, owner_id: Uuid, limit: Option<usize>) -> Result<Vec<Position>> {
        let state = self.state.lock().await;
        let closed = state
            .closed
            .iter()
            .filter_map(|id| state.positions.get(id))
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect();
        Ok(most_recent(closed, limit))
    }

    async fn list_closed_by_strategy(
        &self,
        strategy_name: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Position>> {
        let state = self.state.lock().await;
        let closed = state
            .closed
            .iter()
            .filter_map(|id| state.positions.get(id))
            .filter(|p| p.strategy_name == strategy_name)
            .cloned()
            .collect();
        Ok(most_recent(closed, limit))
    }

    async fn list_history(
        &self,
        owner_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Position>> {
        let state = self.state.lock().await;
        Ok(state
            .opened
            .iter()
            .rev()
            .filter_map(|id| state.positions.get(id))
            .filter(|p| p.owner_id == owner_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn create_order(&self, order: &LimitOrder) -> Result<()> {
        let mut state = self.state.lock().await;
        state.orders.insert(order.id, order.clone());
        state.order_sequence.push(order.id);
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<LimitOrder>> {
        let state = self.state.lock().await;
        Ok(state.orders.get(&id).cloned())
    }

    async fn list_pending(&self) -> Result<Vec<LimitOrder>> {
        let state = self.state.lock().await;
        Ok(state
            .order_sequence
            .iter()
            .filter_map(|id| state.orders.get(id))
            .filter(|o| o.status == OrderStatus::Pending)
            .cloned()
            .collect())
    }

    async fn list_pending_for_owner(&self, owner_id: Uuid) -> Result<Vec<LimitOrder>> {
        Ok(self
            .list_pending()
            .await?
            .into_iter()
            .filter(|o| o.owner_id == owner_id)
            .collect())
    }

    async fn transition_order(
        &self,
        id: Uuid,
        expected: OrderStatus,
        new: OrderStatus,
        position_id: Option<Uuid>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(false);
        };
        if order.status != expected {
            return Ok(false);
        }

        if new == OrderStatus::Filled && expected != OrderStatus::Filled {
            order.filled_at = Some(Utc::now().trunc_subsecs(6));
        }
        if new == OrderStatus::Pending {
            order.filled_at = None;
            order.position_id = None;
        }
        if position_id.is_some() {
            order.position_id = position_id;
        }
        order.status = new;

        Ok(true)
    }
}

#[async_trait]
impl StrategyStore for InMemoryStore {
    async fn register(&self, name: &str) -> Result<StrategyRecord> {
        let mut state = self.state.lock().await;
        let record = state
            .strategies
            .entry(name.to_string())
            .or_insert_with(|| StrategyRecord::new(name));
        Ok(record.clone())
    }

    async fn get(&self, name: &str) -> Result<Option<StrategyRecord>> {
        let state = self.state.lock().await;
        Ok(state.strategies.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<StrategyRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<StrategyRecord> = state.strategies.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn transition(
        &self,
        name: &str,
        expected: StrategyState,
        new: StrategyState,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.strategies.get_mut(name) {
            Some(record) if record.state == expected => {
                record.transition_to(new);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
    async fn record_decision(&self, decision: &PromotionDecision) -> Result<()> {
        let mut state = self.state.lock().await;
        state.decisions.push(decision.clone());
        Ok(())
    }

    async fn list_decisions(
        &self,
        strategy: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PromotionDecision>> {
        let state = self.state.lock().await;
        Ok(state
            .decisions
            .iter()
            .rev()
            .filter(|d| strategy.map_or(true, |name| d.strategy_name == name))
            .take(limit)
            .cloned()
            .collect())
    }
}
