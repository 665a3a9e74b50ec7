// Storage seams: positions + accounts, limit orders, strategy states
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Account, LimitOrder, OrderStatus, Position, PositionClose, PositionStatus};
use crate::strategy::{PromotionDecision, StrategyRecord, StrategyState};
use crate::Result;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Default owner for single-user mode
pub const DEFAULT_OWNER_ID: Uuid = Uuid::from_u128(1);

/// Authoritative store of positions and per-owner accounts
///
/// Every mutation that touches both a position and the owner's balance is a
/// single atomic unit: either both land or neither does.
#[async_trait]
pub trait PositionLedger: Send + Sync {
    /// Create the owner's account if missing. Returns the current balance.
    async fn open_account(&self, owner_id: Uuid, initial_balance: f64) -> Result<f64>;

    async fn balance(&self, owner_id: Uuid) -> Result<Option<f64>>;

    async fn account(&self, owner_id: Uuid) -> Result<Option<Account>>;

    /// Credit `amount` when the balance is below `threshold`
    ///
    /// Check and credit are one atomic step. Returns the new balance when a
    /// top-up happened, `None` otherwise (including unknown owners).
    async fn top_up_if_below(&self, owner_id: Uuid, threshold: f64, amount: f64)
        -> Result<Option<f64>>;

    /// Returns false when the owner has no account
    async fn set_trading_enabled(&self, owner_id: Uuid, enabled: bool) -> Result<bool>;

    /// Owners without an account are allowed to trade
    async fn trading_enabled(&self, owner_id: Uuid) -> Result<bool>;

    /// Insert an OPEN position and debit the owner's balance
    ///
    /// Fails with `InsufficientBalance` (and inserts nothing) when the balance
    /// does not cover `debit`.
    async fn create_position(&self, position: &Position, debit: f64) -> Result<()>;

    async fn get_position(&self, id: Uuid) -> Result<Option<Position>>;

    /// Guarded status transition
    ///
    /// Applies `close` and credits `credit` to the owner's balance only when the
    /// stored status still equals `expected`. A move to CLOSED also adds the
    /// close's profit_loss to the account's realized P&L. Returns `None` when
    /// the guard missed (unknown id or a concurrent transition won).
    async fn update_position_status(
        &self,
        id: Uuid,
        expected: PositionStatus,
        new: PositionStatus,
        close: &PositionClose,
        credit: f64,
    ) -> Result<Option<Position>>;

    /// OPEN positions, oldest first
    async fn list_open(&self, owner_id: Uuid) -> Result<Vec<Position>>;

    /// Most recent `limit` CLOSED positions, in close order
    async fn list_closed(&self, owner_id: Uuid, limit: Option<usize>) -> Result<Vec<Position>>;

    async fn list_closed_by_strategy(
        &self,
        strategy_name: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Position>>;

    /// All positions for the owner, newest first
    async fn list_history(&self, owner_id: Uuid, limit: usize, offset: usize)
        -> Result<Vec<Position>>;
}

/// Store of limit orders
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(&self, order: &LimitOrder) -> Result<()>;

    async fn get_order(&self, id: Uuid) -> Result<Option<LimitOrder>>;

    /// PENDING orders across all owners, oldest first
    async fn list_pending(&self) -> Result<Vec<LimitOrder>>;

    async fn list_pending_for_owner(&self, owner_id: Uuid) -> Result<Vec<LimitOrder>>;

    /// Compare-and-swap on order status
    ///
    /// Moving to FILLED stamps `filled_at`; moving back to PENDING clears it.
    /// `position_id` is written when provided. Returns false when the stored
    /// status no longer equals `expected`.
    async fn transition_order(
        &self,
        id: Uuid,
        expected: OrderStatus,
        new: OrderStatus,
        position_id: Option<Uuid>,
    ) -> Result<bool>;
}

/// Store of strategy lifecycle states
#[async_trait]
pub trait StrategyStore: Send + Sync {
    /// Insert as SANDBOX_ACTIVE if missing; returns the stored record
    async fn register(&self, name: &str) -> Result<StrategyRecord>;

    async fn get(&self, name: &str) -> Result<Option<StrategyRecord>>;

    async fn list(&self) -> Result<Vec<StrategyRecord>>;

    /// Compare-and-swap on strategy state
    async fn transition(&self, name: &str, expected: StrategyState, new: StrategyState)
        -> Result<bool>;

    async fn record_decision(&self, decision: &PromotionDecision) -> Result<()>;

    /// Decisions newest first, optionally for one strategy
    async fn list_decisions(&self, strategy: Option<&str>, limit: usize)
        -> Result<Vec<PromotionDecision>>;
}
