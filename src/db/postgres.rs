use async_trait::async_trait;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{OrderStore, PositionLedger, StrategyStore};
use crate::models::{Account, LimitOrder, OrderStatus, Position, PositionClose, PositionStatus};
use crate::strategy::{PromotionDecision, StrategyRecord, StrategyState};
use crate::{EngineError, Result};

const POSITION_COLUMNS: &str = r#"
    id, owner_id, session_id, strategy_name, trading_pair, direction,
    size, leverage, collateral, entry_price, exit_price, liquidation_price,
    fees, profit_loss, profit_loss_percent, status, opened_at, closed_at,
    reasoning, trade_hash
"#;

const ORDER_COLUMNS: &str = r#"
    id, owner_id, session_id, strategy_name, trading_pair, direction,
    size_usd, leverage, limit_price, reasoning, status, created_at,
    filled_at, position_id
"#;

/// Postgres-backed implementation of every store trait
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

fn to_decimal(value: f64, field: &str) -> Result<Decimal> {
    Decimal::from_f64(value).ok_or_else(|| {
        EngineError::DataIntegrity(format!("{} is not a finite amount: {}", field, value))
    })
}

fn opt_decimal(value: Option<f64>, field: &str) -> Result<Option<Decimal>> {
    value.map(|v| to_decimal(v, field)).transpose()
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn position_from_row(row: &PgRow) -> Result<Position> {
    let direction: String = row.try_get("direction")?;
    let status: String = row.try_get("status")?;
    let exit_price: Option<Decimal> = row.try_get("exit_price")?;
    let liquidation_price: Option<Decimal> = row.try_get("liquidation_price")?;
    let profit_loss: Option<Decimal> = row.try_get("profit_loss")?;
    let profit_loss_percent: Option<Decimal> = row.try_get("profit_loss_percent")?;

    Ok(Position {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        session_id: row.try_get("session_id")?,
        strategy_name: row.try_get("strategy_name")?,
        trading_pair: row.try_get("trading_pair")?,
        direction: direction.parse()?,
        size: to_f64(row.try_get("size")?),
        leverage: to_f64(row.try_get("leverage")?),
        collateral: to_f64(row.try_get("collateral")?),
        entry_price: to_f64(row.try_get("entry_price")?),
        exit_price: exit_price.map(to_f64),
        liquidation_price: liquidation_price.map(to_f64),
        fees: to_f64(row.try_get("fees")?),
        profit_loss: profit_loss.map(to_f64),
        profit_loss_percent: profit_loss_percent.map(to_f64),
        status: status.parse()?,
        opened_at: row.try_get("opened_at")?,
        closed_at: row.try_get("closed_at")?,
        reasoning: row.try_get("reasoning")?,
        trade_hash: row.try_get("trade_hash")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<LimitOrder> {
    let direction: String = row.try_get("direction")?;
    let status: String = row.try_get("status")?;

    Ok(LimitOrder {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        session_id: row.try_get("session_id")?,
        strategy_name: row.try_get("strategy_name")?,
        trading_pair: row.try_get("trading_pair")?,
        direction: direction.parse()?,
        size_usd: to_f64(row.try_get("size_usd")?),
        leverage: to_f64(row.try_get("leverage")?),
        limit_price: to_f64(row.try_get("limit_price")?),
        reasoning: row.try_get("reasoning")?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        filled_at: row.try_get("filled_at")?,
        position_id: row.try_get("position_id")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    Ok(Account {
        owner_id: row.try_get("owner_id")?,
        balance: to_f64(row.try_get("balance")?),
        trading_enabled: row.try_get("trading_enabled")?,
        realized_pnl: to_f64(row.try_get("realized_pnl")?),
        total_deposits: to_f64(row.try_get("total_deposits")?),
    })
}

fn strategy_from_row(row: &PgRow) -> Result<StrategyRecord> {
    let state: String = row.try_get("state")?;

    Ok(StrategyRecord {
        name: row.try_get("name")?,
        state: state.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        promoted_at: row.try_get("promoted_at")?,
    })
}

fn decision_from_row(row: &PgRow) -> Result<PromotionDecision> {
    let outcome: String = row.try_get("outcome")?;
    let total_trades: i64 = row.try_get("total_trades")?;

    Ok(PromotionDecision {
        id: row.try_get("id")?,
        strategy_name: row.try_get("strategy_name")?,
        outcome: outcome.parse()?,
        reason: row.try_get("reason")?,
        missing_criteria: row.try_get("missing_criteria")?,
        total_trades: usize::try_from(total_trades).map_err(|_| {
            EngineError::DataIntegrity(format!("negative trade count {}", total_trades))
        })?,
        win_rate: to_f64(row.try_get("win_rate")?),
        sharpe_ratio: to_f64(row.try_get("sharpe_ratio")?),
        total_profit_loss: to_f64(row.try_get("total_profit_loss")?),
        decided_at: row.try_get("decided_at")?,
    })
}

impl PostgresStore {
    /// Connect to Postgres and run pending migrations
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres ({} max connections)", max_connections);

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_positions(
        &self,
        sql: String,
        filter: PositionFilter<'_>,
        limit: Option<usize>,
    ) -> Result<Vec<Position>> {
        let limit = limit.map(|l| l as i64).unwrap_or(i64::MAX);
        let query = sqlx::query(&sql);
        let query = match filter {
            PositionFilter::Owner(owner_id) => query.bind(owner_id),
            PositionFilter::Strategy(name) => query.bind(name),
        };
        let rows = query.bind(limit).fetch_all(&self.pool).await?;

        let mut positions = rows
            .iter()
            .map(position_from_row)
            .collect::<Result<Vec<_>>>()?;
        // Selected newest first so LIMIT keeps the most recent; hand back in close order
        positions.reverse();
        Ok(positions)
    }
}

enum PositionFilter<'a> {
    Owner(Uuid),
    Strategy(&'a str),
}

#[async_trait]
impl PositionLedger for PostgresStore {
    async fn open_account(&self, owner_id: Uuid, initial_balance: f64) -> Result<f64> {
        sqlx::query(
            r#"
            INSERT INTO accounts (owner_id, balance, trading_enabled, total_deposits)
            VALUES ($1, $2, TRUE, $2)
            ON CONFLICT (owner_id) DO NOTHING
            "#,
        )
        .bind(owner_id)
        .bind(to_decimal(initial_balance, "initial_balance")?)
        .execute(&self.pool)
        .await?;

        let balance: Decimal =
            sqlx::query_scalar("SELECT balance FROM accounts WHERE owner_id = $1")
                .bind(owner_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(to_f64(balance))
    }

    async fn balance(&self, owner_id: Uuid) -> Result<Option<f64>> {
        let balance: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM accounts WHERE owner_id = $1")
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(balance.map(to_f64))
    }

    async fn account(&self, owner_id: Uuid) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT owner_id, balance, trading_enabled, realized_pnl, total_deposits
            FROM accounts
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn top_up_if_below(
        &self,
        owner_id: Uuid,
        threshold: f64,
        amount: f64,
    ) -> Result<Option<f64>> {
        let balance: Option<Decimal> = sqlx::query_scalar(
            r#"
            UPDATE accounts
            SET balance = balance + $3,
                total_deposits = total_deposits + $3,
                updated_at = NOW()
            WHERE owner_id = $1 AND balance < $2
            RETURNING balance
            "#,
        )
        .bind(owner_id)
        .bind(to_decimal(threshold, "threshold")?)
        .bind(to_decimal(amount, "amount")?)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance.map(to_f64))
    }

    async fn set_trading_enabled(&self, owner_id: Uuid, enabled: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET trading_enabled = $2, updated_at = NOW() WHERE owner_id = $1",
        )
        .bind(owner_id)
        .bind(enabled)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn trading_enabled(&self, owner_id: Uuid) -> Result<bool> {
        let enabled: Option<bool> =
            sqlx::query_scalar("SELECT trading_enabled FROM accounts WHERE owner_id = $1")
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(enabled.unwrap_or(true))
    }

    async fn create_position(&self, position: &Position, debit: f64) -> Result<()> {
        let debit_amount = to_decimal(debit, "debit")?;
        let mut tx = self.pool.begin().await?;

        let debited = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance - $2, updated_at = NOW()
            WHERE owner_id = $1 AND balance >= $2
            "#,
        )
        .bind(position.owner_id)
        .bind(debit_amount)
        .execute(&mut *tx)
        .await?;

        if debited.rows_affected() == 0 {
            let available: Option<Decimal> =
                sqlx::query_scalar("SELECT balance FROM accounts WHERE owner_id = $1")
                    .bind(position.owner_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;

            return Err(EngineError::InsufficientBalance {
                required: debit,
                available: available.map(to_f64).unwrap_or(0.0),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO positions (
                id, owner_id, session_id, strategy_name, trading_pair, direction,
                size, leverage, collateral, entry_price, exit_price, liquidation_price,
                fees, profit_loss, profit_loss_percent, status, opened_at, closed_at,
                reasoning, trade_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(position.id)
        .bind(position.owner_id)
        .bind(position.session_id)
        .bind(&position.strategy_name)
        .bind(&position.trading_pair)
        .bind(position.direction.as_str())
        .bind(to_decimal(position.size, "size")?)
        .bind(to_decimal(position.leverage, "leverage")?)
        .bind(to_decimal(position.collateral, "collateral")?)
        .bind(to_decimal(position.entry_price, "entry_price")?)
        .bind(opt_decimal(position.exit_price, "exit_price")?)
        .bind(opt_decimal(position.liquidation_price, "liquidation_price")?)
        .bind(to_decimal(position.fees, "fees")?)
        .bind(opt_decimal(position.profit_loss, "profit_loss")?)
        .bind(opt_decimal(position.profit_loss_percent, "profit_loss_percent")?)
        .bind(position.status.as_str())
        .bind(position.opened_at)
        .bind(position.closed_at)
        .bind(&position.reasoning)
        .bind(&position.trade_hash)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            position_id = %position.id,
            "Saved {} {} position to Postgres",
            position.direction,
            position.trading_pair
        );

        Ok(())
    }

    async fn get_position(&self, id: Uuid) -> Result<Option<Position>> {
        let sql = format!("SELECT {} FROM positions WHERE id = $1", POSITION_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;

        row.as_ref().map(position_from_row).transpose()
    }

    async fn update_position_status(
        &self,
        id: Uuid,
        expected: PositionStatus,
        new: PositionStatus,
        close: &PositionClose,
        credit: f64,
    ) -> Result<Option<Position>> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE positions
            SET status = $3,
                exit_price = $4,
                fees = $5,
                profit_loss = $6,
                profit_loss_percent = $7,
                closed_at = $8,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(new.as_str())
        .bind(to_decimal(close.exit_price, "exit_price")?)
        .bind(to_decimal(close.fees, "fees")?)
        .bind(to_decimal(close.profit_loss, "profit_loss")?)
        .bind(to_decimal(close.profit_loss_percent, "profit_loss_percent")?)
        .bind(close.closed_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let sql = format!("SELECT {} FROM positions WHERE id = $1", POSITION_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_one(&mut *tx).await?;
        let position = position_from_row(&row)?;

        let realized = if new == PositionStatus::Closed {
            close.profit_loss
        } else {
            0.0
        };
        sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance + $2,
                realized_pnl = realized_pnl + $3,
                updated_at = NOW()
            WHERE owner_id = $1
            "#,
        )
        .bind(position.owner_id)
        .bind(to_decimal(credit, "credit")?)
        .bind(to_decimal(realized, "realized_pnl")?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(position))
    }

    async fn list_open(&self, owner_id: Uuid) -> Result<Vec<Position>> {
        let sql = format!(
            r#"
            SELECT {} FROM positions
            WHERE owner_id = $1 AND status = 'OPEN'
            ORDER BY opened_at ASC
            "#,
            POSITION_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(owner_id).fetch_all(&self.pool).await?;

        rows.iter().map(position_from_row).collect()
    }

    async fn list_closed(&self, owner_id: Uuid, limit: Option<usize>) -> Result<Vec<Position>> {
        let sql = format!(
            r#"
            SELECT {} FROM positions
            WHERE owner_id = $1 AND status = 'CLOSED'
            ORDER BY closed_at DESC, id DESC
            LIMIT $2
            "#,
            POSITION_COLUMNS
        );
        self.fetch_positions(sql, PositionFilter::Owner(owner_id), limit).await
    }

    async fn list_closed_by_strategy(
        &self,
        strategy_name: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Position>> {
        let sql = format!(
            r#"
            SELECT {} FROM positions
            WHERE strategy_name = $1 AND status = 'CLOSED'
            ORDER BY closed_at DESC, id DESC
            LIMIT $2
            "#,
            POSITION_COLUMNS
        );
        self.fetch_positions(sql, PositionFilter::Strategy(strategy_name), limit).await
    }

    async fn list_history(
        &self,
        owner_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Position>> {
        let sql = format!(
            r#"
            SELECT {} FROM positions
            WHERE owner_id = $1
            ORDER BY opened_at DESC
            LIMIT $2 OFFSET $3
            "#,
            POSITION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(owner_id)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(position_from_row).collect()
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn create_order(&self, order: &LimitOrder) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO limit_orders (
                id, owner_id, session_id, strategy_name, trading_pair, direction,
                size_usd, leverage, limit_price, reasoning, status, created_at,
                filled_at, position_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(order.id)
        .bind(order.owner_id)
        .bind(order.session_id)
        .bind(&order.strategy_name)
        .bind(&order.trading_pair)
        .bind(order.direction.as_str())
        .bind(to_decimal(order.size_usd, "size_usd")?)
        .bind(to_decimal(order.leverage, "leverage")?)
        .bind(to_decimal(order.limit_price, "limit_price")?)
        .bind(&order.reasoning)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.filled_at)
        .bind(order.position_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<LimitOrder>> {
        let sql = format!("SELECT {} FROM limit_orders WHERE id = $1", ORDER_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn list_pending(&self) -> Result<Vec<LimitOrder>> {
        let sql = format!(
            "SELECT {} FROM limit_orders WHERE status = 'PENDING' ORDER BY created_at ASC",
            ORDER_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn list_pending_for_owner(&self, owner_id: Uuid) -> Result<Vec<LimitOrder>> {
        let sql = format!(
            r#"
            SELECT {} FROM limit_orders
            WHERE owner_id = $1 AND status = 'PENDING'
            ORDER BY created_at ASC
            "#,
            ORDER_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(owner_id).fetch_all(&self.pool).await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn transition_order(
        &self,
        id: Uuid,
        expected: OrderStatus,
        new: OrderStatus,
        position_id: Option<Uuid>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE limit_orders
            SET status = $3,
                filled_at = CASE
                    WHEN $3 = 'PENDING' THEN NULL
                    WHEN $3 = 'FILLED' AND $2 <> 'FILLED' THEN NOW()
                    ELSE filled_at
                END,
                position_id = CASE
                    WHEN $3 = 'PENDING' THEN NULL
                    ELSE COALESCE($4, position_id)
                END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(new.as_str())
        .bind(position_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl StrategyStore for PostgresStore {
    async fn register(&self, name: &str) -> Result<StrategyRecord> {
        sqlx::query(
            r#"
            INSERT INTO strategies (name, state)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(StrategyState::SandboxActive.as_str())
        .execute(&self.pool)
        .await?;

        self.get(name)
            .await?
            .ok_or_else(|| EngineError::StrategyNotFound(name.to_string()))
    }

    async fn get(&self, name: &str) -> Result<Option<StrategyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT name, state, created_at, updated_at, promoted_at
            FROM strategies
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(strategy_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<StrategyRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT name, state, created_at, updated_at, promoted_at
            FROM strategies
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(strategy_from_row).collect()
    }

    async fn transition(
        &self,
        name: &str,
        expected: StrategyState,
        new: StrategyState,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE strategies
            SET state = $3,
                promoted_at = CASE WHEN $3 = 'LIVE' THEN NOW() ELSE promoted_at END,
                updated_at = NOW()
            WHERE name = $1 AND state = $2
            "#,
        )
        .bind(name)
        .bind(expected.as_str())
        .bind(new.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_decision(&self, decision: &PromotionDecision) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO promotion_decisions (
                id, strategy_name, outcome, reason, missing_criteria, total_trades,
                win_rate, sharpe_ratio, total_profit_loss, decided_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(decision.id)
        .bind(&decision.strategy_name)
        .bind(decision.outcome.as_str())
        .bind(&decision.reason)
        .bind(&decision.missing_criteria)
        .bind(decision.total_trades as i64)
        .bind(to_decimal(decision.win_rate, "win_rate")?)
        .bind(to_decimal(decision.sharpe_ratio, "sharpe_ratio")?)
        .bind(to_decimal(decision.total_profit_loss, "total_profit_loss")?)
        .bind(decision.decided_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_decisions(
        &self,
        strategy: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PromotionDecision>> {
        let rows = sqlx::query(
            r#"
            SELECT id, strategy_name, outcome, reason, missing_criteria, total_trades,
                   win_rate, sharpe_ratio, total_profit_loss, decided_at
            FROM promotion_decisions
            WHERE $1::TEXT IS NULL OR strategy_name = $1
            ORDER BY decided_at DESC
            LIMIT $2
            "#,
        )
        .bind(strategy)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decision_from_row).collect()
    }
}
