use chrono::{SubsecRound, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::audit::{AuditDispatcher, AuditEvent};
use crate::config::TradingConfig;
use crate::db::{OrderStore, PositionLedger};
use crate::execution::fees::FeeSchedule;
use crate::execution::price_feed::{PriceOracle, PriceQuote};
use crate::models::{
    Account, CloseTradeRequest, LimitOrder, LimitOrderRequest, OrderStatus, Position, PositionClose,
    PositionStatus, TradeRequest, TradeResponse, MAX_LEVERAGE, MIN_LEVERAGE,
};
use crate::{EngineError, Result};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

const REVERT_ATTEMPTS: u32 = 3;
const REVERT_BACKOFF: Duration = Duration::from_millis(25);

/// A position that could not be closed during a bulk close
#[derive(Debug, Clone, Serialize)]
pub struct CloseFailure {
    pub position_id: Uuid,
    pub trading_pair: String,
    pub reason: String,
}

/// Outcome of closing every open position for an owner
#[derive(Debug, Clone, Serialize)]
pub struct BulkCloseReport {
    pub total: usize,
    pub closed: Vec<Position>,
    pub failures: Vec<CloseFailure>,
}

impl BulkCloseReport {
    pub fn closed_count(&self) -> usize {
        self.closed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }
}

/// Opens and closes simulated positions against the ledger
pub struct TradeExecutor {
    ledger: Arc<dyn PositionLedger>,
    orders: Arc<dyn OrderStore>,
    oracle: Arc<dyn PriceOracle>,
    audit: AuditDispatcher,
    config: TradingConfig,
    fees: FeeSchedule,
}

impl TradeExecutor {
    pub fn new(
        ledger: Arc<dyn PositionLedger>,
        orders: Arc<dyn OrderStore>,
        oracle: Arc<dyn PriceOracle>,
        config: TradingConfig,
    ) -> Self {
        let fees = FeeSchedule::from_config(&config);
        Self {
            ledger,
            orders,
            oracle,
            audit: AuditDispatcher::disabled(),
            config,
            fees,
        }
    }

    pub fn with_audit(mut self, audit: AuditDispatcher) -> Self {
        self.audit = audit;
        self
    }

    pub fn ledger(&self) -> Arc<dyn PositionLedger> {
        self.ledger.clone()
    }

    pub fn orders(&self) -> Arc<dyn OrderStore> {
        self.orders.clone()
    }

    pub fn oracle(&self) -> Arc<dyn PriceOracle> {
        self.oracle.clone()
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Open a market position, leveraged when the request carries a leverage
    /// above 1x
    pub async fn open(&self, owner_id: Uuid, request: &TradeRequest) -> Result<Position> {
        match request.leverage {
            Some(leverage) => {
                self.execute_leveraged_trade(owner_id, request, leverage)
                    .await
            }
            None => self.execute_trade(owner_id, request).await,
        }
    }

    /// Open an unleveraged position at the current price
    pub async fn execute_trade(&self, owner_id: Uuid, request: &TradeRequest) -> Result<Position> {
        self.open_position(owner_id, request, None).await
    }

    /// Open a position reserving only `size / leverage` as collateral
    pub async fn execute_leveraged_trade(
        &self,
        owner_id: Uuid,
        request: &TradeRequest,
        leverage: f64,
    ) -> Result<Position> {
        validate_leverage(leverage)?;
        self.open_position(owner_id, request, Some(leverage)).await
    }

    async fn open_position(
        &self,
        owner_id: Uuid,
        request: &TradeRequest,
        leverage: Option<f64>,
    ) -> Result<Position> {
        // 1x is spot: no borrowing fee, no liquidation price
        let leverage = leverage.filter(|l| *l > MIN_LEVERAGE);
        validate_size(request.size_usd)?;
        self.ensure_trading_enabled(owner_id).await?;

        let quote = self.fresh_quote(&request.trading_pair).await?;
        let effective_leverage = leverage.unwrap_or(MIN_LEVERAGE);
        let entry_price = self.fees.entry_price(
            quote.price,
            request.direction,
            request.size_usd,
            effective_leverage,
        );
        let open_fee = self.fees.open_fee(request.size_usd, leverage);

        let position = Position::open(
            owner_id,
            request.session_id,
            request.strategy(),
            request.trading_pair.clone(),
            request.direction,
            request.size_usd,
            effective_leverage,
            entry_price,
            open_fee,
            request.reasoning.clone(),
        );

        self.ensure_account(owner_id).await?;
        self.ledger
            .create_position(&position, position.collateral + open_fee)
            .await?;

        tracing::info!(
            position_id = %position.id,
            strategy = %position.strategy_name,
            "Opened {} {} ${:.2} @ ${:.2} ({:.1}x, collateral ${:.2}, fee ${:.2})",
            position.direction,
            position.trading_pair,
            position.size,
            position.entry_price,
            position.leverage,
            position.collateral,
            open_fee
        );

        self.audit.publish(AuditEvent::executed(&position));
        self.check_auto_topup(owner_id).await;
        Ok(position)
    }

    /// Close an OPEN position at the current price and settle the balance
    pub async fn close_trade(&self, position_id: Uuid) -> Result<Position> {
        let position = match self.ledger.get_position(position_id).await? {
            Some(position) if position.is_open() => position,
            _ => return Err(EngineError::TradeNotFoundOrAlreadyClosed(position_id)),
        };

        let quote = self.fresh_quote(&position.trading_pair).await?;
        let (close, credit) = self.compute_close(&position, quote.price);

        let closed = self
            .ledger
            .update_position_status(
                position_id,
                PositionStatus::Open,
                PositionStatus::Closed,
                &close,
                credit,
            )
            .await?
            .ok_or_else(|| {
                tracing::warn!(
                    position_id = %position_id,
                    "Close lost to a concurrent transition"
                );
                EngineError::TradeNotFoundOrAlreadyClosed(position_id)
            })?;

        tracing::info!(
            position_id = %closed.id,
            "Closed {} {} @ ${:.2}: P&L ${:.2} ({:.2}%), fees ${:.2}",
            closed.direction,
            closed.trading_pair,
            close.exit_price,
            close.profit_loss,
            close.profit_loss_percent,
            close.fees
        );

        self.audit.publish(AuditEvent::closed(&closed));
        self.check_auto_topup(closed.owner_id).await;
        Ok(closed)
    }

    pub async fn close(&self, request: &CloseTradeRequest) -> Result<TradeResponse> {
        let closed = self.close_trade(request.trade_id).await?;
        Ok(TradeResponse::from(&closed))
    }

    /// Exit fields for `position` at `exit_price`, plus the amount returned
    /// to the owner's balance (collateral + gross - close fee)
    pub fn compute_close(&self, position: &Position, exit_price: f64) -> (PositionClose, f64) {
        let gross = position.gross_pnl(exit_price);
        let close_fee = self.fees.close_fee(position.size);
        let total_fees = position.fees + close_fee;
        let profit_loss = gross - total_fees;
        let profit_loss_percent = if position.collateral > 0.0 {
            profit_loss / position.collateral * 100.0
        } else {
            0.0
        };

        let close = PositionClose {
            exit_price,
            fees: total_fees,
            profit_loss,
            profit_loss_percent,
            closed_at: Utc::now().trunc_subsecs(6),
        };
        (close, position.collateral + gross - close_fee)
    }

    /// Close every OPEN position for the owner
    ///
    /// Each position is closed on its own; failures are collected in the
    /// report and never abort the remaining closes.
    pub async fn close_all_trades(&self, owner_id: Uuid) -> Result<BulkCloseReport> {
        let open = self.ledger.list_open(owner_id).await?;
        let mut report = BulkCloseReport {
            total: open.len(),
            closed: Vec::with_capacity(open.len()),
            failures: Vec::new(),
        };

        for position in open {
            match self.close_trade(position.id).await {
                Ok(closed) => report.closed.push(closed),
                Err(e) => {
                    tracing::warn!(
                        position_id = %position.id,
                        "Failed to close {}: {}",
                        position.trading_pair,
                        e
                    );
                    report.failures.push(CloseFailure {
                        position_id: position.id,
                        trading_pair: position.trading_pair,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            owner_id = %owner_id,
            "Closed {}/{} open positions",
            report.closed_count(),
            report.total
        );
        Ok(report)
    }

    pub async fn open_trades(&self, owner_id: Uuid) -> Result<Vec<Position>> {
        self.ledger.list_open(owner_id).await
    }

    /// Positions newest first; `limit` defaults to 50
    pub async fn trade_history(
        &self,
        owner_id: Uuid,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Position>> {
        self.ledger
            .list_history(owner_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT), offset)
            .await
    }

    /// Current balance, opening the account with the starting balance if needed
    pub async fn balance(&self, owner_id: Uuid) -> Result<f64> {
        self.ensure_account(owner_id).await
    }

    /// Balance, realized P&L and deposits, opening the account if needed
    pub async fn account(&self, owner_id: Uuid) -> Result<Account> {
        self.ensure_account(owner_id).await?;
        self.ledger.account(owner_id).await?.ok_or_else(|| {
            EngineError::DataIntegrity(format!("account {} missing after open", owner_id))
        })
    }

    /// Store a limit order, filling it at once when the market already satisfies it
    pub async fn place_limit_order(
        &self,
        owner_id: Uuid,
        request: &LimitOrderRequest,
    ) -> Result<LimitOrder> {
        validate_size(request.trade.size_usd)?;
        if let Some(leverage) = request.trade.leverage {
            validate_leverage(leverage)?;
        }
        if !(request.limit_price.is_finite() && request.limit_price > 0.0) {
            return Err(EngineError::InvalidLimitPrice(request.limit_price));
        }
        self.ensure_trading_enabled(owner_id).await?;

        let quote = self.fresh_quote(&request.trade.trading_pair).await?;
        let order = LimitOrder::pending(owner_id, request);
        self.orders.create_order(&order).await?;

        tracing::info!(
            order_id = %order.id,
            "Placed limit {} {} ${:.2} @ ${:.2} (market ${:.2})",
            order.direction,
            order.trading_pair,
            order.size_usd,
            order.limit_price,
            quote.price
        );

        if !order.is_triggered(quote.price) {
            return Ok(order);
        }

        self.fill_limit_order(&order).await?;
        self.orders
            .get_order(order.id)
            .await?
            .ok_or(EngineError::OrderNotFound(order.id))
    }

    pub async fn cancel_limit_order(&self, order_id: Uuid) -> Result<LimitOrder> {
        if self.orders.get_order(order_id).await?.is_none() {
            return Err(EngineError::OrderNotFound(order_id));
        }

        let cancelled = self
            .orders
            .transition_order(order_id, OrderStatus::Pending, OrderStatus::Cancelled, None)
            .await?;
        if !cancelled {
            return Err(EngineError::OrderNotPending(order_id));
        }

        tracing::info!(order_id = %order_id, "Cancelled limit order");
        self.orders
            .get_order(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(order_id))
    }

    /// Claim a PENDING order and open its position
    ///
    /// Returns `Ok(None)` when the claim is lost (already filled or cancelled).
    /// If the open fails the order is put back to PENDING and the open error
    /// returned, even when the revert itself fails.
    pub async fn fill_limit_order(&self, order: &LimitOrder) -> Result<Option<Position>> {
        let claimed = self
            .orders
            .transition_order(order.id, OrderStatus::Pending, OrderStatus::Filled, None)
            .await?;
        if !claimed {
            tracing::debug!(order_id = %order.id, "Limit order already claimed");
            return Ok(None);
        }

        let request = TradeRequest {
            session_id: order.session_id,
            strategy_name: Some(order.strategy_name.clone()),
            trading_pair: order.trading_pair.clone(),
            direction: order.direction,
            size_usd: order.size_usd,
            reasoning: order.reasoning.clone(),
            leverage: (order.leverage > MIN_LEVERAGE).then_some(order.leverage),
        };

        match self.open(order.owner_id, &request).await {
            Ok(position) => {
                // The position exists either way; a missing link is only logged
                if let Err(e) = self
                    .orders
                    .transition_order(
                        order.id,
                        OrderStatus::Filled,
                        OrderStatus::Filled,
                        Some(position.id),
                    )
                    .await
                {
                    tracing::error!(
                        order_id = %order.id,
                        position_id = %position.id,
                        "Failed to link filled order to its position: {}",
                        e
                    );
                }
                tracing::info!(
                    order_id = %order.id,
                    position_id = %position.id,
                    "Filled limit order @ ${:.2}",
                    position.entry_price
                );
                Ok(Some(position))
            }
            Err(e) => {
                tracing::warn!(order_id = %order.id, "Limit fill failed: {}", e);
                self.revert_claim(order.id).await;
                Err(e)
            }
        }
    }

    /// Put a claimed order back to PENDING after its open failed
    async fn revert_claim(&self, order_id: Uuid) {
        for attempt in 1..=REVERT_ATTEMPTS {
            match self
                .orders
                .transition_order(order_id, OrderStatus::Filled, OrderStatus::Pending, None)
                .await
            {
                Ok(true) => return,
                Ok(false) => {
                    tracing::error!(order_id = %order_id, "Claimed order changed before revert");
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        order_id = %order_id,
                        attempt,
                        "Failed to revert claimed order: {}",
                        e
                    );
                    if attempt < REVERT_ATTEMPTS {
                        tokio::time::sleep(REVERT_BACKOFF * attempt).await;
                    }
                }
            }
        }
        tracing::error!(
            order_id = %order_id,
            "Order left FILLED without a position after {} revert attempts",
            REVERT_ATTEMPTS
        );
    }

    pub async fn pending_orders(&self, owner_id: Uuid) -> Result<Vec<LimitOrder>> {
        self.orders.list_pending_for_owner(owner_id).await
    }

    /// Quote that is positive and no older than `max_price_age_secs`
    pub async fn fresh_quote(&self, pair: &str) -> Result<PriceQuote> {
        let quote = self.oracle.get_price(pair).await.map_err(|e| match e {
            EngineError::PriceUnavailable { .. } => e,
            other => EngineError::price_unavailable(pair, other.to_string()),
        })?;

        if !(quote.price.is_finite() && quote.price > 0.0) {
            return Err(EngineError::price_unavailable(
                pair,
                format!("invalid price {}", quote.price),
            ));
        }

        let age = quote.age_secs(Utc::now());
        if age > self.config.max_price_age_secs {
            return Err(EngineError::price_unavailable(
                pair,
                format!(
                    "quote is {}s old (max {}s)",
                    age, self.config.max_price_age_secs
                ),
            ));
        }

        Ok(quote)
    }

    /// Refill the balance when it has fallen below the configured threshold
    ///
    /// Failures are logged; the trade that triggered the check stands.
    async fn check_auto_topup(&self, owner_id: Uuid) {
        if !self.config.auto_topup_enabled {
            return;
        }

        let topped_up = self
            .ledger
            .top_up_if_below(
                owner_id,
                self.config.auto_topup_threshold,
                self.config.auto_topup_amount,
            )
            .await;
        match topped_up {
            Ok(Some(balance)) => tracing::info!(
                owner_id = %owner_id,
                "Auto top-up of ${:.2}, balance now ${:.2}",
                self.config.auto_topup_amount,
                balance
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!(owner_id = %owner_id, "Auto top-up check failed: {}", e),
        }
    }

    async fn ensure_trading_enabled(&self, owner_id: Uuid) -> Result<()> {
        if self.ledger.trading_enabled(owner_id).await? {
            Ok(())
        } else {
            Err(EngineError::TradingDisabled(owner_id))
        }
    }

    async fn ensure_account(&self, owner_id: Uuid) -> Result<f64> {
        match self.ledger.balance(owner_id).await? {
            Some(balance) => Ok(balance),
            None => {
                let balance = self
                    .ledger
                    .open_account(owner_id, self.config.starting_balance)
                    .await?;
                tracing::info!(
                    owner_id = %owner_id,
                    "Opened sandbox account with ${:.2}",
                    balance
                );
                Ok(balance)
            }
        }
    }
}

fn validate_size(size_usd: f64) -> Result<()> {
    if size_usd.is_finite() && size_usd > 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidSize(size_usd))
    }
}

fn validate_leverage(leverage: f64) -> Result<()> {
    if leverage.is_finite() && (MIN_LEVERAGE..=MAX_LEVERAGE).contains(&leverage) {
        Ok(())
    } else {
        Err(EngineError::InvalidLeverage(leverage))
    }
}
