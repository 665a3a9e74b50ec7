use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use sandbox_trader::execution::{KillSwitchRequest, OrderScheduler, StaticPriceOracle};
use sandbox_trader::risk::{calculate_kelly, KellyInput, PerformanceScope, PromotionCriteria};
use sandbox_trader::strategy::StrategyState;
use sandbox_trader::*;

const EPS: f64 = 1e-6;

async fn engine_with(config: EngineConfig) -> (SandboxEngine, Arc<StaticPriceOracle>) {
    let oracle = Arc::new(StaticPriceOracle::with_prices(&[
        ("BTC/USDC", 50_000.0),
        ("ETH/USDC", 3_000.0),
        ("SOL/USDC", 100.0),
    ]));
    (SandboxEngine::in_memory(config, oracle.clone()), oracle)
}

async fn funded_owner(engine: &SandboxEngine, balance: f64) -> Uuid {
    let owner = Uuid::new_v4();
    assert_ok!(engine.executor.ledger().open_account(owner, balance).await);
    owner
}

#[tokio::test]
async fn test_buy_50k_btc_and_close_10_percent_higher() {
    let (engine, oracle) = engine_with(EngineConfig::default()).await;
    let owner = funded_owner(&engine, 100_000.0).await;

    let request = TradeRequest::new("BTC/USDC", Direction::Buy, 50_000.0);
    let position = assert_ok!(engine.executor.execute_trade(owner, &request).await);
    assert!(position.collateral_consistent());
    assert!(position.exit_price.is_none() && position.closed_at.is_none());

    oracle.set_price("BTC/USDC", 55_000.0).await;
    let closed = assert_ok!(engine.executor.close_trade(position.id).await);

    assert_eq!(closed.status, PositionStatus::Closed);
    assert!((closed.profit_loss.unwrap() - (5_000.0 - 260.0)).abs() < EPS);
    assert!(closed.exit_price.is_some() && closed.closed_at.is_some());

    let balance = assert_ok!(engine.executor.balance(owner).await);
    assert!((balance - 104_740.0).abs() < EPS);

    let scope = PerformanceScope::Owner(owner);
    let metrics = assert_ok!(engine.analytics.get_performance(&scope).await);
    assert_eq!(metrics.total_trades, 1);
    assert_eq!(metrics.winning_trades, 1);
    assert_eq!(metrics.win_rate, 100.0);
    assert!((metrics.total_profit_loss - 4_740.0).abs() < EPS);
}

#[tokio::test]
async fn test_leverage_above_twenty_is_rejected() {
    let (engine, _oracle) = engine_with(EngineConfig::default()).await;
    let owner = funded_owner(&engine, 10_000.0).await;

    let request = TradeRequest::new("ETH/USDC", Direction::Sell, 1_000.0).with_leverage(25.0);
    let err = assert_err!(engine.executor.open(owner, &request).await);

    assert!(matches!(err, EngineError::InvalidLeverage(l) if l == 25.0));
    assert!(err.is_validation());
    assert!(assert_ok!(engine.executor.open_trades(owner).await).is_empty());
}

#[tokio::test]
async fn test_leveraged_short_profit() {
    let (engine, oracle) = engine_with(EngineConfig::default()).await;
    let owner = funded_owner(&engine, 10_000.0).await;

    let request = TradeRequest::new("ETH/USDC", Direction::Sell, 6_000.0).with_leverage(3.0);
    let position = assert_ok!(engine.executor.open(owner, &request).await);
    assert_eq!(position.collateral, 2_000.0);

    oracle.set_price("ETH/USDC", 2_700.0).await;
    let closed = assert_ok!(
        engine
            .executor
            .close(&CloseTradeRequest {
                trade_id: position.id
            })
            .await
    );

    assert_eq!(closed.id, position.id);
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_price, Some(2_700.0));
    // gross 600; fees 15.6 + 1.8 open, 15.6 close
    let expected = 600.0 - 33.0;
    assert!((closed.profit_loss.unwrap() - expected).abs() < EPS);
    assert!((closed.profit_loss_percent.unwrap() - expected / 2_000.0 * 100.0).abs() < EPS);
}

#[tokio::test]
async fn test_close_all_with_one_price_missing() {
    let (engine, oracle) = engine_with(EngineConfig::default()).await;
    let owner = funded_owner(&engine, 10_000.0).await;

    for pair in ["BTC/USDC", "ETH/USDC", "SOL/USDC"] {
        let request = TradeRequest::new(pair, Direction::Buy, 500.0);
        assert_ok!(engine.executor.execute_trade(owner, &request).await);
    }
    oracle.remove("ETH/USDC").await;

    let report = assert_ok!(engine.executor.close_all_trades(owner).await);

    assert_eq!(report.total, 3);
    assert_eq!(report.closed_count(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].trading_pair, "ETH/USDC");

    let still_open = assert_ok!(engine.executor.open_trades(owner).await);
    assert_eq!(still_open.len(), 1);
    assert_eq!(still_open[0].trading_pair, "ETH/USDC");
}

#[tokio::test]
async fn test_second_close_fails_and_balance_is_unchanged() {
    let (engine, _oracle) = engine_with(EngineConfig::default()).await;
    let owner = funded_owner(&engine, 10_000.0).await;

    let request = TradeRequest::new("SOL/USDC", Direction::Buy, 1_000.0);
    let position = assert_ok!(engine.executor.execute_trade(owner, &request).await);
    assert_ok!(engine.executor.close_trade(position.id).await);
    let balance = assert_ok!(engine.executor.balance(owner).await);

    let err = assert_err!(engine.executor.close_trade(position.id).await);
    assert!(matches!(err, EngineError::TradeNotFoundOrAlreadyClosed(id) if id == position.id));
    assert_eq!(assert_ok!(engine.executor.balance(owner).await), balance);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_closes_apply_once() {
    let (engine, _oracle) = engine_with(EngineConfig::default()).await;
    let owner = funded_owner(&engine, 10_000.0).await;

    let request = TradeRequest::new("SOL/USDC", Direction::Buy, 1_000.0);
    let position = assert_ok!(engine.executor.execute_trade(owner, &request).await);
    let before = assert_ok!(engine.executor.balance(owner).await);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let executor = engine.executor.clone();
        handles.push(tokio::spawn(async move { executor.close_trade(position.id).await }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert!(matches!(e, EngineError::TradeNotFoundOrAlreadyClosed(_))),
        }
    }
    assert_eq!(successes, 1);

    // Flat price: collateral back minus the close fee
    let after = assert_ok!(engine.executor.balance(owner).await);
    assert!((after - (before + 1_000.0 - 2.6)).abs() < EPS);
}

#[tokio::test]
async fn test_metrics_for_owner_without_trades_are_zero() {
    let (engine, _oracle) = engine_with(EngineConfig::default()).await;

    let metrics = assert_ok!(
        engine
            .analytics
            .get_performance(&PerformanceScope::Owner(Uuid::new_v4()))
            .await
    );

    assert_eq!(metrics.total_trades, 0);
    for value in [
        metrics.win_rate,
        metrics.total_profit_loss,
        metrics.avg_profit,
        metrics.avg_loss,
        metrics.profit_factor,
        metrics.sharpe_ratio,
        metrics.sortino_ratio,
        metrics.kelly_criterion,
        metrics.var_5_percent,
        metrics.risk_of_ruin,
        metrics.max_drawdown,
    ] {
        assert_eq!(value, 0.0);
    }
    assert!(!metrics.can_promote_to_live);
    assert!(!metrics.missing_criteria.is_empty());
}

#[tokio::test]
async fn test_strategy_graduates_after_meeting_criteria() {
    let mut config = EngineConfig::default();
    config.promotion = PromotionCriteria {
        min_trades: 4,
        min_win_rate: 60.0,
        min_sharpe_ratio: 1.0,
        min_total_profit_loss: 0.0,
        max_drawdown_pct: 20.0,
        min_profit_factor: 1.5,
    };
    let (engine, oracle) = engine_with(config).await;
    let owner = funded_owner(&engine, 10_000.0).await;
    assert_ok!(engine.registry.register_strategy("breakout").await);

    let early = assert_err!(engine.registry.promote_strategy("breakout").await);
    assert!(matches!(early, EngineError::PromotionCriteriaNotMet { .. }));

    for exit in [110.0, 105.0, 98.0, 108.0] {
        oracle.set_price("SOL/USDC", 100.0).await;
        let request =
            TradeRequest::new("SOL/USDC", Direction::Buy, 1_000.0).with_strategy("breakout");
        let position = assert_ok!(engine.executor.execute_trade(owner, &request).await);
        oracle.set_price("SOL/USDC", exit).await;
        assert_ok!(engine.executor.close_trade(position.id).await);
    }

    let check = assert_ok!(engine.registry.can_promote_strategy("breakout").await);
    assert!(check.eligible, "missing: {:?}", check.missing_criteria);
    assert_eq!(check.metrics.total_trades, 4);
    assert_eq!(check.metrics.winning_trades, 3);

    let promoted = assert_ok!(engine.registry.auto_promote().await);
    assert_eq!(promoted, vec!["breakout".to_string()]);

    let record = assert_ok!(engine.registry.get_strategy("breakout").await);
    assert_eq!(record.state, StrategyState::Live);
    assert!(record.promoted_at.is_some());

    // LIVE is terminal for toggles
    let state = assert_ok!(engine.registry.toggle_strategy("breakout", false).await);
    assert_eq!(state, StrategyState::Live);
}

#[tokio::test]
async fn test_limit_order_filled_by_scheduler() {
    let (engine, oracle) = engine_with(EngineConfig::default()).await;
    let owner = funded_owner(&engine, 10_000.0).await;

    let request = LimitOrderRequest {
        trade: TradeRequest::new("SOL/USDC", Direction::Buy, 400.0),
        limit_price: 95.0,
    };
    let order = assert_ok!(engine.executor.place_limit_order(owner, &request).await);
    assert_eq!(order.status, OrderStatus::Pending);

    let every = std::time::Duration::from_secs(30);
    let scheduler = OrderScheduler::new(engine.executor.clone(), every);
    let idle = assert_ok!(scheduler.run_once().await).unwrap();
    assert_eq!(idle.filled, 0);

    oracle.set_price("SOL/USDC", 94.0).await;
    let tick = assert_ok!(scheduler.run_once().await).unwrap();
    assert_eq!(tick.filled, 1);

    let open = assert_ok!(engine.executor.open_trades(owner).await);
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].entry_price, 94.0);
    assert!(assert_ok!(engine.executor.pending_orders(owner).await).is_empty());
}

#[tokio::test]
async fn test_kill_switch_blocks_new_trades_until_resumed() {
    let (engine, _oracle) = engine_with(EngineConfig::default()).await;
    let owner = funded_owner(&engine, 10_000.0).await;

    for pair in ["BTC/USDC", "SOL/USDC"] {
        let request = TradeRequest::new(pair, Direction::Buy, 250.0);
        assert_ok!(engine.executor.execute_trade(owner, &request).await);
    }

    let report = assert_ok!(
        engine
            .kill_switch
            .activate(&KillSwitchRequest {
                owner_id: owner,
                close_all: true,
                disable_trading: true,
                reason: "integration test".to_string(),
            })
            .await
    );
    assert_eq!(report.positions_closed, 2);
    assert_eq!(report.positions_failed, 0);
    assert!(!report.trading_enabled);

    let request = TradeRequest::new("SOL/USDC", Direction::Buy, 250.0);
    let err = assert_err!(engine.executor.execute_trade(owner, &request).await);
    assert!(matches!(err, EngineError::TradingDisabled(_)));

    assert!(assert_ok!(engine.kill_switch.resume_trading(owner).await));
    assert_ok!(engine.executor.execute_trade(owner, &request).await);
}

#[test]
fn test_kelly_rejects_degenerate_inputs() {
    for (win_rate, avg_win, avg_loss) in [
        (0.0, 100.0, 50.0),
        (100.0, 100.0, 50.0),
        (55.0, 0.0, 50.0),
        (55.0, 100.0, -1.0),
    ] {
        let result = calculate_kelly(&KellyInput {
            win_rate,
            avg_win,
            avg_loss,
            max_position_percent: None,
            bankroll: None,
        });
        assert!(matches!(result, Err(EngineError::InvalidKellyInput(_))));
    }

    let sizing = assert_ok!(calculate_kelly(&KellyInput {
        win_rate: 60.0,
        avg_win: 200.0,
        avg_loss: 100.0,
        max_position_percent: Some(10.0),
        bankroll: Some(10_000.0),
    }));
    assert!(sizing.kelly_percentage <= 10.0);
    assert_eq!(sizing.fractional_kelly, sizing.kelly_percentage / 2.0);
    assert_eq!(sizing.recommended_size, 500.0);
}
