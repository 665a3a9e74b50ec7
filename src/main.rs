use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use sandbox_trader::api::CoinGeckoOracle;
use sandbox_trader::audit::{AuditDispatcher, TracingAuditSink};
use sandbox_trader::db::{PostgresStore, DEFAULT_OWNER_ID};
use sandbox_trader::execution::{KillSwitchRequest, OrderScheduler, PriceOracle, RandomWalkOracle};
use sandbox_trader::indicators::IndicatorSnapshot;
use sandbox_trader::risk::{calculate_kelly, KellyInput, PerformanceScope};
use sandbox_trader::strategy::run_auto_promotion;
use sandbox_trader::{Direction, EngineConfig, SandboxEngine, TradeRequest};

const AUDIT_QUEUE_CAPACITY: usize = 1_024;

#[derive(Parser, Debug)]
#[command(name = "sandbox-trader")]
#[command(about = "Paper-trading engine with risk analytics and strategy promotion")]
#[command(version)]
struct Cli {
    /// TOML config file (defaults to ./sandbox.toml when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trade an indicator strategy against a seeded random walk, in memory
    Simulate {
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Price steps per pair
        #[arg(long, default_value_t = 300)]
        steps: usize,

        /// Max per-step move as a fraction of price
        #[arg(long, default_value_t = 0.01)]
        volatility: f64,

        /// Notional per trade (USD)
        #[arg(long, default_value_t = 500.0)]
        size: f64,

        #[arg(long)]
        leverage: Option<f64>,

        #[arg(long, default_value = "macd-momentum")]
        strategy: String,
    },

    /// Kelly position sizing from win rate and average win/loss
    Kelly {
        /// Win rate in percent, e.g. 55
        #[arg(long)]
        win_rate: f64,

        #[arg(long)]
        avg_win: f64,

        #[arg(long)]
        avg_loss: f64,

        #[arg(long)]
        max_position_percent: Option<f64>,

        #[arg(long)]
        bankroll: Option<f64>,
    },

    /// Performance metrics from the database
    Performance {
        #[arg(long)]
        owner: Option<Uuid>,

        /// Report a single strategy instead of the owner
        #[arg(long)]
        strategy: Option<String>,

        /// Roll up every strategy for the owner
        #[arg(long)]
        master: bool,
    },

    /// Halt trading and flatten open positions
    KillSwitch {
        #[arg(long)]
        owner: Option<Uuid>,

        #[arg(long, default_value = "manual kill switch")]
        reason: String,

        /// Disable trading without closing positions
        #[arg(long)]
        keep_positions: bool,

        /// Re-enable trading instead
        #[arg(long)]
        resume: bool,
    },

    /// Fill limit orders and auto-promote strategies until Ctrl+C
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config =
        EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Simulate {
            seed,
            steps,
            volatility,
            size,
            leverage,
            strategy,
        } => simulate(config, seed, steps, volatility, size, leverage, &strategy).await,
        Commands::Kelly {
            win_rate,
            avg_win,
            avg_loss,
            max_position_percent,
            bankroll,
        } => {
            let sizing = calculate_kelly(&KellyInput {
                win_rate,
                avg_win,
                avg_loss,
                max_position_percent,
                bankroll,
            })?;
            println!("{}", serde_json::to_string_pretty(&sizing)?);
            Ok(())
        }
        Commands::Performance {
            owner,
            strategy,
            master,
        } => {
            let engine = connect_engine(config, AuditDispatcher::disabled()).await?;
            let owner = owner.unwrap_or(DEFAULT_OWNER_ID);

            let report = if master {
                serde_json::to_string_pretty(&engine.analytics.master_metrics(owner).await?)?
            } else {
                let scope = match strategy {
                    Some(name) => PerformanceScope::Strategy(name),
                    None => PerformanceScope::Owner(owner),
                };
                serde_json::to_string_pretty(&engine.analytics.get_performance(&scope).await?)?
            };
            println!("{}", report);
            Ok(())
        }
        Commands::KillSwitch {
            owner,
            reason,
            keep_positions,
            resume,
        } => {
            let engine = connect_engine(config, AuditDispatcher::disabled()).await?;
            let owner = owner.unwrap_or(DEFAULT_OWNER_ID);

            if resume {
                let enabled = engine.kill_switch.resume_trading(owner).await?;
                println!("Trading enabled for {}: {}", owner, enabled);
                return Ok(());
            }

            let report = engine
                .kill_switch
                .activate(&KillSwitchRequest {
                    owner_id: owner,
                    close_all: !keep_positions,
                    disable_trading: true,
                    reason,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Run => run(config).await,
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sandbox_trader=info".into()),
        )
        .init();
}

async fn connect_engine(config: EngineConfig, audit: AuditDispatcher) -> Result<SandboxEngine> {
    let database_url = config
        .database
        .url
        .clone()
        .context("DATABASE_URL (or SANDBOX__DATABASE__URL) not set")?;

    let store = Arc::new(
        PostgresStore::connect(&database_url, config.database.max_connections)
            .await
            .context("Failed to connect to Postgres")?,
    );
    tracing::info!("Connected to Postgres");

    let oracle: Arc<dyn PriceOracle> = Arc::new(CoinGeckoOracle::new(&config.oracle)?);
    Ok(SandboxEngine::new(
        config,
        store.clone(),
        store.clone(),
        store,
        oracle,
        audit,
    ))
}

async fn run(config: EngineConfig) -> Result<()> {
    tracing::info!("🚀 Sandbox trader starting");

    let (audit, audit_worker) =
        AuditDispatcher::spawn(Arc::new(TracingAuditSink), AUDIT_QUEUE_CAPACITY);
    let scheduler_interval = Duration::from_secs(config.scheduler.interval_secs.max(1));
    let promotion_interval =
        Duration::from_secs(config.scheduler.auto_promote_interval_secs.max(1));

    let engine = connect_engine(config, audit.clone()).await?;

    let scheduler_handle =
        Arc::new(OrderScheduler::new(engine.executor.clone(), scheduler_interval)).spawn();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let promotion_task = tokio::spawn(run_auto_promotion(
        engine.registry.clone(),
        promotion_interval,
        shutdown_rx,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("⚠️  Received Ctrl+C, shutting down...");

    scheduler_handle.stop().await;
    let _ = shutdown_tx.send(true);
    if let Err(e) = promotion_task.await {
        tracing::error!("Auto-promotion task failed: {}", e);
    }

    let stats = audit.stats_handle();
    // The worker exits once every dispatcher clone is gone
    drop(engine);
    drop(audit);
    if let Err(e) = audit_worker.await {
        tracing::error!("Audit worker failed: {}", e);
    }
    let stats = stats.snapshot();
    tracing::info!(
        "Audit events: {} delivered, {} failed, {} dropped",
        stats.delivered,
        stats.failed,
        stats.dropped
    );

    Ok(())
}

async fn simulate(
    config: EngineConfig,
    seed: u64,
    steps: usize,
    volatility: f64,
    size: f64,
    leverage: Option<f64>,
    strategy: &str,
) -> Result<()> {
    let oracle = Arc::new(RandomWalkOracle::new(
        seed,
        &[("BTC/USDC", 50_000.0), ("ETH/USDC", 3_000.0), ("SOL/USDC", 150.0)],
        volatility,
    ));
    let engine = SandboxEngine::in_memory(config, oracle.clone());
    let owner = DEFAULT_OWNER_ID;
    engine.registry.register_strategy(strategy).await?;

    let pairs = oracle.pairs().await;
    let mut history: HashMap<String, Vec<f64>> = HashMap::new();
    let mut open: HashMap<String, (Uuid, Direction)> = HashMap::new();

    for _ in 0..steps {
        for pair in &pairs {
            let price = oracle.get_price(pair).await?.price;
            let prices = history.entry(pair.clone()).or_default();
            prices.push(price);

            let bias = IndicatorSnapshot::from_prices(prices).bias();

            if let Some((position_id, direction)) = open.get(pair).copied() {
                if bias != Some(direction) {
                    engine.executor.close_trade(position_id).await?;
                    open.remove(pair);
                }
            }

            if open.contains_key(pair) {
                continue;
            }
            let Some(direction) = bias else {
                continue;
            };

            let mut request = TradeRequest::new(pair, direction, size)
                .with_strategy(strategy)
                .with_reasoning("MACD histogram with RSI filter");
            request.leverage = leverage;

            match engine.executor.open(owner, &request).await {
                Ok(position) => {
                    open.insert(pair.clone(), (position.id, direction));
                }
                Err(e) => tracing::warn!("Skipped {} {}: {}", direction, pair, e),
            }
        }
    }

    let report = engine.executor.close_all_trades(owner).await?;
    tracing::info!("Final flatten closed {}/{} positions", report.closed_count(), report.total);

    let metrics = engine
        .analytics
        .get_performance(&PerformanceScope::Strategy(strategy.to_string()))
        .await?;
    let master = engine.analytics.master_metrics(owner).await?;
    let promotion = engine.registry.can_promote_strategy(strategy).await?;
    let balance = engine.executor.balance(owner).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "balance": balance,
            "metrics": metrics,
            "master": master,
            "eligible_for_live": promotion.eligible,
            "missing_criteria": promotion.missing_criteria,
        }))?
    );

    Ok(())
}
