use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing_subscriber::EnvFilter;

use traderbot::analysis::{Analyzer, TrendAnalyzer, WebhookAnalyzer};
use traderbot::balance::{BalanceQuery, BalanceQueryConfig};
use traderbot::config::{load_config, AnalyzerKind, AppConfig, DEFAULT_CONFIG_PATH};
use traderbot::db::PostgresStore;
use traderbot::execution::PaperExchange;
use traderbot::ledger::{InMemoryPositionStore, PositionLedger, PositionStore};
use traderbot::market_data::{CandleStore, InMemoryCandleStore, SyntheticFeed};
use traderbot::persistence::RedisCandleStore;
use traderbot::risk::RiskGate;
use traderbot::{BotLifecycle, BotStatus, DecisionEngine, EngineSettings, Symbol};

/// In-memory candle history kept per symbol when no external store is set
const MEMORY_CANDLE_CAPACITY: usize = 5_000;

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "traderbot", version, about = "Martingale trading bot with risk gates")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start trading until Ctrl-C
    Run,
    /// List every recorded position
    Positions,
    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.json);

    let config = load_config(Some(&cli.config)).context("Failed to load configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Positions => list_positions(config).await,
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn setup_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("traderbot=info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn connect_postgres(config: &AppConfig) -> Option<PostgresStore> {
    let url = config.storage.database_url.as_deref()?;

    match PostgresStore::connect(url).await {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!("Failed to connect to Postgres: {} - falling back to memory", e);
            None
        }
    }
}

/// Candle store for the run, plus the Redis handle when Redis is in use
async fn build_candle_store(
    config: &AppConfig,
    postgres: Option<&PostgresStore>,
) -> (Arc<dyn CandleStore>, Option<RedisCandleStore>) {
    if let Some(url) = config.storage.redis_url.as_deref() {
        match RedisCandleStore::connect(url).await {
            Ok(store) => return (Arc::new(store.clone()), Some(store)),
            Err(e) => tracing::warn!("Failed to connect to Redis: {} - trying next store", e),
        }
    }

    if let Some(store) = postgres {
        return (Arc::new(store.clone()), None);
    }

    tracing::info!("Using in-memory candle store");
    (
        Arc::new(InMemoryCandleStore::with_capacity(MEMORY_CANDLE_CAPACITY)),
        None,
    )
}

fn build_analyzer(config: &AppConfig) -> anyhow::Result<Arc<dyn Analyzer>> {
    match config.analyzer.kind {
        AnalyzerKind::Trend => Ok(Arc::new(TrendAnalyzer::default())),
        AnalyzerKind::Webhook => {
            let Some(url) = config.analyzer.webhook_url.clone() else {
                bail!("analyzer.webhook_url is required for the webhook analyzer");
            };
            let analyzer = WebhookAnalyzer::new(
                url,
                config.bot.timeframe,
                config.analyzer.requests_per_minute,
                Duration::from_secs(config.analyzer.request_timeout_secs),
            )?;
            Ok(Arc::new(analyzer))
        }
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        symbol = %config.bot.symbol,
        timeframe = %config.bot.timeframe,
        trading_enabled = config.trading.enabled,
        "Trader bot starting (paper exchange)"
    );

    let postgres = connect_postgres(&config).await;
    let (candles, redis) = build_candle_store(&config, postgres.as_ref()).await;
    let positions: Arc<dyn PositionStore> = match postgres {
        Some(store) => Arc::new(store),
        None => Arc::new(InMemoryPositionStore::new()),
    };

    let quote = Symbol::parse(&config.bot.symbol)?.quote;
    let exchange = Arc::new(PaperExchange::new(candles.clone()));
    exchange.deposit(&quote, config.paper.initial_balance).await;

    let analyzer = build_analyzer(&config)?;
    tracing::info!(analyzer = analyzer.name(), "Signal analyzer ready");

    let engine = Arc::new(DecisionEngine::new(
        EngineSettings::from_config(&config),
        RiskGate::new(&config.risk),
        PositionLedger::new(positions),
        BalanceQuery::new(exchange.clone(), BalanceQueryConfig::from(&config.trading)),
        exchange,
        analyzer,
        candles.clone(),
    ));

    let feed = Arc::new(
        SyntheticFeed::new(
            config.paper.seed,
            config.paper.scenario,
            Duration::from_millis(config.paper.tick_millis),
        )
        .with_base_price(config.paper.base_price),
    );

    let lifecycle = BotLifecycle::new(
        config.bot.symbol.clone(),
        config.bot.timeframe,
        config.bot.channel_capacity,
        feed,
        engine.clone(),
        candles,
    );

    let mut status_rx = lifecycle.watch_status();
    lifecycle.start().await.context("Failed to start trading bot")?;

    let mut status_timer = interval(STATUS_INTERVAL);
    status_timer.tick().await;
    let mut failed = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            changed = status_rx.changed() => {
                if changed.is_err() || *status_rx.borrow_and_update() == BotStatus::Error {
                    tracing::error!("Trading bot entered error state, shutting down");
                    failed = true;
                    break;
                }
            }
            _ = status_timer.tick() => {
                log_status(&lifecycle, &engine, &config.bot.symbol).await;
                if let Some(redis) = &redis {
                    prune_candles(redis, &config).await;
                }
            }
        }
    }

    lifecycle.stop().await.context("Failed to stop trading bot")?;
    log_status(&lifecycle, &engine, &config.bot.symbol).await;

    if failed {
        bail!("Market data feed stopped delivering candles");
    }

    Ok(())
}

async fn log_status(lifecycle: &BotLifecycle, engine: &DecisionEngine, symbol: &str) {
    let step = engine.martingale_step(symbol).await;

    match engine.ledger().get_open_position(symbol).await {
        Ok(Some(position)) => tracing::info!(
            status = %lifecycle.status(),
            step = ?step,
            entry = %position.entry_price,
            price = %position.current_price,
            pnl = %position.unrealized_pnl(position.current_price),
            "Status: holding"
        ),
        Ok(None) => tracing::info!(status = %lifecycle.status(), step = ?step, "Status: flat"),
        Err(e) => tracing::warn!(status = %lifecycle.status(), error = %e, "Status: ledger unavailable"),
    }
}

async fn prune_candles(redis: &RedisCandleStore, config: &AppConfig) {
    let cutoff = chrono::Utc::now() - config.storage.candle_retention();

    match redis.prune_before(&config.bot.symbol, cutoff).await {
        Ok(0) => {}
        Ok(removed) => tracing::info!(removed, "Pruned candles past retention"),
        Err(e) => tracing::warn!(error = %e, "Failed to prune old candles"),
    }
}

async fn list_positions(config: AppConfig) -> anyhow::Result<()> {
    let Some(url) = config.storage.database_url.as_deref() else {
        bail!("storage.database_url is not set; positions are only kept in memory");
    };

    let store = PostgresStore::connect(url)
        .await
        .context("Failed to connect to Postgres")?;
    let positions = store.list_positions().await?;

    if positions.is_empty() {
        println!("No positions recorded");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:<4}  {:>14}  {:>12}  {:>4}  {:<6}  {:>12}",
        "ID", "SYMBOL", "SIDE", "QUANTITY", "ENTRY", "STEP", "STATE", "PNL"
    );
    for p in &positions {
        println!(
            "{:<36}  {:<10}  {:<4}  {:>14}  {:>12}  {:>4}  {:<6}  {:>12}",
            p.id,
            p.symbol,
            p.side.as_str(),
            p.quantity,
            p.entry_price,
            p.martingale_step,
            if p.is_open { "open" } else { "closed" },
            p.realized_pnl
                .map(|pnl| pnl.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    let total = store.realized_pnl(&config.bot.symbol).await?;
    println!("\nRealised P&L for {}: {}", config.bot.symbol, total);

    Ok(())
}
