use dcabot::application::actors::{request_cycle, request_stats, CycleActor, CycleActorError, CycleMessage};
use dcabot::config::BotConfig;
use dcabot::domain::repositories::exchange_client::ExchangeClient;
use dcabot::domain::repositories::trading_store::TradingStore;
use dcabot::domain::services::reconciliation_engine::ReconciliationEngine;
use dcabot::infrastructure::binance_client::BinanceClient;
use dcabot::persistence::repository::SqliteTradingStore;
use dcabot::persistence::{init_database, DatabaseConfig};
use dcabot::secrets::{load_binance_credentials, SecretConfig};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env before anything reads the environment
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e.into());
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dcabot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BotConfig::from_env().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;
    info!(
        "DCA bot starting on {} ({}): {} {} in steps of {}, cycle every {}s",
        config.symbol,
        if config.use_testnet { "testnet" } else { "mainnet" },
        config.initial_usdt,
        config.quote_asset,
        config.order_amount,
        config.cycle_interval_seconds
    );
    if !config.use_testnet {
        warn!("⚠️  Trading on Binance mainnet with real funds");
    }

    let credentials = load_binance_credentials(&SecretConfig::default()).map_err(|e| {
        error!("Failed to load Binance credentials: {}", e);
        e
    })?;

    let pool = init_database(&DatabaseConfig::from_env()).await?;
    let store: Arc<dyn TradingStore> = Arc::new(SqliteTradingStore::new(pool.clone()));
    let exchange: Arc<dyn ExchangeClient> =
        Arc::new(BinanceClient::new(config.binance_config(credentials))?);

    let engine = ReconciliationEngine::load(exchange, store, config.to_strategy_config()).await?;
    let (cycle_tx, actor_handle) = CycleActor::spawn(engine);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut interval = tokio::time::interval(config.cycle_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Bot started. Press Ctrl+C to stop.");
    let mut outcome: Result<(), Box<dyn std::error::Error>> = Ok(());

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, no further cycles will start");
                break;
            }
            _ = interval.tick() => {
                // The shutdown branch is not polled while a cycle runs
                match request_cycle(&cycle_tx).await {
                    Ok(report) => {
                        if !report.is_clean() {
                            debug!("Cycle report: {:?}", report);
                        }
                    }
                    Err(CycleActorError::Engine(e)) if e.is_fatal() => {
                        error!("Fatal error, stopping bot: {}", e);
                        outcome = Err(e.into());
                        break;
                    }
                    Err(e) => {
                        error!("Cycle failed: {}", e);
                        outcome = Err(e.into());
                        break;
                    }
                }
            }
        }
    }

    if let Ok(stats) = request_stats(&cycle_tx).await {
        info!(
            "Ran {} cycles ({} clean, {} failed), {} buys, {} sells, {} trades sold, realized profit {}",
            stats.total_cycles,
            stats.clean_cycles,
            stats.failed_cycles,
            stats.buys_placed,
            stats.sells_placed,
            stats.trades_sold,
            stats.realized_profit
        );
    }

    let _ = cycle_tx.send(CycleMessage::Shutdown).await;
    if let Err(e) = actor_handle.await {
        error!("CycleActor task failed: {}", e);
    }
    pool.close().await;

    info!("Shutdown complete");
    outcome
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
