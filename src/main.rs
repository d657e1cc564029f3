//! Arkham grid bot entry point.
//!
//! Wires configuration, the REST gateway and the selected engine together,
//! and relays engine events to the log.

use anyhow::Result;
use arkham_gridbot::config::{Config, TradingMode};
use arkham_gridbot::exchange::{ArkhamClient, ExchangeGateway};
use arkham_gridbot::trading::{EngineEvent, GridEngine, VolumeEngine};
use clap::Parser;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Arkham grid bot CLI. Flags override the config file and environment.
#[derive(Parser)]
#[command(name = "arkham-gridbot")]
#[command(version, about = "Grid and volume trading bot for the Arkham exchange")]
struct Cli {
    /// Trading pair, e.g. ETH_USDT
    #[arg(long)]
    symbol: Option<String>,

    /// Capital to deploy, in quote currency
    #[arg(long)]
    capital: Option<Decimal>,

    /// Number of grid levels
    #[arg(long)]
    num_orders: Option<u32>,

    /// Strategy mode
    #[arg(long, value_enum)]
    mode: Option<TradingMode>,

    /// Use a trailing limit sell instead of a market sell (volume mode)
    #[arg(long)]
    trailing: bool,

    /// Directory for rolling daily JSON log files (stdout only when unset)
    #[arg(long)]
    log_dir: Option<String>,
}

/// Install the subscriber. The returned guard must stay alive so the
/// non-blocking file writer flushes on exit.
fn init_tracing(log_dir: Option<&str>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "arkham-gridbot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .json()
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref());

    let mut config = Config::load()?;
    if let Some(symbol) = cli.symbol {
        config.trading.symbol = symbol;
    }
    if let Some(capital) = cli.capital {
        config.trading.capital = capital;
    }
    if let Some(num_orders) = cli.num_orders {
        config.trading.num_orders = num_orders;
    }
    if let Some(mode) = cli.mode {
        config.trading.mode = mode;
    }
    if cli.trailing {
        config.trading.use_trailing = true;
    }
    config.validate()?;

    let started_at = chrono::Utc::now();
    info!(
        symbol = %config.trading.symbol,
        mode = ?config.trading.mode,
        capital = %config.trading.capital,
        num_orders = config.trading.num_orders,
        %started_at,
        "Starting Arkham grid bot"
    );

    let gateway: Arc<dyn ExchangeGateway> = Arc::new(ArkhamClient::new(&config.api)?);
    let stop = Arc::new(AtomicBool::new(false));

    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Shutdown signal received, finishing the current iteration");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let (events_tx, mut events_rx) = mpsc::channel(256);
    let reporter = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                EngineEvent::Started { mode } => info!(?mode, "Engine started"),
                EngineEvent::GridArmed { levels } => info!(levels, "Grid armed"),
                EngineEvent::FillDetected {
                    order_id,
                    price,
                    size,
                } => info!(%order_id, %price, %size, "Fill detected"),
                EngineEvent::DelayTick { remaining_secs } => {
                    debug!(remaining_secs, "Waiting to sell")
                }
                EngineEvent::CycleCompleted => info!("Cycle completed"),
                EngineEvent::Error(message) => warn!(message = %message, "Engine error"),
                EngineEvent::Stopped => info!("Engine stopped"),
            }
        }
    });

    let result = match config.trading.mode {
        TradingMode::Grid => {
            GridEngine::new(gateway, config.trading.clone(), stop, events_tx)
                .run()
                .await
        }
        TradingMode::Volume => {
            VolumeEngine::new(gateway, config.trading.clone(), stop, events_tx)
                .run()
                .await
        }
    };

    let _ = reporter.await;
    let uptime = chrono::Utc::now() - started_at;
    info!(uptime_secs = uptime.num_seconds(), "Bot stopped");
    result
}
