//! GoldBot entry point: authenticate, bootstrap, run the polling loops
//! until SIGINT/SIGTERM, then shut down cleanly.

use anyhow::{Context, Result};
use clap::Parser;
use goldbot_capital::CapitalClient;
use goldbot_core::config::AppConfig;
use goldbot_data::spawn_writer;
use goldbot_engine::Engine;
use goldbot_ml::MlGate;
use goldbot_notify::Notifier;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// XAUUSD trend-following pullback + BOS trading agent for Capital.com.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Log level filter (overridden by RUST_LOG when set).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AppConfig::load().context("configuration")?;
    info!(
        epic = %config.capital.epic,
        account = %config.capital.account_type,
        swing = config.trading.swing_enabled,
        max_trades = config.trading.max_trades_per_day,
        "GoldBot starting"
    );

    let notifier = Notifier::new(
        config.telegram.bot_token.clone(),
        config.telegram.chat_id.clone(),
    );

    if let Err(e) = run(config, notifier.clone()).await {
        error!(error = %e, "Fatal");
        notifier.send_now(format!("GoldBot fatal: {e}")).await;
        return Err(e);
    }
    Ok(())
}

async fn run(config: AppConfig, notifier: Notifier) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));

    // Broker session first: a failed login is fatal.
    let broker = Arc::new(CapitalClient::new(
        config.capital.clone(),
        config.poll.confirm_attempts,
        config.poll.confirm_delay_ms,
    )?);
    broker.create_session().await.context("authentication")?;

    // Optional persistence sink.
    let db = match &config.database.url {
        Some(url) => {
            match goldbot_data::Db::connect(url, config.database.max_connections, &config.capital.epic)
                .await
            {
                Ok(db) => Some(db),
                Err(e) => {
                    warn!(error = %e, "Database unavailable, persistence disabled");
                    None
                }
            }
        }
        None => None,
    };
    let (persist, writer_handle) = spawn_writer(
        db,
        Duration::from_secs(config.poll.quote_flush_secs),
        Arc::clone(&stop),
    );

    let ml = Arc::new(MlGate::new(
        config.ml.champion_path.clone(),
        config.ml.challenger_path.clone(),
    ));

    let engine = Arc::new(Engine::new(
        config,
        broker,
        ml,
        persist,
        notifier.clone(),
        Arc::clone(&stop),
    ));
    engine.bootstrap().await.context("bootstrap")?;

    let handles = engine.spawn_jobs();
    notifier.send("GoldBot running");
    info!("GoldBot is running; Ctrl+C to stop");

    wait_for_shutdown_signal().await;
    engine.shutdown().await;

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Job join failed");
        }
    }
    if let Some(writer) = writer_handle {
        let _ = writer.await;
    }
    info!("GoldBot stopped. Goodbye!");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Ctrl+C received");
}
