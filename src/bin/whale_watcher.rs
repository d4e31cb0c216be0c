//! whale-watcher — Poll watched Polymarket addresses and send Telegram alerts
//! for trades that pass the configured filters.
//!
//! The watch list and filters can be changed at runtime with bot commands
//! from the configured chat. Stop with Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use polymarket_whale_watcher::api::DataApiClient;
use polymarket_whale_watcher::config::{AppConfig, CONFIG_PATH};
use polymarket_whale_watcher::notifier::TelegramNotifier;
use polymarket_whale_watcher::settings::SettingsStore;
use polymarket_whale_watcher::store::TradeStore;
use polymarket_whale_watcher::telegram::{CommandListener, TelegramClient};
use polymarket_whale_watcher::watcher::{Watcher, WatcherOptions};

/// How long running tasks get to wind down after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "whale-watcher", about = "Polymarket whale trade alerts over Telegram")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Print a JSON report line to stdout after every poll cycle
    #[arg(long)]
    report: bool,

    /// Run a single poll cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; it may also carry RUST_LOG.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = AppConfig::load_with_env(&args.config)?;
    config.validate()?;
    info!("Loaded config from {}", args.config.display());

    let settings = Arc::new(SettingsStore::load(
        &config.settings.state_file,
        config.bootstrap_settings(),
    ));
    let retention_secs = config.settings.retention_secs();
    let trades = Arc::new(TradeStore::load(
        &config.settings.trades_file,
        Some(retention_secs),
    ));

    let snapshot = settings.snapshot();
    info!(
        "Starting whale watcher — whales={} min_value=${:.2} poll={}s seen={}",
        snapshot.watched_addresses.len(),
        snapshot.min_value,
        snapshot.poll_interval_secs,
        trades.len(),
    );
    if snapshot.watched_addresses.is_empty() {
        warn!("No whale addresses configured yet; add one with /addwhale");
    }

    let telegram = TelegramClient::new(
        &config.settings.telegram_api_base,
        config.telegram.bot_token.clone(),
    )?;
    match telegram.get_me().await {
        Ok(bot) => info!(
            "Connected to Telegram as @{}",
            bot.username.as_deref().unwrap_or(&bot.first_name)
        ),
        Err(e) => warn!("Could not verify bot token: {e}"),
    }

    let venue = DataApiClient::new(
        &config.settings.data_api_base,
        config.settings.trades_per_address,
    )?
    .with_timeout(Duration::from_secs(config.settings.request_timeout_secs));
    let notifier = TelegramNotifier::new(telegram.clone(), config.telegram.chat_id.clone());
    let options = WatcherOptions {
        stale_after: Some(Duration::from_secs(retention_secs.max(0) as u64)),
        report_cycles: args.report,
        ..WatcherOptions::default()
    };
    let watcher = Watcher::new(
        venue,
        notifier,
        Arc::clone(&settings),
        Arc::clone(&trades),
        options,
    );

    if args.once {
        let report = watcher.poll_once().await;
        info!(
            "Single cycle done — notified={} failures={}",
            report.notified,
            report.delivery_failures + report.fetch_failures
        );
        if let Err(e) = trades.persist() {
            error!("Failed to persist trade ledger: {e}");
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = CommandListener::new(
        telegram,
        config.telegram.chat_id.clone(),
        Arc::clone(&settings),
        Arc::clone(&trades),
    );
    let listener_task = tokio::spawn(listener.run(shutdown_rx.clone()));
    let watcher_task = tokio::spawn(async move { watcher.run(shutdown_rx).await });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for Ctrl-C, shutting down: {e}"),
    }
    let _ = shutdown_tx.send(true);

    let drain = async {
        for (name, task) in [("watcher", watcher_task), ("command listener", listener_task)] {
            if let Err(e) = task.await {
                error!("{name} task failed: {e}");
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(
            "Tasks still running after {}s, exiting anyway",
            SHUTDOWN_GRACE.as_secs()
        );
    }

    if let Err(e) = trades.persist() {
        error!("Failed to persist trade ledger: {e}");
    }
    info!("Whale watcher stopped");
    Ok(())
}
