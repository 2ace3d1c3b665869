//! CLI command implementations

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dispatch::{DispatchStats, Dispatcher, TelegramSink};
use crate::filter::ReputationFilter;
use crate::monitor::Monitor;
use crate::pattern::classify;
use crate::source::{AlchemyClient, EtherscanClient, TransactionSource, TransferHistory, TransferQuery};

/// How long shutdown waits for queued messages to go out
const FLUSH_TIMEOUT: Duration = Duration::from_secs(60);

/// Wire the source, filters and dispatchers from configuration
fn build_monitor(config: &Config) -> Result<Monitor> {
    let source: Arc<dyn TransactionSource> = Arc::new(EtherscanClient::new(&config.source)?);
    let sink = Arc::new(TelegramSink::new(&config.telegram)?);

    let alerts = Dispatcher::new(
        config.telegram.alert_chat_id.clone(),
        sink.clone(),
        &config.dispatch,
    );
    let mut monitor = Monitor::new(config, source, alerts);

    if config.telegram.side_chat_id.is_empty() {
        info!("No side channel configured, minimum-recipient messages disabled");
    } else {
        monitor = monitor.with_side_channel(Dispatcher::new(
            config.telegram.side_chat_id.clone(),
            sink,
            &config.dispatch,
        ));
    }

    if config.reputation.enabled {
        let history = Arc::new(AlchemyClient::new(&config.reputation)?);
        monitor = monitor.with_reputation(ReputationFilter::new(history, &config.reputation));
        info!(
            max_candidates = config.reputation.max_candidates,
            bucket_size = config.reputation.bucket_size,
            "Reputation filter enabled"
        );
    } else {
        warn!("Reputation filter disabled - every eligible internal group will alert");
    }

    Ok(monitor)
}

/// Wait for both dispatchers to go idle, bounded by `FLUSH_TIMEOUT`
async fn flush(monitor: &Monitor) {
    let drained = tokio::time::timeout(FLUSH_TIMEOUT, async {
        monitor.alerts().wait_idle().await;
        if let Some(side) = monitor.side_channel() {
            side.wait_idle().await;
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            pending = monitor.alerts().pending().len(),
            "Timed out waiting for queued messages"
        );
    }
}

fn print_stats(label: &str, stats: DispatchStats) {
    println!(
        "  {:<12} delivered={} dropped={} rate_limited={} drain_panics={}",
        label, stats.delivered, stats.dropped, stats.rate_limited, stats.drain_panics
    );
}

fn print_snapshot(monitor: &Monitor) {
    println!("\n=== WATCHED ADDRESSES ===\n");
    for (watched, state) in monitor.snapshot() {
        match state {
            Some(state) => {
                println!(
                    "{} ({}) [{:?}] checkpoint={} txs={} groups={} alerts={} vetoed={} failed={}",
                    watched.name,
                    watched.address,
                    watched.kind,
                    state.checkpoint.last_block_checked,
                    state.transactions_seen,
                    state.groups_seen,
                    state.alerts_sent,
                    state.vetoed,
                    state.failed_cycles,
                );
                if let Some(err) = state.last_error {
                    println!("    last error: {}", err);
                }
            }
            None => println!("{} ({}) not scanned yet", watched.name, watched.address),
        }
    }

    println!("\n=== DISPATCH ===\n");
    print_stats("alerts", monitor.alerts().stats());
    if let Some(side) = monitor.side_channel() {
        print_stats("side", side.stats());
    }
}

/// Start the monitor and run until Ctrl+C
pub async fn start(config: &Config) -> Result<()> {
    info!("Starting payout monitor...");
    for watched in &config.watched {
        info!(
            name = %watched.name,
            address = %watched.address,
            kind = ?watched.kind,
            "Watching"
        );
    }

    let monitor = Arc::new(build_monitor(config)?);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = tokio::spawn(Arc::clone(&monitor).run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    let _ = shutdown_tx.send(());
    // Returns once the cycle in flight has enqueued its messages
    if let Err(e) = scheduler.await {
        error!("Scheduler task failed: {}", e);
    }

    flush(&monitor).await;
    print_snapshot(&monitor);
    Ok(())
}

/// Run a single cycle, deliver its messages, print the result
pub async fn scan_once(config: &Config) -> Result<()> {
    let monitor = build_monitor(config)?;
    let summary = monitor.run_cycle().await;
    flush(&monitor).await;

    println!("\n=== SCAN RESULT ===\n");
    println!("Addresses scanned: {}", summary.scanned);
    println!("Addresses failed:  {}", summary.failed);
    println!("Alert messages:    {}", summary.alerts);
    println!("Side messages:     {}", summary.side_messages);
    print_snapshot(&monitor);
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check source, reputation lookup and Telegram
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== SYSTEM HEALTH CHECK ===\n");

    let mut all_healthy = true;

    print!("Transaction source... ");
    match check_source(config).await {
        Ok((block, latency)) => println!("OK (head {} in {}ms)", block, latency),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    if config.reputation.enabled {
        print!("Transfer history... ");
        match check_history(config).await {
            Ok(latency) => println!("OK ({}ms)", latency),
            Err(e) => {
                println!("FAILED: {}", e);
                all_healthy = false;
            }
        }
    } else {
        println!("Transfer history... DISABLED");
    }

    print!("Telegram bot... ");
    if config.telegram.bot_token.is_empty() {
        println!("FAILED: no bot token configured");
        all_healthy = false;
    } else {
        match TelegramSink::new(&config.telegram)?.get_me().await {
            Ok(username) => println!("OK (@{})", username),
            Err(e) => {
                println!("FAILED: {}", e);
                all_healthy = false;
            }
        }
    }

    println!();
    if all_healthy {
        println!("All systems healthy!");
    } else {
        println!("Some systems are unhealthy. Check the errors above.");
    }

    Ok(())
}

async fn check_source(config: &Config) -> Result<(u64, u64)> {
    let client = EtherscanClient::new(&config.source)?;
    let start = Instant::now();
    let block = client
        .latest_block()
        .await
        .ok_or_else(|| anyhow::anyhow!("chain head unavailable"))?;
    Ok((block, start.elapsed().as_millis() as u64))
}

async fn check_history(config: &Config) -> Result<u64> {
    let client = AlchemyClient::new(&config.reputation)?;
    let address = config
        .watched
        .first()
        .map(|w| w.address.as_str())
        .ok_or_else(|| anyhow::anyhow!("no watched addresses"))?;

    let start = Instant::now();
    client
        .transfers_between(address, address, &TransferQuery::default())
        .await?;
    Ok(start.elapsed().as_millis() as u64)
}

/// Classify a list of values from the command line
pub fn classify_values(values: &[f64]) -> Result<()> {
    let classification = classify(values);
    println!("Pattern:   {}", classification.kind);
    println!("Summary:   {}", classification.describe());
    println!("Tier:      {}", classification.range);
    println!("Precision: {} decimals", classification.precision);
    Ok(())
}
