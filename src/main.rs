//! Payout Watch - contract payout monitor with Telegram alerts

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use payout_watch::cli::commands;
use payout_watch::config::Config;

/// Payout Watch - contract payout monitor
#[derive(Parser)]
#[command(name = "payout-watch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml", env = "WATCH_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start polling and alerting until Ctrl+C
    Start,

    /// Run one scan cycle, deliver its alerts and exit
    ScanOnce,

    /// Show current configuration (secrets masked)
    Config,

    /// Check system health (explorer API, transfer history, Telegram)
    Health,

    /// Classify a list of ETH values without touching the network
    Classify {
        /// Values in ETH, e.g. 0.01 0.02 0.04
        #[arg(required = true, num_args = 1..)]
        values: Vec<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    let directive = "payout_watch=info"
        .parse::<tracing_subscriber::filter::Directive>()
        .map_err(|e| anyhow::anyhow!("Invalid log directive: {}", e))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    // Classification needs no configuration
    if let Commands::Classify { values } = &cli.command {
        return commands::classify_values(values);
    }

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Start => commands::start(&config).await,
        Commands::ScanOnce => commands::scan_once(&config).await,
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
        Commands::Classify { .. } => Ok(()),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
