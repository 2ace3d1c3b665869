//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub reputation: ReputationConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub watched: Vec<WatchedAddress>,
}

/// Which transaction listing a watched contract is scanned with
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WatchKind {
    /// Normal (external) transactions sent to or from the contract
    External,
    /// Internal transfers emitted by the contract; subject to the noise filter and reputation veto
    Internal,
}

/// A contract address under watch. Immutable for the process lifetime.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WatchedAddress {
    pub name: String,
    pub address: String,
    #[serde(default = "default_watch_kind")]
    pub kind: WatchKind,
}

/// Etherscan-compatible transaction source
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Upper bound passed as `endblock`; must exceed the chain's height
    #[serde(default = "default_end_block")]
    pub end_block: u64,
}

/// Transfer-history lookup used to veto previously related wallets
#[derive(Debug, Clone, Deserialize)]
pub struct ReputationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Alchemy-style JSON-RPC endpoint (API key embedded in the URL)
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Lookups allowed before a forced pause
    #[serde(default = "default_bucket_size")]
    pub bucket_size: u32,
    /// Length of the forced pause
    #[serde(default = "default_refill_period_ms")]
    pub refill_period_ms: u64,
    /// Recipients sampled per group
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// A candidate with at least this many prior transfers counts as related
    #[serde(default = "default_min_prior_transfers")]
    pub min_prior_transfers: usize,
    /// Fixed RNG seed for candidate sampling (random when unset)
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Main alert channel
    #[serde(default)]
    pub alert_chat_id: String,
    /// Side channel for minimum-value recipients
    #[serde(default)]
    pub side_chat_id: String,
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Outbound delivery limits, shared by both destinations
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_sends_per_second")]
    pub max_sends_per_second: usize,
    /// Poll interval while the send window is full
    #[serde(default = "default_window_backoff_ms")]
    pub window_backoff_ms: u64,
    /// Sleep after the provider answers 429
    #[serde(default = "default_rate_limit_cooldown_ms")]
    pub rate_limit_cooldown_ms: u64,
    /// Attempts before a message is dropped
    #[serde(default = "default_dispatch_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// One group per block number
    Block,
    /// One group per fixed-width block range
    Range,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_group_by")]
    pub group_by: GroupBy,
    #[serde(default = "default_block_range_width")]
    pub block_range_width: u64,
    /// Newest transactions kept per address per cycle
    #[serde(default = "default_max_transactions")]
    pub max_transactions: usize,
    #[serde(default = "default_max_alerts_per_address")]
    pub max_alerts_per_address: usize,
    /// Blocks behind the chain head scanned on the first cycle after start
    #[serde(default = "default_initial_lookback_blocks")]
    pub initial_lookback_blocks: u64,
    /// Internal-transfer noise filter: minimum transactions per group
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
    /// Internal-transfer noise filter: minimum value of every transaction in a group
    #[serde(default = "default_min_value_eth")]
    pub min_value_eth: f64,
    /// Block explorer base used for links in alerts
    #[serde(default = "default_explorer_url")]
    pub explorer_url: String,
}

fn default_watch_kind() -> WatchKind {
    WatchKind::Internal
}

fn default_source_api_url() -> String {
    std::env::var("ETHERSCAN_API_URL").unwrap_or_else(|_| "https://api.etherscan.io/api".into())
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_end_block() -> u64 {
    999_999_999
}

fn default_bucket_size() -> u32 {
    10
}

fn default_refill_period_ms() -> u64 {
    1_000
}

fn default_max_candidates() -> usize {
    2
}

fn default_min_prior_transfers() -> usize {
    2
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".into()
}

fn default_max_sends_per_second() -> usize {
    10
}

fn default_window_backoff_ms() -> u64 {
    5_000
}

fn default_rate_limit_cooldown_ms() -> u64 {
    13_000
}

fn default_dispatch_max_retries() -> u32 {
    3
}

fn default_max_message_chars() -> usize {
    4096
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_group_by() -> GroupBy {
    GroupBy::Range
}

fn default_block_range_width() -> u64 {
    50
}

fn default_max_transactions() -> usize {
    500
}

fn default_max_alerts_per_address() -> usize {
    5
}

fn default_initial_lookback_blocks() -> u64 {
    300
}

fn default_min_group_size() -> usize {
    3
}

fn default_min_value_eth() -> f64 {
    0.01
}

fn default_explorer_url() -> String {
    "https://etherscan.io".into()
}

fn default_true() -> bool {
    true
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rpc_url: String::new(),
            timeout_ms: default_timeout_ms(),
            bucket_size: default_bucket_size(),
            refill_period_ms: default_refill_period_ms(),
            max_candidates: default_max_candidates(),
            min_prior_transfers: default_min_prior_transfers(),
            seed: None,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_sends_per_second: default_max_sends_per_second(),
            window_backoff_ms: default_window_backoff_ms(),
            rate_limit_cooldown_ms: default_rate_limit_cooldown_ms(),
            max_retries: default_dispatch_max_retries(),
            max_message_chars: default_max_message_chars(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            group_by: default_group_by(),
            block_range_width: default_block_range_width(),
            max_transactions: default_max_transactions(),
            max_alerts_per_address: default_max_alerts_per_address(),
            initial_lookback_blocks: default_initial_lookback_blocks(),
            min_group_size: default_min_group_size(),
            min_value_eth: default_min_value_eth(),
            explorer_url: default_explorer_url(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("source.api_url", default_source_api_url())?
            .set_default("source.timeout_ms", default_timeout_ms() as i64)?
            .set_default("source.max_retries", default_max_retries() as i64)?
            .set_default("telegram.api_url", default_telegram_api_url())?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix WATCH_)
            .add_source(
                config::Environment::with_prefix("WATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.watched.is_empty() {
            anyhow::bail!("At least one watched address must be configured");
        }

        let address_re = regex::Regex::new(r"^0x[0-9a-fA-F]{40}$")
            .context("Failed to compile address pattern")?;
        for watched in &self.watched {
            if !address_re.is_match(&watched.address) {
                anyhow::bail!("Invalid watched address for {}: {}", watched.name, watched.address);
            }
        }

        if self.monitor.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be positive");
        }

        if self.monitor.group_by == GroupBy::Range && self.monitor.block_range_width == 0 {
            anyhow::bail!("block_range_width must be positive");
        }

        if self.monitor.max_transactions == 0 {
            anyhow::bail!("max_transactions must be positive");
        }

        if self.monitor.min_value_eth < 0.0 {
            anyhow::bail!("min_value_eth cannot be negative");
        }

        if self.dispatch.max_sends_per_second == 0 {
            anyhow::bail!("max_sends_per_second must be positive");
        }

        if self.dispatch.max_retries == 0 {
            anyhow::bail!("dispatch max_retries must be at least 1");
        }

        // Leave room for the split header
        if self.dispatch.max_message_chars < 256 {
            anyhow::bail!("max_message_chars must be at least 256");
        }

        if self.reputation.enabled {
            if self.reputation.rpc_url.is_empty() {
                anyhow::bail!("reputation.rpc_url is required when the reputation filter is enabled");
            }
            if self.reputation.bucket_size == 0 {
                anyhow::bail!("reputation bucket_size must be positive");
            }
        }

        if self.telegram.bot_token.is_empty() {
            tracing::warn!("telegram.bot_token is not set - deliveries will fail");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let watched: Vec<String> = self
            .watched
            .iter()
            .map(|w| format!("    {} ({:?}): {}", w.name, w.kind, w.address))
            .collect();

        format!(
            r#"Configuration:
  Source:
    api_url: {}
    api_key: {}
    timeout: {}ms
  Reputation:
    enabled: {}
    rpc_url: {}
    bucket: {} calls / {}ms
  Telegram:
    bot_token: {}
    alert_chat: {}
    side_chat: {}
  Dispatch:
    max_sends: {}/s
    cooldown: {}ms
    max_retries: {}
  Monitor:
    poll_interval: {}s
    group_by: {:?} (width {})
    max_alerts_per_address: {}
  Watched:
{}
"#,
            mask_url(&self.source.api_url),
            mask_secret(&self.source.api_key),
            self.source.timeout_ms,
            self.reputation.enabled,
            mask_url(&self.reputation.rpc_url),
            self.reputation.bucket_size,
            self.reputation.refill_period_ms,
            mask_secret(&self.telegram.bot_token),
            self.telegram.alert_chat_id,
            self.telegram.side_chat_id,
            self.dispatch.max_sends_per_second,
            self.dispatch.rate_limit_cooldown_ms,
            self.dispatch.max_retries,
            self.monitor.poll_interval_secs,
            self.monitor.group_by,
            self.monitor.block_range_width,
            self.monitor.max_alerts_per_address,
            watched.join("\n"),
        )
    }
}

/// Mask URL for display (hide API keys in query params and path segments)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else if let Some(idx) = url.find("/v2/") {
        format!("{}/v2/***", &url[..idx])
    } else {
        url.to_string()
    }
}

fn mask_secret(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(not set)"
    } else {
        "***"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                api_url: default_source_api_url(),
                api_key: String::new(),
                timeout_ms: default_timeout_ms(),
                max_retries: default_max_retries(),
                retry_base_delay_ms: default_retry_base_delay_ms(),
                end_block: default_end_block(),
            },
            reputation: ReputationConfig::default(),
            telegram: TelegramConfig {
                bot_token: String::new(),
                alert_chat_id: String::new(),
                side_chat_id: String::new(),
                api_url: default_telegram_api_url(),
                timeout_ms: default_timeout_ms(),
            },
            dispatch: DispatchConfig::default(),
            monitor: MonitorConfig::default(),
            watched: vec![],
        }
    }
}
