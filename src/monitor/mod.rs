//! Scan scheduler
//!
//! One cycle, per watched address (addresses run concurrently):
//! fetch since checkpoint -> cap -> group -> noise filter (internal only) ->
//! classify -> reputation veto (internal only) -> render -> dispatch.
//!
//! The checkpoint is only written once the address's work is done. A failed
//! scan leaves it untouched so the same range is fetched again next cycle.

pub mod grouping;
pub mod render;
pub mod state;

use dashmap::DashMap;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{Config, MonitorConfig, WatchKind, WatchedAddress};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::filter::ReputationFilter;
use crate::pattern::classify;
use crate::source::TransactionSource;

pub use grouping::{group_transactions, TransactionGroup};
pub use render::Alert;
pub use state::{AddressState, Checkpoint};

/// Outcome of scanning one address
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressReport {
    /// Ready-to-send alert messages (notice first when truncated)
    pub alerts: Vec<String>,
    /// Minimum-value recipient messages
    pub side_messages: Vec<String>,
    pub next_checkpoint: u64,
    pub transactions: usize,
    pub groups: usize,
    pub vetoed: usize,
}

/// Totals for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub scanned: usize,
    pub failed: usize,
    pub alerts: usize,
    pub side_messages: usize,
}

/// Resets the running flag even if the cycle panics
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Monitor {
    config: MonitorConfig,
    max_message_chars: usize,
    watched: Vec<WatchedAddress>,
    source: Arc<dyn TransactionSource>,
    reputation: Option<ReputationFilter>,
    alerts: Dispatcher,
    side_channel: Option<Dispatcher>,
    state: DashMap<String, AddressState>,
    cycle_running: AtomicBool,
    cycles: AtomicU64,
}

impl Monitor {
    pub fn new(config: &Config, source: Arc<dyn TransactionSource>, alerts: Dispatcher) -> Self {
        Self {
            config: config.monitor.clone(),
            max_message_chars: config.dispatch.max_message_chars,
            watched: config.watched.clone(),
            source,
            reputation: None,
            alerts,
            side_channel: None,
            state: DashMap::new(),
            cycle_running: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
        }
    }

    /// Enable the reputation veto for internal-transfer addresses
    pub fn with_reputation(mut self, filter: ReputationFilter) -> Self {
        self.reputation = Some(filter);
        self
    }

    /// Send minimum-value recipient messages to a second destination
    pub fn with_side_channel(mut self, dispatcher: Dispatcher) -> Self {
        self.side_channel = Some(dispatcher);
        self
    }

    pub fn alerts(&self) -> &Dispatcher {
        &self.alerts
    }

    pub fn side_channel(&self) -> Option<&Dispatcher> {
        self.side_channel.as_ref()
    }

    pub fn watched(&self) -> &[WatchedAddress] {
        &self.watched
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn checkpoint(&self, address: &str) -> Option<u64> {
        self.state
            .get(&state_key(address))
            .map(|s| s.checkpoint.last_block_checked)
    }

    /// Copy of every address's state, in watch-list order
    pub fn snapshot(&self) -> Vec<(WatchedAddress, Option<AddressState>)> {
        self.watched
            .iter()
            .map(|w| (w.clone(), self.state.get(&state_key(&w.address)).map(|s| s.clone())))
            .collect()
    }

    /// Run cycles: once immediately, then every `poll_interval_secs` until shutdown.
    ///
    /// Ticks that fire while a cycle is still running are skipped. On shutdown
    /// the cycle in flight is awaited, so its messages are enqueued before this
    /// returns.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.config.poll_interval_secs);
        info!(
            addresses = self.watched.len(),
            interval_secs = period.as_secs(),
            "Starting scan scheduler"
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    while in_flight.try_join_next().is_some() {}
                    let this = Arc::clone(&self);
                    in_flight.spawn(async move {
                        this.run_cycle_if_idle().await;
                    });
                }
                _ = shutdown.recv() => {
                    info!(in_flight = in_flight.len(), "Scan scheduler shutting down");
                    break;
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Scan cycle task failed: {}", e);
            }
        }
    }

    /// Run a cycle unless one is already in flight
    pub async fn run_cycle_if_idle(&self) -> Option<CycleSummary> {
        if self.cycle_running.swap(true, Ordering::SeqCst) {
            warn!("Previous scan cycle still running, skipping this tick");
            return None;
        }
        let _guard = CycleGuard(&self.cycle_running);
        Some(self.run_cycle().await)
    }

    /// One poll cycle over every watched address
    pub async fn run_cycle(&self) -> CycleSummary {
        let head = self.source.latest_block().await;
        if head.is_none() {
            warn!("Chain head unavailable; idle addresses will not advance this cycle");
        }

        let outcomes = join_all(self.watched.iter().map(|w| self.process_address(w, head))).await;

        let mut summary = CycleSummary::default();
        for outcome in outcomes {
            match outcome {
                Some((alerts, side)) => {
                    summary.scanned += 1;
                    summary.alerts += alerts;
                    summary.side_messages += side;
                }
                None => summary.failed += 1,
            }
        }

        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            cycle,
            scanned = summary.scanned,
            failed = summary.failed,
            alerts = summary.alerts,
            side_messages = summary.side_messages,
            "Scan cycle complete"
        );
        summary
    }

    /// Scan, commit state and dispatch for one address. Never fails the cycle.
    async fn process_address(&self, watched: &WatchedAddress, head: Option<u64>) -> Option<(usize, usize)> {
        let key = state_key(&watched.address);

        let from_block = match self.starting_block(&key, head) {
            Some(block) => block,
            None => {
                warn!(address = %watched.address, name = %watched.name, "No checkpoint and chain head unknown, skipping");
                return None;
            }
        };

        match self.scan_address(watched, from_block, head).await {
            Ok(report) => {
                if let Some(mut state) = self.state.get_mut(&key) {
                    if state.checkpoint.advance(report.next_checkpoint) {
                        debug!(
                            address = %watched.address,
                            checkpoint = report.next_checkpoint,
                            "Checkpoint advanced"
                        );
                    }
                    state.transactions_seen += report.transactions as u64;
                    state.groups_seen += report.groups as u64;
                    state.alerts_sent += report.alerts.len() as u64;
                    state.vetoed += report.vetoed as u64;
                    state.last_scan = Some(chrono::Utc::now());
                    state.last_error = None;
                }

                let alert_count = self.alerts.enqueue(report.alerts);
                let side_count = match &self.side_channel {
                    Some(side) => side.enqueue(report.side_messages),
                    None => 0,
                };
                Some((alert_count, side_count))
            }
            Err(e) => {
                error!(
                    address = %watched.address,
                    name = %watched.name,
                    from_block,
                    "Scan failed, checkpoint held: {}",
                    e
                );
                if let Some(mut state) = self.state.get_mut(&key) {
                    state.failed_cycles += 1;
                    state.last_error = Some(e.to_string());
                }
                None
            }
        }
    }

    /// Current checkpoint, creating it from the lookback window on first sight
    fn starting_block(&self, key: &str, head: Option<u64>) -> Option<u64> {
        if let Some(state) = self.state.get(key) {
            return Some(state.checkpoint.last_block_checked);
        }
        let start = head?.saturating_sub(self.config.initial_lookback_blocks);
        let state = self
            .state
            .entry(key.to_string())
            .or_insert_with(|| AddressState::new(start));
        Some(state.checkpoint.last_block_checked)
    }

    /// Fetch, group, classify, filter and render. Does not touch shared state.
    pub async fn scan_address(
        &self,
        watched: &WatchedAddress,
        from_block: u64,
        head: Option<u64>,
    ) -> Result<AddressReport> {
        let fetched = match watched.kind {
            WatchKind::External => self.source.list_transactions(&watched.address, from_block).await?,
            WatchKind::Internal => {
                self.source
                    .list_internal_transfers(&watched.address, from_block)
                    .await?
            }
        };

        let highest = fetched.iter().map(|tx| tx.block_number).max();
        let next_checkpoint = match highest {
            Some(block) => block + 1,
            None => head.unwrap_or(from_block),
        };

        let fetched_count = fetched.len();
        let txs = grouping::cap_newest(fetched, self.config.max_transactions);
        if txs.len() < fetched_count {
            debug!(
                address = %watched.address,
                fetched = fetched_count,
                kept = txs.len(),
                "Transaction list capped"
            );
        }

        let groups = group_transactions(&txs, self.config.group_by, self.config.block_range_width);
        let min_value_wei = grouping::eth_to_wei(self.config.min_value_eth);

        let mut alerts: Vec<Alert> = Vec::new();
        let mut side_messages = Vec::new();
        let mut vetoed = 0;

        for group in &groups {
            if watched.kind == WatchKind::Internal
                && !group.is_eligible(self.config.min_group_size, min_value_wei)
            {
                debug!(address = %watched.address, key = group.key, size = group.len(), "Group below noise threshold");
                continue;
            }

            let classification = classify(&group.values_eth());

            if watched.kind == WatchKind::Internal {
                if let Some(reputation) = &self.reputation {
                    let candidates = reputation.sample_candidates(&group.counterparties(watched.kind));
                    if reputation
                        .has_prior_relationship(&candidates, &watched.address)
                        .await
                    {
                        info!(
                            address = %watched.address,
                            key = group.key,
                            pattern = %classification.kind,
                            "Group vetoed: recipients already related"
                        );
                        vetoed += 1;
                        continue;
                    }
                }
            }

            alerts.push(render::render_group(
                watched,
                group,
                &classification,
                &self.config.explorer_url,
            ));
            if let Some(message) = render::render_min_recipient(watched, group) {
                side_messages.push(message);
            }
        }

        let found = alerts.len();
        let limit = self.config.max_alerts_per_address;
        let mut messages = Vec::new();
        if found > limit {
            messages.push(render::truncation_notice(watched, found, limit));
            alerts.drain(..found - limit);
            let side_excess = side_messages.len().saturating_sub(limit);
            side_messages.drain(..side_excess);
        }
        for alert in &alerts {
            messages.extend(alert.to_messages(self.max_message_chars));
        }

        Ok(AddressReport {
            alerts: messages,
            side_messages,
            next_checkpoint,
            transactions: txs.len(),
            groups: groups.len(),
            vetoed,
        })
    }
}

/// Map key for an address (case-insensitive)
fn state_key(address: &str) -> String {
    address.to_lowercase()
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("watched", &self.watched.len())
            .field("reputation", &self.reputation.is_some())
            .field("side_channel", &self.side_channel.is_some())
            .field("cycles", &self.cycles_completed())
            .finish()
    }
}
