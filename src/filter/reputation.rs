//! Reputation veto for internal-transfer groups
//!
//! A group is suppressed when one of its recipients has already received
//! transfers from the contract before. A single prior transfer does not count
//! (the contract's own bootstrap transfer would otherwise veto every wallet).
//! Lookups fail open: an unreachable history source never blocks an alert.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use super::throttle::CallThrottle;
use crate::config::ReputationConfig;
use crate::source::{TransferHistory, TransferQuery};

pub struct ReputationFilter {
    history: Arc<dyn TransferHistory>,
    throttle: CallThrottle,
    rng: Mutex<StdRng>,
    max_candidates: usize,
    min_prior_transfers: usize,
    query: TransferQuery,
}

impl ReputationFilter {
    pub fn new(history: Arc<dyn TransferHistory>, config: &ReputationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            history,
            throttle: CallThrottle::new(
                config.bucket_size,
                Duration::from_millis(config.refill_period_ms),
            ),
            rng: Mutex::new(rng),
            max_candidates: config.max_candidates,
            min_prior_transfers: config.min_prior_transfers,
            query: TransferQuery::default(),
        }
    }

    /// Uniformly sample up to `max_candidates` distinct recipients
    pub fn sample_candidates(&self, recipients: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let distinct: Vec<&String> = recipients
            .iter()
            .filter(|r| !r.is_empty() && seen.insert(r.as_str()))
            .collect();

        let amount = self.max_candidates.min(distinct.len());
        if amount == 0 {
            return Vec::new();
        }

        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        index::sample(&mut *rng, distinct.len(), amount)
            .into_iter()
            .map(|i| distinct[i].clone())
            .collect()
    }

    /// True when any candidate already holds enough transfers from `counterparty`
    pub async fn has_prior_relationship(&self, candidates: &[String], counterparty: &str) -> bool {
        for candidate in candidates {
            self.throttle.acquire().await;

            match self
                .history
                .transfers_between(counterparty, candidate, &self.query)
                .await
            {
                Ok(transfers) if transfers.len() >= self.min_prior_transfers => {
                    debug!(
                        candidate = %candidate,
                        counterparty = %counterparty,
                        transfers = transfers.len(),
                        "Prior relationship found"
                    );
                    return true;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        candidate = %candidate,
                        counterparty = %counterparty,
                        "Transfer history lookup failed, treating as unrelated: {}",
                        e
                    );
                    return false;
                }
            }
        }

        false
    }

    pub fn throttle(&self) -> &CallThrottle {
        &self.throttle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::source::Transfer;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// History keyed by recipient; recipients listed in `failing` error out
    struct MockHistory {
        counts: HashMap<String, usize>,
        failing: HashSet<String>,
        calls: AtomicUsize,
    }

    impl MockHistory {
        fn new(counts: &[(&str, usize)]) -> Self {
            Self {
                counts: counts.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                failing: HashSet::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(mut self, recipient: &str) -> Self {
            self.failing.insert(recipient.to_string());
            self
        }
    }

    #[async_trait]
    impl TransferHistory for MockHistory {
        async fn transfers_between(
            &self,
            from: &str,
            to: &str,
            _query: &TransferQuery,
        ) -> Result<Vec<Transfer>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(to) {
                return Err(Error::SourceUnavailable("connection reset".into()));
            }
            let count = self.counts.get(to).copied().unwrap_or(0);
            Ok((0..count)
                .map(|i| Transfer {
                    hash: format!("0x{}", i),
                    from: from.to_string(),
                    to: to.to_string(),
                    value: Some(0.05),
                })
                .collect())
        }
    }

    fn filter_with(history: Arc<MockHistory>) -> ReputationFilter {
        let config = ReputationConfig {
            seed: Some(42),
            ..ReputationConfig::default()
        };
        ReputationFilter::new(history, &config)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_related_candidate_vetoes() {
        let history = Arc::new(MockHistory::new(&[("0xa", 0), ("0xb", 3)]));
        let filter = filter_with(history.clone());
        assert!(filter.has_prior_relationship(&strings(&["0xa", "0xb"]), "0xc0").await);
        assert_eq!(history.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_transfer_is_not_established() {
        let history = Arc::new(MockHistory::new(&[("0xa", 1), ("0xb", 1)]));
        let filter = filter_with(history);
        assert!(!filter.has_prior_relationship(&strings(&["0xa", "0xb"]), "0xc0").await);
    }

    #[tokio::test]
    async fn test_stops_at_first_match() {
        let history = Arc::new(MockHistory::new(&[("0xa", 5), ("0xb", 5)]));
        let filter = filter_with(history.clone());
        assert!(filter.has_prior_relationship(&strings(&["0xa", "0xb"]), "0xc0").await);
        assert_eq!(history.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lookup_error_fails_open() {
        let history = Arc::new(MockHistory::new(&[("0xb", 5)]).failing("0xa"));
        let filter = filter_with(history);
        assert!(!filter.has_prior_relationship(&strings(&["0xa", "0xb"]), "0xc0").await);
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let history = Arc::new(MockHistory::new(&[]));
        let filter = filter_with(history.clone());
        assert!(!filter.has_prior_relationship(&[], "0xc0").await);
        assert_eq!(history.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sample_candidates_distinct_and_bounded() {
        let filter = filter_with(Arc::new(MockHistory::new(&[])));
        let recipients = strings(&["0xa", "0xb", "0xa", "0xc", "0xb", ""]);
        for _ in 0..20 {
            let sample = filter.sample_candidates(&recipients);
            assert_eq!(sample.len(), 2);
            assert_ne!(sample[0], sample[1]);
            assert!(sample.iter().all(|s| ["0xa", "0xb", "0xc"].contains(&s.as_str())));
        }
        assert_eq!(filter.sample_candidates(&strings(&["0xa", "0xa"])), strings(&["0xa"]));
        assert!(filter.sample_candidates(&[]).is_empty());
    }

    #[test]
    fn test_sample_is_deterministic_with_seed() {
        let recipients = strings(&["0x1", "0x2", "0x3", "0x4", "0x5", "0x6"]);
        let a = filter_with(Arc::new(MockHistory::new(&[])));
        let b = filter_with(Arc::new(MockHistory::new(&[])));
        for _ in 0..5 {
            assert_eq!(a.sample_candidates(&recipients), b.sample_candidates(&recipients));
        }
    }
}
