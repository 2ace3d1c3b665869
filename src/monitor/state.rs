//! Per-address scan state

use chrono::{DateTime, Utc};

/// Next block to fetch from for a watched address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Checkpoint {
    pub last_block_checked: u64,
}

impl Checkpoint {
    pub fn new(last_block_checked: u64) -> Self {
        Self { last_block_checked }
    }

    /// Move forward to `block`; never moves backwards
    pub fn advance(&mut self, block: u64) -> bool {
        if block > self.last_block_checked {
            self.last_block_checked = block;
            true
        } else {
            false
        }
    }
}

/// Checkpoint plus running totals for one watched address
#[derive(Debug, Clone, PartialEq)]
pub struct AddressState {
    pub checkpoint: Checkpoint,
    pub transactions_seen: u64,
    pub groups_seen: u64,
    pub alerts_sent: u64,
    pub vetoed: u64,
    pub failed_cycles: u64,
    pub last_scan: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl AddressState {
    pub fn new(start_block: u64) -> Self {
        Self {
            checkpoint: Checkpoint::new(start_block),
            transactions_seen: 0,
            groups_seen: 0,
            alerts_sent: 0,
            vetoed: 0,
            failed_cycles: 0,
            last_scan: None,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_never_regresses() {
        let mut cp = Checkpoint::new(100);
        assert!(cp.advance(150));
        assert!(!cp.advance(120));
        assert!(!cp.advance(150));
        assert_eq!(cp.last_block_checked, 150);
    }
}
