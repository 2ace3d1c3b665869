//! Grouping of fetched transactions into alertable bursts

use std::collections::BTreeMap;

use crate::config::{GroupBy, WatchKind};
use crate::source::{Transaction, WEI_PER_ETH};

/// Transactions sharing a block or block-range key
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionGroup {
    /// Block number (exact grouping) or first block of the range
    pub key: u64,
    pub transactions: Vec<Transaction>,
}

impl TransactionGroup {
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn first_block(&self) -> u64 {
        self.transactions
            .iter()
            .map(|tx| tx.block_number)
            .min()
            .unwrap_or(self.key)
    }

    pub fn last_block(&self) -> u64 {
        self.transactions
            .iter()
            .map(|tx| tx.block_number)
            .max()
            .unwrap_or(self.key)
    }

    pub fn values_eth(&self) -> Vec<f64> {
        self.transactions.iter().map(Transaction::value_eth).collect()
    }

    /// Sum computed in wei, converted once
    pub fn total_eth(&self) -> f64 {
        let total: u128 = self.transactions.iter().map(|tx| tx.value).sum();
        total as f64 / WEI_PER_ETH
    }

    /// Wallets on the far side of each transaction, in order
    pub fn counterparties(&self, kind: WatchKind) -> Vec<String> {
        self.transactions
            .iter()
            .map(|tx| counterparty(tx, kind).to_string())
            .collect()
    }

    /// Smallest-value transaction (earliest on ties)
    pub fn min_value_transaction(&self) -> Option<&Transaction> {
        self.transactions.iter().min_by_key(|tx| tx.value)
    }

    pub fn latest_timestamp(&self) -> Option<i64> {
        self.transactions.iter().map(|tx| tx.timestamp).max()
    }

    /// Noise filter for internal transfers: enough members, each carrying enough value
    pub fn is_eligible(&self, min_group_size: usize, min_value_wei: u128) -> bool {
        !self.is_empty()
            && self.len() >= min_group_size
            && self.transactions.iter().all(|tx| tx.value >= min_value_wei)
    }
}

/// The wallet a watched contract paid (internal) or was paid by (external)
pub fn counterparty(tx: &Transaction, kind: WatchKind) -> &str {
    match kind {
        WatchKind::Internal => &tx.to,
        WatchKind::External => &tx.from,
    }
}

/// Sort ascending, drop failed transactions, keep only the newest `max` entries
pub fn cap_newest(mut txs: Vec<Transaction>, max: usize) -> Vec<Transaction> {
    txs.retain(|tx| !tx.is_error);
    txs.sort_by_key(|tx| tx.block_number);
    if txs.len() > max {
        txs.drain(..txs.len() - max);
    }
    txs
}

/// Group ascending transactions by exact block or fixed-width range
pub fn group_transactions(txs: &[Transaction], group_by: GroupBy, width: u64) -> Vec<TransactionGroup> {
    let mut groups: BTreeMap<u64, Vec<Transaction>> = BTreeMap::new();
    for tx in txs {
        let key = match group_by {
            GroupBy::Block => tx.block_number,
            GroupBy::Range => {
                let width = width.max(1);
                tx.block_number / width * width
            }
        };
        groups.entry(key).or_default().push(tx.clone());
    }

    groups
        .into_iter()
        .map(|(key, transactions)| TransactionGroup { key, transactions })
        .collect()
}

/// Convert an ether threshold to wei for exact comparisons
pub fn eth_to_wei(eth: f64) -> u128 {
    (eth * WEI_PER_ETH).round().max(0.0) as u128
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(block: u64, value_finney: u128, to: &str) -> Transaction {
        Transaction {
            block_number: block,
            timestamp: 1_700_000_000 + block as i64,
            hash: format!("0x{:x}", block),
            from: "0xcontract".into(),
            to: to.into(),
            value: value_finney * 1_000_000_000_000_000,
            is_error: false,
        }
    }

    #[test]
    fn test_group_by_range() {
        let txs = vec![tx(100, 10, "a"), tx(149, 20, "b"), tx(150, 30, "c"), tx(260, 40, "d")];
        let groups = group_transactions(&txs, GroupBy::Range, 50);
        let keys: Vec<u64> = groups.iter().map(|g| g.key).collect();
        assert_eq!(keys, vec![100, 150, 250]);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0].first_block(), 100);
        assert_eq!(groups[0].last_block(), 149);
    }

    #[test]
    fn test_group_by_block() {
        let txs = vec![tx(100, 10, "a"), tx(100, 20, "b"), tx(101, 30, "c")];
        let groups = group_transactions(&txs, GroupBy::Block, 50);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, 100);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn test_cap_newest_keeps_latest() {
        let mut failed = tx(105, 10, "x");
        failed.is_error = true;
        let txs = vec![tx(103, 10, "c"), tx(101, 10, "a"), failed, tx(102, 10, "b"), tx(104, 10, "d")];
        let kept = cap_newest(txs, 2);
        let blocks: Vec<u64> = kept.iter().map(|t| t.block_number).collect();
        assert_eq!(blocks, vec![103, 104]);
    }

    #[test]
    fn test_eligibility() {
        let group = TransactionGroup {
            key: 100,
            transactions: vec![tx(100, 50, "a"), tx(101, 50, "b"), tx(102, 5, "c")],
        };
        assert!(!group.is_eligible(3, eth_to_wei(0.01)));
        assert!(group.is_eligible(3, eth_to_wei(0.005)));
        assert!(!group.is_eligible(4, eth_to_wei(0.001)));

        let empty = TransactionGroup { key: 100, transactions: vec![] };
        assert!(!empty.is_eligible(0, 0));
    }

    #[test]
    fn test_min_value_and_totals() {
        let group = TransactionGroup {
            key: 100,
            transactions: vec![tx(100, 50, "a"), tx(101, 20, "b"), tx(102, 20, "c")],
        };
        assert_eq!(group.min_value_transaction().unwrap().to, "b");
        assert!((group.total_eth() - 0.09).abs() < 1e-12);
        assert_eq!(group.counterparties(WatchKind::Internal), vec!["a", "b", "c"]);
        assert_eq!(group.counterparties(WatchKind::External), vec!["0xcontract"; 3]);
    }

    #[test]
    fn test_eth_to_wei() {
        assert_eq!(eth_to_wei(0.01), 10_000_000_000_000_000);
        assert_eq!(eth_to_wei(0.0), 0);
    }
}
