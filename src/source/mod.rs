//! External data sources
//!
//! - `etherscan`: block-indexed transaction listings and the chain head
//! - `alchemy`: transfer history used by the reputation filter

pub mod alchemy;
pub mod etherscan;

use async_trait::async_trait;

use crate::error::Result;

pub use alchemy::AlchemyClient;
pub use etherscan::EtherscanClient;

/// Wei per ether
pub const WEI_PER_ETH: f64 = 1e18;

/// A transaction or internal transfer touching a watched contract
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub block_number: u64,
    /// Unix seconds
    pub timestamp: i64,
    pub hash: String,
    pub from: String,
    pub to: String,
    /// Value in wei
    pub value: u128,
    pub is_error: bool,
}

impl Transaction {
    /// Value in ether, for classification and display only
    pub fn value_eth(&self) -> f64 {
        self.value as f64 / WEI_PER_ETH
    }
}

/// Block-indexed transaction listing
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Normal transactions for `address` starting at `from_block`, ascending by block
    async fn list_transactions(&self, address: &str, from_block: u64) -> Result<Vec<Transaction>>;

    /// Internal transfers for `address` starting at `from_block`, ascending by block
    async fn list_internal_transfers(
        &self,
        address: &str,
        from_block: u64,
    ) -> Result<Vec<Transaction>>;

    /// Current chain head, `None` when the source cannot answer
    async fn latest_block(&self) -> Option<u64>;
}

/// Filters applied to a transfer-history lookup
#[derive(Debug, Clone, PartialEq)]
pub struct TransferQuery {
    pub exclude_zero_value: bool,
    pub category: TransferCategory,
}

impl Default for TransferQuery {
    fn default() -> Self {
        Self {
            exclude_zero_value: true,
            category: TransferCategory::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferCategory {
    External,
    Internal,
}

impl TransferCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferCategory::External => "external",
            TransferCategory::Internal => "internal",
        }
    }
}

/// A prior transfer between two addresses
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: Option<f64>,
}

/// Transfer history between address pairs
#[async_trait]
pub trait TransferHistory: Send + Sync {
    async fn transfers_between(
        &self,
        from: &str,
        to: &str,
        query: &TransferQuery,
    ) -> Result<Vec<Transfer>>;
}
