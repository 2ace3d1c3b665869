//! Etherscan-compatible transaction source
//!
//! Provides access to:
//! - Normal transaction listings (`txlist`)
//! - Internal transfer listings (`txlistinternal`)
//! - The current chain head (`eth_blockNumber` proxy)

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Transaction, TransactionSource};
use crate::config::SourceConfig;
use crate::error::{Error, Result};

/// Etherscan answers this (with status "0") when an address has no activity
const NO_TRANSACTIONS: &str = "No transactions found";

/// Etherscan REST client
pub struct EtherscanClient {
    /// HTTP client
    client: Client,
    /// API key
    api_key: String,
    /// Base URL, e.g. `https://api.etherscan.io/api`
    base_url: String,
    /// Per-request timeout
    timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
    end_block: u64,
}

/// Envelope shared by the `account` module endpoints
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    message: String,
    result: serde_json::Value,
}

/// Envelope of the `proxy` module (plain JSON-RPC)
#[derive(Debug, Deserialize)]
struct ProxyResponse {
    result: Option<String>,
}

/// Raw transaction record as returned by the API (all fields are strings)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    block_number: String,
    time_stamp: String,
    hash: String,
    from: String,
    #[serde(default)]
    to: String,
    value: String,
    #[serde(default)]
    is_error: String,
}

impl RawTransaction {
    fn into_transaction(self) -> Result<Transaction> {
        let block_number = self
            .block_number
            .parse::<u64>()
            .map_err(|e| Error::MalformedResponse(format!("blockNumber {}: {}", self.block_number, e)))?;
        let timestamp = self.time_stamp.parse::<i64>().unwrap_or_default();
        let value = self
            .value
            .parse::<u128>()
            .map_err(|e| Error::MalformedResponse(format!("value {}: {}", self.value, e)))?;

        Ok(Transaction {
            block_number,
            timestamp,
            hash: self.hash,
            from: self.from.to_lowercase(),
            to: self.to.to_lowercase(),
            value,
            is_error: self.is_error == "1",
        })
    }
}

impl EtherscanClient {
    /// Create a new Etherscan client
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms * 2))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.api_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            end_block: config.end_block,
        })
    }

    /// Fetch an account listing with retry on transient errors
    async fn fetch_account_list(
        &self,
        action: &str,
        address: &str,
        from_block: u64,
    ) -> Result<Vec<Transaction>> {
        let backoff = ExponentialBackoff {
            initial_interval: self.retry_base_delay,
            max_interval: self.retry_base_delay * 4,
            max_elapsed_time: Some(self.retry_base_delay * (self.max_retries.max(1) * 4)),
            ..Default::default()
        };

        retry(backoff, || async {
            match self.fetch_account_list_once(action, address, from_block).await {
                Ok(txs) => Ok(txs),
                Err(e) if e.is_retryable() => {
                    warn!(address = %address, action, "Retryable source error: {}", e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }

    /// Query parameters for an ascending account listing from `from_block`
    fn account_query(&self, action: &str, address: &str, from_block: u64) -> Vec<(&'static str, String)> {
        vec![
            ("module", "account".to_string()),
            ("action", action.to_string()),
            ("address", address.to_string()),
            ("startblock", from_block.to_string()),
            ("endblock", self.end_block.to_string()),
            ("sort", "asc".to_string()),
            ("apikey", self.api_key.clone()),
        ]
    }

    /// Single request (no retry)
    async fn fetch_account_list_once(
        &self,
        action: &str,
        address: &str,
        from_block: u64,
    ) -> Result<Vec<Transaction>> {
        let query = self.account_query(action, address, from_block);

        debug!(address = %address, action, from_block, "Fetching transactions");

        let response = self
            .client
            .get(&self.base_url)
            .query(&query)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::SourceUnavailable(format!("Etherscan HTTP {}: {}", status, body)));
        }

        let body: ApiResponse = response.json().await?;
        parse_account_list(body)
    }
}

/// Interpret an account-module envelope
fn parse_account_list(body: ApiResponse) -> Result<Vec<Transaction>> {
    if body.status != "1" {
        if body.message.starts_with(NO_TRANSACTIONS) {
            return Ok(Vec::new());
        }
        let detail = body
            .result
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| body.result.to_string());
        if detail.to_lowercase().contains("rate limit") {
            return Err(Error::SourceRateLimited(detail));
        }
        return Err(Error::SourceUnavailable(format!("{}: {}", body.message, detail)));
    }

    let raw: Vec<RawTransaction> = serde_json::from_value(body.result)
        .map_err(|e| Error::MalformedResponse(format!("Failed to parse transaction list: {}", e)))?;

    let mut txs = raw
        .into_iter()
        .map(RawTransaction::into_transaction)
        .collect::<Result<Vec<_>>>()?;
    txs.sort_by_key(|tx| tx.block_number);
    Ok(txs)
}

fn parse_hex_block(hex: &str) -> Option<u64> {
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok()
}

#[async_trait]
impl TransactionSource for EtherscanClient {
    async fn list_transactions(&self, address: &str, from_block: u64) -> Result<Vec<Transaction>> {
        self.fetch_account_list("txlist", address, from_block).await
    }

    async fn list_internal_transfers(
        &self,
        address: &str,
        from_block: u64,
    ) -> Result<Vec<Transaction>> {
        self.fetch_account_list("txlistinternal", address, from_block)
            .await
    }

    async fn latest_block(&self) -> Option<u64> {
        let query = [
            ("module", "proxy"),
            ("action", "eth_blockNumber"),
            ("apikey", self.api_key.as_str()),
        ];

        let response = match self
            .client
            .get(&self.base_url)
            .query(&query)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("Failed to fetch latest block: {}", e);
                return None;
            }
        };

        match response.json::<ProxyResponse>().await {
            Ok(ProxyResponse { result: Some(hex) }) => {
                let block = parse_hex_block(&hex);
                if block.is_none() {
                    warn!("Unparseable block number: {}", hex);
                }
                block
            }
            Ok(_) => {
                warn!("Latest block response had no result");
                None
            }
            Err(e) => {
                warn!("Failed to parse latest block response: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: &str) -> ApiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_transaction_list_sorted() {
        let body = envelope(
            r#"{"status":"1","message":"OK","result":[
                {"blockNumber":"120","timeStamp":"1700000100","hash":"0xb","from":"0xAA","to":"0xBB","value":"20000000000000000","isError":"0"},
                {"blockNumber":"100","timeStamp":"1700000000","hash":"0xa","from":"0xAA","to":"0xCC","value":"10000000000000000","isError":"1"}
            ]}"#,
        );
        let txs = parse_account_list(body).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].block_number, 100);
        assert!(txs[0].is_error);
        assert_eq!(txs[1].from, "0xaa");
        assert_eq!(txs[1].value, 20_000_000_000_000_000);
    }

    #[test]
    fn test_parse_no_transactions() {
        let body = envelope(r#"{"status":"0","message":"No transactions found","result":[]}"#);
        assert!(parse_account_list(body).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rate_limited() {
        let body = envelope(r#"{"status":"0","message":"NOTOK","result":"Max rate limit reached"}"#);
        let err = parse_account_list(body).unwrap_err();
        assert!(matches!(err, Error::SourceRateLimited(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_malformed_value() {
        let body = envelope(
            r#"{"status":"1","message":"OK","result":[
                {"blockNumber":"1","timeStamp":"0","hash":"0xa","from":"0x1","to":"0x2","value":"abc"}
            ]}"#,
        );
        assert!(matches!(
            parse_account_list(body),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_account_query_uses_configured_end_block() {
        let config = SourceConfig {
            end_block: 400_000_000,
            ..crate::config::Config::default().source
        };
        let client = EtherscanClient::new(&config).unwrap();
        let query = client.account_query("txlistinternal", "0xabc", 123);

        let get = |key: &str| {
            query
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("endblock"), Some("400000000"));
        assert_eq!(get("startblock"), Some("123"));
        assert_eq!(get("action"), Some("txlistinternal"));
        assert_eq!(get("sort"), Some("asc"));
    }

    #[test]
    fn test_default_end_block_clears_large_chains() {
        assert!(crate::config::Config::default().source.end_block > 100_000_000);
    }

    #[test]
    fn test_parse_hex_block() {
        assert_eq!(parse_hex_block("0x10"), Some(16));
        assert_eq!(parse_hex_block("0x12a05f2"), Some(19_531_250));
        assert_eq!(parse_hex_block("zz"), None);
    }
}
