//! Alchemy transfer-history client
//!
//! Wraps `alchemy_getAssetTransfers`, used only to count prior transfers
//! between a contract and a candidate wallet.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{Transfer, TransferHistory, TransferQuery};
use crate::config::ReputationConfig;
use crate::error::{Error, Result};

/// Upper bound on transfers returned per lookup; only the count matters
const MAX_COUNT_HEX: &str = "0x3e8";

pub struct AlchemyClient {
    client: Client,
    rpc_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<AssetTransfersResult>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct AssetTransfersResult {
    #[serde(default)]
    transfers: Vec<RawTransfer>,
}

#[derive(Debug, Deserialize)]
struct RawTransfer {
    hash: String,
    from: String,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    value: Option<f64>,
}

impl AlchemyClient {
    pub fn new(config: &ReputationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms * 2))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            rpc_url: config.rpc_url.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }
}

fn build_request(from: &str, to: &str, query: &TransferQuery) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "alchemy_getAssetTransfers",
        "params": [{
            "fromBlock": "0x0",
            "toBlock": "latest",
            "fromAddress": from,
            "toAddress": to,
            "category": [query.category.as_str()],
            "excludeZeroValue": query.exclude_zero_value,
            "maxCount": MAX_COUNT_HEX,
        }]
    })
}

fn parse_response(response: RpcResponse) -> Result<Vec<Transfer>> {
    if let Some(error) = response.error {
        return Err(Error::SourceUnavailable(format!(
            "Alchemy RPC error {}: {}",
            error.code, error.message
        )));
    }

    let result = response
        .result
        .ok_or_else(|| Error::MalformedResponse("No result in Alchemy response".to_string()))?;

    Ok(result
        .transfers
        .into_iter()
        .map(|t| Transfer {
            hash: t.hash,
            from: t.from,
            to: t.to.unwrap_or_default(),
            value: t.value,
        })
        .collect())
}

#[async_trait]
impl TransferHistory for AlchemyClient {
    async fn transfers_between(
        &self,
        from: &str,
        to: &str,
        query: &TransferQuery,
    ) -> Result<Vec<Transfer>> {
        debug!(from = %from, to = %to, "Looking up transfer history");

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&build_request(from, to, query))
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::SourceUnavailable(format!("Alchemy HTTP {}: {}", status, body)));
        }

        let rpc_response: RpcResponse = response.json().await?;
        parse_response(rpc_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TransferCategory;

    #[test]
    fn test_build_request() {
        let request = build_request("0xaa", "0xbb", &TransferQuery::default());
        let params = &request["params"][0];
        assert_eq!(request["method"], "alchemy_getAssetTransfers");
        assert_eq!(params["fromAddress"], "0xaa");
        assert_eq!(params["toAddress"], "0xbb");
        assert_eq!(params["category"][0], "internal");
        assert_eq!(params["excludeZeroValue"], true);

        let external = TransferQuery {
            exclude_zero_value: false,
            category: TransferCategory::External,
        };
        let request = build_request("0xaa", "0xbb", &external);
        assert_eq!(request["params"][0]["category"][0], "external");
    }

    #[test]
    fn test_parse_transfers() {
        let response: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"result":{"transfers":[
                {"hash":"0x1","from":"0xaa","to":"0xbb","value":0.05},
                {"hash":"0x2","from":"0xaa","to":"0xbb","value":null}
            ]}}"#,
        )
        .unwrap();
        let transfers = parse_response(response).unwrap();
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].value, Some(0.05));
        assert_eq!(transfers[1].value, None);
    }

    #[test]
    fn test_parse_rpc_error() {
        let response: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":429,"message":"Too many requests"}}"#,
        )
        .unwrap();
        assert!(matches!(
            parse_response(response),
            Err(Error::SourceUnavailable(_))
        ));
    }
}
