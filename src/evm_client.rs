//! EVM Client Module
//!
//! Client for communicating with EVM-compatible nodes via their JSON-RPC API.
//! Covers what the relayer needs: block height, log queries, receipts,
//! read-only calls and node-signed transactions.

use anyhow::Context;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::types::{parse_fixed_hex, Address};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum RpcError {
    /// Node unreachable, non-2xx response or unreadable body
    #[error("transport error calling {method}: {message}")]
    Transport { method: String, message: String },
    /// JSON-RPC error object returned by the node
    #[error("JSON-RPC error from {method}: {message} (code: {code})")]
    Rpc {
        method: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
    /// Well-formed response whose content does not parse
    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },
    #[error("transaction {0} was not mined before the confirmation timeout")]
    ReceiptTimeout(String),
}

impl RpcError {
    /// Revert payload attached to an execution error, if any.
    ///
    /// Nodes put it either directly in `error.data` as a hex string or in a
    /// nested `error.data.data` field.
    pub fn revert_data(&self) -> Option<Vec<u8>> {
        let RpcError::Rpc { data: Some(data), .. } = self else {
            return None;
        };
        let hex_str = match data {
            serde_json::Value::String(s) => s.as_str(),
            serde_json::Value::Object(map) => map.get("data")?.as_str()?,
            _ => return None,
        };
        hex::decode(hex_str.trim_start_matches("0x")).ok()
    }

    fn decode(what: &str, message: impl ToString) -> Self {
        RpcError::Decode {
            what: what.to_string(),
            message: message.to_string(),
        }
    }
}

// ============================================================================
// API RESPONSE STRUCTURES
// ============================================================================

/// EVM JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

/// EVM JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// EVM event log entry
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmLog {
    /// Address of the contract that emitted the event
    pub address: String,
    /// Array of topics (indexed event parameters)
    pub topics: Vec<String>,
    /// Event data (non-indexed parameters)
    pub data: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub transaction_index: Option<String>,
    /// Index of the log within the block
    #[serde(default)]
    pub log_index: Option<String>,
    /// Set when the log was dropped by a reorg
    #[serde(default)]
    pub removed: bool,
}

impl EvmLog {
    pub fn topic_bytes(&self) -> Result<Vec<[u8; 32]>, RpcError> {
        self.topics
            .iter()
            .map(|t| parse_fixed_hex::<32>(t).map_err(|e| RpcError::decode("log topic", e)))
            .collect()
    }

    pub fn data_bytes(&self) -> Result<Vec<u8>, RpcError> {
        hex::decode(self.data.trim_start_matches("0x")).map_err(|e| RpcError::decode("log data", e))
    }

    pub fn block_number(&self) -> Result<u64, RpcError> {
        required_u64(&self.block_number, "log blockNumber")
    }

    pub fn log_index(&self) -> Result<u64, RpcError> {
        required_u64(&self.log_index, "log logIndex")
    }
}

/// Transaction receipt
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmReceipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub transaction_index: Option<String>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub block_number: Option<String>,
    /// "0x1" = success, "0x0" = reverted
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<EvmLog>,
}

impl EvmReceipt {
    pub fn is_success(&self) -> bool {
        matches!(self.status.as_deref(), Some("0x1") | Some("0x01"))
    }

    pub fn transaction_index(&self) -> Result<u64, RpcError> {
        required_u64(&self.transaction_index, "receipt transactionIndex")
    }
}

/// `eth_getLogs` filter for one contract and a set of topic0 values.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub address: Address,
    pub topic0: [u8; 32],
    pub from_block: u64,
    pub to_block: u64,
}

/// Parses a 0x-prefixed hex quantity.
pub fn parse_hex_u64(value: &str) -> Result<u64, RpcError> {
    u64::from_str_radix(value.strip_prefix("0x").unwrap_or(value), 16)
        .map_err(|e| RpcError::decode(&format!("quantity '{}'", value), e))
}

fn required_u64(value: &Option<String>, what: &str) -> Result<u64, RpcError> {
    let raw = value.as_deref().ok_or_else(|| RpcError::decode(what, "field missing"))?;
    parse_hex_u64(raw)
}

// ============================================================================
// EVM CLIENT IMPLEMENTATION
// ============================================================================

/// Client for communicating with EVM-compatible blockchain nodes via JSON-RPC
#[derive(Debug, Clone)]
pub struct EvmClient {
    /// HTTP client for making requests
    client: Client,
    /// Base URL of the EVM node (e.g., "http://127.0.0.1:8545")
    base_url: String,
}

impl EvmClient {
    /// Creates a new EVM client for the given node URL.
    pub fn new(node_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: node_url.to_string(),
        })
    }

    /// Returns the base URL of this client
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends one JSON-RPC call. A `null` result comes back as `None`.
    async fn rpc<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<Option<T>, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };
        let transport = |message: String| RpcError::Transport {
            method: method.to_string(),
            message,
        };

        let response = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport(format!("failed to reach {}: {}", self.base_url, e)))?;

        if !response.status().is_success() {
            return Err(transport(format!("{} returned HTTP {}", self.base_url, response.status())));
        }

        let body: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| transport(format!("failed to parse response from {}: {}", self.base_url, e)))?;

        if let Some(error) = body.error {
            return Err(RpcError::Rpc {
                method: method.to_string(),
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        Ok(body.result)
    }

    /// Gets the current block number
    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let hex: Option<String> = self.rpc("eth_blockNumber", vec![]).await?;
        let hex = hex.ok_or_else(|| RpcError::decode("eth_blockNumber", "no result"))?;
        parse_hex_u64(&hex)
    }

    /// Queries logs matching `filter` (inclusive block range).
    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<EvmLog>, RpcError> {
        let params = serde_json::json!({
            "address": filter.address.to_hex(),
            "topics": [format!("0x{}", hex::encode(filter.topic0))],
            "fromBlock": format!("0x{:x}", filter.from_block),
            "toBlock": format!("0x{:x}", filter.to_block),
        });
        let logs: Option<Vec<EvmLog>> = self.rpc("eth_getLogs", vec![params]).await?;
        Ok(logs.unwrap_or_default())
    }

    /// Fetches a receipt; `None` while the transaction is pending or unknown.
    pub async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<EvmReceipt>, RpcError> {
        let hash = if tx_hash.starts_with("0x") {
            tx_hash.to_string()
        } else {
            format!("0x{}", tx_hash)
        };
        self.rpc("eth_getTransactionReceipt", vec![serde_json::json!(hash)])
            .await
    }

    /// Executes a read-only call against the latest block.
    ///
    /// A revert surfaces as `RpcError::Rpc` carrying the revert data.
    pub async fn call(&self, from: Option<Address>, to: Address, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let mut tx = serde_json::json!({
            "to": to.to_hex(),
            "data": format!("0x{}", hex::encode(data)),
        });
        if let Some(from) = from {
            tx["from"] = serde_json::json!(from.to_hex());
        }
        let result: Option<String> = self.rpc("eth_call", vec![tx, serde_json::json!("latest")]).await?;
        let result = result.unwrap_or_default();
        hex::decode(result.trim_start_matches("0x")).map_err(|e| RpcError::decode("eth_call result", e))
    }

    /// Sends a transaction signed by the node's unlocked `from` account.
    /// Returns the transaction hash.
    pub async fn send_transaction(&self, from: Address, to: Address, data: &[u8]) -> Result<String, RpcError> {
        let tx = serde_json::json!({
            "from": from.to_hex(),
            "to": to.to_hex(),
            "data": format!("0x{}", hex::encode(data)),
        });
        let hash: Option<String> = self.rpc("eth_sendTransaction", vec![tx]).await?;
        hash.ok_or_else(|| RpcError::decode("eth_sendTransaction", "no transaction hash"))
    }

    /// Polls for the receipt until it appears or `timeout` elapses.
    pub async fn wait_for_receipt(
        &self,
        tx_hash: &str,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<EvmReceipt, RpcError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(receipt) = self.get_transaction_receipt(tx_hash).await? {
                return Ok(receipt);
            }
            if Instant::now() + poll_interval > deadline {
                return Err(RpcError::ReceiptTimeout(tx_hash.to_string()));
            }
            debug!("Waiting for receipt: tx={}", tx_hash);
            tokio::time::sleep(poll_interval).await;
        }
    }
}
