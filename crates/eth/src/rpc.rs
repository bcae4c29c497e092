// crates/eth/src/rpc.rs
//! `ChainQuery` over Ethereum JSON-RPC 2.0.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::chain::{ChainError, ChainQuery, TxReceipt};

/// Default per-request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Chain query backed by a node's HTTP JSON-RPC endpoint.
///
/// Transaction ids are passed through to the node untouched.
#[derive(Debug)]
pub struct RpcChainQuery {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl RpcChainQuery {
    pub fn new(url: impl Into<String>) -> Result<Self, ChainError> {
        Self::with_timeout(url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::trace!(method, id, "JSON-RPC request");
        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Transport(format!("HTTP {status} from {method}")));
        }

        let reply: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
        if let Some(err) = reply.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ChainQuery for RpcChainQuery {
    async fn is_pending(&self, tx_id: &str) -> Result<bool, ChainError> {
        let tx = self.call("eth_getTransactionByHash", json!([tx_id])).await?;
        if tx.is_null() {
            return Err(ChainError::NotFound(tx_id.to_string()));
        }
        if !tx.is_object() {
            return Err(ChainError::InvalidResponse(format!(
                "expected transaction object, got {tx}"
            )));
        }
        Ok(tx.get("blockNumber").map_or(true, Value::is_null))
    }

    async fn receipt(&self, tx_id: &str) -> Result<Option<TxReceipt>, ChainError> {
        let receipt = self.call("eth_getTransactionReceipt", json!([tx_id])).await?;
        if receipt.is_null() {
            return Ok(None);
        }

        // Receipts without `status` predate Byzantium and carry no outcome.
        let success = match receipt.get("status").and_then(Value::as_str) {
            Some(status) => parse_quantity(status)? == 1,
            None => true,
        };
        let block_number = receipt
            .get("blockNumber")
            .and_then(Value::as_str)
            .map(parse_quantity)
            .transpose()?;

        Ok(Some(TxReceipt {
            success,
            block_number,
        }))
    }
}

/// Parse a JSON-RPC hex quantity such as `"0x1b4"`.
fn parse_quantity(raw: &str) -> Result<u64, ChainError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::InvalidResponse(format!("not a hex quantity: {raw}")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("bad quantity {raw}: {e}")))
}
