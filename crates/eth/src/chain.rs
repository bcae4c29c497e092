// crates/eth/src/chain.rs
//! The chain-query capability the listener polls.

use async_trait::async_trait;
use thiserror::Error;

/// Outcome of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub success: bool,
    pub block_number: Option<u64>,
}

/// Errors from querying the chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("transaction not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChainError::Transport("request timed out".to_string())
        } else if err.is_connect() {
            ChainError::Transport(format!("failed to connect: {err}"))
        } else {
            ChainError::Transport(err.to_string())
        }
    }
}

/// Read access to transaction state on a chain.
///
/// Implementations include:
/// - `RpcChainQuery`: Ethereum JSON-RPC over HTTP
/// - scripted fakes in tests
#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// Whether the transaction is still waiting to be mined.
    /// `ChainError::NotFound` if the chain does not know it.
    async fn is_pending(&self, tx_id: &str) -> Result<bool, ChainError>;

    /// Receipt of a mined transaction, `None` if there is none yet.
    async fn receipt(&self, tx_id: &str) -> Result<Option<TxReceipt>, ChainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_error_display() {
        assert_eq!(
            ChainError::NotFound("0xabc".into()).to_string(),
            "transaction not found: 0xabc"
        );
        assert_eq!(
            ChainError::Rpc {
                code: -32000,
                message: "header not found".into()
            }
            .to_string(),
            "rpc error -32000: header not found"
        );
    }
}
