// crates/eth/src/lib.rs
//! Ethereum transaction watching on top of the job system.
//!
//! `TxListener` turns "tell me when this transaction is final" into a job
//! keyed by the transaction id, so any number of callers can watch the same
//! transaction while the chain is polled once.

pub mod chain;
pub mod listener;
pub mod rpc;

pub use chain::{ChainError, ChainQuery, TxReceipt};
pub use listener::{
    ListenerConfig, ListenerError, TxListener, JOB_KEY_PREFIX, TX_COMPLETE, TX_FAILED, TX_PENDING,
};
pub use rpc::RpcChainQuery;
