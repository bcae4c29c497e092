// crates/eth/src/listener.rs
//! Watches transactions until they leave the pending state.

use std::sync::Arc;
use std::time::Duration;

use newsroom_jobs::{JobError, JobService, Publisher, Subscription};
use thiserror::Error;

use crate::chain::ChainQuery;

/// Prefix of every listener job key.
pub const JOB_KEY_PREFIX: &str = "TxListener-";

pub const TX_PENDING: &str = "Transaction is pending";
pub const TX_COMPLETE: &str = "Transaction complete!";
pub const TX_FAILED: &str = "Transaction failed";

/// Configuration for the transaction listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Delay before each chain query.
    pub poll_interval: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error(transparent)]
    Jobs(#[from] JobError),
}

/// Shares one chain poll per transaction id among any number of watchers.
///
/// Each update is a human readable line. The stream ends with exactly one
/// terminal line: `TX_COMPLETE`, `TX_FAILED`, or `"Error: ..."` when the
/// chain query failed. Failed polls are not retried; call `start_listener`
/// again to start a fresh poll once the previous one has finished.
pub struct TxListener {
    chain: Arc<dyn ChainQuery>,
    jobs: Arc<JobService>,
    config: ListenerConfig,
}

impl TxListener {
    pub fn new(chain: Arc<dyn ChainQuery>, jobs: Arc<JobService>) -> Self {
        Self::with_config(chain, jobs, ListenerConfig::default())
    }

    pub fn with_config(
        chain: Arc<dyn ChainQuery>,
        jobs: Arc<JobService>,
        config: ListenerConfig,
    ) -> Self {
        Self {
            chain,
            jobs,
            config,
        }
    }

    /// Job key used for `tx_id`.
    pub fn job_key(tx_id: &str) -> String {
        format!("{JOB_KEY_PREFIX}{tx_id}")
    }

    /// Start watching `tx_id`, or join the watch already in progress.
    pub fn start_listener(&self, tx_id: &str) -> Result<Subscription, ListenerError> {
        let key = Self::job_key(tx_id);
        let chain = Arc::clone(&self.chain);
        let owned_id = tx_id.to_string();
        let interval = self.config.poll_interval;

        // The starter is subscribed before the poll begins, so even a poll
        // that finishes immediately reaches it.
        match self.jobs.start_job_and_subscribe(key.clone(), move |publisher| {
            poll_until_final(chain, owned_id, interval, publisher)
        }) {
            Ok((_, subscription)) => {
                tracing::info!(tx_id, "Started transaction listener");
                Ok(subscription)
            }
            Err(e) if e.is_already_exists() => {
                tracing::debug!(tx_id, "Joining existing transaction listener");
                Ok(self.jobs.subscribe(&key)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stop delivering updates to `subscription`. The poll keeps running for
    /// any other watchers.
    pub fn stop_subscription(&self, subscription: &mut Subscription) -> Result<(), ListenerError> {
        self.jobs.stop_subscription(subscription)?;
        Ok(())
    }
}

async fn poll_until_final(
    chain: Arc<dyn ChainQuery>,
    tx_id: String,
    interval: Duration,
    publisher: Publisher,
) {
    loop {
        tokio::time::sleep(interval).await;

        match chain.is_pending(&tx_id).await {
            Ok(true) => {
                tracing::trace!(tx_id = %tx_id, "Transaction still pending");
                if !publisher.publish(TX_PENDING).await {
                    return;
                }
            }
            Ok(false) => {
                let message = match chain.receipt(&tx_id).await {
                    Ok(Some(receipt)) if !receipt.success => {
                        tracing::info!(tx_id = %tx_id, block = ?receipt.block_number, "Transaction failed");
                        TX_FAILED.to_string()
                    }
                    Ok(_) => {
                        tracing::info!(tx_id = %tx_id, "Transaction complete");
                        TX_COMPLETE.to_string()
                    }
                    Err(e) => {
                        tracing::warn!(tx_id = %tx_id, error = %e, "Receipt query failed");
                        format!("Error: {e}")
                    }
                };
                publisher.publish(message).await;
                return;
            }
            Err(e) => {
                tracing::warn!(tx_id = %tx_id, error = %e, "Transaction query failed");
                publisher.publish(format!("Error: {e}")).await;
                return;
            }
        }
    }
}
