// crates/txwatch/src/lib.rs
//! `txwatch`: follow transactions from the command line until they are mined.

use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;
use futures_util::stream::{self, StreamExt};
use newsroom_eth::{ListenerConfig, ListenerError, TxListener, TX_COMPLETE};
use newsroom_observability::LogFormat;

/// Watch one or more transactions until they leave the pending state.
#[derive(Debug, Parser)]
#[command(name = "txwatch", version, about)]
pub struct Args {
    /// JSON-RPC endpoint of an Ethereum node.
    #[arg(long, env = "NEWSROOM_RPC_URL", default_value = "http://127.0.0.1:8545")]
    pub rpc_url: String,

    /// Delay between chain queries, in milliseconds.
    #[arg(long, env = "NEWSROOM_POLL_INTERVAL_MS", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Log output format (compact or json).
    #[arg(long, env = "NEWSROOM_LOG_FORMAT", default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Transaction ids to watch. Repeating an id joins the same watch.
    #[arg(required = true, value_name = "TX_ID")]
    pub tx_ids: Vec<String>,
}

impl Args {
    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// Follow every id to its final update, calling `on_update(tx_id, message)`
/// as updates arrive. Returns the last message seen per id.
pub async fn watch<F>(
    listener: &TxListener,
    tx_ids: &[String],
    mut on_update: F,
) -> Result<HashMap<String, String>, ListenerError>
where
    F: FnMut(&str, &str),
{
    let mut streams = Vec::with_capacity(tx_ids.len());
    for tx_id in tx_ids {
        let subscription = listener.start_listener(tx_id)?;
        let tx_id = tx_id.clone();
        streams.push(subscription.map(move |message| (tx_id.clone(), message)));
    }

    let mut merged = stream::select_all(streams);
    let mut last = HashMap::new();
    while let Some((tx_id, message)) = merged.next().await {
        on_update(&tx_id, &message);
        last.insert(tx_id, message);
    }
    Ok(last)
}

/// Whether every watched id ended with a completion message.
pub fn all_complete(tx_ids: &[String], last: &HashMap<String, String>) -> bool {
    tx_ids
        .iter()
        .all(|id| last.get(id).is_some_and(|message| message == TX_COMPLETE))
}
