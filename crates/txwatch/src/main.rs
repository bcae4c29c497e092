// crates/txwatch/src/main.rs
//! `txwatch` binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use newsroom_eth::{RpcChainQuery, TxListener};
use newsroom_jobs::JobService;
use newsroom_txwatch::{all_complete, watch, Args};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    newsroom_observability::init_tracing(args.log_format)?;

    let chain = Arc::new(RpcChainQuery::new(&args.rpc_url)?);
    let jobs = Arc::new(JobService::new());
    let listener = TxListener::with_config(chain, jobs, args.listener_config());

    tracing::info!(
        rpc_url = %args.rpc_url,
        poll_interval_ms = args.poll_interval_ms,
        transactions = args.tx_ids.len(),
        "Watching transactions"
    );

    let printer = |tx_id: &str, message: &str| println!("{tx_id}: {message}");
    tokio::select! {
        result = watch(&listener, &args.tx_ids, printer) => {
            let last = result?;
            if all_complete(&args.tx_ids, &last) {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping watch");
            Ok(ExitCode::from(130))
        }
    }
}
