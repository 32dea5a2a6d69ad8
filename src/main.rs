mod api;
mod chain;
mod config;
mod db;
mod error;
mod indexer;
mod models;
mod parser;
mod query;
mod rpc;
mod store;

use std::sync::Arc;
use tokio::{signal, sync::watch, task::JoinHandle, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::IndexerError;
use crate::indexer::Indexer;
use crate::query::QueryService;
use crate::rpc::RpcChainClient;
use crate::store::EventStore;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // RUST_LOG overrides, info otherwise
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    info!("Transfer Indexer starting...");

    let cfg = config::load()?;
    info!("  RPC URL: {}", cfg.rpc_url);
    info!("  Contract: {}", cfg.contract_address);
    info!("  Start block: {}", cfg.start_block);
    info!("  DB Path: {}", cfg.db_path.display());
    info!("  Port: {}", cfg.port);

    // One handle shared by the indexer (writer) and the API (reader)
    let store = EventStore::open(&cfg.db_path)?;
    info!("Store holds {} events", store.count().await?);
    let chain = Arc::new(RpcChainClient::from_config(&cfg)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn API task
    let mut api_handle = tokio::spawn({
        let service = QueryService::new(store.clone());
        let shutdown = shutdown_rx.clone();
        let port = cfg.port;
        async move { api::serve(port, service, shutdown).await }
    });

    // Spawn Indexer task
    let mut indexer_handle = tokio::spawn({
        let cfg = cfg.clone();
        let store = store.clone();
        let shutdown = shutdown_rx.clone();
        async move { supervise(cfg, chain, store, shutdown).await }
    });

    // Graceful shutdown
    tokio::select! {
        res = &mut api_handle => match res {
            Ok(Ok(_)) => info!("API exited cleanly"),
            Ok(Err(e)) => error!("API error: {:?}", e),
            Err(e) => error!("API task panicked: {:?}", e),
        },
        res = &mut indexer_handle => match res {
            Ok(Ok(_)) => info!("Indexer exited cleanly"),
            Ok(Err(e)) => error!("Indexer error: {:?}", e),
            Err(e) => error!("Indexer task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    shutdown_tx.send_replace(true);
    drain(api_handle, "API").await;
    drain(indexer_handle, "Indexer").await;

    info!("Transfer Indexer stopped.");
    Ok(())
}

/// Restart policy: re-run from the start block on chain-side failures, stop on anything else.
async fn supervise(
    cfg: Config,
    chain: Arc<RpcChainClient>,
    store: EventStore,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), IndexerError> {
    let mut retry_delay = 10; // seconds
    loop {
        let indexer = Indexer::new(Arc::clone(&chain), store.clone(), cfg.start_block)
            .with_max_resubscribe(cfg.max_resubscribe);

        match indexer.run(shutdown.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_restartable() => {
                warn!(
                    "Indexer stopped while {:?}: {}. Restarting from block {} in {}s",
                    indexer.phase(),
                    e,
                    cfg.start_block,
                    retry_delay
                );
            }
            Err(e) => return Err(e),
        }

        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = tokio::time::sleep(Duration::from_secs(retry_delay)) => {}
        }
        retry_delay = (retry_delay * 2).min(120);
    }
}

async fn drain<T>(handle: JoinHandle<T>, name: &str) {
    if handle.is_finished() {
        return;
    }
    if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
        warn!("{} did not stop within 5s", name);
    }
}
