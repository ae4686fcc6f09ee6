//! Coordinator server binary
//!
//! Usage: `txngate-server [config.json]`. With no argument the default
//! configuration binds 127.0.0.1:50010.

use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use txngate_coordinator::{
    Config, Dispatcher, Publisher, Reconciler, Result, RpcService, Server, TxnManager,
};
use txngate_store::{MemoryStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(Path::new(&path))?,
        None => Config::default(),
    };

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let publisher = Arc::new(Publisher::new());
    let manager = Arc::new(TxnManager::new(
        store.clone(),
        publisher.clone(),
        config.processor(),
        config.enable,
    ));
    let dispatcher = Arc::new(Dispatcher::new(manager.clone(), store.clone()));

    let reconciler = Reconciler::new(
        manager,
        store,
        publisher.clone(),
        config.life_limit(),
        config.retention(),
    );
    reconciler.start();

    let service = Arc::new(RpcService::new(dispatcher, publisher));
    let server = Server::bind(&config, service).await?;
    tracing::info!(
        addr = %server.local_addr(),
        enable = config.enable,
        "coordinator listening"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    reconciler.shutdown();
    server.shutdown();
    Ok(())
}
