//! Command line entry point of the chainwatch listener.
mod settings;

use anyhow::{Context, Result};
use chainwatch_api::{ApiServer, ServerConfig, StatusProvider};
use chainwatch_data::{
    ConfigDocument, ConfigFeed, Database, MemoryConfigFeed, MemoryStateStore, StateStore,
};
use chainwatch_execution::context::{ListenerContext, ListenerParts};
use chainwatch_execution::sync::ConfigWatcher;
use chainwatch_protocols::{AlloyConnector, RpcConfig};
use clap::Parser;
use dotenv::dotenv;
use settings::{Cli, listener_settings, read_abi};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = listener_settings(&cli, |name| std::env::var(name).ok())?;
    let network = settings.network;

    let (store, feed): (Arc<dyn StateStore>, Arc<dyn ConfigFeed>) = match &cli.database_url {
        Some(url) => {
            let db = Database::connect(url).await.context("connecting to database")?;
            db.migrate().await.context("running migrations")?;
            info!("Using PostgreSQL state store");
            (Arc::new(db.state_store()), Arc::new(db.config_feed()))
        }
        None => {
            warn!("DATABASE_URL not set, state is kept in memory");
            let address = settings
                .expected_address
                .clone()
                .context("the contract address variable is required without DATABASE_URL")?;
            let feed = MemoryConfigFeed::new();
            feed.publish(
                network,
                ConfigDocument {
                    address,
                    interface_descriptor: read_abi(&cli)?,
                },
            )
            .await;
            (Arc::new(MemoryStateStore::new()), Arc::new(feed))
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for ctrl-c");
                return;
            }
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let connector = Arc::new(AlloyConnector::new(RpcConfig::default()));
    let poller = connector
        .http(&settings.rpc_url)
        .context("building receipt poller")?;
    let parts = ListenerParts {
        connector,
        poller,
        store,
        feed: feed.clone(),
        watcher: Arc::new(ConfigWatcher::new(feed)),
    };
    let listener = ListenerContext::new(settings, parts)?;

    // Health checks are answered while the listener is still connecting.
    let server = ApiServer::new(ServerConfig {
        port: cli.port,
        ..ServerConfig::default()
    });
    let status: Arc<dyn StatusProvider> = Arc::new(listener.clone());
    let api = tokio::spawn(server.serve(status, shutdown.clone()));

    let outcome = listener.launch(shutdown.clone()).await;
    shutdown.cancel();
    match api.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP server task panicked"),
    }

    if let Err(e) = &outcome {
        error!(%network, error = %e, "Listener terminated");
    }
    outcome.context("listener terminated")?;
    info!(%network, "Listener stopped");
    Ok(())
}
