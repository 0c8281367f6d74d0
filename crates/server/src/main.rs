//! harvesterd entry point.
//!
//! Boots the MCP server on stdio transport and, when configured, the background
//! refresh loop. Logging goes to stderr to avoid interfering with the JSON-RPC
//! protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use harvester_core::{AppConfig, CacheDb, CancelToken};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod handler;
mod refresh;
mod state;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(base_url = %config.base_url, db = %config.db_path.display(), "Starting harvester on stdio transport");

    let store = Arc::new(CacheDb::open(&config.db_path).await?);
    let cancel = CancelToken::new();
    let state = state::AppState::from_config(&config, store, cancel.clone())?;

    let refresher = config
        .refresh_interval()
        .map(|interval| tokio::spawn(refresh::run(Arc::clone(&state.service), interval, cancel.clone())));

    let server = serve_server(handler::HarvesterServer::new(state), stdio()).await?;
    let quit = server.waiting().await;

    cancel.cancel();
    if let Some(handle) = refresher {
        handle.await?;
    }
    tracing::info!("harvester stopped");

    quit?;
    Ok(())
}
