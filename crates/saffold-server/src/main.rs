//! Saffold multiplayer game server.

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod manager;
mod match_actor;
mod persistence;
mod protocol;
mod server;
mod session;
mod transport;
mod view;

use config::Config;
use manager::MatchManager;
use persistence::JsonFileStore;
use server::{ConnectionRegistry, ServerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        games_dir = %config.games_dir.display(),
        timeout_secs = config.disconnect_timeout.as_secs(),
        "Starting Saffold server..."
    );

    let store = Arc::new(JsonFileStore::new(&config.games_dir)?);
    let registry = Arc::new(ConnectionRegistry::new());
    let manager = Arc::new(MatchManager::new(
        store,
        registry.clone(),
        config.disconnect_timeout,
    ));
    manager.restore()?;

    let state = Arc::new(ServerState::new(manager, registry));

    server::run_server(config.addr, state).await
}
