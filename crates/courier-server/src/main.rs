//! # courier-server
//!
//! Presence-and-delivery chat relay.
//!
//! This binary provides:
//! - a **websocket endpoint** where clients register a user on a machine,
//!   open two-party chat sessions and exchange messages
//! - **durable conversations**, one JSON document per session, appended to
//!   before any delivery is attempted
//! - a **presence registry** with a live in-memory view for routing and a
//!   persisted snapshot that survives restarts
//! - a small read-only **REST API** (axum) for health, sessions and presence

mod api;
mod config;
mod connection;
mod conversation;
mod delivery;
mod error;
mod lifecycle;
mod presence;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use courier_store::DocumentStore;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::conversation::ConversationManager;
use crate::delivery::DeliveryCoordinator;
use crate::lifecycle::LifecycleHandler;
use crate::presence::PresenceRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,courier_server=debug,courier_store=debug")
        }))
        .init();

    info!("Starting Courier relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store = Arc::new(DocumentStore::open(config.data_dir.clone()).await?);

    // Seeded from disk so users from the previous run stay visible until swept
    let presence = Arc::new(PresenceRegistry::load(store.clone()).await);

    let conversations = Arc::new(ConversationManager::new(
        store.clone(),
        presence.clone(),
        config.max_message_length,
    ));
    let delivery = Arc::new(DeliveryCoordinator::new(
        presence.clone(),
        conversations.clone(),
    ));
    let lifecycle = Arc::new(LifecycleHandler::new(
        presence.clone(),
        conversations.clone(),
        delivery,
    ));

    let app_state = AppState {
        presence: presence.clone(),
        conversations,
        lifecycle,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Presence maintenance: retry failed snapshot writes, prune stale records
    let sweeper = presence.clone();
    let sweep_interval = config.presence_sweep_interval;
    let stale_after = config.presence_stale_after;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            sweeper.sweep(stale_after).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/websocket server until Ctrl+C
    // -----------------------------------------------------------------------
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    if let Err(e) = api::serve(app_state, config.http_addr, shutdown).await {
        tracing::error!(error = %e, "HTTP server failed");
        return Err(e);
    }

    Ok(())
}
