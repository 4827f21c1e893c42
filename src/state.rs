//! Application state module
//!
//! Contains the shared state used across all server connections.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::bus::PubSubBus;
use crate::config::ServerConfig;
use crate::net::session::SessionManager;
use crate::protocol::connection::SessionSettings;
use crate::store::GameStore;

/// Application state shared across all connections
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// The world store for this server instance
    pub store: Arc<GameStore>,
    /// Topic fan-out between sessions
    pub bus: Arc<PubSubBus>,
    /// Session manager for tracking connected clients
    pub session_manager: Arc<SessionManager>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(config: ServerConfig, store: Arc<GameStore>, shutdown_tx: broadcast::Sender<()>) -> Self {
        let session_manager = Arc::new(SessionManager::with_limits(config.max_sessions_per_ip));
        info!(
            max_sessions_per_ip = config.max_sessions_per_ip,
            outbound_queue_capacity = config.outbound_queue_capacity,
            "Application state initialized"
        );
        Self {
            config,
            store,
            bus: Arc::new(PubSubBus::new()),
            session_manager,
            shutdown_tx,
        }
    }

    /// Per-session limits derived from the configuration
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::from(&self.config)
    }
}
