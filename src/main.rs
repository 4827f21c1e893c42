//! Realmkeep World Server
//!
//! Serves a persistent, shared world to browser clients over WebSockets.
//! The server holds the store's global lock for as long as it runs, so
//! maintenance tools cannot write underneath it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use realmkeep_server::config::ServerConfig;
use realmkeep_server::error::StoreError;
use realmkeep_server::game::seed::{seed_world, SeedPlan};
use realmkeep_server::net::handler::ConnectionHandler;
use realmkeep_server::state::AppState;
use realmkeep_server::store::{open_backend, GameStore};
use realmkeep_server::VERSION;

/// How long shutdown waits for sessions to finish their cleanup
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Realmkeep world server v{}", VERSION);

    // Load configuration
    let config = ServerConfig::load().await?;
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );

    let backend = open_backend(&config)
        .await
        .context("Failed to open the world store backend")?;
    let store = Arc::new(GameStore::new(backend, &config.store));

    // Exclude maintenance tools while we are live
    store
        .lock()
        .await
        .context("Failed to acquire the global store lock")?;

    if config.dev_mode {
        seed_if_empty(&store).await?;
    }

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let state = Arc::new(AppState::new(config.clone(), store.clone(), shutdown_tx.clone()));

    let autosave_handle = (config.autosave_interval_secs > 0).then(|| {
        let store = store.clone();
        let period = Duration::from_secs(config.autosave_interval_secs);
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { run_autosave(store, period, shutdown_rx).await })
    });

    let renew_handle = config.store.lock_renew_interval().map(|period| {
        let store = store.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move { run_lock_renewal(store, period, shutdown_rx, shutdown_tx).await })
    });

    // Start WebSocket listener for browser clients
    let listen_address = config.listen_address();
    let ws_listener = TcpListener::bind(&listen_address)
        .await
        .with_context(|| format!("Failed to bind {}", listen_address))?;
    info!("WebSocket server listening on: {}", listen_address);

    // Spawn WebSocket connection acceptor
    let ws_state = state.clone();
    let mut ws_shutdown_rx = shutdown_tx.subscribe();
    let ws_handle = tokio::spawn(async move {
        accept_websocket_connections(ws_listener, ws_state, &mut ws_shutdown_rx).await;
    });

    info!("Server startup complete!");

    // Wait for shutdown signal
    wait_for_shutdown(shutdown_tx.clone()).await;

    info!("Shutting down server...");

    // Wait for handlers to finish
    let _ = ws_handle.await;
    if let Some(handle) = autosave_handle {
        let _ = handle.await;
    }
    if let Some(handle) = renew_handle {
        let _ = handle.await;
    }

    // Sessions see the broadcast and run their close hooks
    state.session_manager.close_all();
    drain_sessions(&state).await;

    // Final save, then hand the store back
    if store.holds_lock() {
        match store.save_all().await {
            Ok(report) => info!(records = report.total(), "Final save complete"),
            Err(e) => error!(error = %e, "Final save failed; unsaved changes are lost"),
        }
        if let Err(e) = store.unlock().await {
            error!(error = %e, "Failed to release the global store lock");
        }
    } else {
        warn!("Global store lock was lost; skipping the final save");
    }

    info!("Server shutdown complete. Goodbye!");
    Ok(())
}

/// Give an empty development store a world to connect to
async fn seed_if_empty(store: &GameStore) -> Result<()> {
    if !store.realms().ids().await?.is_empty() {
        return Ok(());
    }
    let report = seed_world(store, &SeedPlan::default())
        .await
        .context("Failed to seed the development world")?;
    info!(realm_id = %report.realm_id, entities = report.entities, "Seeded development world");
    for (name, id) in &report.players {
        info!("Connect as {} with ?player={}", name, id);
    }
    Ok(())
}

/// Initialize the logging/tracing system.
///
/// `REALMKEEP_LOG_FORMAT=json` switches to one JSON object per line.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,realmkeep_server=debug"));

    let json = std::env::var("REALMKEEP_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        fmt().json().with_env_filter(filter).with_target(true).init();
        return;
    }

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();
}

/// Accept incoming WebSocket connections (for browser clients)
async fn accept_websocket_connections(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        info!("New WebSocket connection from: {}", addr);
                        let handler = ConnectionHandler::new(state.clone());
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle_websocket(stream, addr).await {
                                warn!("WebSocket connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept WebSocket connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("WebSocket connection acceptor shutting down");
                break;
            }
        }
    }
}

/// Periodically persist dirty records and drop idle ones
async fn run_autosave(store: Arc<GameStore>, period: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match store.save_all().await {
                    Ok(_) => {
                        let expired = store.expire_all();
                        debug!(expired = expired, "Autosave complete");
                    }
                    // Dirty records stay dirty; the next pass retries
                    Err(e) => error!(error = %e, "Autosave failed"),
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

/// Keep the global lock's lease alive; losing it shuts the server down
async fn run_lock_renewal(
    store: Arc<GameStore>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match store.renew_lock().await {
                    Ok(()) => debug!("Renewed global lock"),
                    Err(e @ StoreError::LockContention { .. }) => {
                        error!(error = %e, "Lost the global store lock, shutting down");
                        let _ = shutdown_tx.send(());
                        break;
                    }
                    Err(e) => warn!(error = %e, "Failed to renew global lock"),
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

/// Wait for live sessions to run their close hooks
async fn drain_sessions(state: &AppState) {
    let deadline = tokio::time::Instant::now() + SESSION_DRAIN_TIMEOUT;
    while state.session_manager.count() > 0 {
        if tokio::time::Instant::now() >= deadline {
            warn!(
                remaining = state.session_manager.count(),
                "Sessions still open after drain timeout"
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    info!("All sessions disconnected");
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
    let mut internal_rx = shutdown_tx.subscribe();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
        _ = internal_rx.recv() => {
            info!("Internal shutdown requested");
            return;
        }
    }

    // Signal all tasks to shut down
    let _ = shutdown_tx.send(());
}
