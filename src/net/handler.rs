//! Connection handler module
//!
//! Handles the lifecycle of one client connection:
//! - WebSocket upgrade, capturing the `player` query parameter
//! - Session registration and the outbound writer task
//! - Running the session protocol to completion
//! - Deregistration once the protocol has cleaned up

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, info, trace, warn};

use crate::error::{NetworkError, RealmkeepError, Result};
use crate::net::transport::{parse_player_id, write_frames, WebSocketSource};
use crate::protocol::connection::{is_disconnect, SessionContext, SessionProtocol};
use crate::state::AppState;

/// Connection handler for processing client connections
pub struct ConnectionHandler {
    /// Shared application state
    state: Arc<AppState>,
}

impl ConnectionHandler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Handle a WebSocket connection from upgrade to teardown
    pub async fn handle_websocket(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(address = %addr, "Handling WebSocket connection");

        // Set TCP options before upgrade
        stream.set_nodelay(true)?;

        let mut query: Option<String> = None;
        let capture = |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
            query = request.uri().query().map(str::to_owned);
            Ok(response)
        };
        let ws_stream = accept_hdr_async(stream, capture)
            .await
            .map_err(|e| RealmkeepError::Network(NetworkError::WebSocket(e.to_string())))?;

        let player_id = parse_player_id(query.as_deref())?;
        info!(address = %addr, player_id = %player_id, "WebSocket connection established");

        let (sink, source) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.state.config.outbound_queue_capacity);
        let session = self
            .state
            .session_manager
            .create_session(addr, player_id, outbound_tx)?;
        let session_id = session.id;

        let writer = tokio::spawn(write_frames(sink, outbound_rx));

        let result = match SessionContext::open(
            session,
            self.state.store.clone(),
            self.state.bus.clone(),
            self.state.session_settings(),
        )
        .await
        {
            Ok(ctx) => {
                SessionProtocol::new(ctx, WebSocketSource::new(source))
                    .with_shutdown(self.state.shutdown_tx.subscribe())
                    .run()
                    .await
            }
            Err(e) => Err(e),
        };

        // Dropping the last queue sender lets the writer flush and close
        self.state.session_manager.remove(session_id);
        match writer.await {
            Ok(Ok(frames)) => trace!(session_id = session_id, frames = frames, "Writer finished"),
            Ok(Err(e)) => debug!(session_id = session_id, error = %e, "Writer stopped early"),
            Err(e) => warn!(session_id = session_id, error = %e, "Writer task failed"),
        }

        match result {
            Err(e) if is_disconnect(&e) => {
                debug!(session_id = session_id, "Connection closed");
                Ok(())
            }
            other => other,
        }
    }
}
