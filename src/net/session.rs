//! Session management module
//!
//! Manages client sessions including:
//! - Session lifecycle state (connecting -> open -> closing -> closed)
//! - The per-session outbound frame queue
//! - A thread-safe registry enforcing one live session per player and a
//!   per-IP connection limit

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{NetworkError, RealmkeepError, Result};
use crate::game::entity::EntityId;

/// Unique session identifier
pub type SessionId = u64;

/// Session state in the connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Transport accepted, open hook not yet run
    Connecting,
    /// Receiving and dispatching frames
    Open,
    /// Cleanup in progress
    Closing,
    /// Fully torn down
    Closed,
}

impl SessionState {
    /// Check if the session is still active (not closing/closed)
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Open)
    }

    /// Get a human-readable name for the state
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Connecting => "Connecting",
            SessionState::Open => "Open",
            SessionState::Closing => "Closing",
            SessionState::Closed => "Closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A connected client session
pub struct Session {
    /// Unique session identifier
    pub id: SessionId,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Player entity this session controls
    pub player_id: EntityId,
    /// Current session state
    state: RwLock<SessionState>,
    /// Time of session creation
    pub created_at: Instant,
    /// Time of last inbound frame
    last_activity: RwLock<Instant>,
    /// Outbound frame queue, drained by the writer task
    outbound_tx: mpsc::Sender<Bytes>,
}

impl Session {
    pub fn new(
        id: SessionId,
        address: SocketAddr,
        player_id: EntityId,
        outbound_tx: mpsc::Sender<Bytes>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            address,
            player_id,
            state: RwLock::new(SessionState::Connecting),
            created_at: now,
            last_activity: RwLock::new(now),
            outbound_tx,
        }
    }

    /// Get the IP address as a string (without port)
    pub fn ip(&self) -> String {
        self.address.ip().to_string()
    }

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Set the session state
    pub fn set_state(&self, new_state: SessionState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };
        debug!(
            session_id = self.id,
            old_state = %old_state,
            new_state = %new_state,
            "Session state changed"
        );
    }

    /// Transition to a new state if currently in the expected state
    pub fn transition_state(&self, expected: SessionState, new_state: SessionState) -> bool {
        let mut state = self.state.write();
        if *state == expected {
            *state = new_state;
            true
        } else {
            false
        }
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Update last activity time
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.read()
    }

    pub fn idle_duration(&self) -> Duration {
        self.last_activity().elapsed()
    }

    /// A sender for the outbound queue (handed to the bus)
    pub fn outbound(&self) -> mpsc::Sender<Bytes> {
        self.outbound_tx.clone()
    }

    /// Queue a frame, waiting for room
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.outbound_tx
            .send(frame)
            .await
            .map_err(|_| RealmkeepError::Network(NetworkError::ConnectionClosed))
    }

    /// Queue a frame without waiting
    pub fn try_send(&self, frame: Bytes) -> Result<()> {
        self.outbound_tx
            .try_send(frame)
            .map_err(|_| RealmkeepError::Network(NetworkError::OutboundQueueFull))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("player_id", &self.player_id)
            .field("state", &self.state())
            .field("idle_duration", &self.idle_duration())
            .finish()
    }
}

/// Thread-safe session manager
pub struct SessionManager {
    /// Map of session ID to session
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Map of player entity to its live session
    player_to_session: DashMap<EntityId, SessionId>,
    /// Map of IP address to list of session IDs (for connection limiting)
    ip_to_sessions: DashMap<String, Vec<SessionId>>,
    /// Next session ID to assign
    next_id: AtomicU64,
    /// Maximum sessions per IP
    max_per_ip: usize,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_limits(10)
    }

    /// Create a session manager with a custom per-IP limit
    pub fn with_limits(max_per_ip: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            player_to_session: DashMap::new(),
            ip_to_sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            max_per_ip,
        }
    }

    /// Create and register a session for a player
    pub fn create_session(
        &self,
        address: SocketAddr,
        player_id: EntityId,
        outbound_tx: mpsc::Sender<Bytes>,
    ) -> Result<Arc<Session>> {
        let ip = address.ip().to_string();

        // Check connection limit per IP
        let current_count = self.ip_to_sessions.get(&ip).map(|v| v.len()).unwrap_or(0);
        if current_count >= self.max_per_ip {
            warn!(
                ip = %ip,
                count = current_count,
                max = self.max_per_ip,
                "Connection limit exceeded for IP"
            );
            return Err(RealmkeepError::Network(NetworkError::TooManyConnections(ip)));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // One live session per player
        match self.player_to_session.entry(player_id) {
            Entry::Occupied(existing) => {
                warn!(
                    player_id = %player_id,
                    existing_session = *existing.get(),
                    "Player already connected"
                );
                return Err(RealmkeepError::Network(NetworkError::AlreadyConnected(player_id.0)));
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let session = Arc::new(Session::new(id, address, player_id, outbound_tx));
        self.sessions.insert(id, session.clone());
        self.ip_to_sessions.entry(ip).or_default().push(id);

        info!(
            session_id = id,
            address = %address,
            player_id = %player_id,
            "Session created"
        );

        Ok(session)
    }

    /// Get a session by ID
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|r| r.clone())
    }

    /// Live session controlling a player, if any
    pub fn get_by_player(&self, player_id: EntityId) -> Option<Arc<Session>> {
        self.player_to_session
            .get(&player_id)
            .and_then(|id| self.get(*id))
    }

    pub fn is_connected(&self, player_id: EntityId) -> bool {
        self.player_to_session.contains_key(&player_id)
    }

    /// Remove a session
    pub fn remove(&self, id: SessionId) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            self.player_to_session
                .remove_if(&session.player_id, |_, owner| *owner == id);

            let ip = session.ip();
            if let Some(mut sessions) = self.ip_to_sessions.get_mut(&ip) {
                sessions.retain(|&sid| sid != id);
            }
            self.ip_to_sessions.retain(|_, v| !v.is_empty());

            info!(
                session_id = id,
                player_id = %session.player_id,
                "Session removed"
            );
        }
    }

    /// Mark every session as closing; their handlers finish the teardown
    pub fn close_all(&self) {
        for session in self.sessions.iter() {
            session.transition_state(SessionState::Open, SessionState::Closing);
        }
    }

    /// Get the count of active sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
