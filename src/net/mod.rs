//! Networking module
//!
//! This module handles all network-related functionality for the Realmkeep server:
//! - WebSocket upgrade and framing for browser clients
//! - Session management
//! - Connection lifecycle

pub mod buffer;
pub mod handler;
pub mod session;
pub mod transport;

pub use handler::ConnectionHandler;
pub use session::{Session, SessionId, SessionManager, SessionState};
