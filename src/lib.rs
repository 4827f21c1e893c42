//! Realmkeep World Server Library
//!
//! This library provides the core functionality for the Realmkeep world server:
//! a persistent, shared world streamed to many clients through per-session
//! viewports.
//!
//! ## Modules
//!
//! - `bus` - Topic-keyed publish/subscribe fan-out between sessions
//! - `config` - Server configuration management
//! - `error` - Error types and result definitions
//! - `game` - World model, seeding and index repair
//! - `net` - WebSocket transport and session management
//! - `protocol` - Wire format, session state machine and viewport diffing
//! - `store` - Identity-mapped object stores over a key-value backend

pub mod bus;
pub mod config;
pub mod error;
pub mod game;
pub mod net;
pub mod protocol;
pub mod state;
pub mod store;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{RealmkeepError, Result};
pub use state::AppState;

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
