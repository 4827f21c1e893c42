//! Error handling module
//!
//! Defines custom error types for the Realmkeep server.

use std::io;

use thiserror::Error;

/// Main error type for the Realmkeep server
#[derive(Error, Debug)]
pub enum RealmkeepError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Store-related errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A non-fatal rejection of a single message; the session continues
    #[error("Rejected: {0}")]
    Rejected(String),
}

impl RealmkeepError {
    /// Build a rejection from anything displayable
    pub fn rejected(reason: impl Into<String>) -> Self {
        RealmkeepError::Rejected(reason.into())
    }

    /// Whether this error should leave the session running
    pub fn is_rejection(&self) -> bool {
        matches!(self, RealmkeepError::Rejected(_))
    }
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Too many connections from {0}")]
    TooManyConnections(String),

    #[error("Player {0} already has a live session")]
    AlreadyConnected(u64),

    #[error("Outbound queue full")]
    OutboundQueueFull,

    #[error("Missing player identity in upgrade request")]
    MissingIdentity,
}

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Packet too large: {size} bytes (max: {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Unexpected {message} in state {state}")]
    UnexpectedMessage { state: String, message: String },

    #[error("Inconsistent state: {0}")]
    Inconsistent(String),
}

/// Store and backend errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No record {key} in {namespace}")]
    NotFound { namespace: String, key: String },

    #[error("Unknown kind tag: {0}")]
    UnknownKind(String),

    #[error("Lock {key} is held by {holder}")]
    LockContention { key: String, holder: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Invalid record: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn not_found(namespace: &str, key: impl ToString) -> Self {
        StoreError::NotFound {
            namespace: namespace.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        StoreError::Backend(format!("pool: {}", err))
    }
}

/// Result type alias for Realmkeep operations
pub type Result<T> = std::result::Result<T, RealmkeepError>;

/// Result type alias for the store layer
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetworkError::ConnectionClosed;
        assert_eq!(err.to_string(), "Connection closed");

        let err = ProtocolError::UnknownMessageType(42);
        assert_eq!(err.to_string(), "Unknown message type: 42");

        let err = StoreError::not_found("entities", 7);
        assert_eq!(err.to_string(), "No record 7 in entities");

        let err = StoreError::LockContention {
            key: "realmkeep:lock".to_string(),
            holder: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "Lock realmkeep:lock is held by abc");
    }

    #[test]
    fn test_rejection_classification() {
        assert!(RealmkeepError::rejected("bad viewport").is_rejection());

        let fatal: RealmkeepError = ProtocolError::MalformedPacket("short".into()).into();
        assert!(!fatal.is_rejection());

        let store: RealmkeepError = StoreError::UnknownKind("dragon".into()).into();
        assert!(matches!(
            store,
            RealmkeepError::Store(StoreError::UnknownKind(ref k)) if k == "dragon"
        ));
    }

    #[test]
    fn test_serde_error_conversion() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let store: StoreError = err.into();
        assert!(matches!(store, StoreError::Serialization(_)));
    }
}
