//! Protocol module
//!
//! Wire format and per-session message handling:
//! - Frame envelope (type tag, optional origin entity, payload)
//! - Message catalogue and payload codecs
//! - Session state machine and dispatch
//! - Viewport diffing and bus publishing helpers

pub mod broadcast;
pub mod connection;
pub mod frame;
pub mod messages;
pub mod viewport;

pub use connection::{FrameSource, SessionContext, SessionProtocol, SessionSettings};
pub use frame::Frame;
pub use messages::{Message, MessageType};
pub use viewport::{handle_viewport, ViewportDiff, ViewportState};
