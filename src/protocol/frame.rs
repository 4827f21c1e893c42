//! Frame envelope
//!
//! Every WebSocket binary message carries exactly one frame:
//!
//! ```text
//! [u8 type tag][u8 flags][u64 origin, if flags & HAS_ORIGIN][payload ...]
//! ```
//!
//! The origin is the entity a message is about or comes from, when there is
//! one. The payload layout is keyed by the type tag.

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::game::entity::EntityId;
use crate::net::buffer::PacketBuffer;
use crate::protocol::messages::MessageType;

/// Flag bit: an origin entity id follows
pub const HAS_ORIGIN: u8 = 0x01;

/// Smallest possible frame: tag + flags
pub const MIN_FRAME_SIZE: usize = 2;

/// A decoded envelope with its payload still opaque
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub origin: Option<EntityId>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(message_type: MessageType, origin: Option<EntityId>, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            origin,
            payload,
        }
    }

    /// Parse an envelope. Unknown type tags fail here.
    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        if raw.len() < MIN_FRAME_SIZE {
            return Err(ProtocolError::MalformedPacket(format!(
                "frame of {} bytes is shorter than the header",
                raw.len()
            )));
        }
        let mut buf = PacketBuffer::from_bytes(raw);
        let message_type = MessageType::from_tag(buf.read_ubyte()?)?;
        let flags = buf.read_ubyte()?;
        if flags & !HAS_ORIGIN != 0 {
            return Err(ProtocolError::MalformedPacket(format!("unknown frame flags {:#04x}", flags)));
        }
        let origin = if flags & HAS_ORIGIN != 0 {
            Some(EntityId(buf.read_ulong()?))
        } else {
            None
        };
        Ok(Self {
            message_type,
            origin,
            payload: buf.read_remaining(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = PacketBuffer::with_capacity(MIN_FRAME_SIZE + 8 + self.payload.len());
        buf.write_ubyte(self.message_type as u8);
        match self.origin {
            Some(origin) => {
                buf.write_ubyte(HAS_ORIGIN);
                buf.write_ulong(origin.0);
            }
            None => buf.write_ubyte(0),
        }
        buf.write_bytes(&self.payload);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_with_origin() {
        let frame = Frame::new(MessageType::EntitySnapshot, Some(EntityId(42)), vec![1, 2, 3]);
        let raw = frame.encode();
        assert_eq!(raw[0], MessageType::EntitySnapshot as u8);
        assert_eq!(raw[1], HAS_ORIGIN);
        assert_eq!(raw.len(), 2 + 8 + 3);
        assert_eq!(Frame::decode(&raw).unwrap(), frame);
    }

    #[test]
    fn test_envelope_without_origin() {
        let frame = Frame::new(MessageType::ViewportUpdate, None, vec![]);
        let raw = frame.encode();
        assert_eq!(raw.as_ref(), &[MessageType::ViewportUpdate as u8, 0]);
        assert_eq!(Frame::decode(&raw).unwrap(), frame);
    }

    #[test]
    fn test_unknown_tag_fails() {
        assert!(matches!(
            Frame::decode(&[0xEE, 0]),
            Err(ProtocolError::UnknownMessageType(0xEE))
        ));
    }

    #[test]
    fn test_truncated_frames_fail() {
        assert!(Frame::decode(&[]).is_err());
        assert!(Frame::decode(&[MessageType::ViewportUpdate as u8]).is_err());
        // Origin flag set but no id
        assert!(Frame::decode(&[MessageType::ViewportUpdate as u8, HAS_ORIGIN, 1]).is_err());
        assert!(Frame::decode(&[MessageType::ViewportUpdate as u8, 0x80]).is_err());
    }
}
