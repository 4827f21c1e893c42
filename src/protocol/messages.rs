//! Message catalogue
//!
//! Each message type owns a tag and a payload layout. Client to server:
//! [`ViewportUpdate`]. Server to client: [`RealmSnapshot`],
//! [`RegionSnapshot`], [`EntitySnapshot`] and [`AvatarSnapshot`].

use crate::error::{ProtocolError, StoreResult};
use crate::game::entity::{Entity, EntityId};
use crate::game::geometry::Rectangle;
use crate::game::realm::{Layer, Realm, RealmId, Region, RegionCoord, REGION_AREA};
use crate::net::buffer::PacketBuffer;
use crate::protocol::frame::Frame;
use crate::store::object_store::Storable;

/// Wire type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ViewportUpdate = 1,
    RealmSnapshot = 2,
    RegionSnapshot = 3,
    EntitySnapshot = 4,
    AvatarSnapshot = 5,
}

impl MessageType {
    pub fn from_tag(tag: u8) -> Result<Self, ProtocolError> {
        match tag {
            1 => Ok(MessageType::ViewportUpdate),
            2 => Ok(MessageType::RealmSnapshot),
            3 => Ok(MessageType::RegionSnapshot),
            4 => Ok(MessageType::EntitySnapshot),
            5 => Ok(MessageType::AvatarSnapshot),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageType::ViewportUpdate => "ViewportUpdate",
            MessageType::RealmSnapshot => "RealmSnapshot",
            MessageType::RegionSnapshot => "RegionSnapshot",
            MessageType::EntitySnapshot => "EntitySnapshot",
            MessageType::AvatarSnapshot => "AvatarSnapshot",
        }
    }
}

/// A message with a fixed type tag and payload layout
pub trait WireMessage: Sized {
    /// The type tag
    const TYPE: MessageType;

    /// Encode the payload
    fn encode(&self, buf: &mut PacketBuffer);

    /// Decode the payload
    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError>;
}

/// Client viewport, in region-grid units with inclusive bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportUpdate {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ViewportUpdate {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn is_inverted(&self) -> bool {
        self.right < self.left || self.bottom < self.top
    }

    /// Number of regions covered, without overflow
    pub fn region_count(&self) -> i64 {
        if self.is_inverted() {
            return 0;
        }
        let width = i64::from(self.right) - i64::from(self.left) + 1;
        let height = i64::from(self.bottom) - i64::from(self.top) + 1;
        width.saturating_mul(height)
    }

    /// Half-open grid rectangle covered by this viewport
    pub fn grid(&self) -> Rectangle {
        Rectangle::from_corners(self.left, self.top, self.right, self.bottom)
    }
}

impl WireMessage for ViewportUpdate {
    const TYPE: MessageType = MessageType::ViewportUpdate;

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_int(self.left);
        buf.write_int(self.top);
        buf.write_int(self.right);
        buf.write_int(self.bottom);
    }

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        Ok(Self {
            left: buf.read_int()?,
            top: buf.read_int()?,
            right: buf.read_int()?,
            bottom: buf.read_int()?,
        })
    }
}

/// Realm description sent when a session opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmSnapshot {
    pub realm_id: RealmId,
    pub name: String,
    pub width: i32,
    pub height: i32,
    pub terrain_layers: Vec<String>,
}

impl From<&Realm> for RealmSnapshot {
    fn from(realm: &Realm) -> Self {
        Self {
            realm_id: realm.id,
            name: realm.name.clone(),
            width: realm.width,
            height: realm.height,
            terrain_layers: realm.terrain_layers.clone(),
        }
    }
}

impl WireMessage for RealmSnapshot {
    const TYPE: MessageType = MessageType::RealmSnapshot;

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_ulong(self.realm_id.0);
        buf.write_string(&self.name);
        buf.write_int(self.width);
        buf.write_int(self.height);
        buf.write_smart(self.terrain_layers.len() as u16);
        for layer in &self.terrain_layers {
            buf.write_string(layer);
        }
    }

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        let realm_id = RealmId(buf.read_ulong()?);
        let name = buf.read_string()?;
        let width = buf.read_int()?;
        let height = buf.read_int()?;
        let count = buf.read_smart()? as usize;
        let mut terrain_layers = Vec::with_capacity(count);
        for _ in 0..count {
            terrain_layers.push(buf.read_string()?);
        }
        Ok(Self {
            realm_id,
            name,
            width,
            height,
            terrain_layers,
        })
    }
}

/// Full contents of one region
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSnapshot {
    pub realm_id: RealmId,
    pub location: RegionCoord,
    pub layers: Vec<Layer>,
    pub passabilities: Vec<u8>,
}

impl From<&Region> for RegionSnapshot {
    fn from(region: &Region) -> Self {
        Self {
            realm_id: region.realm_id,
            location: region.location,
            layers: region.layers.clone(),
            passabilities: region.passabilities.clone(),
        }
    }
}

impl WireMessage for RegionSnapshot {
    const TYPE: MessageType = MessageType::RegionSnapshot;

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_ulong(self.realm_id.0);
        buf.write_int(self.location.arx);
        buf.write_int(self.location.ary);
        buf.write_smart(self.layers.len() as u16);
        for layer in &self.layers {
            buf.write_string(&layer.terrain);
            for tile in &layer.tiles {
                buf.write_short(*tile);
            }
        }
        buf.write_bytes(&self.passabilities);
    }

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        let realm_id = RealmId(buf.read_ulong()?);
        let location = RegionCoord::new(buf.read_int()?, buf.read_int()?);
        let count = buf.read_smart()? as usize;
        let mut layers = Vec::with_capacity(count);
        for _ in 0..count {
            let terrain = buf.read_string()?;
            let mut tiles = Vec::with_capacity(REGION_AREA);
            for _ in 0..REGION_AREA {
                tiles.push(buf.read_short()?);
            }
            layers.push(Layer { terrain, tiles });
        }
        let passabilities = buf.read_bytes(REGION_AREA)?;
        Ok(Self {
            realm_id,
            location,
            layers,
            passabilities,
        })
    }
}

/// One entity's public state; `state` is the entity's stored JSON record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub kind: String,
    pub state: Vec<u8>,
}

impl EntitySnapshot {
    pub fn of(entity: &Entity) -> StoreResult<Self> {
        Ok(Self {
            id: entity.id,
            kind: entity.kind_tag().to_string(),
            state: entity.encode()?,
        })
    }
}

impl WireMessage for EntitySnapshot {
    const TYPE: MessageType = MessageType::EntitySnapshot;

    fn encode(&self, buf: &mut PacketBuffer) {
        buf.write_ulong(self.id.0);
        buf.write_string(&self.kind);
        buf.write_blob(&self.state);
    }

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: EntityId(buf.read_ulong()?),
            kind: buf.read_string()?,
            state: buf.read_blob()?,
        })
    }
}

/// The client's own entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarSnapshot(pub EntitySnapshot);

impl WireMessage for AvatarSnapshot {
    const TYPE: MessageType = MessageType::AvatarSnapshot;

    fn encode(&self, buf: &mut PacketBuffer) {
        self.0.encode(buf);
    }

    fn decode(buf: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        EntitySnapshot::decode(buf).map(AvatarSnapshot)
    }
}

/// Any message in the catalogue
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ViewportUpdate(ViewportUpdate),
    RealmSnapshot(RealmSnapshot),
    RegionSnapshot(RegionSnapshot),
    EntitySnapshot(EntitySnapshot),
    AvatarSnapshot(AvatarSnapshot),
}

fn decode_payload<M: WireMessage>(payload: &[u8]) -> Result<M, ProtocolError> {
    let mut buf = PacketBuffer::from_bytes(payload);
    let message = M::decode(&mut buf)?;
    if buf.has_remaining() {
        return Err(ProtocolError::MalformedPacket(format!(
            "{} trailing bytes after {}",
            buf.remaining(),
            M::TYPE.name()
        )));
    }
    Ok(message)
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::ViewportUpdate(_) => MessageType::ViewportUpdate,
            Message::RealmSnapshot(_) => MessageType::RealmSnapshot,
            Message::RegionSnapshot(_) => MessageType::RegionSnapshot,
            Message::EntitySnapshot(_) => MessageType::EntitySnapshot,
            Message::AvatarSnapshot(_) => MessageType::AvatarSnapshot,
        }
    }

    pub fn name(&self) -> &'static str {
        self.message_type().name()
    }

    /// Decode a frame's payload according to its tag
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        let payload = &frame.payload;
        Ok(match frame.message_type {
            MessageType::ViewportUpdate => Message::ViewportUpdate(decode_payload(payload)?),
            MessageType::RealmSnapshot => Message::RealmSnapshot(decode_payload(payload)?),
            MessageType::RegionSnapshot => Message::RegionSnapshot(decode_payload(payload)?),
            MessageType::EntitySnapshot => Message::EntitySnapshot(decode_payload(payload)?),
            MessageType::AvatarSnapshot => Message::AvatarSnapshot(decode_payload(payload)?),
        })
    }

    /// Wrap in an envelope
    pub fn to_frame(&self, origin: Option<EntityId>) -> Frame {
        let mut buf = PacketBuffer::with_capacity(64);
        match self {
            Message::ViewportUpdate(m) => m.encode(&mut buf),
            Message::RealmSnapshot(m) => m.encode(&mut buf),
            Message::RegionSnapshot(m) => m.encode(&mut buf),
            Message::EntitySnapshot(m) => m.encode(&mut buf),
            Message::AvatarSnapshot(m) => m.encode(&mut buf),
        }
        Frame::new(self.message_type(), origin, buf.as_bytes().to_vec())
    }
}

impl From<ViewportUpdate> for Message {
    fn from(m: ViewportUpdate) -> Self {
        Message::ViewportUpdate(m)
    }
}

impl From<RealmSnapshot> for Message {
    fn from(m: RealmSnapshot) -> Self {
        Message::RealmSnapshot(m)
    }
}

impl From<RegionSnapshot> for Message {
    fn from(m: RegionSnapshot) -> Self {
        Message::RegionSnapshot(m)
    }
}

impl From<EntitySnapshot> for Message {
    fn from(m: EntitySnapshot) -> Self {
        Message::EntitySnapshot(m)
    }
}

impl From<AvatarSnapshot> for Message {
    fn from(m: AvatarSnapshot) -> Self {
        Message::AvatarSnapshot(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::{DropState, EntityKind};
    use crate::game::geometry::Vector2;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_viewport_grid_is_inclusive() {
        let viewport = ViewportUpdate::new(0, 0, 1, 1);
        assert_eq!(viewport.grid(), Rectangle::new(0, 0, 2, 2));
        assert!(!viewport.is_inverted());
        assert!(ViewportUpdate::new(2, 0, 1, 1).is_inverted());
    }

    #[test]
    fn test_region_count_does_not_overflow() {
        assert_eq!(ViewportUpdate::new(0, 0, 1, 1).region_count(), 4);
        assert_eq!(ViewportUpdate::new(0, 0, i32::MAX, 0).region_count(), 1 << 31);
        assert_eq!(ViewportUpdate::new(i32::MAX, 0, i32::MAX, 0).region_count(), 1);
        assert_eq!(
            ViewportUpdate::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX).region_count(),
            i64::MAX
        );
        assert_eq!(ViewportUpdate::new(3, 0, 1, 0).region_count(), 0);
    }

    #[test]
    fn test_region_snapshot_through_frame() {
        let region = Region::new(RealmId(3), RegionCoord::new(1, -2)).with_layer(Layer::filled("grass", 7));
        let message = Message::from(RegionSnapshot::from(&region));

        let raw = message.to_frame(None).encode();
        let frame = Frame::decode(&raw).unwrap();
        assert_eq!(Message::decode(&frame).unwrap(), message);
    }

    #[test]
    fn test_entity_snapshot_carries_json_state() {
        let mut entity = Entity::new(
            RealmId(1),
            Vector2::new(4, 5),
            EntityKind::Drop(DropState {
                item: "carrot".to_string(),
            }),
        );
        entity.id = EntityId(12);
        let snapshot = EntitySnapshot::of(&entity).unwrap();
        assert_eq!(snapshot.kind, "drop");

        let decoded = Entity::decode(&snapshot.state).unwrap();
        assert_eq!(decoded, entity);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut payload = Message::from(ViewportUpdate::new(0, 0, 1, 1))
            .to_frame(None)
            .payload;
        payload.push(0);
        let frame = Frame::new(MessageType::ViewportUpdate, None, payload);
        assert!(matches!(
            Message::decode(&frame),
            Err(ProtocolError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_short_region_payload_rejected() {
        let frame = Frame::new(MessageType::RegionSnapshot, None, vec![0; 10]);
        assert!(Message::decode(&frame).is_err());
    }
}
