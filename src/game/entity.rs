//! Entities
//!
//! Everything placed in a realm is an [`Entity`]: a shared base (position,
//! bounding box, facing) plus a kind-specific payload held in the
//! [`EntityKind`] tagged union. Records carry their kind tag in the base
//! header; loading looks the tag up in [`Entity::KINDS`].

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::game::geometry::{Rectangle, Vector2};
use crate::game::realm::{RealmId, RegionCoord};
use crate::store::object_store::{decode_polymorphic, KindConstructor, Polymorphic, RecordId, Storable};

/// Unique entity identifier (0 means unassigned)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(EntityId)
    }
}

impl RecordId for EntityId {
    fn from_sequence(seq: u64) -> Option<Self> {
        Some(EntityId(seq))
    }
}

/// Facing direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    East,
    #[default]
    South,
    West,
}

/// Player-controlled actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub name: String,
    pub gender: String,
    pub body: String,
    pub health: i32,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub inventory: Vec<String>,
}

/// Server-controlled actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcState {
    pub name: String,
    pub body: String,
    pub health: i32,
    #[serde(default)]
    pub behavior: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingState {
    /// Tile offset of the door along the building's front
    pub door_location: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeState {
    pub species: String,
    pub growth_stage: u8,
}

/// An item lying on the ground
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropState {
    pub item: String,
}

/// Kind-specific entity payload
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Player(PlayerState),
    Npc(NpcState),
    Building(BuildingState),
    Tree(TreeState),
    Drop(DropState),
}

impl EntityKind {
    /// Kind tag stored in the record header
    pub fn tag(&self) -> &'static str {
        match self {
            EntityKind::Player(_) => "player",
            EntityKind::Npc(_) => "npc",
            EntityKind::Building(_) => "building",
            EntityKind::Tree(_) => "tree",
            EntityKind::Drop(_) => "drop",
        }
    }
}

/// Stored layout: base header fields plus the kind payload under `state`
#[derive(Serialize, Deserialize)]
struct EntityRecord<S> {
    id: EntityId,
    kind: String,
    realm_id: RealmId,
    location: Vector2,
    bbox: Rectangle,
    #[serde(default)]
    direction: Direction,
    state: S,
}

/// A placed entity
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub realm_id: RealmId,
    pub location: Vector2,
    /// Bounding box relative to `location`
    pub bbox: Rectangle,
    pub direction: Direction,
    pub kind: EntityKind,
}

impl Entity {
    /// A new, unassigned entity with a 1×1 bounding box
    pub fn new(realm_id: RealmId, location: Vector2, kind: EntityKind) -> Self {
        Self {
            id: EntityId(0),
            realm_id,
            location,
            bbox: Rectangle::new(0, 0, 1, 1),
            direction: Direction::default(),
            kind,
        }
    }

    pub fn with_bbox(mut self, bbox: Rectangle) -> Self {
        self.bbox = bbox;
        self
    }

    pub fn kind_tag(&self) -> &'static str {
        self.kind.tag()
    }

    /// Bounding box in realm tile space
    pub fn absolute_bbox(&self) -> Rectangle {
        self.bbox.offset(self.location)
    }

    /// Grid rectangle of the regions this entity overlaps
    pub fn region_grid(&self) -> Rectangle {
        RegionCoord::grid_covering(&self.absolute_bbox())
    }

    pub fn is_player(&self) -> bool {
        matches!(self.kind, EntityKind::Player(_))
    }

    pub fn player(&self) -> Option<&PlayerState> {
        match &self.kind {
            EntityKind::Player(state) => Some(state),
            _ => None,
        }
    }

    pub fn player_mut(&mut self) -> Option<&mut PlayerState> {
        match &mut self.kind {
            EntityKind::Player(state) => Some(state),
            _ => None,
        }
    }

    fn to_record<'a, S>(&self, state: &'a S) -> EntityRecord<&'a S> {
        EntityRecord {
            id: self.id,
            kind: self.kind_tag().to_string(),
            realm_id: self.realm_id,
            location: self.location,
            bbox: self.bbox,
            direction: self.direction,
            state,
        }
    }

    fn from_record<S: DeserializeOwned>(bytes: &[u8], wrap: fn(S) -> EntityKind) -> StoreResult<Self> {
        let record: EntityRecord<S> = serde_json::from_slice(bytes)?;
        Ok(Self {
            id: record.id,
            realm_id: record.realm_id,
            location: record.location,
            bbox: record.bbox,
            direction: record.direction,
            kind: wrap(record.state),
        })
    }
}

fn decode_player(bytes: &[u8]) -> StoreResult<Entity> {
    Entity::from_record(bytes, EntityKind::Player)
}

fn decode_npc(bytes: &[u8]) -> StoreResult<Entity> {
    Entity::from_record(bytes, EntityKind::Npc)
}

fn decode_building(bytes: &[u8]) -> StoreResult<Entity> {
    Entity::from_record(bytes, EntityKind::Building)
}

fn decode_tree(bytes: &[u8]) -> StoreResult<Entity> {
    Entity::from_record(bytes, EntityKind::Tree)
}

fn decode_drop(bytes: &[u8]) -> StoreResult<Entity> {
    Entity::from_record(bytes, EntityKind::Drop)
}

impl Polymorphic for Entity {
    const KINDS: &'static [(&'static str, KindConstructor<Self>)] = &[
        ("player", decode_player),
        ("npc", decode_npc),
        ("building", decode_building),
        ("tree", decode_tree),
        ("drop", decode_drop),
    ];
}

impl Storable for Entity {
    type Id = EntityId;

    fn id(&self) -> Option<EntityId> {
        (self.id.0 != 0).then_some(self.id)
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn encode(&self) -> StoreResult<Vec<u8>> {
        let bytes = match &self.kind {
            EntityKind::Player(state) => serde_json::to_vec(&self.to_record(state)),
            EntityKind::Npc(state) => serde_json::to_vec(&self.to_record(state)),
            EntityKind::Building(state) => serde_json::to_vec(&self.to_record(state)),
            EntityKind::Tree(state) => serde_json::to_vec(&self.to_record(state)),
            EntityKind::Drop(state) => serde_json::to_vec(&self.to_record(state)),
        }?;
        Ok(bytes)
    }

    fn decode(bytes: &[u8]) -> StoreResult<Self> {
        decode_polymorphic(bytes)
    }

    fn validate(&self) -> StoreResult<()> {
        if self.bbox.is_empty() {
            return Err(StoreError::Invalid(format!("entity {} has an empty bounding box", self.id)));
        }
        if self.realm_id.0 == 0 {
            return Err(StoreError::Invalid(format!("entity {} has no realm", self.id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn player(name: &str) -> EntityKind {
        EntityKind::Player(PlayerState {
            name: name.to_string(),
            gender: "female".to_string(),
            body: "light".to_string(),
            health: 100,
            online: false,
            inventory: vec!["wooden sword".to_string()],
        })
    }

    #[test]
    fn test_encode_decode_each_kind() {
        let kinds = [
            player("ada"),
            EntityKind::Npc(NpcState {
                name: "guard".to_string(),
                body: "dark".to_string(),
                health: 50,
                behavior: "wander".to_string(),
            }),
            EntityKind::Building(BuildingState { door_location: 2 }),
            EntityKind::Tree(TreeState {
                species: "oak".to_string(),
                growth_stage: 3,
            }),
            EntityKind::Drop(DropState {
                item: "carrot".to_string(),
            }),
        ];

        for (i, kind) in kinds.into_iter().enumerate() {
            let mut entity = Entity::new(RealmId(1), Vector2::new(3, 4), kind);
            entity.set_id(EntityId(i as u64 + 1));
            let decoded = Entity::decode(&entity.encode().unwrap()).unwrap();
            assert_eq!(decoded, entity);
        }
    }

    #[test]
    fn test_kind_tag_in_header() {
        let mut entity = Entity::new(RealmId(1), Vector2::new(0, 0), player("ada"));
        entity.set_id(EntityId(7));
        let json: serde_json::Value = serde_json::from_slice(&entity.encode().unwrap()).unwrap();
        assert_eq!(json["kind"], "player");
        assert_eq!(json["id"], 7);
        assert_eq!(json["state"]["name"], "ada");
    }

    #[test]
    fn test_unknown_kind_fails() {
        let bytes = br#"{"id":1,"kind":"dragon","realm_id":1,"location":{"x":0,"y":0},
            "bbox":{"left":0,"top":0,"width":1,"height":1},"state":{}}"#;
        let err = Entity::decode(bytes).unwrap_err();
        assert!(matches!(err, StoreError::UnknownKind(ref k) if k == "dragon"));
    }

    #[test]
    fn test_absolute_bbox() {
        let entity = Entity::new(RealmId(1), Vector2::new(15, 15), player("ada"))
            .with_bbox(Rectangle::new(0, 0, 2, 2));
        assert_eq!(entity.absolute_bbox(), Rectangle::new(15, 15, 2, 2));
        assert_eq!(entity.region_grid(), Rectangle::new(0, 0, 2, 2));
    }

    #[test]
    fn test_validation() {
        let entity = Entity::new(RealmId(0), Vector2::new(0, 0), player("ada"));
        assert!(entity.validate().is_err());

        let entity = Entity::new(RealmId(1), Vector2::new(0, 0), player("ada"))
            .with_bbox(Rectangle::new(0, 0, 0, 1));
        assert!(entity.validate().is_err());
    }
}
