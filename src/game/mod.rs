//! Game module
//!
//! The world model and the maintenance passes that run over it:
//! - Geometry (tile-space vectors and rectangles)
//! - Realms, regions and their tile layers
//! - Entities and their kind-specific state
//! - One-time world seeding and region index repair

pub mod entity;
pub mod geometry;
pub mod realm;
pub mod repair;
pub mod seed;

pub use entity::{Direction, Entity, EntityId, EntityKind};
pub use geometry::{Rectangle, Vector2};
pub use realm::{Layer, Realm, RealmId, Region, RegionCoord, REGION_SIZE};
