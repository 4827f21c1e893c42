//! Realms and regions
//!
//! A realm is a named map; its terrain is tiled into fixed 16×16 regions
//! addressed by grid coordinates. Each region also keeps an index of the
//! entities whose bounding boxes overlap it.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::game::entity::EntityId;
use crate::game::geometry::{Rectangle, Vector2};
use crate::store::object_store::{RecordId, Storable};

/// Region edge length, in tiles
pub const REGION_SIZE: i32 = 16;

/// Tiles per region layer
pub const REGION_AREA: usize = (REGION_SIZE * REGION_SIZE) as usize;

/// Passable in every direction
pub const PASSABLE_ALL: u8 = 0b1111;

/// Unique realm identifier (0 means unassigned)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RealmId(pub u64);

impl fmt::Display for RealmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RealmId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(RealmId)
    }
}

impl RecordId for RealmId {
    fn from_sequence(seq: u64) -> Option<Self> {
        Some(RealmId(seq))
    }
}

/// A map in the world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Realm {
    #[serde(default)]
    pub id: RealmId,
    pub name: String,
    /// Width in tiles
    pub width: i32,
    /// Height in tiles
    pub height: i32,
    /// Terrain names, bottom layer first
    #[serde(default)]
    pub terrain_layers: Vec<String>,
}

impl Realm {
    pub fn new(name: impl Into<String>, width: i32, height: i32) -> Self {
        Self {
            id: RealmId(0),
            name: name.into(),
            width,
            height,
            terrain_layers: Vec::new(),
        }
    }

    /// Realm bounds in tiles
    pub fn bounds(&self) -> Rectangle {
        Rectangle::new(0, 0, self.width, self.height)
    }

    /// Realm bounds in region-grid units
    pub fn region_extent(&self) -> Rectangle {
        Rectangle::new(
            0,
            0,
            (self.width + REGION_SIZE - 1) / REGION_SIZE,
            (self.height + REGION_SIZE - 1) / REGION_SIZE,
        )
    }
}

impl Storable for Realm {
    type Id = RealmId;

    fn id(&self) -> Option<RealmId> {
        (self.id.0 != 0).then_some(self.id)
    }

    fn set_id(&mut self, id: RealmId) {
        self.id = id;
    }

    fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(bytes: &[u8]) -> StoreResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn validate(&self) -> StoreResult<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(StoreError::Invalid(format!(
                "realm {} has empty dimensions {}x{}",
                self.name, self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Region-grid coordinate; the region covers tiles
/// `[arx*16, arx*16+16) × [ary*16, ary*16+16)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionCoord {
    pub arx: i32,
    pub ary: i32,
}

impl RegionCoord {
    pub const fn new(arx: i32, ary: i32) -> Self {
        Self { arx, ary }
    }

    /// Region holding a tile
    pub fn containing(point: Vector2) -> Self {
        Self::new(point.x.div_euclid(REGION_SIZE), point.y.div_euclid(REGION_SIZE))
    }

    /// Tile-space bounds of this region
    pub fn bounds(&self) -> Rectangle {
        Rectangle::new(
            self.arx * REGION_SIZE,
            self.ary * REGION_SIZE,
            REGION_SIZE,
            REGION_SIZE,
        )
    }

    /// Grid rectangle of every region overlapping a tile-space rectangle
    pub fn grid_covering(area: &Rectangle) -> Rectangle {
        if area.is_empty() {
            return Rectangle::default();
        }
        let top_left = Self::containing(area.top_left());
        let bottom_right = Self::containing(Vector2::new(area.right() - 1, area.bottom() - 1));
        Rectangle::from_corners(top_left.arx, top_left.ary, bottom_right.arx, bottom_right.ary)
    }

    /// Every coordinate inside a grid rectangle, row by row
    pub fn within(grid: &Rectangle) -> impl Iterator<Item = RegionCoord> {
        let grid = *grid;
        (grid.top..grid.bottom())
            .flat_map(move |ary| (grid.left..grid.right()).map(move |arx| RegionCoord::new(arx, ary)))
    }
}

impl fmt::Display for RegionCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.arx, self.ary)
    }
}

impl FromStr for RegionCoord {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("bad region key '{}'", s))?;
        let arx = x.trim().parse().map_err(|_| format!("bad region x in '{}'", s))?;
        let ary = y.trim().parse().map_err(|_| format!("bad region y in '{}'", s))?;
        Ok(RegionCoord::new(arx, ary))
    }
}

impl RecordId for RegionCoord {
    fn from_sequence(_seq: u64) -> Option<Self> {
        None
    }
}

/// One terrain layer: a tile index per cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub terrain: String,
    pub tiles: Vec<i16>,
}

impl Layer {
    pub fn filled(terrain: impl Into<String>, tile: i16) -> Self {
        Self {
            terrain: terrain.into(),
            tiles: vec![tile; REGION_AREA],
        }
    }
}

/// A 16×16 tile chunk of a realm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub realm_id: RealmId,
    pub location: RegionCoord,
    pub layers: Vec<Layer>,
    /// Direction bitmask per tile
    pub passabilities: Vec<u8>,
    /// Entities whose bounding box overlaps this region
    #[serde(default)]
    pub entity_ids: BTreeSet<EntityId>,
}

impl Region {
    /// A region with no layers where every tile is passable
    pub fn new(realm_id: RealmId, location: RegionCoord) -> Self {
        Self {
            realm_id,
            location,
            layers: Vec::new(),
            passabilities: vec![PASSABLE_ALL; REGION_AREA],
            entity_ids: BTreeSet::new(),
        }
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn bounds(&self) -> Rectangle {
        self.location.bounds()
    }
}

impl Storable for Region {
    type Id = RegionCoord;

    fn id(&self) -> Option<RegionCoord> {
        Some(self.location)
    }

    fn set_id(&mut self, id: RegionCoord) {
        self.location = id;
    }

    fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(bytes: &[u8]) -> StoreResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn validate(&self) -> StoreResult<()> {
        if self.passabilities.len() != REGION_AREA {
            return Err(StoreError::Invalid(format!(
                "region {} has {} passabilities, expected {}",
                self.location,
                self.passabilities.len(),
                REGION_AREA
            )));
        }
        for layer in &self.layers {
            if layer.tiles.len() != REGION_AREA {
                return Err(StoreError::Invalid(format!(
                    "region {} layer {} has {} tiles, expected {}",
                    self.location,
                    layer.terrain,
                    layer.tiles.len(),
                    REGION_AREA
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_bounds() {
        assert_eq!(RegionCoord::new(0, 0).bounds(), Rectangle::new(0, 0, 16, 16));
        assert_eq!(RegionCoord::new(2, -1).bounds(), Rectangle::new(32, -16, 16, 16));
    }

    #[test]
    fn test_containing_floors_negative() {
        assert_eq!(RegionCoord::containing(Vector2::new(15, 16)), RegionCoord::new(0, 1));
        assert_eq!(RegionCoord::containing(Vector2::new(-1, 0)), RegionCoord::new(-1, 0));
    }

    #[test]
    fn test_grid_covering_straddling_box() {
        // A 2x2 box straddling the corner of four regions
        let grid = RegionCoord::grid_covering(&Rectangle::new(15, 15, 2, 2));
        assert_eq!(grid, Rectangle::new(0, 0, 2, 2));
        let coords: Vec<_> = RegionCoord::within(&grid).collect();
        assert_eq!(
            coords,
            vec![
                RegionCoord::new(0, 0),
                RegionCoord::new(1, 0),
                RegionCoord::new(0, 1),
                RegionCoord::new(1, 1),
            ]
        );

        // Touching the exclusive edge does not count
        let grid = RegionCoord::grid_covering(&Rectangle::new(0, 0, 16, 16));
        assert_eq!(grid, Rectangle::new(0, 0, 1, 1));
    }

    #[test]
    fn test_region_key_round_trip() {
        let coord = RegionCoord::new(-3, 12);
        assert_eq!(coord.to_string(), "-3,12");
        assert_eq!("-3,12".parse::<RegionCoord>(), Ok(coord));
        assert!("3".parse::<RegionCoord>().is_err());
    }

    #[test]
    fn test_region_extent_rounds_up() {
        let realm = Realm::new("Overworld", 40, 16);
        assert_eq!(realm.region_extent(), Rectangle::new(0, 0, 3, 1));
    }

    #[test]
    fn test_region_validation() {
        let region = Region::new(RealmId(1), RegionCoord::new(0, 0)).with_layer(Layer::filled("grass", 0));
        assert!(region.validate().is_ok());

        let mut short = region.clone();
        short.passabilities.pop();
        assert!(matches!(short.validate(), Err(StoreError::Invalid(_))));

        let mut bad_layer = region;
        bad_layer.layers.push(Layer {
            terrain: "water".to_string(),
            tiles: vec![0; 3],
        });
        assert!(bad_layer.validate().is_err());
    }

    #[test]
    fn test_unassigned_realm_has_no_id() {
        let mut realm = Realm::new("Overworld", 16, 16);
        assert_eq!(realm.id(), None);
        realm.set_id(RealmId(4));
        assert_eq!(realm.id(), Some(RealmId(4)));
    }
}
