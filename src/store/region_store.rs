//! Region store
//!
//! One `RegionStore` per realm, over the `realms.<id>.regions` namespace.
//! Region records only hold entity ids; [`RegionStore::find`] resolves them
//! through the shared [`EntityStore`] on every call, so an entity move is
//! visible to the next region read without invalidating anything.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::game::entity::Entity;
use crate::game::geometry::{Rectangle, Vector2};
use crate::game::realm::{RealmId, Region, RegionCoord};
use crate::store::backend::KeyValueBackend;
use crate::store::entity_store::EntityStore;
use crate::store::object_store::{Handle, ObjectStore};

/// A region together with its resident entities
#[derive(Clone)]
pub struct LoadedRegion {
    pub region: Handle<Region>,
    pub entities: Vec<Handle<Entity>>,
}

impl LoadedRegion {
    pub fn location(&self) -> RegionCoord {
        self.region.id()
    }
}

pub struct RegionStore {
    realm_id: RealmId,
    /// Realm bounds in region-grid units
    extent: Rectangle,
    regions: ObjectStore<Region>,
    entities: Arc<EntityStore>,
}

impl RegionStore {
    pub(crate) fn new(
        realm_id: RealmId,
        extent: Rectangle,
        backend: Arc<dyn KeyValueBackend>,
        entities: Arc<EntityStore>,
    ) -> Self {
        Self {
            realm_id,
            extent,
            regions: ObjectStore::new(Self::namespace_for(realm_id), backend),
            entities,
        }
    }

    pub fn namespace_for(realm_id: RealmId) -> String {
        format!("realms.{}.regions", realm_id)
    }

    pub fn realm_id(&self) -> RealmId {
        self.realm_id
    }

    pub fn extent(&self) -> Rectangle {
        self.extent
    }

    /// Shared handle for a region, without resolving entities
    pub async fn load(&self, location: RegionCoord) -> StoreResult<Handle<Region>> {
        if let Some(region) = self.regions.cached(location) {
            return Ok(region);
        }
        let region = self.read(location).await?;
        Ok(self.regions.adopt(location, region))
    }

    /// Uncached read. A record owned by another realm is corrupt.
    async fn read(&self, location: RegionCoord) -> StoreResult<Region> {
        let region = self.regions.find(location).await?;
        if region.realm_id != self.realm_id {
            return Err(StoreError::Corrupt {
                key: format!("{}/{}", self.regions.namespace(), location),
                reason: format!("region belongs to realm {}", region.realm_id),
            });
        }
        Ok(region)
    }

    /// Load a region and resolve its resident entities
    pub async fn find(&self, location: RegionCoord) -> StoreResult<LoadedRegion> {
        let region = self.load(location).await?;
        let ids: Vec<_> = region.read().entity_ids.iter().copied().collect();
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            entities.push(self.entities.load(id).await?);
        }
        Ok(LoadedRegion { region, entities })
    }

    /// Register a new region. Fails if the coordinate is taken.
    pub async fn create(&self, region: Region) -> StoreResult<Handle<Region>> {
        if region.realm_id != self.realm_id {
            return Err(StoreError::Invalid(format!(
                "region {} belongs to realm {}, not {}",
                region.location, region.realm_id, self.realm_id
            )));
        }
        if self.regions.cached(region.location).is_some() {
            return Err(StoreError::Invalid(format!("region {} already exists", region.location)));
        }
        match self.read(region.location).await {
            Ok(_) => {
                return Err(StoreError::Invalid(format!(
                    "region {} already exists",
                    region.location
                )))
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.regions.insert(region)
    }

    /// Region-grid coordinates inside `grid`, clamped to the realm extent
    pub fn coords_within(&self, grid: &Rectangle) -> Vec<RegionCoord> {
        match grid.intersection(&self.extent) {
            Some(clamped) => RegionCoord::within(&clamped).collect(),
            None => Vec::new(),
        }
    }

    /// Every existing region inside a region-grid rectangle.
    ///
    /// Coordinates with no stored region are skipped.
    pub async fn load_within(
        &self,
        grid: &Rectangle,
    ) -> StoreResult<BTreeMap<RegionCoord, Handle<Region>>> {
        let mut found = BTreeMap::new();
        for coord in self.coords_within(grid) {
            match self.load(coord).await {
                Ok(region) => {
                    found.insert(coord, region);
                }
                Err(e) if e.is_not_found() => trace!(realm_id = %self.realm_id, region = %coord, "No region"),
                Err(e) => return Err(e),
            }
        }
        Ok(found)
    }

    /// Every existing region overlapping a tile-space rectangle
    pub async fn load_intersecting(
        &self,
        area: &Rectangle,
    ) -> StoreResult<BTreeMap<RegionCoord, Handle<Region>>> {
        self.load_within(&RegionCoord::grid_covering(area)).await
    }

    /// The region holding a tile, or the nearest one inside the realm
    pub async fn load_closest(&self, location: Vector2) -> StoreResult<Handle<Region>> {
        let coord = RegionCoord::containing(location);
        let clamped = RegionCoord::new(
            coord.arx.clamp(self.extent.left, (self.extent.right() - 1).max(self.extent.left)),
            coord.ary.clamp(self.extent.top, (self.extent.bottom() - 1).max(self.extent.top)),
        );
        self.load(clamped).await
    }

    pub async fn save(&self, region: &Handle<Region>) -> StoreResult<bool> {
        self.regions.save(region).await
    }

    pub async fn save_all(&self) -> StoreResult<usize> {
        self.regions.save_all().await
    }

    pub fn expire(&self, location: RegionCoord) -> bool {
        self.regions.expire(location)
    }

    pub fn expire_all(&self) -> usize {
        self.regions.expire_all()
    }

    /// Every region coordinate stored for this realm
    pub async fn ids(&self) -> StoreResult<Vec<RegionCoord>> {
        self.regions.ids().await
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::game::realm::Realm;
    use crate::store::game_store::GameStore;
    use crate::store::memory::MemoryBackend;
    use crate::store::object_store::Storable;
    use pretty_assertions::assert_eq;

    /// A 3x2 region realm with (1,1) left out
    async fn holey() -> (GameStore, Arc<RegionStore>) {
        let store = GameStore::new(Arc::new(MemoryBackend::new()), &StoreConfig::default());
        let realm = store.create_realm(Realm::new("Holey", 48, 32)).await.unwrap();
        for coord in RegionCoord::within(&Rectangle::new(0, 0, 3, 2)) {
            if coord != RegionCoord::new(1, 1) {
                store.create_region(Region::new(realm.id(), coord)).await.unwrap();
            }
        }
        let regions = store.realms().regions(realm.id()).await.unwrap();
        (store, regions)
    }

    #[tokio::test]
    async fn test_load_within_skips_missing_and_clamps() {
        let (_store, regions) = holey().await;
        let found = regions.load_within(&Rectangle::new(-5, -5, 20, 20)).await.unwrap();
        let coords: Vec<_> = found.keys().copied().collect();
        assert_eq!(
            coords,
            vec![
                RegionCoord::new(0, 0),
                RegionCoord::new(0, 1),
                RegionCoord::new(1, 0),
                RegionCoord::new(2, 0),
                RegionCoord::new(2, 1),
            ]
        );
        assert!(regions.coords_within(&Rectangle::new(10, 10, 2, 2)).is_empty());
    }

    #[tokio::test]
    async fn test_load_intersecting_uses_tile_space() {
        let (_store, regions) = holey().await;
        let found = regions.load_intersecting(&Rectangle::new(10, 2, 10, 4)).await.unwrap();
        let coords: Vec<_> = found.keys().copied().collect();
        assert_eq!(coords, vec![RegionCoord::new(0, 0), RegionCoord::new(1, 0)]);
    }

    #[tokio::test]
    async fn test_load_closest_clamps_to_extent() {
        let (_store, regions) = holey().await;
        let region = regions.load_closest(Vector2::new(500, -40)).await.unwrap();
        assert_eq!(region.id(), RegionCoord::new(2, 0));
        let region = regions.load_closest(Vector2::new(3, 20)).await.unwrap();
        assert_eq!(region.id(), RegionCoord::new(0, 1));
    }

    #[tokio::test]
    async fn test_foreign_region_record_is_corrupt() {
        let (store, regions) = holey().await;
        let location = RegionCoord::new(1, 1);
        let foreign = Region::new(RealmId(regions.realm_id().0 + 1), location);
        store
            .backend()
            .set(
                &RegionStore::namespace_for(regions.realm_id()),
                &location.to_string(),
                foreign.encode().unwrap(),
            )
            .await
            .unwrap();

        let err = regions.load(location).await.err().unwrap();
        assert!(matches!(err, StoreError::Corrupt { .. }), "{}", err);
        assert!(regions.find(location).await.is_err());
        assert!(regions.regions.cached(location).is_none());

        // Range queries surface it instead of skipping it
        assert!(regions.load_within(&Rectangle::new(0, 0, 3, 2)).await.is_err());
    }

    #[tokio::test]
    async fn test_create_checks_owner_and_duplicates() {
        let (_store, regions) = holey().await;
        let other = Region::new(RealmId(regions.realm_id().0 + 1), RegionCoord::new(1, 1));
        assert!(matches!(regions.create(other).await, Err(StoreError::Invalid(_))));

        regions.save_all().await.unwrap();
        regions.expire_all();
        let dup = Region::new(regions.realm_id(), RegionCoord::new(0, 0));
        assert!(matches!(regions.create(dup).await, Err(StoreError::Invalid(_))));

        let fill = Region::new(regions.realm_id(), RegionCoord::new(1, 1));
        assert!(regions.create(fill).await.is_ok());
    }
}
