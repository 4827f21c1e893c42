//! Realm store
//!
//! Owns one [`RegionStore`] per realm. Saving or expiring a realm cascades
//! into its regions: a realm is not durable until its regions are.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::StoreResult;
use crate::game::realm::{Realm, RealmId};
use crate::store::backend::KeyValueBackend;
use crate::store::entity_store::EntityStore;
use crate::store::object_store::{Handle, ObjectStore};
use crate::store::region_store::RegionStore;

/// Namespace holding every realm
pub const REALMS_NAMESPACE: &str = "realms";

pub struct RealmStore {
    backend: Arc<dyn KeyValueBackend>,
    realms: ObjectStore<Realm>,
    regions: Mutex<HashMap<RealmId, Arc<RegionStore>>>,
    entities: Arc<EntityStore>,
}

impl RealmStore {
    pub(crate) fn new(backend: Arc<dyn KeyValueBackend>, entities: Arc<EntityStore>) -> Self {
        Self {
            realms: ObjectStore::new(REALMS_NAMESPACE, backend.clone()),
            backend,
            regions: Mutex::new(HashMap::new()),
            entities,
        }
    }

    /// Shared handle for a realm, loading it on first use
    pub async fn load(&self, id: RealmId) -> StoreResult<Handle<Realm>> {
        let realm = self.realms.load(id).await?;
        self.attach(&realm);
        Ok(realm)
    }

    /// Register a new realm and its (empty) region store
    pub async fn create(&self, realm: Realm) -> StoreResult<Handle<Realm>> {
        let realm = self.realms.create(realm).await?;
        self.attach(&realm);
        info!(realm_id = %realm.id(), name = %realm.read().name, "Created realm");
        Ok(realm)
    }

    /// The region store for a realm
    pub async fn regions(&self, id: RealmId) -> StoreResult<Arc<RegionStore>> {
        if let Some(regions) = self.regions.lock().get(&id) {
            return Ok(regions.clone());
        }
        let realm = self.load(id).await?;
        Ok(self.attach(&realm))
    }

    fn attach(&self, realm: &Handle<Realm>) -> Arc<RegionStore> {
        let id = realm.id();
        self.regions
            .lock()
            .entry(id)
            .or_insert_with(|| {
                let extent = realm.read().region_extent();
                Arc::new(RegionStore::new(id, extent, self.backend.clone(), self.entities.clone()))
            })
            .clone()
    }

    fn attached(&self, id: RealmId) -> Option<Arc<RegionStore>> {
        self.regions.lock().get(&id).cloned()
    }

    /// Save a realm, then every dirty region in it
    pub async fn save(&self, realm: &Handle<Realm>) -> StoreResult<usize> {
        let mut saved = usize::from(self.realms.save(realm).await?);
        if let Some(regions) = self.attached(realm.id()) {
            saved += regions.save_all().await?;
        }
        Ok(saved)
    }

    /// Save every live realm, cascading into regions
    pub async fn save_all(&self) -> StoreResult<usize> {
        let mut saved = 0;
        for realm in self.realms.handles() {
            saved += self.save(&realm).await?;
        }
        Ok(saved)
    }

    /// Expire a realm's clean regions, then the realm itself.
    ///
    /// The region store is dropped only once it holds nothing.
    pub fn expire(&self, id: RealmId) -> bool {
        let regions = self.attached(id);
        if let Some(regions) = &regions {
            regions.expire_all();
        }
        let expired = self.realms.expire(id);
        if expired && regions.map_or(true, |r| r.is_empty()) {
            self.regions.lock().remove(&id);
            debug!(realm_id = %id, "Expired realm");
        }
        expired
    }

    pub fn expire_all(&self) -> usize {
        self.realms
            .handles()
            .into_iter()
            .map(|realm| realm.id())
            .filter(|id| self.expire(*id))
            .count()
    }

    /// Entity store shared by every region store
    pub fn entities(&self) -> Arc<EntityStore> {
        self.entities.clone()
    }

    pub fn cached(&self, id: RealmId) -> Option<Handle<Realm>> {
        self.realms.cached(id)
    }

    pub async fn ids(&self) -> StoreResult<Vec<RealmId>> {
        self.realms.ids().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::game::realm::{Region, RegionCoord};
    use crate::store::game_store::GameStore;
    use crate::store::memory::MemoryBackend;

    #[tokio::test]
    async fn test_save_and_expire_cascade_into_regions() {
        let store = GameStore::new(Arc::new(MemoryBackend::new()), &StoreConfig::default());
        let realms = store.realms();
        let realm = realms.create(Realm::new("Marsh", 32, 16)).await.unwrap();
        let id = realm.id();
        for arx in 0..2 {
            store
                .create_region(Region::new(id, RegionCoord::new(arx, 0)))
                .await
                .unwrap();
        }

        // Nothing is saved yet, so nothing expires
        let regions = realms.regions(id).await.unwrap();
        assert_eq!(regions.len(), 2);
        drop(regions);
        drop(realm);
        assert!(!realms.expire(id));

        let realm = realms.cached(id).unwrap();
        assert_eq!(realms.save(&realm).await.unwrap(), 3);
        drop(realm);
        assert!(realms.expire(id));
        assert!(realms.cached(id).is_none());
        assert!(realms.attached(id).is_none());
    }

    #[tokio::test]
    async fn test_regions_load_realm_lazily() {
        let backend = Arc::new(MemoryBackend::new());
        let id = {
            let store = GameStore::new(backend.clone(), &StoreConfig::default());
            let realm = store.create_realm(Realm::new("Dunes", 16, 16)).await.unwrap();
            store
                .create_region(Region::new(realm.id(), RegionCoord::new(0, 0)))
                .await
                .unwrap();
            store.save_all().await.unwrap();
            realm.id()
        };

        let store = GameStore::new(backend, &StoreConfig::default());
        assert!(store.realms().cached(id).is_none());
        let regions = store.realms().regions(id).await.unwrap();
        assert!(store.realms().cached(id).is_some());
        assert_eq!(regions.ids().await.unwrap(), vec![RegionCoord::new(0, 0)]);
        let missing = store.realms().regions(RealmId(id.0 + 1)).await;
        assert!(matches!(missing, Err(e) if e.is_not_found()));
    }
}
