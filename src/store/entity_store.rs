//! Entity store
//!
//! Entities are polymorphic: loads go through the kind registry. The realm
//! back-reference is resolved on first load so a dangling `realm_id`
//! surfaces as `NotFound` instead of a half-loaded entity.

use std::sync::{Arc, Weak};

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::game::entity::{Entity, EntityId};
use crate::game::realm::{Realm, RealmId};
use crate::store::backend::KeyValueBackend;
use crate::store::object_store::{Handle, ObjectStore};
use crate::store::realm_store::RealmStore;

/// Namespace holding every entity
pub const ENTITIES_NAMESPACE: &str = "entities";

pub struct EntityStore {
    entities: ObjectStore<Entity>,
    realms: Weak<RealmStore>,
}

impl EntityStore {
    pub(crate) fn new(backend: Arc<dyn KeyValueBackend>, realms: Weak<RealmStore>) -> Self {
        Self {
            entities: ObjectStore::new(ENTITIES_NAMESPACE, backend),
            realms,
        }
    }

    /// Shared handle for an entity, loading it and its realm on first use
    pub async fn load(&self, id: EntityId) -> StoreResult<Handle<Entity>> {
        if let Some(handle) = self.entities.cached(id) {
            return Ok(handle);
        }
        let entity = self.entities.find_polymorphic(id).await?;
        self.realm(entity.realm_id).await?;
        debug!(entity_id = %id, kind = entity.kind_tag(), "Loaded entity");
        Ok(self.entities.adopt(id, entity))
    }

    /// Uncached read
    pub async fn find(&self, id: EntityId) -> StoreResult<Entity> {
        self.entities.find_polymorphic(id).await
    }

    pub fn cached(&self, id: EntityId) -> Option<Handle<Entity>> {
        self.entities.cached(id)
    }

    /// Realm an entity lives in
    pub async fn realm(&self, realm_id: RealmId) -> StoreResult<Handle<Realm>> {
        let realms = self
            .realms
            .upgrade()
            .ok_or_else(|| StoreError::Backend("realm store dropped".to_string()))?;
        realms.load(realm_id).await
    }

    /// Register a new entity. Its realm must exist.
    ///
    /// Does not touch region indexes; see `GameStore::create_entity`.
    pub async fn create(&self, entity: Entity) -> StoreResult<Handle<Entity>> {
        self.realm(entity.realm_id).await?;
        self.entities.create(entity).await
    }

    pub async fn save(&self, handle: &Handle<Entity>) -> StoreResult<bool> {
        self.entities.save(handle).await
    }

    pub async fn save_all(&self) -> StoreResult<usize> {
        self.entities.save_all().await
    }

    pub fn expire(&self, id: EntityId) -> bool {
        self.entities.expire(id)
    }

    pub fn expire_all(&self) -> usize {
        self.entities.expire_all()
    }

    pub async fn ids(&self) -> StoreResult<Vec<EntityId>> {
        self.entities.ids().await
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
