//! Game store
//!
//! The single store context for a server instance: realms (with their
//! regions), entities, and the cross-process advisory lock.
//!
//! The lock is a backend-resident key holding the owner's token. It is only
//! advisory: the backend does not stop a writer that never asked for it.
//! With a lease TTL a crashed holder's lock lapses on its own; without one,
//! [`GameStore::force_unlock`] is the recovery path.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::game::entity::{Entity, EntityId};
use crate::game::geometry::Vector2;
use crate::game::realm::{Realm, RealmId, Region, RegionCoord};
use crate::store::backend::KeyValueBackend;
use crate::store::entity_store::EntityStore;
use crate::store::object_store::Handle;
use crate::store::realm_store::RealmStore;

/// Regions an entity entered and left when it moved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relocation {
    pub entered: Vec<RegionCoord>,
    pub left: Vec<RegionCoord>,
    /// Regions occupied after the move
    pub occupied: Vec<RegionCoord>,
}

/// Counts from a full save
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Realms and regions written
    pub realms: usize,
    pub entities: usize,
}

impl SaveReport {
    pub fn total(&self) -> usize {
        self.realms + self.entities
    }
}

/// Lock timing
#[derive(Debug, Clone)]
struct LockSettings {
    key: String,
    retry: Duration,
    ttl: Option<Duration>,
    wait: Option<Duration>,
}

pub struct GameStore {
    backend: Arc<dyn KeyValueBackend>,
    realms: Arc<RealmStore>,
    entities: Arc<EntityStore>,
    lock: LockSettings,
    owner: String,
    held: AtomicBool,
}

impl GameStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>, config: &StoreConfig) -> Self {
        let realms = Arc::new_cyclic(|weak_realms| {
            let entities = Arc::new(EntityStore::new(backend.clone(), weak_realms.clone()));
            RealmStore::new(backend.clone(), entities)
        });
        let entities = realms.entities();

        Self {
            backend,
            realms,
            entities,
            lock: LockSettings {
                key: config.lock_key.clone(),
                retry: config.lock_retry(),
                ttl: config.lock_ttl(),
                wait: config.lock_wait(),
            },
            owner: Uuid::new_v4().to_string(),
            held: AtomicBool::new(false),
        }
    }

    pub fn realms(&self) -> &Arc<RealmStore> {
        &self.realms
    }

    pub fn entities(&self) -> &Arc<EntityStore> {
        &self.entities
    }

    pub fn backend(&self) -> &Arc<dyn KeyValueBackend> {
        &self.backend
    }

    /// Token identifying this store as a lock owner
    pub fn owner(&self) -> &str {
        &self.owner
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    pub async fn create_realm(&self, realm: Realm) -> StoreResult<Handle<Realm>> {
        self.realms.create(realm).await
    }

    pub async fn create_region(&self, region: Region) -> StoreResult<Handle<Region>> {
        let regions = self.realms.regions(region.realm_id).await?;
        regions.create(region).await
    }

    /// Create an entity and add it to every region its bounding box overlaps
    pub async fn create_entity(&self, entity: Entity) -> StoreResult<Handle<Entity>> {
        let entity = self.entities.create(entity).await?;
        let (id, realm_id, grid) = {
            let e = entity.read();
            (e.id, e.realm_id, e.region_grid())
        };
        let regions = self.realms.regions(realm_id).await?;
        for region in regions.load_within(&grid).await?.into_values() {
            region.write().entity_ids.insert(id);
        }
        debug!(entity_id = %id, realm_id = %realm_id, "Created entity");
        Ok(entity)
    }

    /// Realm an entity lives in
    pub async fn entity_realm(&self, entity: &Handle<Entity>) -> StoreResult<Handle<Realm>> {
        let realm_id = entity.read().realm_id;
        self.entities.realm(realm_id).await
    }

    /// Move an entity and update region indexes on both sides
    pub async fn relocate_entity(&self, id: EntityId, location: Vector2) -> StoreResult<Relocation> {
        let entity = self.entities.load(id).await?;
        let (realm_id, before) = {
            let e = entity.read();
            (e.realm_id, e.region_grid())
        };
        let after = {
            let mut e = entity.write();
            e.location = location;
            e.region_grid()
        };

        let regions = self.realms.regions(realm_id).await?;
        let old: BTreeSet<_> = regions.load_within(&before).await?.into_keys().collect();
        let new = regions.load_within(&after).await?;

        let mut relocation = Relocation::default();
        for coord in old.iter().filter(|coord| !new.contains_key(*coord)) {
            let region = regions.load(*coord).await?;
            region.write().entity_ids.remove(&id);
            relocation.left.push(*coord);
        }
        for (coord, region) in &new {
            if !old.contains(coord) {
                region.write().entity_ids.insert(id);
                relocation.entered.push(*coord);
            }
            relocation.occupied.push(*coord);
        }
        Ok(relocation)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Save realms (cascading into regions), then entities
    pub async fn save_all(&self) -> StoreResult<SaveReport> {
        let realms = self.realms.save_all().await?;
        let entities = self.entities.save_all().await?;
        let report = SaveReport { realms, entities };
        if report.total() > 0 {
            info!(realms = realms, entities = entities, "Saved dirty records");
        }
        Ok(report)
    }

    /// Drop every clean, unreferenced record from memory
    pub fn expire_all(&self) -> usize {
        self.realms.expire_all() + self.entities.expire_all()
    }

    // ------------------------------------------------------------------
    // Global lock
    // ------------------------------------------------------------------

    /// Block until the global lock is ours.
    ///
    /// With a configured wait bound, gives up with `LockContention`.
    pub async fn lock(&self) -> StoreResult<()> {
        let deadline = self.lock.wait.map(|wait| Instant::now() + wait);
        let mut announced = false;

        loop {
            match self.try_lock().await {
                Ok(()) => return Ok(()),
                Err(StoreError::LockContention { key, holder }) => {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        return Err(StoreError::LockContention { key, holder });
                    }
                    if !announced {
                        info!(lock = %key, holder = %holder, "Waiting for global lock");
                        announced = true;
                    }
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.lock.retry).await;
        }
    }

    /// Take the global lock if it is free
    pub async fn try_lock(&self) -> StoreResult<()> {
        if self
            .backend
            .acquire_lock(&self.lock.key, &self.owner, self.lock.ttl)
            .await?
        {
            self.held.store(true, Ordering::SeqCst);
            info!(lock = %self.lock.key, owner = %self.owner, "Acquired global lock");
            return Ok(());
        }
        let holder = self
            .backend
            .lock_holder(&self.lock.key)
            .await?
            .unwrap_or_else(|| "unknown".to_string());
        Err(StoreError::LockContention {
            key: self.lock.key.clone(),
            holder,
        })
    }

    /// Release the global lock if we hold it. Returns whether it was ours.
    pub async fn unlock(&self) -> StoreResult<bool> {
        let released = self.backend.release_lock(&self.lock.key, &self.owner).await?;
        self.held.store(false, Ordering::SeqCst);
        if released {
            info!(lock = %self.lock.key, "Released global lock");
        } else {
            warn!(lock = %self.lock.key, "Global lock was not held by this store");
        }
        Ok(released)
    }

    /// Break the global lock whoever holds it
    pub async fn force_unlock(&self) -> StoreResult<bool> {
        let holder = self.backend.lock_holder(&self.lock.key).await?;
        let removed = self.backend.force_release_lock(&self.lock.key).await?;
        self.held.store(false, Ordering::SeqCst);
        warn!(
            lock = %self.lock.key,
            holder = holder.as_deref().unwrap_or("none"),
            "Forcibly released global lock"
        );
        Ok(removed)
    }

    /// Extend our lease. Fails with `LockContention` if it was lost.
    pub async fn renew_lock(&self) -> StoreResult<()> {
        let Some(ttl) = self.lock.ttl else {
            return Ok(());
        };
        if self.backend.renew_lock(&self.lock.key, &self.owner, ttl).await? {
            return Ok(());
        }
        self.held.store(false, Ordering::SeqCst);
        let holder = self
            .backend
            .lock_holder(&self.lock.key)
            .await?
            .unwrap_or_else(|| "nobody".to_string());
        Err(StoreError::LockContention {
            key: self.lock.key.clone(),
            holder,
        })
    }

    /// Current lock holder, if any
    pub async fn lock_holder(&self) -> StoreResult<Option<String>> {
        self.backend.lock_holder(&self.lock.key).await
    }

    /// Whether this store believes it holds the lock
    pub fn holds_lock(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}
