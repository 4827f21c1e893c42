//! Region index repair
//!
//! Regions index the entities whose bounding box overlaps them. The index is
//! written from two sides (region records and entity moves), so a crash or a
//! hand edit can leave it out of step. [`repair`] restores it:
//!
//! - every region drops ids of entities that no longer exist, live in another
//!   realm, or no longer overlap it
//! - every entity is added to each existing region it overlaps but is missing from
//!
//! Entities whose realm is gone are reported as orphans and left alone.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::game::entity::{Entity, EntityId};
use crate::game::realm::{RealmId, RegionCoord};
use crate::store::GameStore;

/// What a repair pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub realms: usize,
    pub regions_scanned: usize,
    pub entities_scanned: usize,
    /// Region references removed
    pub dropped: usize,
    /// Region references added
    pub added: usize,
    /// Entities pointing at a missing realm
    pub orphaned: usize,
}

impl RepairReport {
    pub fn changed(&self) -> bool {
        self.dropped > 0 || self.added > 0
    }
}

impl fmt::Display for RepairReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} realms, {} regions, {} entities scanned; {} references dropped, {} added, {} orphaned entities",
            self.realms,
            self.regions_scanned,
            self.entities_scanned,
            self.dropped,
            self.added,
            self.orphaned
        )
    }
}

/// One broken index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Violation {
    /// Region lists an entity that does not overlap it
    Stale {
        realm_id: RealmId,
        region: RegionCoord,
        entity_id: EntityId,
    },
    /// Entity overlaps a region that does not list it
    Missing {
        realm_id: RealmId,
        region: RegionCoord,
        entity_id: EntityId,
    },
}

/// Latest known state of an entity, preferring the live copy
async fn current_entity(store: &GameStore, id: EntityId) -> StoreResult<Option<Entity>> {
    if let Some(handle) = store.entities().cached(id) {
        return Ok(Some(handle.read().clone()));
    }
    match store.entities().find(id).await {
        Ok(entity) => Ok(Some(entity)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Every entity grouped by realm, plus the ids of orphans
async fn entities_by_realm(
    store: &GameStore,
    realms: &BTreeSet<RealmId>,
) -> StoreResult<(HashMap<RealmId, Vec<Entity>>, Vec<EntityId>)> {
    let mut grouped: HashMap<RealmId, Vec<Entity>> = HashMap::new();
    let mut orphans = Vec::new();
    for id in store.entities().ids().await? {
        let Some(entity) = current_entity(store, id).await? else {
            continue;
        };
        if realms.contains(&entity.realm_id) {
            grouped.entry(entity.realm_id).or_default().push(entity);
        } else {
            orphans.push(id);
        }
    }
    Ok((grouped, orphans))
}

/// List index violations without changing anything
pub async fn find_violations(store: &GameStore) -> StoreResult<Vec<Violation>> {
    let realm_ids: BTreeSet<RealmId> = store.realms().ids().await?.into_iter().collect();
    let (grouped, _) = entities_by_realm(store, &realm_ids).await?;
    let mut violations = Vec::new();

    for &realm_id in &realm_ids {
        let regions = store.realms().regions(realm_id).await?;
        let residents: HashMap<EntityId, &Entity> = grouped
            .get(&realm_id)
            .map(|list| list.iter().map(|e| (e.id, e)).collect())
            .unwrap_or_default();

        for coord in regions.ids().await? {
            let region = regions.load(coord).await?;
            let (bounds, listed) = {
                let r = region.read();
                (r.bounds(), r.entity_ids.clone())
            };
            for entity_id in &listed {
                let overlaps = residents
                    .get(entity_id)
                    .map(|e| e.absolute_bbox().intersects(&bounds))
                    .unwrap_or(false);
                if !overlaps {
                    violations.push(Violation::Stale {
                        realm_id,
                        region: coord,
                        entity_id: *entity_id,
                    });
                }
            }
            for entity in residents.values() {
                if entity.absolute_bbox().intersects(&bounds) && !listed.contains(&entity.id) {
                    violations.push(Violation::Missing {
                        realm_id,
                        region: coord,
                        entity_id: entity.id,
                    });
                }
            }
        }
    }
    violations.sort();
    Ok(violations)
}

/// Rebuild region indexes from entity positions and save the result
pub async fn repair(store: &GameStore) -> StoreResult<RepairReport> {
    let realm_ids: BTreeSet<RealmId> = store.realms().ids().await?.into_iter().collect();
    let (grouped, orphans) = entities_by_realm(store, &realm_ids).await?;
    for id in &orphans {
        warn!(entity_id = %id, "Entity references a missing realm");
    }

    let mut report = RepairReport {
        realms: realm_ids.len(),
        entities_scanned: grouped.values().map(Vec::len).sum::<usize>() + orphans.len(),
        orphaned: orphans.len(),
        ..RepairReport::default()
    };

    for &realm_id in &realm_ids {
        let regions = store.realms().regions(realm_id).await?;
        let residents: HashMap<EntityId, &Entity> = grouped
            .get(&realm_id)
            .map(|list| list.iter().map(|e| (e.id, e)).collect())
            .unwrap_or_default();

        // Region side: drop references that no longer hold
        for coord in regions.ids().await? {
            report.regions_scanned += 1;
            let region = regions.load(coord).await?;
            let bounds = region.read().bounds();
            let stale: Vec<EntityId> = region
                .read()
                .entity_ids
                .iter()
                .filter(|id| {
                    !residents
                        .get(id)
                        .map(|e| e.absolute_bbox().intersects(&bounds))
                        .unwrap_or(false)
                })
                .copied()
                .collect();
            if !stale.is_empty() {
                let mut r = region.write();
                for id in &stale {
                    r.entity_ids.remove(id);
                }
                report.dropped += stale.len();
                debug!(realm_id = %realm_id, region = %coord, dropped = stale.len(), "Dropped stale references");
            }
        }

        // Entity side: add missing references
        for entity in residents.values() {
            for (coord, region) in regions.load_intersecting(&entity.absolute_bbox()).await? {
                if region.read().entity_ids.contains(&entity.id) {
                    continue;
                }
                region.write().entity_ids.insert(entity.id);
                report.added += 1;
                debug!(realm_id = %realm_id, region = %coord, entity_id = %entity.id, "Added missing reference");
            }
        }
    }

    store.save_all().await?;
    info!(
        realms = report.realms,
        regions = report.regions_scanned,
        entities = report.entities_scanned,
        dropped = report.dropped,
        added = report.added,
        orphaned = report.orphaned,
        "Repair pass complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::game::entity::{EntityKind, TreeState};
    use crate::game::geometry::{Rectangle, Vector2};
    use crate::game::realm::{Realm, Region};
    use crate::store::MemoryBackend;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn tree(realm_id: RealmId, x: i32, y: i32) -> Entity {
        Entity::new(
            realm_id,
            Vector2::new(x, y),
            EntityKind::Tree(TreeState {
                species: "oak".to_string(),
                growth_stage: 1,
            }),
        )
    }

    async fn world() -> (GameStore, RealmId) {
        let store = GameStore::new(Arc::new(MemoryBackend::new()), &StoreConfig::default());
        let realm = store.create_realm(Realm::new("Vale", 32, 32)).await.unwrap();
        for ary in 0..2 {
            for arx in 0..2 {
                store
                    .create_region(Region::new(realm.id(), RegionCoord::new(arx, ary)))
                    .await
                    .unwrap();
            }
        }
        (store, realm.id())
    }

    #[tokio::test]
    async fn test_clean_world_has_no_violations() {
        let (store, realm_id) = world().await;
        store
            .create_entity(tree(realm_id, 15, 15).with_bbox(Rectangle::new(0, 0, 2, 2)))
            .await
            .unwrap();
        assert!(find_violations(&store).await.unwrap().is_empty());

        let report = repair(&store).await.unwrap();
        assert!(!report.changed());
        assert_eq!(report.regions_scanned, 4);
        assert_eq!(report.entities_scanned, 1);
    }

    #[tokio::test]
    async fn test_moved_entity_is_reindexed() {
        let (store, realm_id) = world().await;
        let entity = store.create_entity(tree(realm_id, 1, 1)).await.unwrap();
        let id = entity.id();

        // Move without touching the index
        entity.write().location = Vector2::new(20, 20);

        let violations = find_violations(&store).await.unwrap();
        assert_eq!(
            violations,
            vec![
                Violation::Stale {
                    realm_id,
                    region: RegionCoord::new(0, 0),
                    entity_id: id,
                },
                Violation::Missing {
                    realm_id,
                    region: RegionCoord::new(1, 1),
                    entity_id: id,
                },
            ]
        );

        let report = repair(&store).await.unwrap();
        assert_eq!((report.dropped, report.added), (1, 1));
        assert!(find_violations(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dangling_reference_dropped() {
        let (store, realm_id) = world().await;
        let regions = store.realms().regions(realm_id).await.unwrap();
        let region = regions.load(RegionCoord::new(0, 0)).await.unwrap();
        region.write().entity_ids.insert(EntityId(999));

        let report = repair(&store).await.unwrap();
        assert_eq!(report.dropped, 1);
        assert!(region.read().entity_ids.is_empty());
        assert!(!region.is_dirty());
    }
}
