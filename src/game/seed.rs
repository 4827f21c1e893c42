//! One-time world seeding
//!
//! Builds a realm with flat terrain: a water layer whose border tiles draw
//! the coastline, and a grass layer covering the interior. A handful of
//! fixed players, buildings and a tree are placed near the origin, plus
//! wandering NPCs at positions drawn from a seeded RNG so the same plan
//! always produces the same world.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::error::StoreResult;
use crate::game::entity::{
    BuildingState, Direction, DropState, Entity, EntityId, EntityKind, NpcState, PlayerState, TreeState,
};
use crate::game::geometry::{Rectangle, Vector2};
use crate::game::realm::{Layer, Realm, RealmId, Region, RegionCoord, REGION_SIZE};
use crate::store::GameStore;

const PLAYERS: &[(&str, i32, i32)] = &[
    ("Valjean", 64, 64),
    ("Marius", 0, 16),
    ("Courfeyrac", 16, 16),
    ("Enjolras", 12, 16),
];

/// Side length of the square near the origin NPCs are scattered over
const NPC_SPREAD: i32 = 32;

const DIRECTIONS: [Direction; 4] = [Direction::North, Direction::East, Direction::South, Direction::West];

/// What to create
#[derive(Debug, Clone)]
pub struct SeedPlan {
    pub realm_name: String,
    /// Width in tiles
    pub width: i32,
    /// Height in tiles
    pub height: i32,
    pub npcs: usize,
    pub rng_seed: u64,
}

impl Default for SeedPlan {
    fn default() -> Self {
        Self {
            realm_name: "Windvale".to_string(),
            width: 128,
            height: 128,
            npcs: 25,
            rng_seed: 0,
        }
    }
}

/// What was created
#[derive(Debug, Clone, Default)]
pub struct SeedReport {
    pub realm_id: RealmId,
    pub regions: usize,
    pub entities: usize,
    /// Player names and ids, for connecting with `?player=<id>`
    pub players: Vec<(String, EntityId)>,
}

/// Water tile index for a tile, drawing the realm border
fn coast_tile(x: i32, y: i32, width: i32, height: i32) -> i16 {
    let (west, east) = (x == 0, x == width - 1);
    let (north, south) = (y == 0, y == height - 1);
    match (west, east, north, south) {
        (true, _, true, _) => 34,
        (_, true, true, _) => 36,
        (_, true, _, true) => 38,
        (true, _, _, true) => 40,
        (true, ..) => 16,
        (_, true, ..) => 24,
        (_, _, true, _) => 20,
        (.., true) => 28,
        _ => 0,
    }
}

fn seed_region(realm: &Realm, coord: RegionCoord) -> Region {
    let origin = coord.bounds().top_left();
    let mut water = Vec::with_capacity((REGION_SIZE * REGION_SIZE) as usize);
    let mut grass = Vec::with_capacity((REGION_SIZE * REGION_SIZE) as usize);
    for dy in 0..REGION_SIZE {
        for dx in 0..REGION_SIZE {
            let (x, y) = (origin.x + dx, origin.y + dy);
            let inside = x < realm.width && y < realm.height;
            let tile = if inside { coast_tile(x, y, realm.width, realm.height) } else { 0 };
            water.push(tile);
            grass.push(if inside && tile == 0 { 0 } else { -1 });
        }
    }
    Region::new(realm.id, coord)
        .with_layer(Layer {
            terrain: "water".to_string(),
            tiles: water,
        })
        .with_layer(Layer {
            terrain: "grassland".to_string(),
            tiles: grass,
        })
}

fn clamp_into(realm: &Realm, x: i32, y: i32) -> Vector2 {
    Vector2::new(x.clamp(0, realm.width - 1), y.clamp(0, realm.height - 1))
}

fn fixed_entities(realm: &Realm) -> Vec<Entity> {
    let mut entities: Vec<Entity> = PLAYERS
        .iter()
        .map(|&(name, x, y)| {
            Entity::new(
                realm.id,
                clamp_into(realm, x, y),
                EntityKind::Player(PlayerState {
                    name: name.to_string(),
                    gender: "male".to_string(),
                    body: "light".to_string(),
                    health: 100,
                    online: false,
                    inventory: vec!["teal_pants".to_string()],
                }),
            )
        })
        .collect();

    for (y, door) in [(10, 2), (13, 4)] {
        entities.push(
            Entity::new(
                realm.id,
                clamp_into(realm, 1, y),
                EntityKind::Building(BuildingState { door_location: door }),
            )
            .with_bbox(Rectangle::new(0, 0, 5, 3)),
        );
    }
    entities.push(Entity::new(
        realm.id,
        clamp_into(realm, 4, 16),
        EntityKind::Tree(TreeState {
            species: "oak".to_string(),
            growth_stage: 2,
        }),
    ));
    entities.push(Entity::new(
        realm.id,
        clamp_into(realm, 6, 6),
        EntityKind::Drop(DropState {
            item: "carrot".to_string(),
        }),
    ));
    entities
}

fn wandering_npc(realm: &Realm, rng: &mut StdRng) -> Entity {
    let spread_x = NPC_SPREAD.min(realm.width);
    let spread_y = NPC_SPREAD.min(realm.height);
    let mut npc = Entity::new(
        realm.id,
        Vector2::new(rng.gen_range(0..spread_x), rng.gen_range(0..spread_y)),
        EntityKind::Npc(NpcState {
            name: "Some Bad Dude".to_string(),
            body: "smurf".to_string(),
            health: 5,
            behavior: "wander".to_string(),
        }),
    );
    npc.direction = DIRECTIONS[rng.gen_range(0..DIRECTIONS.len())];
    npc
}

/// Create a realm, its regions and a starting population, then save
pub async fn seed_world(store: &GameStore, plan: &SeedPlan) -> StoreResult<SeedReport> {
    let mut realm = Realm::new(plan.realm_name.clone(), plan.width, plan.height);
    realm.terrain_layers = vec!["water".to_string(), "grassland".to_string()];
    let handle = store.create_realm(realm).await?;
    let realm = handle.read().clone();
    let mut report = SeedReport {
        realm_id: realm.id,
        ..SeedReport::default()
    };

    for coord in RegionCoord::within(&realm.region_extent()) {
        store.create_region(seed_region(&realm, coord)).await?;
        report.regions += 1;
    }
    info!(realm_id = %realm.id, name = %realm.name, regions = report.regions, "Created realm");

    let mut rng = StdRng::seed_from_u64(plan.rng_seed);
    let mut population = fixed_entities(&realm);
    population.extend((0..plan.npcs).map(|_| wandering_npc(&realm, &mut rng)));

    for entity in population {
        let name = entity.player().map(|p| p.name.clone());
        let created = store.create_entity(entity).await?;
        if let Some(name) = name {
            report.players.push((name, created.id()));
        }
        report.entities += 1;
    }
    info!(realm_id = %realm.id, entities = report.entities, "Created entities");

    store.save_all().await?;
    Ok(report)
}
