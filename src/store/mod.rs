//! Persistent world store
//!
//! This module contains:
//! - `backend`: the key-value backend trait
//! - `memory` / `redis_backend`: backend implementations
//! - `object_store`: the identity-mapped cache every record kind builds on
//! - `realm_store`, `region_store`, `entity_store`: per-kind stores
//! - `game_store`: the per-server store context and global lock

pub mod backend;
pub mod entity_store;
pub mod game_store;
pub mod memory;
pub mod object_store;
pub mod realm_store;
pub mod redis_backend;
pub mod region_store;

use std::sync::Arc;

use tracing::info;

pub use backend::KeyValueBackend;
pub use entity_store::EntityStore;
pub use game_store::{GameStore, Relocation, SaveReport};
pub use memory::MemoryBackend;
pub use object_store::{Handle, ObjectStore, Polymorphic, Record, RecordId, Storable};
pub use realm_store::RealmStore;
pub use redis_backend::RedisBackend;
pub use region_store::{LoadedRegion, RegionStore};

use crate::config::{BackendKind, ServerConfig};
use crate::error::StoreResult;

/// Open the backend selected by the configuration
pub async fn open_backend(config: &ServerConfig) -> StoreResult<Arc<dyn KeyValueBackend>> {
    match config.backend {
        BackendKind::Redis => {
            let backend = RedisBackend::connect(&config.redis)?;
            backend.ping().await?;
            info!("Connected to Redis at {}:{}", config.redis.host, config.redis.port);
            Ok(Arc::new(backend))
        }
        BackendKind::Memory => {
            info!("Using in-memory backend; world state is lost on exit");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}
