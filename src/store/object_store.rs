//! Identity-mapped object store
//!
//! An `ObjectStore<T>` maps one backend namespace to live, shared record
//! handles. Loading the same id twice yields the same `Arc`, so every
//! subsystem observes the same in-memory instance. Writes go through the
//! handle, which marks the record dirty; `save` flushes only dirty records.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::backend::KeyValueBackend;

/// Identifier of a stored record
pub trait RecordId:
    Copy + Eq + Hash + fmt::Display + fmt::Debug + FromStr + Send + Sync + 'static
{
    /// Build an id from a backend sequence number.
    ///
    /// Returns `None` for natural keys that are never allocated.
    fn from_sequence(seq: u64) -> Option<Self>;
}

/// A record that can be persisted in an [`ObjectStore`]
pub trait Storable: Send + Sync + Sized + 'static {
    type Id: RecordId;

    /// Assigned id, or `None` before the first `create`
    fn id(&self) -> Option<Self::Id>;

    fn set_id(&mut self, id: Self::Id);

    fn encode(&self) -> StoreResult<Vec<u8>>;

    fn decode(bytes: &[u8]) -> StoreResult<Self>;

    /// Structural checks run on every load and create
    fn validate(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Builds a concrete variant from the full record bytes
pub type KindConstructor<T> = fn(&[u8]) -> StoreResult<T>;

/// A record family whose concrete variant is chosen by a stored kind tag
pub trait Polymorphic: Storable {
    /// Registered kind tags and their constructors
    const KINDS: &'static [(&'static str, KindConstructor<Self>)];
}

#[derive(Deserialize)]
struct KindHeader {
    kind: String,
}

/// Read the base header's `kind` tag and dispatch to the registered constructor
pub fn decode_polymorphic<T: Polymorphic>(bytes: &[u8]) -> StoreResult<T> {
    let header: KindHeader = serde_json::from_slice(bytes)?;
    let constructor = T::KINDS
        .iter()
        .find(|(tag, _)| *tag == header.kind)
        .map(|(_, constructor)| *constructor)
        .ok_or(StoreError::UnknownKind(header.kind))?;
    constructor(bytes)
}

/// A live record shared between every holder of its handle
pub struct Record<T: Storable> {
    id: T::Id,
    value: RwLock<T>,
    dirty: AtomicBool,
}

/// Shared handle to an identity-mapped record
pub type Handle<T> = Arc<Record<T>>;

impl<T: Storable> Record<T> {
    fn new(id: T::Id, value: T, dirty: bool) -> Self {
        Self {
            id,
            value: RwLock::new(value),
            dirty: AtomicBool::new(dirty),
        }
    }

    pub fn id(&self) -> T::Id {
        self.id
    }

    /// Shared read access. Never hold the guard across an `.await`.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.value.read()
    }

    /// Exclusive write access; marks the record dirty
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let guard = self.value.write();
        // Flag under the lock so a concurrent save either sees it or encodes our write
        self.dirty.store(true, Ordering::Release);
        guard
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}

impl<T: Storable + fmt::Debug> fmt::Debug for Record<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("dirty", &self.is_dirty())
            .field("value", &*self.value.read())
            .finish()
    }
}

/// Identity-mapped cache over one backend namespace
pub struct ObjectStore<T: Storable> {
    namespace: String,
    backend: Arc<dyn KeyValueBackend>,
    entries: Mutex<HashMap<T::Id, Handle<T>>>,
}

impl<T: Storable> ObjectStore<T> {
    pub fn new(namespace: impl Into<String>, backend: Arc<dyn KeyValueBackend>) -> Self {
        Self {
            namespace: namespace.into(),
            backend,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Cached handle, if the record is currently live
    pub fn cached(&self, id: T::Id) -> Option<Handle<T>> {
        self.entries.lock().get(&id).cloned()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of every live handle
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.entries.lock().values().cloned().collect()
    }

    /// Read a record straight from the backend, bypassing the identity map
    pub async fn find(&self, id: T::Id) -> StoreResult<T> {
        let bytes = self.fetch(id).await?;
        self.check_decoded(id, T::decode(&bytes)?)
    }

    /// Shared handle for `id`, loading it on first use.
    ///
    /// Concurrent first loads may both hit the backend; only one instance is
    /// kept and both callers receive it.
    pub async fn load(&self, id: T::Id) -> StoreResult<Handle<T>> {
        if let Some(handle) = self.cached(id) {
            return Ok(handle);
        }
        let value = self.find(id).await?;
        Ok(self.adopt(id, value))
    }

    /// Place an already-read value into the identity map.
    ///
    /// If another caller won the race, its instance is returned and `value`
    /// is discarded.
    pub fn adopt(&self, id: T::Id, value: T) -> Handle<T> {
        self.entries
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(Record::new(id, value, false)))
            .clone()
    }

    /// Allocate an id for a new record and register it, dirty
    pub async fn create(&self, mut value: T) -> StoreResult<Handle<T>> {
        if let Some(id) = value.id() {
            return Err(StoreError::Invalid(format!(
                "record {} in {} already has an id",
                id, self.namespace
            )));
        }
        let seq = self.backend.next_id(&self.namespace).await?;
        let id = T::Id::from_sequence(seq).ok_or_else(|| {
            StoreError::Invalid(format!("{} does not allocate ids", self.namespace))
        })?;
        value.set_id(id);
        self.register(id, value)
    }

    /// Register a new record under its natural key, dirty
    pub fn insert(&self, value: T) -> StoreResult<Handle<T>> {
        let id = value.id().ok_or_else(|| {
            StoreError::Invalid(format!("record for {} has no key", self.namespace))
        })?;
        self.register(id, value)
    }

    fn register(&self, id: T::Id, value: T) -> StoreResult<Handle<T>> {
        value.validate()?;
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(StoreError::Invalid(format!(
                "record {} in {} is already live",
                id, self.namespace
            )));
        }
        let handle = Arc::new(Record::new(id, value, true));
        entries.insert(id, handle.clone());
        debug!(namespace = %self.namespace, id = %id, "Created record");
        Ok(handle)
    }

    /// Write the record if dirty. Returns whether anything was written.
    ///
    /// On failure the record stays dirty so a later save retries it.
    pub async fn save(&self, handle: &Handle<T>) -> StoreResult<bool> {
        if !handle.take_dirty() {
            return Ok(false);
        }
        let encoded = handle.read().encode();
        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(e) => {
                handle.mark_dirty();
                return Err(e);
            }
        };
        let key = handle.id().to_string();
        if let Err(e) = self.backend.set(&self.namespace, &key, bytes).await {
            handle.mark_dirty();
            return Err(e);
        }
        trace!(namespace = %self.namespace, key = %key, "Saved record");
        Ok(true)
    }

    /// Save every live dirty record once. Returns how many were written.
    pub async fn save_all(&self) -> StoreResult<usize> {
        let mut saved = 0;
        for handle in self.handles() {
            if self.save(&handle).await? {
                saved += 1;
            }
        }
        Ok(saved)
    }

    /// Drop a clean record nobody else references. Returns whether it went.
    pub fn expire(&self, id: T::Id) -> bool {
        let mut entries = self.entries.lock();
        let evictable = entries
            .get(&id)
            .is_some_and(|handle| !handle.is_dirty() && Arc::strong_count(handle) == 1);
        if evictable {
            entries.remove(&id);
        }
        evictable
    }

    /// Drop every clean, unreferenced record. Returns how many went.
    pub fn expire_all(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, handle| handle.is_dirty() || Arc::strong_count(handle) > 1);
        before - entries.len()
    }

    /// Every id stored in the backend namespace, then live ids not yet saved
    pub async fn ids(&self) -> StoreResult<Vec<T::Id>> {
        let keys = self.backend.keys(&self.namespace).await?;
        let mut seen = HashSet::with_capacity(keys.len());
        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            match key.parse() {
                Ok(id) => {
                    if seen.insert(id) {
                        ids.push(id);
                    }
                }
                Err(_) => warn!(namespace = %self.namespace, key = %key, "Skipping unparsable key"),
            }
        }
        let live: Vec<T::Id> = self.entries.lock().keys().copied().collect();
        ids.extend(live.into_iter().filter(|id| seen.insert(*id)));
        Ok(ids)
    }

    async fn fetch(&self, id: T::Id) -> StoreResult<Vec<u8>> {
        self.backend
            .get(&self.namespace, &id.to_string())
            .await?
            .ok_or_else(|| StoreError::not_found(&self.namespace, id))
    }

    fn check_decoded(&self, id: T::Id, value: T) -> StoreResult<T> {
        if value.id() != Some(id) {
            return Err(StoreError::Corrupt {
                key: format!("{}/{}", self.namespace, id),
                reason: format!("record carries id {:?}", value.id()),
            });
        }
        value.validate().map_err(|e| StoreError::Corrupt {
            key: format!("{}/{}", self.namespace, id),
            reason: e.to_string(),
        })?;
        Ok(value)
    }
}

impl<T: Polymorphic> ObjectStore<T> {
    /// Like [`find`](Self::find), but resolves the concrete variant from the
    /// record's kind tag.
    pub async fn find_polymorphic(&self, id: T::Id) -> StoreResult<T> {
        let bytes = self.fetch(id).await?;
        self.check_decoded(id, decode_polymorphic(&bytes)?)
    }
}

impl<T: Storable> fmt::Debug for ObjectStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("namespace", &self.namespace)
            .field("live", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryBackend;
    use serde::Serialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: u64,
        text: String,
    }

    impl RecordId for u64 {
        fn from_sequence(seq: u64) -> Option<Self> {
            Some(seq)
        }
    }

    impl Storable for Note {
        type Id = u64;

        fn id(&self) -> Option<u64> {
            (self.id != 0).then_some(self.id)
        }

        fn set_id(&mut self, id: u64) {
            self.id = id;
        }

        fn encode(&self) -> StoreResult<Vec<u8>> {
            Ok(serde_json::to_vec(self)?)
        }

        fn decode(bytes: &[u8]) -> StoreResult<Self> {
            Ok(serde_json::from_slice(bytes)?)
        }
    }

    fn note(text: &str) -> Note {
        Note {
            id: 0,
            text: text.to_string(),
        }
    }

    fn store() -> (Arc<MemoryBackend>, ObjectStore<Note>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = ObjectStore::new("notes", backend.clone() as Arc<dyn KeyValueBackend>);
        (backend, store)
    }

    #[tokio::test]
    async fn test_create_allocates_ids() {
        let (_, store) = store();
        let a = store.create(note("a")).await.unwrap();
        let b = store.create(note("b")).await.unwrap();
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);
        assert!(a.is_dirty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_get_distinct_ids() {
        let backend = Arc::new(MemoryBackend::new());
        // Two stores over one backend, as two processes would share Redis
        let stores: Vec<Arc<ObjectStore<Note>>> = (0..2)
            .map(|_| Arc::new(ObjectStore::new("notes", backend.clone() as Arc<dyn KeyValueBackend>)))
            .collect();

        let tasks: Vec<_> = (0..64)
            .map(|n| {
                let store = stores[n % 2].clone();
                tokio::spawn(async move { store.create(note(&format!("n{}", n))).await })
            })
            .collect();
        let mut ids: Vec<u64> = futures_util::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap().id())
            .collect();

        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids, (1..=64).collect::<Vec<u64>>());
        assert_eq!(stores[0].len() + stores[1].len(), 64);
    }

    #[tokio::test]
    async fn test_load_returns_same_instance() {
        let (backend, store) = store();
        backend
            .set("notes", "9", br#"{"id":9,"text":"hi"}"#.to_vec())
            .await
            .unwrap();

        let first = store.load(9).await.unwrap();
        let second = store.load(9).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        first.write().text = "changed".to_string();
        assert_eq!(second.read().text, "changed");
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let (_, store) = store();
        let err = store.load(3).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_save_writes_only_dirty() {
        let (backend, store) = store();
        let handle = store.create(note("a")).await.unwrap();

        assert!(store.save(&handle).await.unwrap());
        assert!(!handle.is_dirty());
        assert!(!store.save(&handle).await.unwrap());

        handle.write().text = "b".to_string();
        assert_eq!(store.save_all().await.unwrap(), 1);
        let stored: Note = serde_json::from_slice(&backend.raw("notes", "1").unwrap()).unwrap();
        assert_eq!(stored.text, "b");
    }

    #[tokio::test]
    async fn test_failed_save_stays_dirty() {
        let (backend, store) = store();
        let handle = store.create(note("a")).await.unwrap();

        backend.set_unavailable(true);
        assert!(store.save(&handle).await.is_err());
        assert!(handle.is_dirty());

        backend.set_unavailable(false);
        assert!(store.save(&handle).await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_keeps_referenced_and_dirty() {
        let (_, store) = store();
        let handle = store.create(note("a")).await.unwrap();
        let id = handle.id();

        // Dirty and referenced
        assert!(!store.expire(id));
        store.save(&handle).await.unwrap();
        // Clean but still referenced
        assert!(!store.expire(id));

        drop(handle);
        assert!(store.expire(id));
        assert!(store.cached(id).is_none());

        // Reload comes back from the backend
        let reloaded = store.load(id).await.unwrap();
        assert_eq!(reloaded.read().text, "a");
    }

    #[tokio::test]
    async fn test_mismatched_id_is_corrupt() {
        let (backend, store) = store();
        backend
            .set("notes", "4", br#"{"id":5,"text":"x"}"#.to_vec())
            .await
            .unwrap();
        let err = store.find(4).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_ids_lists_stored_and_live() {
        let (_, store) = store();
        for text in ["a", "b", "c"] {
            let handle = store.create(note(text)).await.unwrap();
            store.save(&handle).await.unwrap();
        }
        // Live but never saved
        store.create(note("d")).await.unwrap();

        let mut ids = store.ids().await.unwrap();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }
}
