//! In-process backend
//!
//! Mirrors the Redis backend's semantics inside one process. Several
//! `GameStore`s sharing one `Arc<MemoryBackend>` behave like separate server
//! processes sharing a Redis instance, which is what the lock tests rely on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use parking_lot::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::store::backend::{BackendFuture, KeyValueBackend};

#[derive(Debug)]
struct LockEntry {
    owner: String,
    expires_at: Option<Instant>,
}

impl LockEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    namespaces: HashMap<String, HashMap<String, Vec<u8>>>,
    sequences: HashMap<String, u64>,
    locks: HashMap<String, LockEntry>,
}

/// In-memory key-value backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the backend were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of records in a namespace
    pub fn len(&self, namespace: &str) -> usize {
        self.state
            .lock()
            .namespaces
            .get(namespace)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Raw record bytes, bypassing availability checks
    pub fn raw(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.get(key).cloned())
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Backend("memory backend marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> StoreResult<T> {
        self.check()?;
        Ok(f(&mut self.state.lock()))
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get<'a>(&'a self, namespace: &'a str, key: &'a str) -> BackendFuture<'a, Option<Vec<u8>>> {
        async move {
            self.with_state(|state| {
                state
                    .namespaces
                    .get(namespace)
                    .and_then(|ns| ns.get(key).cloned())
            })
        }
        .boxed()
    }

    fn set<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
        value: Vec<u8>,
    ) -> BackendFuture<'a, ()> {
        async move {
            self.with_state(|state| {
                state
                    .namespaces
                    .entry(namespace.to_string())
                    .or_default()
                    .insert(key.to_string(), value);
            })
        }
        .boxed()
    }

    fn delete<'a>(&'a self, namespace: &'a str, key: &'a str) -> BackendFuture<'a, bool> {
        async move {
            self.with_state(|state| {
                state
                    .namespaces
                    .get_mut(namespace)
                    .map(|ns| ns.remove(key).is_some())
                    .unwrap_or(false)
            })
        }
        .boxed()
    }

    fn keys<'a>(&'a self, namespace: &'a str) -> BackendFuture<'a, Vec<String>> {
        async move {
            self.with_state(|state| {
                state
                    .namespaces
                    .get(namespace)
                    .map(|ns| ns.keys().cloned().collect())
                    .unwrap_or_default()
            })
        }
        .boxed()
    }

    fn next_id<'a>(&'a self, namespace: &'a str) -> BackendFuture<'a, u64> {
        async move {
            self.with_state(|state| {
                let seq = state.sequences.entry(namespace.to_string()).or_insert(0);
                *seq += 1;
                *seq
            })
        }
        .boxed()
    }

    fn acquire_lock<'a>(
        &'a self,
        key: &'a str,
        owner: &'a str,
        ttl: Option<Duration>,
    ) -> BackendFuture<'a, bool> {
        async move {
            self.with_state(|state| {
                let now = Instant::now();
                if state.locks.get(key).is_some_and(|entry| entry.is_live(now)) {
                    return false;
                }
                state.locks.insert(
                    key.to_string(),
                    LockEntry {
                        owner: owner.to_string(),
                        expires_at: ttl.map(|ttl| now + ttl),
                    },
                );
                true
            })
        }
        .boxed()
    }

    fn renew_lock<'a>(
        &'a self,
        key: &'a str,
        owner: &'a str,
        ttl: Duration,
    ) -> BackendFuture<'a, bool> {
        async move {
            self.with_state(|state| {
                let now = Instant::now();
                match state.locks.get_mut(key) {
                    Some(entry) if entry.owner == owner && entry.is_live(now) => {
                        entry.expires_at = Some(now + ttl);
                        true
                    }
                    _ => false,
                }
            })
        }
        .boxed()
    }

    fn release_lock<'a>(&'a self, key: &'a str, owner: &'a str) -> BackendFuture<'a, bool> {
        async move {
            self.with_state(|state| {
                let now = Instant::now();
                let held = state
                    .locks
                    .get(key)
                    .is_some_and(|entry| entry.owner == owner && entry.is_live(now));
                if held {
                    state.locks.remove(key);
                }
                held
            })
        }
        .boxed()
    }

    fn force_release_lock<'a>(&'a self, key: &'a str) -> BackendFuture<'a, bool> {
        async move { self.with_state(|state| state.locks.remove(key).is_some()) }.boxed()
    }

    fn lock_holder<'a>(&'a self, key: &'a str) -> BackendFuture<'a, Option<String>> {
        async move {
            self.with_state(|state| {
                let now = Instant::now();
                state
                    .locks
                    .get(key)
                    .filter(|entry| entry.is_live(now))
                    .map(|entry| entry.owner.clone())
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_delete() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("realms", "1").await.unwrap(), None);

        backend.set("realms", "1", b"one".to_vec()).await.unwrap();
        assert_eq!(backend.get("realms", "1").await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(backend.keys("realms").await.unwrap(), vec!["1".to_string()]);

        assert!(backend.delete("realms", "1").await.unwrap());
        assert!(!backend.delete("realms", "1").await.unwrap());
        assert!(backend.keys("realms").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sequences_are_per_namespace() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.next_id("entities").await.unwrap(), 1);
        assert_eq!(backend.next_id("entities").await.unwrap(), 2);
        assert_eq!(backend.next_id("realms").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lock_ownership() {
        let backend = MemoryBackend::new();
        assert!(backend.acquire_lock("lock", "a", None).await.unwrap());
        assert!(!backend.acquire_lock("lock", "b", None).await.unwrap());
        assert_eq!(backend.lock_holder("lock").await.unwrap().as_deref(), Some("a"));

        // Only the holder may release
        assert!(!backend.release_lock("lock", "b").await.unwrap());
        assert!(backend.release_lock("lock", "a").await.unwrap());
        assert!(backend.acquire_lock("lock", "b", None).await.unwrap());

        assert!(backend.force_release_lock("lock").await.unwrap());
        assert_eq!(backend.lock_holder("lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lock_lease_expires() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_millis(20);
        assert!(backend.acquire_lock("lock", "a", Some(ttl)).await.unwrap());
        assert!(backend.renew_lock("lock", "a", ttl).await.unwrap());
        assert!(!backend.renew_lock("lock", "b", ttl).await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(backend.lock_holder("lock").await.unwrap(), None);
        assert!(backend.acquire_lock("lock", "b", Some(ttl)).await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_backend_fails() {
        let backend = MemoryBackend::new();
        backend.set_unavailable(true);
        let err = backend.get("realms", "1").await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        backend.set_unavailable(false);
        assert!(backend.get("realms", "1").await.is_ok());
    }
}
