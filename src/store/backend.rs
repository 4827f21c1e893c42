//! Key-value backend abstraction
//!
//! The authoritative world lives out of process in a shared hash-map store.
//! Records are grouped into namespaces (`realms`, `entities`,
//! `realms.<id>.regions`); each namespace maps string keys to opaque bytes.
//! One plain key holds the advisory cross-process lock.
//!
//! Every call may fail with [`StoreError::Backend`](crate::error::StoreError);
//! the store layer never retries on its own.

use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::error::StoreResult;

/// Boxed future returned by backend calls
pub type BackendFuture<'a, T> = BoxFuture<'a, StoreResult<T>>;

/// A shared, fallible key-value store
pub trait KeyValueBackend: Send + Sync {
    /// Read one record; `None` when the key is absent
    fn get<'a>(&'a self, namespace: &'a str, key: &'a str) -> BackendFuture<'a, Option<Vec<u8>>>;

    /// Write one record, replacing any previous value
    fn set<'a>(&'a self, namespace: &'a str, key: &'a str, value: Vec<u8>)
        -> BackendFuture<'a, ()>;

    /// Remove one record; returns whether it existed
    fn delete<'a>(&'a self, namespace: &'a str, key: &'a str) -> BackendFuture<'a, bool>;

    /// List every key in a namespace (order unspecified)
    fn keys<'a>(&'a self, namespace: &'a str) -> BackendFuture<'a, Vec<String>>;

    /// Atomically allocate the next identifier for a namespace (starts at 1)
    fn next_id<'a>(&'a self, namespace: &'a str) -> BackendFuture<'a, u64>;

    /// Try once to take the lock for `owner`; with a TTL the lock lapses on its own
    fn acquire_lock<'a>(
        &'a self,
        key: &'a str,
        owner: &'a str,
        ttl: Option<Duration>,
    ) -> BackendFuture<'a, bool>;

    /// Extend the lease if `owner` still holds the lock
    fn renew_lock<'a>(&'a self, key: &'a str, owner: &'a str, ttl: Duration)
        -> BackendFuture<'a, bool>;

    /// Release the lock only if `owner` holds it
    fn release_lock<'a>(&'a self, key: &'a str, owner: &'a str) -> BackendFuture<'a, bool>;

    /// Break the lock regardless of holder (crash recovery)
    fn force_release_lock<'a>(&'a self, key: &'a str) -> BackendFuture<'a, bool>;

    /// Current holder of the lock, if any
    fn lock_holder<'a>(&'a self, key: &'a str) -> BackendFuture<'a, Option<String>>;
}
