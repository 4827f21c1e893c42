//! Redis backend
//!
//! Each namespace is one Redis hash; record keys are hash fields. Id
//! sequences live as fields of a single `__sequences` hash. The
//! global lock is a plain string key set with `NX` and an optional `PX`
//! lease, released and renewed through compare-and-act Lua scripts.

use std::time::Duration;

use deadpool_redis::{Config as PoolSettings, Pool, PoolConfig, Runtime};
use futures_util::FutureExt;
use tracing::info;

use crate::config::RedisConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::backend::{BackendFuture, KeyValueBackend};

const SEQUENCES_KEY: &str = "__sequences";

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const RENEW_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Redis-backed key-value store
pub struct RedisBackend {
    pool: Pool,
    release: redis::Script,
    renew: redis::Script,
}

impl RedisBackend {
    /// Build the connection pool. Connections are opened lazily.
    pub fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let url = config.url();
        let mut settings = PoolSettings::from_url(&url);
        settings.pool = Some(PoolConfig::new(config.pool_size));
        let pool = settings
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Backend(format!("Failed to create Redis pool: {}", e)))?;

        info!("Redis pool created for {}", url);

        Ok(Self {
            pool,
            release: redis::Script::new(RELEASE_SCRIPT),
            renew: redis::Script::new(RENEW_SCRIPT),
        })
    }

    /// Round-trip a PING to verify connectivity
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.pool.get().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok(())
    }
}

impl KeyValueBackend for RedisBackend {
    fn get<'a>(&'a self, namespace: &'a str, key: &'a str) -> BackendFuture<'a, Option<Vec<u8>>> {
        async move {
            let mut conn = self.pool.get().await?;
            let value: Option<Vec<u8>> = redis::cmd("HGET")
                .arg(namespace)
                .arg(key)
                .query_async(&mut conn)
                .await?;
            Ok(value)
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
            let mut conn = self.pool.get().await?;
            redis::cmd("HSET")
                .arg(namespace)
                .arg(key)
                .arg(value)
                .query_async::<_, ()>(&mut conn)
                .await?;
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, namespace: &'a str, key: &'a str) -> BackendFuture<'a, bool> {
        async move {
            let mut conn = self.pool.get().await?;
            let removed: i64 = redis::cmd("HDEL")
                .arg(namespace)
                .arg(key)
                .query_async(&mut conn)
                .await?;
            Ok(removed > 0)
        }
        .boxed()
    }

    fn keys<'a>(&'a self, namespace: &'a str) -> BackendFuture<'a, Vec<String>> {
        async move {
            let mut conn = self.pool.get().await?;
            let keys: Vec<String> = redis::cmd("HKEYS")
                .arg(namespace)
                .query_async(&mut conn)
                .await?;
            Ok(keys)
        }
        .boxed()
    }

    fn next_id<'a>(&'a self, namespace: &'a str) -> BackendFuture<'a, u64> {
        async move {
            let mut conn = self.pool.get().await?;
            let id: u64 = redis::cmd("HINCRBY")
                .arg(SEQUENCES_KEY)
                .arg(namespace)
                .arg(1)
                .query_async(&mut conn)
                .await?;
            Ok(id)
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
            let mut conn = self.pool.get().await?;
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(owner).arg("NX");
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl.as_millis() as u64);
            }
            let reply: Option<String> = cmd.query_async(&mut conn).await?;
            Ok(reply.is_some())
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
            let mut conn = self.pool.get().await?;
            let renewed: i64 = self
                .renew
                .key(key)
                .arg(owner)
                .arg(ttl.as_millis() as u64)
                .invoke_async(&mut conn)
                .await?;
            Ok(renewed == 1)
        }
        .boxed()
    }

    fn release_lock<'a>(&'a self, key: &'a str, owner: &'a str) -> BackendFuture<'a, bool> {
        async move {
            let mut conn = self.pool.get().await?;
            let released: i64 = self
                .release
                .key(key)
                .arg(owner)
                .invoke_async(&mut conn)
                .await?;
            Ok(released == 1)
        }
        .boxed()
    }

    fn force_release_lock<'a>(&'a self, key: &'a str) -> BackendFuture<'a, bool> {
        async move {
            let mut conn = self.pool.get().await?;
            let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
            Ok(removed > 0)
        }
        .boxed()
    }

    fn lock_holder<'a>(&'a self, key: &'a str) -> BackendFuture<'a, Option<String>> {
        async move {
            let mut conn = self.pool.get().await?;
            let holder: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            Ok(holder)
        }
        .boxed()
    }
}
