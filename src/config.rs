//! Server configuration module
//!
//! Handles loading and parsing of server configuration from files and environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Which key-value backend holds the authoritative world state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Shared Redis instance (production)
    Redis,
    /// In-process map, lost on exit (development and tests)
    Memory,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(BackendKind::Redis),
            "memory" => Ok(BackendKind::Memory),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Server name shown in logs
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Address the WebSocket listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// WebSocket port for game clients
    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,

    /// Backend selection
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Redis connection settings
    #[serde(default)]
    pub redis: RedisConfig,

    /// Store and global lock settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Autosave interval in seconds (0 to disable)
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval_secs: u64,

    /// Capacity of each session's outbound frame queue
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Largest inbound frame accepted, in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Largest viewport, in regions, a client may request
    #[serde(default = "default_max_viewport_regions")]
    pub max_viewport_regions: usize,

    /// Maximum simultaneous connections from one IP
    #[serde(default = "default_max_sessions_per_ip")]
    pub max_sessions_per_ip: usize,

    /// Resend the client's own entity after every viewport update
    #[serde(default)]
    pub resend_avatar: bool,

    /// Seed the default world into an empty store at startup
    #[serde(default)]
    pub dev_mode: bool,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis host
    #[serde(default = "default_redis_host")]
    pub host: String,

    /// Redis port
    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Logical database number
    #[serde(default)]
    pub database: u8,

    /// Maximum connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl RedisConfig {
    /// Connection URL for the pool
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.database)
    }
}

/// Store configuration (global lock behaviour)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend key holding the cross-process lock
    #[serde(default = "default_lock_key")]
    pub lock_key: String,

    /// Delay between lock acquisition attempts in milliseconds
    #[serde(default = "default_lock_retry_ms")]
    pub lock_retry_ms: u64,

    /// Lock lease in seconds (0 = never expires, needs a forced unlock after a crash)
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// How long `lock()` waits before giving up (0 = wait forever)
    #[serde(default)]
    pub lock_wait_secs: u64,
}

impl StoreConfig {
    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms)
    }

    pub fn lock_ttl(&self) -> Option<Duration> {
        (self.lock_ttl_secs > 0).then(|| Duration::from_secs(self.lock_ttl_secs))
    }

    pub fn lock_wait(&self) -> Option<Duration> {
        (self.lock_wait_secs > 0).then(|| Duration::from_secs(self.lock_wait_secs))
    }

    /// Lease renewal period: a third of the TTL
    pub fn lock_renew_interval(&self) -> Option<Duration> {
        self.lock_ttl().map(|ttl| ttl / 3)
    }
}

// Default value functions
fn default_server_name() -> String {
    "Realmkeep".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_websocket_port() -> u16 {
    8193
}

fn default_backend() -> BackendKind {
    BackendKind::Redis
}

fn default_autosave_interval() -> u64 {
    60
}

fn default_outbound_queue_capacity() -> usize {
    1024
}

fn default_max_frame_size() -> usize {
    65535
}

fn default_max_viewport_regions() -> usize {
    256
}

fn default_max_sessions_per_ip() -> usize {
    10
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_pool_size() -> usize {
    16
}

fn default_lock_key() -> String {
    "realmkeep:lock".to_string()
}

fn default_lock_retry_ms() -> u64 {
    500
}

fn default_lock_ttl() -> u64 {
    30
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            database: 0,
            pool_size: default_pool_size(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_key: default_lock_key(),
            lock_retry_ms: default_lock_retry_ms(),
            lock_ttl_secs: default_lock_ttl(),
            lock_wait_secs: 0,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/server.toml"),
            server_name: default_server_name(),
            bind_address: default_bind_address(),
            websocket_port: default_websocket_port(),
            backend: default_backend(),
            redis: RedisConfig::default(),
            store: StoreConfig::default(),
            autosave_interval_secs: default_autosave_interval(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_frame_size: default_max_frame_size(),
            max_viewport_regions: default_max_viewport_regions(),
            max_sessions_per_ip: default_max_sessions_per_ip(),
            resend_avatar: false,
            dev_mode: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        // Determine config path from environment or use default
        let config_path = env::var("REALMKEEP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/server.toml"));

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("REALMKEEP_SERVER_NAME") {
            self.server_name = val;
        }
        if let Ok(val) = env::var("REALMKEEP_BIND_ADDRESS") {
            self.bind_address = val;
        }
        if let Ok(val) = env::var("REALMKEEP_WEBSOCKET_PORT") {
            if let Ok(port) = val.parse() {
                self.websocket_port = port;
            }
        }
        if let Ok(val) = env::var("REALMKEEP_BACKEND") {
            match val.parse() {
                Ok(kind) => self.backend = kind,
                Err(e) => tracing::warn!("Ignoring REALMKEEP_BACKEND: {}", e),
            }
        }
        if let Ok(val) = env::var("REALMKEEP_AUTOSAVE_INTERVAL") {
            if let Ok(secs) = val.parse() {
                self.autosave_interval_secs = secs;
            }
        }
        if let Ok(val) = env::var("REALMKEEP_DEV_MODE") {
            self.dev_mode = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = env::var("REALMKEEP_REDIS_HOST") {
            self.redis.host = val;
        }
        if let Ok(val) = env::var("REALMKEEP_REDIS_PORT") {
            if let Ok(port) = val.parse() {
                self.redis.port = port;
            }
        }
        if let Ok(val) = env::var("REALMKEEP_REDIS_DATABASE") {
            if let Ok(db) = val.parse() {
                self.redis.database = db;
            }
        }

        if let Ok(val) = env::var("REALMKEEP_LOCK_KEY") {
            self.store.lock_key = val;
        }
        if let Ok(val) = env::var("REALMKEEP_LOCK_TTL") {
            if let Ok(secs) = val.parse() {
                self.store.lock_ttl_secs = secs;
            }
        }
        if let Ok(val) = env::var("REALMKEEP_LOCK_WAIT") {
            if let Ok(secs) = val.parse() {
                self.store.lock_wait_secs = secs;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.websocket_port == 0 {
            anyhow::bail!("WebSocket port must be non-zero");
        }

        if self.outbound_queue_capacity == 0 {
            anyhow::bail!("Outbound queue capacity must be at least 1");
        }

        if self.max_frame_size < 16 {
            anyhow::bail!("Max frame size must be at least 16 bytes");
        }

        if self.max_viewport_regions == 0 {
            anyhow::bail!("Max viewport regions must be at least 1");
        }

        if self.store.lock_key.is_empty() {
            anyhow::bail!("Lock key must not be empty");
        }

        if self.store.lock_retry_ms == 0 {
            anyhow::bail!("Lock retry interval must be non-zero");
        }

        if self.store.lock_ttl_secs > 0 && self.store.lock_ttl_secs < 3 {
            anyhow::bail!("Lock TTL must be 0 (disabled) or at least 3 seconds");
        }

        Ok(())
    }

    /// Socket address string for the WebSocket listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.websocket_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server_name, "Realmkeep");
        assert_eq!(config.websocket_port, 8193);
        assert_eq!(config.backend, BackendKind::Redis);
        assert_eq!(config.store.lock_key, "realmkeep:lock");
        assert_eq!(config.autosave_interval_secs, 60);
        assert!(!config.resend_avatar);
    }

    #[test]
    fn test_parse_toml() {
        let config = ServerConfig::from_toml(
            r#"
            websocket_port = 9000
            backend = "memory"

            [store]
            lock_ttl_secs = 0
            lock_wait_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.websocket_port, 9000);
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.store.lock_ttl(), None);
        assert_eq!(config.store.lock_wait(), Some(Duration::from_secs(5)));
        assert_eq!(config.store.lock_key, "realmkeep:lock");
        assert_eq!(config.redis.port, 6379);
    }

    #[test]
    fn test_lock_renew_interval() {
        let store = StoreConfig::default();
        assert_eq!(store.lock_renew_interval(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_redis_url() {
        let redis = RedisConfig::default();
        assert_eq!(redis.url(), "redis://localhost:6379/0");
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_ok());

        config.outbound_queue_capacity = 0;
        assert!(config.validate().is_err());
        config.outbound_queue_capacity = 8;

        config.store.lock_ttl_secs = 1;
        assert!(config.validate().is_err());
        config.store.lock_ttl_secs = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("Memory".parse::<BackendKind>(), Ok(BackendKind::Memory));
        assert!("etcd".parse::<BackendKind>().is_err());
    }
}
