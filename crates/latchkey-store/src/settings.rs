//! Redis connection settings
//!
//! Settings are read from an optional config file (format picked by extension)
//! under a `redis` section, then overridden by `LATCHKEY_REDIS__*` environment
//! variables, e.g. `LATCHKEY_REDIS__HOST=cache.internal`.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment};
use latchkey_common::{Result, StoreError};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_REDIS_HOST: &str = "localhost";
pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Environment variable prefix for all settings
pub const ENV_PREFIX: &str = "LATCHKEY";

/// Configuration for a Redis-backed store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: u32,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Connect with `rediss://` (requires the `tls` feature)
    pub tls: bool,
    pub connect_timeout_ms: u64,
    /// Prepended to every key this store touches
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_REDIS_HOST.to_string(),
            port: DEFAULT_REDIS_PORT,
            db: 0,
            username: None,
            password: None,
            tls: false,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            key_prefix: String::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RedisSection {
    #[serde(default)]
    redis: RedisConfig,
}

impl RedisConfig {
    /// Load from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;

        let section: RedisSection = settings
            .try_deserialize()
            .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        Ok(section.redis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Connection URL with credentials percent-encoded
    pub fn to_url(&self) -> Result<String> {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let mut url = Url::parse(&format!(
            "{}://{}:{}/{}",
            scheme, self.host, self.port, self.db
        ))
        .map_err(|e| StoreError::InvalidConfig(format!("invalid redis address: {}", e)))?;

        if let Some(username) = &self.username {
            url.set_username(username)
                .map_err(|_| StoreError::InvalidConfig("cannot set redis username".to_string()))?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| StoreError::InvalidConfig("cannot set redis password".to_string()))?;
        }

        Ok(url.to_string())
    }
}
