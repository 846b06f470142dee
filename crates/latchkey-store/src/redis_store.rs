//! Redis-backed key-value store
//!
//! Uses a single multiplexed [`ConnectionManager`] that reconnects on its own;
//! the handle is cloned per call, so one `RedisStore` can be shared through an
//! `Arc` by any number of locks and caches.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use latchkey_common::{
    CacheStore, KeyTtl, KeyValueStore, Result, SetOptions, StoreError, StoreScript, ttl_millis,
};
use redis::RedisError;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::settings::RedisConfig;

/// Key-value store over a Redis server
pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
    /// Compiled scripts keyed by script name, so the SHA1 is computed once
    scripts: DashMap<&'static str, Arc<redis::Script>>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .field("scripts", &self.scripts.len())
            .finish()
    }
}

fn store_error(err: RedisError) -> StoreError {
    if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::backend(err)
    }
}

impl RedisStore {
    /// Connect within the configured timeout
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let url = config.to_url()?;
        let client = redis::Client::open(url.as_str()).map_err(store_error)?;

        let timeout = config.connect_timeout();
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
            .map_err(store_error)?;

        info!(
            host = %config.host,
            port = config.port,
            db = config.db,
            "Connected to Redis at {}:{}",
            config.host,
            config.port
        );

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            scripts: DashMap::new(),
        })
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    fn compiled(&self, script: &StoreScript) -> Arc<redis::Script> {
        self.scripts
            .entry(script.name)
            .or_insert_with(|| Arc::new(redis::Script::new(script.source)))
            .clone()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection();
        let value: Option<String> = redis::cmd("GET")
            .arg(self.prefixed(key))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.prefixed(key)).arg(value);
        if let Some(ttl) = options.ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        if options.only_if_absent {
            cmd.arg("NX");
        } else if options.only_if_present {
            cmd.arg("XX");
        }

        let mut conn = self.connection();
        let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(store_error)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let prefixed: Vec<String> = keys.iter().map(|k| self.prefixed(k)).collect();
        let mut conn = self.connection();
        let removed: u64 = redis::cmd("DEL")
            .arg(prefixed)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(removed)
    }

    async fn exists(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let prefixed: Vec<String> = keys.iter().map(|k| self.prefixed(k)).collect();
        let mut conn = self.connection();
        let present: u64 = redis::cmd("EXISTS")
            .arg(prefixed)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(present)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection();
        let updated: i64 = redis::cmd("PEXPIRE")
            .arg(self.prefixed(key))
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(updated == 1)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let mut conn = self.connection();
        let reply: i64 = redis::cmd("PTTL")
            .arg(self.prefixed(key))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(KeyTtl::from_millis_reply(reply))
    }

    async fn run_script(
        &self,
        script: &StoreScript,
        keys: &[&str],
        args: &[&str],
    ) -> Result<i64> {
        let compiled = self.compiled(script);
        let mut invocation = compiled.prepare_invoke();
        for key in keys {
            invocation.key(self.prefixed(key));
        }
        for arg in args {
            invocation.arg(*arg);
        }

        let mut conn = self.connection();
        let reply: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        debug!(script = script.name, reply, "Ran store script");
        Ok(reply)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.connection();
        let value: i64 = redis::cmd("INCRBY")
            .arg(self.prefixed(key))
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(value)
    }

    async fn scan(&self, pattern: &str, count: usize) -> Result<Vec<String>> {
        let pattern = self.prefixed(pattern);
        let mut conn = self.connection();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(count.max(1))
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys
            .into_iter()
            .map(|k| match k.strip_prefix(self.key_prefix.as_str()) {
                Some(stripped) => stripped.to_string(),
                None => k,
            })
            .collect())
    }

    async fn ping(&self) -> Result<bool> {
        let mut conn = self.connection();
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(reply == "PONG")
    }
}
