//! Memoization helpers

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use latchkey_common::{CacheStore, StoreError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::client::CacheClient;
use crate::key::cache_key;

/// Default lifetime of a memoized result
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Memoizes an async computation under a key derived from its arguments
///
/// The cache is best effort: read, decode and write failures are logged and
/// the computation runs as if there were no cache. Only `Ok` results are
/// stored.
pub struct Cached<S: ?Sized> {
    client: CacheClient<S>,
    namespace: String,
    key_prefix: Option<String>,
    ttl: Duration,
}

impl<S: ?Sized> Clone for Cached<S> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            namespace: self.namespace.clone(),
            key_prefix: self.key_prefix.clone(),
            ttl: self.ttl,
        }
    }
}

impl<S: ?Sized> std::fmt::Debug for Cached<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cached")
            .field("namespace", &self.namespace)
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<S: CacheStore + ?Sized> Cached<S> {
    /// `namespace` usually names the wrapped function
    pub fn new(store: Arc<S>, namespace: impl Into<String>) -> Self {
        Self {
            client: CacheClient::new(store),
            namespace: namespace.into(),
            key_prefix: None,
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Extra namespace, producing keys like `<prefix>:cache:<namespace>:...`
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn key_for<A: Serialize + ?Sized>(&self, args: &A) -> latchkey_common::Result<String> {
        let key = cache_key(&self.namespace, args)?;
        Ok(match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key,
        })
    }

    /// Return the cached result for `args`, or run `f` and cache its `Ok` value
    pub async fn call<A, T, E, F, Fut>(&self, args: &A, f: F) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = match self.key_for(args) {
            Ok(key) => key,
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "Cannot build cache key, bypassing cache");
                return f().await;
            }
        };

        match self.client.get::<T>(&key).await {
            Ok(Some(value)) => {
                metrics::counter!("latchkey_cache_hits_total").increment(1);
                debug!(key = %key, "Cache hit");
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Cache get failed"),
        }

        metrics::counter!("latchkey_cache_misses_total").increment(1);
        debug!(key = %key, "Cache miss");
        let value = f().await?;

        match self.client.set(&key, &value, Some(self.ttl)).await {
            Ok(_) => debug!(key = %key, ttl = ?self.ttl, "Cached result"),
            Err(e) => warn!(key = %key, error = %e, "Cache set failed"),
        }
        Ok(value)
    }

    /// Drop the cached result for `args`; returns whether one existed
    pub async fn invalidate<A: Serialize + ?Sized>(
        &self,
        args: &A,
    ) -> latchkey_common::Result<bool> {
        let key = self.key_for(args)?;
        let removed = self.client.delete(&[&key]).await?;
        Ok(removed > 0)
    }
}

/// Read-through caching under an explicit key
///
/// Unlike [`Cached`], store and decode failures are returned to the caller.
pub async fn cache_aside<S, T, E, F, Fut>(
    client: &CacheClient<S>,
    key: &str,
    ttl: Option<Duration>,
    f: F,
) -> Result<T, E>
where
    S: CacheStore + ?Sized,
    T: Serialize + DeserializeOwned,
    E: From<StoreError>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if let Some(value) = client.get::<T>(key).await? {
        debug!(key, "Cache hit");
        return Ok(value);
    }

    debug!(key, "Cache miss");
    let value = f().await?;
    client.set(key, &value, ttl).await?;
    Ok(value)
}
