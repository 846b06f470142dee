//! Typed cache client
//!
//! Values are stored as JSON text. Every method returns the store's error
//! instead of hiding it; callers that want best-effort caching use
//! [`Cached`](crate::Cached).

use std::sync::Arc;
use std::time::Duration;

use latchkey_common::{CacheStore, KeyTtl, Result, SetOptions};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Batch-size hint passed to `scan` when none is given
pub const DEFAULT_SCAN_COUNT: usize = 100;

pub struct CacheClient<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for CacheClient<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ?Sized> std::fmt::Debug for CacheClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient").finish_non_exhaustive()
    }
}

impl<S: CacheStore + ?Sized> CacheClient<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The underlying store, e.g. to build a lock on the same connection
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Read and decode a JSON value
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Read the stored text without decoding
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.store.get(key).await
    }

    /// Encode and write a value; no `ttl` means the key never expires
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let encoded = serde_json::to_string(value)?;
        self.store
            .set(key, &encoded, SetOptions::with_ttl(ttl))
            .await
    }

    /// Write only if the key is absent
    pub async fn set_if_absent<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let encoded = serde_json::to_string(value)?;
        let options = SetOptions {
            ttl,
            only_if_absent: true,
            only_if_present: false,
        };
        self.store.set(key, &encoded, options).await
    }

    /// Overwrite only if the key already exists
    pub async fn replace<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let encoded = serde_json::to_string(value)?;
        let options = SetOptions {
            ttl,
            only_if_absent: false,
            only_if_present: true,
        };
        self.store.set(key, &encoded, options).await
    }

    pub async fn delete(&self, keys: &[&str]) -> Result<u64> {
        self.store.delete(keys).await
    }

    pub async fn exists(&self, keys: &[&str]) -> Result<u64> {
        self.store.exists(keys).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.store.expire(key, ttl).await
    }

    pub async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        self.store.ttl(key).await
    }

    /// Add `amount` to a counter, starting from 0 if it does not exist
    pub async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        self.store.incr_by(key, amount).await
    }

    pub async fn decrement(&self, key: &str, amount: i64) -> Result<i64> {
        self.store.incr_by(key, amount.saturating_neg()).await
    }

    /// Keys matching a glob pattern such as `user:*`
    pub async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.store.scan(pattern, DEFAULT_SCAN_COUNT).await
    }

    /// Delete every key matching `pattern`; returns how many were removed
    pub async fn flush_pattern(&self, pattern: &str) -> Result<u64> {
        let keys = self.scan_keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let removed = self.store.delete(&refs).await?;
        debug!(pattern, removed, "Flushed cache keys");
        Ok(removed)
    }

    pub async fn ping(&self) -> Result<bool> {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_common::StoreError;
    use latchkey_store::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u64,
        name: String,
    }

    fn client() -> CacheClient<MemoryStore> {
        CacheClient::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_json_roundtrip() {
        let client = client();
        let user = User {
            id: 123,
            name: "John".to_string(),
        };

        assert!(client.set("user:123", &user, None).await.unwrap());
        assert_eq!(client.get::<User>("user:123").await.unwrap(), Some(user));
        assert_eq!(
            client.get_raw("user:123").await.unwrap().as_deref(),
            Some(r#"{"id":123,"name":"John"}"#)
        );
        assert_eq!(client.get::<User>("user:404").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_wrong_type() {
        let client = client();
        client.set("user:1", &"plain text", None).await.unwrap();

        assert!(matches!(
            client.get::<User>("user:1").await,
            Err(StoreError::Serialization(_))
        ));
        assert_eq!(
            client.get::<String>("user:1").await.unwrap().as_deref(),
            Some("plain text")
        );
    }

    #[tokio::test]
    async fn test_conditional_writes() {
        let client = client();

        assert!(!client.replace("k", &1, None).await.unwrap());
        assert!(client.set_if_absent("k", &1, None).await.unwrap());
        assert!(!client.set_if_absent("k", &2, None).await.unwrap());
        assert!(client.replace("k", &3, None).await.unwrap());
        assert_eq!(client.get::<i32>("k").await.unwrap(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_and_expire() {
        let client = client();
        client
            .set("session", &"abc", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(
            client.ttl("session").await.unwrap(),
            KeyTtl::Expires(Duration::from_secs(60))
        );

        assert!(client.expire("session", Duration::from_secs(5)).await.unwrap());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(client.exists(&["session"]).await.unwrap(), 0);
        assert_eq!(client.ttl("session").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test]
    async fn test_counters() {
        let client = client();
        assert_eq!(client.increment("page:views", 1).await.unwrap(), 1);
        assert_eq!(client.increment("page:views", 5).await.unwrap(), 6);
        assert_eq!(client.decrement("page:views", 2).await.unwrap(), 4);
        assert_eq!(client.decrement("stock", 1).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_scan_and_flush() {
        let client = client();
        for key in ["session:a", "session:b", "user:1"] {
            client.set(key, &true, None).await.unwrap();
        }

        assert_eq!(
            client.scan_keys("session:*").await.unwrap(),
            vec!["session:a".to_string(), "session:b".to_string()]
        );
        assert_eq!(client.flush_pattern("session:*").await.unwrap(), 2);
        assert_eq!(client.flush_pattern("session:*").await.unwrap(), 0);
        assert_eq!(client.exists(&["user:1"]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_errors_propagate() {
        let store = Arc::new(MemoryStore::new());
        let client = CacheClient::new(store.clone());
        store.set_unavailable(true);

        assert!(matches!(
            client.get::<i32>("k").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(client.ping().await.is_err());

        store.set_unavailable(false);
        assert!(client.ping().await.unwrap());
    }
}
