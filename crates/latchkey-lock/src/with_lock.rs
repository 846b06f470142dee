//! Run calls under a lock
//!
//! [`WithLock`] carries the lock settings rather than a lock, and builds a
//! fresh [`DistributedLock`] for every call. Concurrent calls through one
//! wrapper therefore contend with each other exactly like separate processes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use latchkey_common::KeyValueStore;

use crate::error::Result;
use crate::lock::{DistributedLock, LockOptions};

/// Wrapper that runs each call under its own lock instance
pub struct WithLock<S: ?Sized> {
    store: Arc<S>,
    name: String,
    options: LockOptions,
    blocking: bool,
    timeout: Option<Duration>,
}

/// Shorthand for [`WithLock::new`]
pub fn with_lock<S: KeyValueStore + ?Sized + 'static>(
    store: Arc<S>,
    name: impl Into<String>,
) -> WithLock<S> {
    WithLock::new(store, name)
}

impl<S: ?Sized> Clone for WithLock<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            name: self.name.clone(),
            options: self.options,
            blocking: self.blocking,
            timeout: self.timeout,
        }
    }
}

impl<S: ?Sized> std::fmt::Debug for WithLock<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WithLock")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("blocking", &self.blocking)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<S: KeyValueStore + ?Sized + 'static> WithLock<S> {
    /// Blocking, no timeout, default TTL, no renewal
    pub fn new(store: Arc<S>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            options: LockOptions::default(),
            blocking: true,
            timeout: None,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.options.ttl = ttl;
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Give up waiting after `timeout`; only meaningful when blocking
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn auto_renewal(mut self, enabled: bool) -> Self {
        self.options.auto_renewal = enabled;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Acquire, run `f`, release
    ///
    /// `f` is never invoked when the lock is not obtained; the call then fails
    /// with [`LockError::NotAcquired`](crate::LockError::NotAcquired). Panics
    /// in `f` are re-raised after the release.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut lock =
            DistributedLock::with_options(Arc::clone(&self.store), self.name.clone(), self.options);
        let guard = lock.lock_with(self.blocking, self.timeout).await?;
        Ok(guard.run(f).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LockError;
    use latchkey_store::MemoryStore;

    #[tokio::test]
    async fn test_call_returns_value_and_releases() {
        let store = Arc::new(MemoryStore::new());
        let wrapper = with_lock(store.clone(), "job");

        let value = wrapper.call(|| async { 42 }).await.unwrap();
        assert_eq!(value, 42);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_call_skipped_when_busy() {
        let store = Arc::new(MemoryStore::new());
        let mut holder = DistributedLock::new(store.clone(), "job");
        assert!(holder.try_acquire().await.unwrap());

        let wrapper = with_lock(store.clone(), "job").blocking(false);
        let mut invoked = false;
        let result = wrapper
            .call(|| {
                invoked = true;
                async {}
            })
            .await;

        assert!(matches!(result, Err(LockError::NotAcquired(name)) if name == "job"));
        assert!(!invoked);
        assert!(holder.release().await);
    }

    #[test]
    fn test_builder() {
        let store = Arc::new(MemoryStore::new());
        let wrapper = with_lock(store, "job")
            .ttl(Duration::from_secs(60))
            .timeout(Duration::from_secs(2))
            .auto_renewal(true);

        assert_eq!(wrapper.name(), "job");
        assert_eq!(wrapper.options().ttl, Duration::from_secs(60));
        assert!(wrapper.options().auto_renewal);
        let copy = wrapper.clone();
        assert_eq!(copy.timeout, Some(Duration::from_secs(2)));
        assert!(copy.blocking);
    }
}
