//! Token-owned distributed lock
//!
//! A lock is a single key `lock:{name}` whose value is the holder's random
//! token. Acquisition is a conditional write with an expiry; release and
//! renewal are scripts that act only when the stored value still equals the
//! caller's token, so a holder whose key expired can never touch a successor's
//! lock.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use latchkey_common::{KeyTtl, KeyValueStore, LOCK_KEY_PREFIX, RELEASE_IF_OWNER, SetOptions};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{LockError, Result};
use crate::guard::LockGuard;
use crate::renewal::{RenewalTask, renew_if_owner};

/// Default expiry of a lock key
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);

/// Pause between attempts while blocking on a contended lock
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shorter poll intervals are raised to this
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Lock settings fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub ttl: Duration,
    pub auto_renewal: bool,
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_LOCK_TTL,
            auto_renewal: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl LockOptions {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Keep the key alive in the background for as long as the lock is held
    pub fn auto_renewal(mut self, enabled: bool) -> Self {
        self.auto_renewal = enabled;
        self
    }

    /// Values below [`MIN_POLL_INTERVAL`] are raised to it when waiting
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Delete `key` only if it still holds `token`
///
/// Store failures are logged and reported as "not released"; the key then
/// expires on its own.
pub(crate) async fn release_if_owner<S: KeyValueStore + ?Sized>(
    store: &S,
    key: &str,
    token: &str,
) -> bool {
    match store.run_script(&RELEASE_IF_OWNER, &[key], &[token]).await {
        Ok(1) => {
            metrics::counter!("latchkey_lock_released_total").increment(1);
            debug!(lock = %key, "Released lock");
            true
        }
        Ok(_) => {
            warn!(lock = %key, "Lock was not released: not held by this token");
            false
        }
        Err(e) => {
            error!(lock = %key, error = %e, "Failed to release lock");
            false
        }
    }
}

/// A named lock shared by every process that uses the same store
///
/// Each instance carries its own token, so two instances with the same name
/// contend with each other even inside one process.
pub struct DistributedLock<S: ?Sized> {
    store: Arc<S>,
    name: String,
    key: String,
    token: String,
    options: LockOptions,
    renewal: Option<RenewalTask>,
    pending_release: Option<JoinHandle<()>>,
    lost: Arc<AtomicBool>,
    held: bool,
}

impl<S: ?Sized> std::fmt::Debug for DistributedLock<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("options", &self.options)
            .field("held", &self.held)
            .field("renewing", &self.renewal.is_some())
            .field("release_pending", &self.pending_release.is_some())
            .finish()
    }
}

impl<S: KeyValueStore + ?Sized + 'static> DistributedLock<S> {
    pub fn new(store: Arc<S>, name: impl Into<String>) -> Self {
        Self::with_options(store, name, LockOptions::default())
    }

    pub fn with_options(store: Arc<S>, name: impl Into<String>, options: LockOptions) -> Self {
        let name = name.into();
        Self {
            store,
            key: format!("{}{}", LOCK_KEY_PREFIX, name),
            name,
            token: uuid::Uuid::new_v4().to_string(),
            options,
            renewal: None,
            pending_release: None,
            lost: Arc::new(AtomicBool::new(false)),
            held: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store key backing this lock
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Ownership token written as the key's value
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ttl(&self) -> Duration {
        self.options.ttl
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Whether this instance acquired the lock and has not released it yet
    ///
    /// This is local bookkeeping only; see [`is_owned`](Self::is_owned) for
    /// the store's view.
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Set once background renewal finds the key gone or taken over, or
    /// cannot reach the store before the key's TTL runs out
    pub fn ownership_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Try to take the lock
    ///
    /// Non-blocking mode makes exactly one attempt. Blocking mode retries
    /// every poll interval until it succeeds or `timeout` elapses; with no
    /// timeout it waits indefinitely. Returns `Ok(false)` when the lock could
    /// not be taken; store errors are returned as is.
    pub async fn acquire(&mut self, blocking: bool, timeout: Option<Duration>) -> Result<bool> {
        if self.options.ttl.is_zero() {
            return Err(LockError::InvalidTtl(self.name.clone()));
        }

        self.settle_pending_release().await;

        let started = Instant::now();
        // A timeout past the clock's range waits forever
        let deadline = timeout.and_then(|t| started.checked_add(t));
        let poll_interval = self.options.poll_interval.max(MIN_POLL_INTERVAL);

        loop {
            let acquired = self
                .store
                .set(&self.key, &self.token, SetOptions::if_absent(self.options.ttl))
                .await?;
            if acquired {
                self.on_acquired().await;
                info!(
                    lock = %self.key,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Acquired lock"
                );
                return Ok(true);
            }

            if !blocking {
                metrics::counter!("latchkey_lock_contended_total").increment(1);
                debug!(lock = %self.key, "Lock is held elsewhere");
                return Ok(false);
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        metrics::counter!("latchkey_lock_timeouts_total").increment(1);
                        warn!(
                            lock = %self.key,
                            "Failed to acquire lock within {:?}",
                            timeout.unwrap_or_default()
                        );
                        return Ok(false);
                    }
                    poll_interval.min(deadline - now)
                }
                None => poll_interval,
            };
            tokio::time::sleep(pause).await;
        }
    }

    /// Single non-blocking attempt
    pub async fn try_acquire(&mut self) -> Result<bool> {
        self.acquire(false, None).await
    }

    async fn on_acquired(&mut self) {
        if let Some(stale) = self.renewal.take() {
            stale.stop().await;
        }
        self.held = true;
        self.lost.store(false, Ordering::SeqCst);
        metrics::counter!("latchkey_lock_acquired_total").increment(1);

        if self.options.auto_renewal {
            self.renewal = Some(RenewalTask::spawn(
                Arc::clone(&self.store),
                self.key.clone(),
                self.token.clone(),
                self.options.ttl,
                Arc::clone(&self.lost),
            ));
        }
    }

    /// Stop renewal, then delete the key if this instance still owns it
    ///
    /// Returns `false` if the key was missing, owned by another token, or the
    /// store failed. Never returns an error.
    pub async fn release(&mut self) -> bool {
        self.settle_pending_release().await;
        if let Some(renewal) = self.renewal.take() {
            let exit = renewal.stop().await;
            debug!(lock = %self.key, ?exit, "Lock renewal finished");
        }
        self.held = false;
        release_if_owner(self.store.as_ref(), &self.key, &self.token).await
    }

    /// Release from a synchronous context such as `Drop`
    pub(crate) fn release_in_background(&mut self) {
        let renewal = self.renewal.take();
        self.held = false;

        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let token = self.token.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.pending_release = Some(handle.spawn(async move {
                    if let Some(renewal) = renewal {
                        renewal.stop().await;
                    }
                    release_if_owner(store.as_ref(), &key, &token).await;
                }));
            }
            Err(_) => {
                warn!(lock = %key, "No async runtime to release lock; it will expire after its ttl");
            }
        }
    }

    /// Wait for a release scheduled by a dropped guard
    ///
    /// It carries this instance's token, so it must land before the next
    /// acquisition or it would delete the new hold.
    async fn settle_pending_release(&mut self) {
        if let Some(pending) = self.pending_release.take() {
            if let Err(e) = pending.await {
                warn!(lock = %self.key, error = %e, "Background release did not finish cleanly");
            }
        }
    }

    /// Reset the key's expiry to the full TTL if this instance still owns it
    pub async fn extend(&self) -> Result<bool> {
        let extended = renew_if_owner(
            self.store.as_ref(),
            &self.key,
            &self.token,
            self.options.ttl,
        )
        .await?;
        if !extended {
            debug!(lock = %self.key, "Lock not extended: not held by this token");
        }
        Ok(extended)
    }

    /// Whether any holder currently has this lock
    pub async fn is_locked(&self) -> Result<bool> {
        Ok(self.store.exists(&[&self.key]).await? > 0)
    }

    /// Whether the store still maps the key to this instance's token
    pub async fn is_owned(&self) -> Result<bool> {
        let value = self.store.get(&self.key).await?;
        Ok(value.as_deref() == Some(self.token.as_str()))
    }

    pub async fn remaining_ttl(&self) -> Result<KeyTtl> {
        Ok(self.store.ttl(&self.key).await?)
    }

    /// Block until acquired and return a guard that releases on drop
    pub async fn lock(&mut self) -> Result<LockGuard<'_, S>> {
        self.lock_with(true, None).await
    }

    /// Acquire with explicit blocking settings and return a guard
    ///
    /// Fails with [`LockError::NotAcquired`] instead of returning `false`.
    pub async fn lock_with(
        &mut self,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> Result<LockGuard<'_, S>> {
        if !self.acquire(blocking, timeout).await? {
            return Err(LockError::NotAcquired(self.name.clone()));
        }
        Ok(LockGuard::new(self))
    }

    /// Run `f` while holding the lock, releasing afterwards even if `f` panics
    ///
    /// Waits indefinitely for the lock. The closure's output is returned
    /// unchanged; a panic is re-raised after the release.
    pub async fn scoped<F, Fut, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.lock().await?;
        Ok(guard.run(f).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_store::MemoryStore;

    #[test]
    fn test_options_builder() {
        let options = LockOptions::default()
            .ttl(Duration::from_secs(30))
            .auto_renewal(true)
            .poll_interval(Duration::from_millis(10));
        assert_eq!(options.ttl, Duration::from_secs(30));
        assert!(options.auto_renewal);
        assert_eq!(options.poll_interval, Duration::from_millis(10));

        let defaults = LockOptions::default();
        assert_eq!(defaults.ttl, Duration::from_secs(10));
        assert!(!defaults.auto_renewal);
        assert_eq!(defaults.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_key_and_token() {
        let store = Arc::new(MemoryStore::new());
        let a = DistributedLock::new(store.clone(), "reports");
        let b = DistributedLock::new(store, "reports");

        assert_eq!(a.key(), "lock:reports");
        assert_eq!(a.name(), "reports");
        assert_ne!(a.token(), b.token());
        assert!(uuid::Uuid::parse_str(a.token()).is_ok());
        assert!(!a.is_held());
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected_before_io() {
        let store = Arc::new(MemoryStore::new());
        let mut lock = DistributedLock::with_options(
            store.clone(),
            "zero",
            LockOptions::default().ttl(Duration::ZERO),
        );

        assert!(matches!(
            lock.acquire(false, None).await,
            Err(LockError::InvalidTtl(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_acquire_propagates_store_error() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let mut lock = DistributedLock::new(store, "down");

        assert!(matches!(
            lock.try_acquire().await,
            Err(LockError::Store(_))
        ));
        assert!(!lock.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_beyond_clock_range_waits_without_deadline() {
        let store = Arc::new(MemoryStore::new());
        let mut lock = DistributedLock::new(store.clone(), "far");

        assert!(lock.acquire(true, Some(Duration::MAX)).await.unwrap());
        assert!(lock.release().await);
        assert!(
            lock.acquire(true, Some(Duration::from_secs_f64(1e19)))
                .await
                .unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_ttl_is_a_store_error() {
        let store = Arc::new(MemoryStore::new());
        let mut lock = DistributedLock::with_options(
            store.clone(),
            "forever",
            LockOptions::default().ttl(Duration::MAX),
        );

        assert!(matches!(
            lock.try_acquire().await,
            Err(LockError::Store(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_interval_still_sleeps() {
        let store = Arc::new(MemoryStore::new());
        let mut holder = DistributedLock::new(store.clone(), "spin");
        let mut waiter = DistributedLock::with_options(
            store,
            "spin",
            LockOptions::default().poll_interval(Duration::ZERO),
        );
        assert!(holder.try_acquire().await.unwrap());

        let timeout = Duration::from_millis(20);
        let started = Instant::now();
        assert!(!waiter.acquire(true, Some(timeout)).await.unwrap());

        let waited = started.elapsed();
        assert!(waited >= timeout, "returned after {:?}", waited);
        assert!(waited < timeout + Duration::from_millis(5), "returned after {:?}", waited);
    }

    #[tokio::test]
    async fn test_release_swallows_store_error() {
        let store = Arc::new(MemoryStore::new());
        let mut lock = DistributedLock::new(store.clone(), "flaky");
        assert!(lock.try_acquire().await.unwrap());

        store.set_unavailable(true);
        assert!(!lock.release().await);
        assert!(!lock.is_held());
    }
}
