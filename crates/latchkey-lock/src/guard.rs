//! Scope guard for a held lock
//!
//! The guard borrows the lock mutably, so nothing else can acquire or release
//! through the same instance while it is alive. [`LockGuard::run`] backs the
//! scoped and wrapper forms and releases on every exit path, panics included.

use std::future::Future;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use latchkey_common::KeyValueStore;

use crate::lock::DistributedLock;

/// Holds a [`DistributedLock`] until released or dropped
///
/// Prefer [`release`](Self::release): dropping the guard can only schedule the
/// release on the current runtime and cannot report whether it happened.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a, S: KeyValueStore + ?Sized + 'static> {
    lock: &'a mut DistributedLock<S>,
    released: bool,
}

impl<'a, S: KeyValueStore + ?Sized + 'static> LockGuard<'a, S> {
    pub(crate) fn new(lock: &'a mut DistributedLock<S>) -> Self {
        Self {
            lock,
            released: false,
        }
    }

    /// Release now; same result as [`DistributedLock::release`]
    pub async fn release(mut self) -> bool {
        self.released = true;
        self.lock.release().await
    }

    /// Run `f`, then release whatever happened, re-raising a panic from `f`
    pub(crate) async fn run<F, Fut, T>(self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let outcome = AssertUnwindSafe(async move { f().await })
            .catch_unwind()
            .await;
        self.release().await;
        match outcome {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl<S: KeyValueStore + ?Sized + 'static> Deref for LockGuard<'_, S> {
    type Target = DistributedLock<S>;

    fn deref(&self) -> &Self::Target {
        self.lock
    }
}

impl<S: KeyValueStore + ?Sized + 'static> Drop for LockGuard<'_, S> {
    fn drop(&mut self) {
        if !self.released {
            self.lock.release_in_background();
        }
    }
}

impl<S: KeyValueStore + ?Sized + 'static> std::fmt::Debug for LockGuard<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("lock", &self.lock)
            .field("released", &self.released)
            .finish()
    }
}
