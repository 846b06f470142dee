//! Latchkey Lock - Distributed mutual exclusion over a key-value store
//!
//! This crate provides:
//! - [`DistributedLock`]: token-owned lock with TTL and optional auto-renewal
//! - [`LockGuard`]: scope guard returned by [`DistributedLock::lock`]
//! - [`DistributedLock::scoped`]: run a closure while holding the lock
//! - [`WithLock`]: wrap calls so each one runs under a fresh lock instance
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use latchkey_lock::{DistributedLock, LockOptions};
//! use latchkey_store::MemoryStore;
//!
//! # async fn run() -> Result<(), latchkey_lock::LockError> {
//! let store = Arc::new(MemoryStore::new());
//! let options = LockOptions::default()
//!     .ttl(Duration::from_secs(30))
//!     .auto_renewal(true);
//! let mut lock = DistributedLock::with_options(store, "process_orders", options);
//!
//! lock.scoped(|| async {
//!     // only one holder at a time runs this
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod guard;
mod lock;
mod renewal;
mod with_lock;

pub use error::{LockError, Result};
pub use guard::LockGuard;
pub use lock::{
    DEFAULT_LOCK_TTL, DEFAULT_POLL_INTERVAL, DistributedLock, LockOptions, MIN_POLL_INTERVAL,
};
pub use with_lock::{WithLock, with_lock};
