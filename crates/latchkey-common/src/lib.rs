//! Latchkey Common - Shared types and traits
//!
//! This crate provides the foundational pieces used across all Latchkey components:
//! - `StoreError` and the crate-wide `Result` alias
//! - The `KeyValueStore` contract consumed by the distributed lock
//! - The `CacheStore` extension used by the cache helpers
//! - The server-side scripts that make lock release and renewal atomic

pub mod error;
pub mod script;
pub mod traits;

// Re-exports for convenience
pub use error::{Result, StoreError};
pub use script::{RELEASE_IF_OWNER, RENEW_IF_OWNER, StoreScript};
pub use traits::*;

/// Namespace prepended to every lock name before it reaches the store
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Namespace prepended to every generated cache key
pub const CACHE_KEY_PREFIX: &str = "cache:";

/// Milliseconds for a store expiry. Sub-millisecond durations round up so a
/// non-zero TTL never becomes zero on the wire.
pub fn ttl_millis(ttl: std::time::Duration) -> u64 {
    if ttl.is_zero() {
        return 0;
    }
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
