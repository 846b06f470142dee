//! Latchkey Cache - JSON caching on top of a shared key-value store
//!
//! - [`CacheClient`]: typed get/set with JSON encoding, counters, pattern scans
//! - [`Cached`]: memoize an async computation keyed by its arguments
//! - [`cache_aside`]: read-through caching under an explicit key

mod cached;
mod client;
mod key;

pub use cached::{Cached, DEFAULT_CACHE_TTL, cache_aside};
pub use client::{CacheClient, DEFAULT_SCAN_COUNT};
pub use key::{MAX_PLAIN_KEY_LEN, cache_key};
