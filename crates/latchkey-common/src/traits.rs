//! Key-value store contract
//!
//! These traits abstract away the concrete store client, so the lock and
//! cache crates depend only on the operations they need and can be tested
//! against an in-process store.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::script::StoreScript;

/// Flags for a conditional write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Expire the key after this long
    pub ttl: Option<Duration>,
    /// Only write if the key does not exist (`NX`)
    pub only_if_absent: bool,
    /// Only write if the key already exists (`XX`)
    pub only_if_present: bool,
}

impl SetOptions {
    /// Plain write with an optional expiry
    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }

    /// Conditional write used for lock acquisition
    pub fn if_absent(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            only_if_absent: true,
            only_if_present: false,
        }
    }
}

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist
    Missing,
    /// The key exists without an expiry
    Persistent,
    /// The key expires after the given duration
    Expires(Duration),
}

impl KeyTtl {
    /// Decode the integer reply of a `PTTL` command (-2 missing, -1 no expiry)
    pub fn from_millis_reply(reply: i64) -> Self {
        match reply {
            -2 => KeyTtl::Missing,
            r if r < 0 => KeyTtl::Persistent,
            r => KeyTtl::Expires(Duration::from_millis(r as u64)),
        }
    }

    /// Remaining duration, if the key expires at all
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            KeyTtl::Expires(d) => Some(*d),
            _ => None,
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, KeyTtl::Missing)
    }
}

/// Operations the distributed lock needs from a shared key-value store
///
/// Implementations must make `set` with `only_if_absent` and `run_script`
/// atomic with respect to other clients of the same store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value; returns whether the write happened
    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool>;

    /// Delete keys; returns how many existed
    async fn delete(&self, keys: &[&str]) -> Result<u64>;

    /// Count how many of the keys exist
    async fn exists(&self, keys: &[&str]) -> Result<u64>;

    /// Set an expiry on an existing key
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining lifetime of a key
    async fn ttl(&self, key: &str) -> Result<KeyTtl>;

    /// Run a server-side script with an integer reply
    async fn run_script(
        &self,
        script: &StoreScript,
        keys: &[&str],
        args: &[&str],
    ) -> Result<i64>;
}

/// Additional operations used by the cache helpers
#[async_trait]
pub trait CacheStore: KeyValueStore {
    /// Add `delta` to an integer value, creating it at 0 first
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Keys matching a glob pattern (`*`, `?`); `count` is a batch-size hint
    async fn scan(&self, pattern: &str, count: usize) -> Result<Vec<String>>;

    /// Liveness check
    async fn ping(&self) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ttl_from_reply() {
        assert_eq!(KeyTtl::from_millis_reply(-2), KeyTtl::Missing);
        assert_eq!(KeyTtl::from_millis_reply(-1), KeyTtl::Persistent);
        assert_eq!(
            KeyTtl::from_millis_reply(1500),
            KeyTtl::Expires(Duration::from_millis(1500))
        );
        assert_eq!(KeyTtl::from_millis_reply(0).remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_key_ttl_exists() {
        assert!(!KeyTtl::Missing.exists());
        assert!(KeyTtl::Persistent.exists());
        assert!(KeyTtl::Expires(Duration::from_secs(1)).exists());
        assert_eq!(KeyTtl::Persistent.remaining(), None);
    }

    #[test]
    fn test_set_options() {
        let opts = SetOptions::if_absent(Duration::from_secs(10));
        assert!(opts.only_if_absent);
        assert!(!opts.only_if_present);
        assert_eq!(opts.ttl, Some(Duration::from_secs(10)));

        let plain = SetOptions::with_ttl(None);
        assert_eq!(plain, SetOptions::default());
    }
}
