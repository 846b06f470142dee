//! In-process key-value store
//!
//! Expiry is measured on the Tokio clock, so tests running with paused time
//! see keys expire exactly when the virtual clock passes their deadline.
//! Expired entries are dropped when their key is next touched, and all at
//! once by [`MemoryStore::purge_expired`], which `len` and `scan` also run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use latchkey_common::{
    CacheStore, KeyTtl, KeyValueStore, RELEASE_IF_OWNER, RENEW_IF_OWNER, Result, SetOptions,
    StoreError, StoreScript,
};
use tokio::time::Instant;

use crate::glob::glob_match;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

/// Deadline `ttl` from `now`, rejecting TTLs past the clock's range
fn expiry(now: Instant, ttl: Duration) -> Result<Instant> {
    now.checked_add(ttl)
        .ok_or_else(|| invalid_argument("invalid expire time: ttl out of range"))
}

impl StoredValue {
    fn new(value: &str, ttl: Option<Duration>, now: Instant) -> Result<Self> {
        Ok(Self {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| expiry(now, ttl)).transpose()?,
        })
    }

    fn persistent(value: String) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

/// Key-value store held in process memory
///
/// Conditional writes and the lock scripts are atomic per key. Scripts are
/// recognized by name; only [`RELEASE_IF_OWNER`] and [`RENEW_IF_OWNER`] are
/// supported.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.entries.len()
    }

    /// Drop every expired entry and return how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, v| v.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn live_value(&self, key: &str, now: Instant) -> Option<StoredValue> {
        self.entries.remove_if(key, |_, v| !v.is_live(now));
        self.entries.get(key).map(|v| v.clone())
    }

    fn release_if_owner(&self, key: &str, token: &str) -> i64 {
        let now = Instant::now();
        let removed = self
            .entries
            .remove_if(key, |_, v| v.is_live(now) && v.value == token);
        i64::from(removed.is_some())
    }

    fn renew_if_owner(&self, key: &str, token: &str, ttl: Duration) -> Result<i64> {
        let now = Instant::now();
        let deadline = expiry(now, ttl)?;
        Ok(match self.entries.get_mut(key) {
            Some(mut v) if v.is_live(now) && v.value == token => {
                v.expires_at = Some(deadline);
                1
            }
            _ => 0,
        })
    }
}

fn invalid_argument(message: &str) -> StoreError {
    StoreError::backend(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        message.to_string(),
    ))
}

fn script_arg<'a>(values: &[&'a str], index: usize, script: &StoreScript) -> Result<&'a str> {
    values.get(index).copied().ok_or_else(|| {
        invalid_argument(&format!(
            "wrong number of arguments for script '{}'",
            script.name
        ))
    })
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.live_value(key, Instant::now()).map(|v| v.value))
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool> {
        self.check_available()?;
        if options.ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(invalid_argument("invalid expire time in 'set' command"));
        }

        let now = Instant::now();
        let stored = StoredValue::new(value, options.ttl, now)?;
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let live = occupied.get().is_live(now);
                if options.only_if_absent && live {
                    return Ok(false);
                }
                if options.only_if_present && !live {
                    occupied.remove();
                    return Ok(false);
                }
                occupied.insert(stored);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                if options.only_if_present {
                    return Ok(false);
                }
                vacant.insert(stored);
                Ok(true)
            }
        }
    }

    async fn delete(&self, keys: &[&str]) -> Result<u64> {
        self.check_available()?;
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(*key))
            .filter(|(_, v)| v.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn exists(&self, keys: &[&str]) -> Result<u64> {
        self.check_available()?;
        let now = Instant::now();
        let present = keys
            .iter()
            .filter(|key| self.live_value(key, now).is_some())
            .count();
        Ok(present as u64)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let now = Instant::now();
        self.entries.remove_if(key, |_, v| !v.is_live(now));
        if ttl.is_zero() {
            return Ok(self.entries.remove(key).is_some());
        }
        let deadline = expiry(now, ttl)?;
        match self.entries.get_mut(key) {
            Some(mut v) => {
                v.expires_at = Some(deadline);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        self.check_available()?;
        let now = Instant::now();
        Ok(match self.live_value(key, now) {
            None => KeyTtl::Missing,
            Some(StoredValue {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(StoredValue {
                expires_at: Some(deadline),
                ..
            }) => KeyTtl::Expires(deadline.saturating_duration_since(now)),
        })
    }

    async fn run_script(
        &self,
        script: &StoreScript,
        keys: &[&str],
        args: &[&str],
    ) -> Result<i64> {
        self.check_available()?;
        if script.name == RELEASE_IF_OWNER.name {
            let key = script_arg(keys, 0, script)?;
            let token = script_arg(args, 0, script)?;
            Ok(self.release_if_owner(key, token))
        } else if script.name == RENEW_IF_OWNER.name {
            let key = script_arg(keys, 0, script)?;
            let token = script_arg(args, 0, script)?;
            let ttl_ms: u64 = script_arg(args, 1, script)?
                .parse()
                .map_err(|_| invalid_argument("ttl argument is not an integer"))?;
            self.renew_if_owner(key, token, Duration::from_millis(ttl_ms))
        } else {
            Err(StoreError::UnsupportedScript(script.name.to_string()))
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.check_available()?;
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_live(now) => {
                let current: i64 = occupied
                    .get()
                    .value
                    .parse()
                    .map_err(|_| invalid_argument("value is not an integer or out of range"))?;
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| invalid_argument("increment or decrement would overflow"))?;
                occupied.get_mut().value = next.to_string();
                Ok(next)
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(StoredValue::persistent(delta.to_string()));
                Ok(delta)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::persistent(delta.to_string()));
                Ok(delta)
            }
        }
    }

    async fn scan(&self, pattern: &str, _count: usize) -> Result<Vec<String>> {
        self.check_available()?;
        self.purge_expired();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<bool> {
        self.check_available()?;
        Ok(true)
    }
}
