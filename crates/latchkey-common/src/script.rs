//! Server-side scripts for atomic compare-and-act on lock keys
//!
//! Both scripts take the lock key as `KEYS[1]` and the owner token as
//! `ARGV[1]`, and reply with an integer so every backend can answer them
//! the same way.

/// A named server-side script
///
/// The name is stable and lets backends without a script engine recognize
/// the scripts they emulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreScript {
    pub name: &'static str,
    pub source: &'static str,
}

/// Delete `KEYS[1]` only if it holds `ARGV[1]`. Replies 1 when deleted, else 0.
pub const RELEASE_IF_OWNER: StoreScript = StoreScript {
    name: "release_if_owner",
    source: r#"
        if redis.call("get", KEYS[1]) == ARGV[1] then
            return redis.call("del", KEYS[1])
        else
            return 0
        end
    "#,
};

/// Reset the expiry of `KEYS[1]` to `ARGV[2]` milliseconds only if it holds
/// `ARGV[1]`. Replies 1 when extended, else 0.
pub const RENEW_IF_OWNER: StoreScript = StoreScript {
    name: "renew_if_owner",
    source: r#"
        if redis.call("get", KEYS[1]) == ARGV[1] then
            return redis.call("pexpire", KEYS[1], ARGV[2])
        else
            return 0
        end
    "#,
};
