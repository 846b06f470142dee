//! Latchkey Store - Key-value store backends
//!
//! This crate provides the concrete implementations of the
//! [`KeyValueStore`](latchkey_common::KeyValueStore) contract:
//! - [`RedisStore`]: multiplexed Redis connection with key prefixing
//! - [`MemoryStore`]: in-process store with TTLs, used by tests and local runs
//! - [`RedisConfig`]: connection settings loaded from files and environment

mod glob;
pub mod memory;
pub mod redis_store;
pub mod settings;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use settings::RedisConfig;
