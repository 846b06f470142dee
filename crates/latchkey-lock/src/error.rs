//! Lock error types

use latchkey_common::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Raised by the scoped/guard/wrapper forms, which promise the guarded
    /// code only ever runs under the lock
    #[error("failed to acquire lock: {0}")]
    NotAcquired(String),

    #[error("lock ttl must be positive: {0}")]
    InvalidTtl(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, LockError>;
