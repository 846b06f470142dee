//! `latchkey status`: report who holds a lock and for how long

use std::sync::Arc;

use anyhow::Result;
use latchkey_common::{KeyTtl, KeyValueStore};
use latchkey_lock::DistributedLock;

use crate::cli::StatusArgs;

/// One-line description of the lock's state
pub async fn describe<S: KeyValueStore + ?Sized + 'static>(
    store: Arc<S>,
    name: &str,
) -> Result<String> {
    let lock = DistributedLock::new(Arc::clone(&store), name);
    let holder = store.get(lock.key()).await?;

    Ok(match (holder, lock.remaining_ttl().await?) {
        (None, _) | (_, KeyTtl::Missing) => format!("{}: free", name),
        (Some(token), KeyTtl::Persistent) => {
            format!("{}: held by {} (no expiry)", name, token)
        }
        (Some(token), KeyTtl::Expires(remaining)) => format!(
            "{}: held by {}, expires in {:.1}s",
            name,
            token,
            remaining.as_secs_f64()
        ),
    })
}

pub async fn status<S: KeyValueStore + ?Sized + 'static>(
    store: Arc<S>,
    args: &StatusArgs,
) -> Result<()> {
    println!("{}", describe(store, &args.name).await?);
    Ok(())
}
