//! `latchkey ping`

use std::time::Instant;

use anyhow::{Result, bail};
use latchkey_common::CacheStore;

pub async fn ping<S: CacheStore + ?Sized>(store: &S) -> Result<()> {
    let started = Instant::now();
    if !store.ping().await? {
        bail!("unexpected reply to PING");
    }
    println!("PONG ({:.1} ms)", started.elapsed().as_secs_f64() * 1000.0);
    Ok(())
}
