//! `latchkey run`: execute a command while holding a lock
//!
//! Exits with the command's status, [`EXIT_LOCK_BUSY`] when the lock is held
//! elsewhere, or [`EXIT_INTERRUPTED`] after Ctrl-C.

use std::process::ExitStatus;
use std::sync::Arc;

use anyhow::{Context, Result};
use latchkey_common::KeyValueStore;
use latchkey_lock::{DistributedLock, LockOptions};
use tokio::process::Command;
use tracing::{info, warn};

use crate::cli::RunArgs;

/// `EX_TEMPFAIL`: the lock is held elsewhere, try again later
pub const EXIT_LOCK_BUSY: u8 = 75;

/// Conventional status after SIGINT
pub const EXIT_INTERRUPTED: u8 = 130;

/// Run the command under the lock and return the process exit status
pub async fn run<S: KeyValueStore + ?Sized + 'static>(store: Arc<S>, args: &RunArgs) -> Result<u8> {
    let options = LockOptions::default()
        .ttl(args.ttl())
        .auto_renewal(!args.no_renew);
    let mut lock = DistributedLock::with_options(store, args.name.clone(), options);
    let (blocking, timeout) = args.wait_mode();

    if !lock.acquire(blocking, timeout).await? {
        eprintln!("latchkey: lock '{}' is held elsewhere", args.name);
        return Ok(EXIT_LOCK_BUSY);
    }

    let outcome = supervise(&args.command).await;

    if lock.ownership_lost() {
        warn!(lock = %args.name, "Lock expired or was taken over while the command ran");
    }
    if !lock.release().await {
        warn!(lock = %args.name, "Lock was not released; it expires after its ttl");
    }

    outcome
}

/// Wait for the command; Ctrl-C kills it instead of leaving it orphaned
async fn supervise(command: &[String]) -> Result<u8> {
    let (program, rest) = command.split_first().context("No command given")?;
    let mut child = Command::new(program)
        .args(rest)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start '{}'", program))?;
    info!(pid = child.id(), program = %program, "Started command");

    tokio::select! {
        status = child.wait() => {
            let status = status.context("Failed to wait for command")?;
            info!(%status, "Command finished");
            return Ok(exit_code(status));
        }
        Ok(()) = tokio::signal::ctrl_c() => {}
    }

    warn!("Interrupted, stopping command");
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to stop command");
    }
    Ok(EXIT_INTERRUPTED)
}

fn exit_code(status: ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        return u8::try_from(code).unwrap_or(1);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return u8::try_from(128 + signal).unwrap_or(1);
        }
    }
    1
}
