//! Background TTL renewal for a held lock

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use latchkey_common::{KeyValueStore, RENEW_IF_OWNER, ttl_millis};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Why a renewal task finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenewalExit {
    /// The owner released the lock or dropped it
    Stopped,
    /// The key expired or now belongs to another token
    OwnershipLost,
    /// Renewals kept failing until the key's TTL ran out
    StoreError,
    /// The task panicked or its runtime shut down
    Aborted,
}

/// Reset the key's expiry if `token` still owns it
pub(crate) async fn renew_if_owner<S: KeyValueStore + ?Sized>(
    store: &S,
    key: &str,
    token: &str,
    ttl: Duration,
) -> latchkey_common::Result<bool> {
    let ttl_ms = ttl_millis(ttl).to_string();
    let renewed = store
        .run_script(&RENEW_IF_OWNER, &[key], &[token, &ttl_ms])
        .await?;
    Ok(renewed != 0)
}

/// Renew every third of the TTL so two renewals can be missed before expiry
pub(crate) fn renewal_interval(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_millis(1))
}

/// Handle to a running renewal loop
///
/// Dropping the handle closes the stop channel, which also ends the loop.
#[derive(Debug)]
pub(crate) struct RenewalTask {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<RenewalExit>,
}

impl RenewalTask {
    pub(crate) fn spawn<S: KeyValueStore + ?Sized + 'static>(
        store: Arc<S>,
        key: String,
        token: String,
        ttl: Duration,
        lost: Arc<AtomicBool>,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(renew_loop(store, key, token, ttl, lost, stop_rx));
        Self {
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    /// Signal the loop and wait for it, so no renewal lands after this returns
    pub(crate) async fn stop(mut self) -> RenewalExit {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The loop may already have exited on its own
            let _ = stop_tx.send(());
        }
        match self.handle.await {
            Ok(exit) => exit,
            Err(e) => {
                warn!(error = %e, "Lock renewal task did not finish cleanly");
                RenewalExit::Aborted
            }
        }
    }
}

async fn renew_loop<S: KeyValueStore + ?Sized>(
    store: Arc<S>,
    key: String,
    token: String,
    ttl: Duration,
    lost: Arc<AtomicBool>,
    mut stop_rx: oneshot::Receiver<()>,
) -> RenewalExit {
    let interval = renewal_interval(ttl);
    // The key was just written with the full TTL
    let mut confirmed_at = Instant::now();
    debug!(lock = %key, ?interval, "Started lock renewal");

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => {
                debug!(lock = %key, "Stopped lock renewal");
                return RenewalExit::Stopped;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match renew_if_owner(store.as_ref(), &key, &token, ttl).await {
            Ok(true) => {
                confirmed_at = Instant::now();
                metrics::counter!("latchkey_lock_renewals_total").increment(1);
                debug!(lock = %key, "Renewed lock");
            }
            Ok(false) => {
                lost.store(true, Ordering::SeqCst);
                metrics::counter!("latchkey_lock_ownership_lost_total").increment(1);
                warn!(lock = %key, "Lost lock ownership, stopping renewal");
                return RenewalExit::OwnershipLost;
            }
            Err(e) if confirmed_at.elapsed() >= ttl => {
                lost.store(true, Ordering::SeqCst);
                metrics::counter!("latchkey_lock_ownership_lost_total").increment(1);
                error!(
                    lock = %key,
                    error = %e,
                    "Failed to renew lock before its ttl ran out, stopping renewal"
                );
                return RenewalExit::StoreError;
            }
            Err(e) => {
                metrics::counter!("latchkey_lock_renewal_errors_total").increment(1);
                warn!(lock = %key, error = %e, "Failed to renew lock, retrying");
            }
        }
    }
}
