//! Expiry Flush Task
//!
//! Background task that periodically removes expired entries from a
//! namespace directory.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::{EntryStore, Expiry};

/// Spawns a background task that periodically flushes expired entries.
///
/// The task runs in an infinite loop, sleeping for `interval` between
/// flushes. Each flush runs on the blocking pool and locks entries one at a
/// time, so lookups on other keys proceed while it runs. A failed flush is
/// logged and retried on the next tick.
///
/// # Arguments
/// * `store` - Store of the namespace to flush
/// * `expiry` - Age after which entries are removed
/// * `interval` - Time between flush runs
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let handle = spawn_flush_task(cached.store().clone(), Expiry::from_secs(300), Duration::from_secs(60));
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_flush_task(store: EntryStore, expiry: Expiry, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            dir = %store.dir().display(),
            "Starting expiry flush task with interval of {:?}",
            interval
        );

        loop {
            tokio::time::sleep(interval).await;

            match store.flush_expired_async(expiry).await {
                Ok(0) => debug!(dir = %store.dir().display(), "Expiry flush: nothing to remove"),
                Ok(removed) => info!(
                    dir = %store.dir().display(),
                    "Expiry flush: removed {} expired entries",
                    removed
                ),
                Err(e) => warn!(dir = %store.dir().display(), error = %e, "Expiry flush failed"),
            }
        }
    })
}
