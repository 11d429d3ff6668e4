//! Cached Function Module
//!
//! The get-or-compute handle bound to one callable descriptor and one
//! namespace directory.

use std::future::Future;
use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::stream::{BoxStream, Stream};
use tokio::task::JoinHandle;
use tracing::debug;

use super::sequence::{recording_stream, replay_stream, stored_items, CachedSequence};
use super::stats::CacheStats;
use crate::codec::Value;
use crate::error::{CacheError, Result};
use crate::key::{canonicalize, derive_key, Arguments, CacheKey, CallableDescriptor, InvocationShape};
use crate::store::{EntryStore, Expiry};
use crate::tasks::spawn_flush_task;

// == Cached Function ==
/// Memoizes one callable on disk.
///
/// Built with [`CacheBuilder`](super::CacheBuilder). The handle never calls
/// the callable itself: each lookup receives the call's [`Arguments`] and a
/// closure that produces the result on a miss.
///
/// Concurrent misses on the same key may each compute; the last write wins.
#[derive(Debug)]
pub struct CachedFunction {
    descriptor: CallableDescriptor,
    store: EntryStore,
    expiry: RwLock<Option<Expiry>>,
    flush_interval: Duration,
    stats: Mutex<CacheStats>,
}

impl CachedFunction {
    pub(crate) fn new(
        descriptor: CallableDescriptor,
        store: EntryStore,
        expiry: Option<Expiry>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            descriptor,
            store,
            expiry: RwLock::new(expiry),
            flush_interval,
            stats: Mutex::new(CacheStats::new()),
        }
    }

    pub fn descriptor(&self) -> &CallableDescriptor {
        &self.descriptor
    }

    /// Namespace directory of this handle.
    pub fn dir(&self) -> &Path {
        self.store.dir()
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    /// Key a call with `args` is stored under.
    pub fn key_for(&self, args: &Arguments) -> Result<CacheKey> {
        derive_key(&canonicalize(&self.descriptor, args)?)
    }

    // == Direct ==
    /// Returns the stored result for `args`, or runs `compute` and stores
    /// its result.
    ///
    /// A failing `compute` stores nothing and its error is returned as
    /// [`CacheError::Compute`].
    ///
    /// # Arguments
    /// * `args` - The call's positional and keyword arguments
    /// * `compute` - Produces the result on a miss
    pub fn get_or_compute<F>(&self, args: &Arguments, compute: F) -> Result<Value>
    where
        F: FnOnce() -> anyhow::Result<Value>,
    {
        self.check_shape(InvocationShape::Direct)?;
        let key = self.key_for(args)?;

        if let Some(value) = self.store.get(&key, self.expiry())? {
            self.record_hit(&key);
            return Ok(value);
        }
        self.record_miss(&key);

        let value = compute()?;
        self.store.put(&key, &value)?;
        self.record_store();
        Ok(value)
    }

    // == Suspending ==
    /// Asynchronous counterpart of [`CachedFunction::get_or_compute`].
    ///
    /// Store access runs on the blocking pool, so waiting for an entry lock
    /// never blocks the executor. `compute` is only awaited on a miss.
    pub async fn get_or_compute_async<F, Fut>(&self, args: &Arguments, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        self.check_shape(InvocationShape::Suspending)?;
        let key = self.key_for(args)?;

        if let Some(value) = self.store.get_async(key.clone(), self.expiry()).await? {
            self.record_hit(&key);
            return Ok(value);
        }
        self.record_miss(&key);

        let value = compute().await?;
        self.store.put_async(key, value.clone()).await?;
        self.record_store();
        Ok(value)
    }

    // == Lazy Sequence ==
    /// Replays the stored sequence for `args`, or iterates the producer
    /// returned by `produce` while recording its items.
    ///
    /// The recorded items are stored as one list once the producer is
    /// exhausted; an abandoned or failed iteration stores nothing.
    pub fn get_or_compute_iter<F, I>(&self, args: &Arguments, produce: F) -> Result<CachedSequence<I>>
    where
        F: FnOnce() -> I,
        I: Iterator<Item = anyhow::Result<Value>>,
    {
        self.check_shape(InvocationShape::LazySequence)?;
        let key = self.key_for(args)?;

        if let Some(value) = self.store.get(&key, self.expiry())? {
            self.record_hit(&key);
            return Ok(CachedSequence::replay(stored_items(value, &key)?));
        }
        self.record_miss(&key);

        Ok(CachedSequence::record(produce(), self.store.clone(), key))
    }

    /// Stream counterpart of [`CachedFunction::get_or_compute_iter`] for
    /// asynchronous producers.
    pub async fn get_or_compute_stream<F, S>(
        &self,
        args: &Arguments,
        produce: F,
    ) -> Result<BoxStream<'static, Result<Value>>>
    where
        F: FnOnce() -> S,
        S: Stream<Item = anyhow::Result<Value>> + Send + 'static,
    {
        self.check_shape(InvocationShape::LazySequence)?;
        let key = self.key_for(args)?;

        if let Some(value) = self.store.get_async(key.clone(), self.expiry()).await? {
            self.record_hit(&key);
            return Ok(replay_stream(stored_items(value, &key)?));
        }
        self.record_miss(&key);

        Ok(recording_stream(produce(), self.store.clone(), key))
    }

    // == Expiry ==
    /// Replaces the expiry used by subsequent lookups and flushes.
    pub fn set_expiry(&self, expiry: Option<Expiry>) {
        *self.expiry.write().unwrap_or_else(PoisonError::into_inner) = expiry;
        debug!(dir = %self.dir().display(), ?expiry, "Updated cache expiry");
    }

    pub fn expiry(&self) -> Option<Expiry> {
        *self.expiry.read().unwrap_or_else(PoisonError::into_inner)
    }

    // == Maintenance ==
    /// Removes every entry; the namespace directory stays.
    pub fn clear_cache(&self) -> Result<()> {
        self.store.clear()
    }

    /// Removes the namespace directory. The handle stays usable and
    /// recreates the directory on its next store.
    pub fn delete_cache(&self) -> Result<()> {
        self.store.delete()
    }

    /// Removes entries older than the current expiry. Without an expiry
    /// nothing is removed.
    pub fn flush_cache(&self) -> Result<usize> {
        match self.expiry() {
            Some(expiry) => self.store.flush_expired(expiry),
            None => Ok(0),
        }
    }

    /// Starts the background flush of this namespace, every
    /// [`Config::flush_interval`](crate::Config::flush_interval) seconds, with
    /// the expiry current at the time of the call.
    ///
    /// Returns `None` when the handle has no expiry. Must be called within a
    /// tokio runtime.
    pub fn spawn_flush_task(&self) -> Option<JoinHandle<()>> {
        let expiry = self.expiry()?;
        Some(spawn_flush_task(self.store.clone(), expiry, self.flush_interval))
    }

    /// Snapshot of this handle's counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn check_shape(&self, invoked: InvocationShape) -> Result<()> {
        let declared = self.descriptor.invocation_shape();
        if declared == invoked {
            Ok(())
        } else {
            Err(CacheError::ShapeMismatch { declared, invoked })
        }
    }

    fn record_hit(&self, key: &CacheKey) {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).record_hit();
        debug!(key = %key, function = self.descriptor.qualified_name(), "Cache hit");
    }

    fn record_miss(&self, key: &CacheKey) {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).record_miss();
        debug!(key = %key, function = self.descriptor.qualified_name(), "Cache miss");
    }

    fn record_store(&self) {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).record_store();
    }
}
