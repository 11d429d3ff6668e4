//! Entry Store Module
//!
//! File-backed storage for the entries of one namespace directory.
//!
//! Each entry lives in `<key>.msgpack` next to a `<key>.msgpack.lock` lock
//! file. Every read and write of an entry holds that lock, so two keys never
//! contend while readers and writers of one key are serialized. Writes land
//! in a temporary file that is renamed into place, so an entry is either the
//! previous value or the complete new one.

mod expiry;
mod lock;

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::task;
use tracing::{debug, info, warn};

pub use expiry::Expiry;

use crate::codec::{decode, encode, Value};
use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use lock::{lock_path, EntryLock};

/// File extension of entry data files.
pub const ENTRY_EXTENSION: &str = "msgpack";

// == Entry Store ==
/// Exclusive owner of the entry files within one namespace directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStore {
    dir: PathBuf,
}

impl EntryStore {
    // == Constructor ==
    /// Creates a store over `dir` without touching the filesystem.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates a store over `dir`, creating the directory if it is missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(dir);
        store.ensure_dir()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Data file path of `key`.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entry_path(key).exists()
    }

    // == Put ==
    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// The value is encoded before the lock is taken, so an encode failure
    /// leaves the existing entry untouched.
    pub fn put(&self, key: &CacheKey, value: &Value) -> Result<()> {
        let bytes = encode(value)?;
        self.ensure_dir()?;

        let path = self.entry_path(key);
        let _lock = EntryLock::acquire(&lock_path(&path))?;

        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|e| CacheError::storage("create temp file", &self.dir, e))?;
        tmp.write_all(&bytes)
            .map_err(|e| CacheError::storage("write", tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| CacheError::storage("rename", &path, e.error))?;

        debug!(key = %key, bytes = bytes.len(), dir = %self.dir.display(), "Stored cache entry");
        Ok(())
    }

    // == Get ==
    /// Retrieves the value of `key`.
    ///
    /// Returns `None` if the entry is absent, or if `expiry` is set and the
    /// entry is older than it, in which case the entry is removed.
    /// Unreadable entries fail with [`CacheError::Decode`] rather than
    /// reading as absent.
    pub fn get(&self, key: &CacheKey, expiry: Option<Expiry>) -> Result<Option<Value>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let Some(_lock) = lock_existing(&path)? else {
            return Ok(None);
        };

        if let Some(expiry) = expiry {
            let Some(modified) = modified_time(&path)? else {
                return Ok(None);
            };
            if expiry.is_expired(modified) {
                remove_entry(&path)?;
                debug!(key = %key, dir = %self.dir.display(), "Evicted expired cache entry");
                return Ok(None);
            }
        }

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::storage("read", &path, e)),
        };

        decode(&bytes).map(Some).map_err(|e| match e {
            CacheError::Decode(msg) => CacheError::Decode(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    // == Delete ==
    /// Removes the namespace directory and everything in it. Idempotent.
    pub fn delete(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                info!(dir = %self.dir.display(), "Deleted cache namespace");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::storage("remove directory", &self.dir, e)),
        }
    }

    // == Clear ==
    /// Removes every entry, leaving an empty namespace directory.
    pub fn clear(&self) -> Result<()> {
        self.delete()?;
        self.ensure_dir()?;
        info!(dir = %self.dir.display(), "Cleared cache namespace");
        Ok(())
    }

    // == Flush Expired ==
    /// Removes every entry older than `expiry`.
    ///
    /// Each entry is locked and checked on its own. Entries that vanish or
    /// cannot be locked are skipped. Returns the number of entries removed.
    pub fn flush_expired(&self, expiry: Expiry) -> Result<usize> {
        let mut removed = 0;

        for path in self.entry_files()? {
            let lock = match lock_existing(&path) {
                Ok(Some(lock)) => lock,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unlockable cache entry");
                    continue;
                }
            };

            let Some(modified) = modified_time(&path)? else {
                continue;
            };
            if expiry.is_expired(modified) {
                remove_entry(&path)?;
                removed += 1;
            }
            drop(lock);
        }

        if removed > 0 {
            info!(dir = %self.dir.display(), removed, "Flushed expired cache entries");
        } else {
            debug!(dir = %self.dir.display(), "No expired cache entries found");
        }
        Ok(removed)
    }

    // == Keys ==
    /// Keys currently stored, in sorted order.
    pub fn keys(&self) -> Result<Vec<CacheKey>> {
        let mut keys: Vec<CacheKey> = self
            .entry_files()?
            .iter()
            .filter_map(|p| p.file_stem()?.to_str().map(CacheKey::from_stem))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> Result<usize> {
        Ok(self.entry_files()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // == Async Access ==
    /// [`EntryStore::get`] on the blocking pool; the caller yields while the
    /// lock is awaited.
    pub async fn get_async(&self, key: CacheKey, expiry: Option<Expiry>) -> Result<Option<Value>> {
        let store = self.clone();
        task::spawn_blocking(move || store.get(&key, expiry))
            .await
            .map_err(join_failure)?
    }

    /// [`EntryStore::put`] on the blocking pool.
    ///
    /// Once started the write runs to completion even if the caller is
    /// dropped; the rename keeps the entry whole either way.
    pub async fn put_async(&self, key: CacheKey, value: Value) -> Result<()> {
        let store = self.clone();
        task::spawn_blocking(move || store.put(&key, &value))
            .await
            .map_err(join_failure)?
    }

    /// [`EntryStore::flush_expired`] on the blocking pool.
    pub async fn flush_expired_async(&self, expiry: Expiry) -> Result<usize> {
        let store = self.clone();
        task::spawn_blocking(move || store.flush_expired(expiry))
            .await
            .map_err(join_failure)?
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| CacheError::storage("create directory", &self.dir, e))
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::storage("list directory", &self.dir, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| CacheError::storage("list directory", &self.dir, e))?
                .path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

// The lock file sits in the namespace directory; a missing directory means
// the entry is gone.
fn lock_existing(path: &Path) -> Result<Option<EntryLock>> {
    match EntryLock::acquire(&lock_path(path)) {
        Ok(lock) => Ok(Some(lock)),
        Err(CacheError::Lock { source, .. }) if source.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn modified_time(path: &Path) -> Result<Option<std::time::SystemTime>> {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => Ok(Some(modified)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CacheError::storage("stat", path, e)),
    }
}

fn remove_entry(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::storage("remove", path, e)),
    }
}

fn join_failure(e: task::JoinError) -> CacheError {
    CacheError::Internal(format!("blocking store task failed: {e}"))
}
