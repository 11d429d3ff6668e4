//! Per-entry exclusive lock backed by an advisory file lock.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use crate::error::{CacheError, Result};

/// Holds the exclusive lock of one entry; released on drop.
#[derive(Debug)]
pub(crate) struct EntryLock {
    _file: File,
}

impl EntryLock {
    /// Blocks until the lock at `path` is held exclusively.
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        let file = Self::open(path).map_err(|source| CacheError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        FileExt::lock_exclusive(&file).map_err(|source| CacheError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { _file: file })
    }

    fn open(path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
    }
}

/// Lock file path of an entry file.
pub(crate) fn lock_path(entry: &Path) -> PathBuf {
    let mut name = entry.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}
