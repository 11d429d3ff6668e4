//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::path::PathBuf;

use crate::store::Expiry;

/// Default root directory under which derived namespaces are nested.
pub const DEFAULT_ROOT_DIR: &str = ".persist_cache";

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root directory for namespaces that are not given an explicit directory
    pub root_dir: PathBuf,
    /// Expiry applied to caches built without an explicit expiry
    pub default_expiry: Option<Expiry>,
    /// Background flush task interval in seconds
    pub flush_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `PERSIST_CACHE_ROOT` - Root directory (default: `.persist_cache`)
    /// - `PERSIST_CACHE_EXPIRY` - Default expiry in seconds, fractional allowed (default: none)
    /// - `PERSIST_CACHE_FLUSH_INTERVAL` - Flush frequency in seconds (default: 60)
    pub fn from_env() -> Self {
        Self {
            root_dir: env::var("PERSIST_CACHE_ROOT")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT_DIR)),
            default_expiry: env::var("PERSIST_CACHE_EXPIRY")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .and_then(|secs| Expiry::from_secs_f64(secs).ok()),
            flush_interval: env::var("PERSIST_CACHE_FLUSH_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }

    /// Returns a copy of this configuration rooted at `root_dir`.
    pub fn with_root(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = root_dir.into();
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            default_expiry: None,
            flush_interval: 60,
        }
    }
}
