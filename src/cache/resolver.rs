//! Namespace Resolver Module
//!
//! Maps a cache name or a callable qualifier to a directory below the root.

use std::fmt;
use std::path::PathBuf;

use crate::error::{CacheError, Result};
use crate::key::short_hash;

/// What a namespace is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceTarget<'a> {
    /// An explicit cache name
    Name(&'a str),
    /// A callable's fully-qualified identifier
    Qualifier(&'a str),
}

/// Resolves a [`NamespaceTarget`] into a path relative to the cache root.
pub trait NamespaceResolver: fmt::Debug + Send + Sync {
    fn resolve(&self, target: NamespaceTarget<'_>) -> Result<PathBuf>;
}

/// Hashes names and qualifiers alike with [`short_hash`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HashedResolver;

impl NamespaceResolver for HashedResolver {
    fn resolve(&self, target: NamespaceTarget<'_>) -> Result<PathBuf> {
        let input = match target {
            NamespaceTarget::Name(name) => name,
            NamespaceTarget::Qualifier(qualifier) => qualifier,
        };
        Ok(PathBuf::from(short_hash(input)?))
    }
}

/// Uses explicit names as directory names; hashes qualifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerbatimResolver;

impl NamespaceResolver for VerbatimResolver {
    fn resolve(&self, target: NamespaceTarget<'_>) -> Result<PathBuf> {
        match target {
            NamespaceTarget::Name(name) => {
                let single_component = !name.is_empty()
                    && name != "."
                    && name != ".."
                    && !name.contains(['/', '\\']);
                if !single_component {
                    return Err(CacheError::InvalidArguments(format!(
                        "cache name {name:?} is not a single directory name"
                    )));
                }
                Ok(PathBuf::from(name))
            }
            NamespaceTarget::Qualifier(qualifier) => Ok(PathBuf::from(short_hash(qualifier)?)),
        }
    }
}
