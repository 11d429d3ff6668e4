//! Persist Cache - A persistent, on-disk memoization cache
//!
//! Computes a result once per distinct set of call arguments and serves it
//! from disk afterwards, across call styles and process restarts.
//!
//! The crate is organised leaf-first:
//! - [`codec`] turns [`Value`] trees into a compact MessagePack wire format
//! - [`key`] canonicalizes bound arguments and hashes them into a [`CacheKey`]
//! - [`store`] owns the entry files of one namespace directory
//! - [`cache`] composes the above behind a get-or-compute handle

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod key;
pub mod store;
pub mod tasks;

pub use cache::{
    clear, delete, flush, CacheBuilder, CacheStats, CachedFunction, CachedSequence,
    HashedResolver, NamespaceResolver, NamespaceTarget, VerbatimResolver,
};
pub use codec::{decode, encode, Opaque, OpaqueObject, SerdeObject, Value};
pub use config::Config;
pub use error::{CacheError, Result};
pub use key::{
    canonicalize, derive_key, short_hash, Arguments, CacheKey, CallableDescriptor,
    CanonicalArguments, InvocationShape, Parameter, ParameterKind,
};
pub use store::{EntryStore, Expiry};
pub use tasks::spawn_flush_task;
