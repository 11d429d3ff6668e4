//! Cache Module
//!
//! Composes the key deriver and the entry store behind a get-or-compute
//! handle, plus namespace maintenance that works without a handle.

mod builder;
mod function;
mod resolver;
mod sequence;
mod stats;

// Re-export public types
pub use builder::CacheBuilder;
pub use function::CachedFunction;
pub use resolver::{HashedResolver, NamespaceResolver, NamespaceTarget, VerbatimResolver};
pub use sequence::CachedSequence;
pub use stats::CacheStats;

use crate::config::Config;
use crate::error::Result;
use crate::store::{EntryStore, Expiry};

// == Standalone Maintenance ==
// A namespace is addressed by the same string its handle was built from:
// the explicit name, or the qualified name when none was given. Both hash
// to the same directory under the default resolver.

fn namespace(name: &str, config: &Config) -> Result<EntryStore> {
    let relative = HashedResolver.resolve(NamespaceTarget::Name(name))?;
    Ok(EntryStore::new(config.root_dir.join(relative)))
}

/// Removes every entry of the namespace `name`, leaving its directory.
pub fn clear(name: &str, config: &Config) -> Result<()> {
    namespace(name, config)?.clear()
}

/// Removes entries of the namespace `name` older than `expiry`.
///
/// Returns the number of entries removed.
pub fn flush(name: &str, expiry: Expiry, config: &Config) -> Result<usize> {
    namespace(name, config)?.flush_expired(expiry)
}

/// Removes the namespace directory of `name`. Idempotent.
pub fn delete(name: &str, config: &Config) -> Result<()> {
    namespace(name, config)?.delete()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;
    use crate::key::{Arguments, CallableDescriptor};

    #[test]
    fn test_standalone_ops_address_named_and_unnamed_caches() {
        let root = tempfile::tempdir().unwrap();
        let config = Config::default().with_root(root.path());

        let named = CacheBuilder::new(CallableDescriptor::new("app::a"))
            .name("shared")
            .config(config.clone())
            .build()
            .unwrap();
        let unnamed = CacheBuilder::new(CallableDescriptor::new("app::b"))
            .config(config.clone())
            .build()
            .unwrap();
        for cached in [&named, &unnamed] {
            cached
                .get_or_compute(&Arguments::new(), || Ok(Value::Null))
                .unwrap();
        }

        clear("shared", &config).unwrap();
        assert!(named.store().is_empty().unwrap());
        assert!(named.dir().is_dir());

        delete("app::b", &config).unwrap();
        assert!(!unnamed.dir().exists());
    }
}
