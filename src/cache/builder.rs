//! Cache Builder Module
//!
//! Resolves the namespace directory and expiry of a [`CachedFunction`].

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use super::function::CachedFunction;
use super::resolver::{HashedResolver, NamespaceResolver, NamespaceTarget};
use crate::config::Config;
use crate::error::Result;
use crate::key::CallableDescriptor;
use crate::store::{EntryStore, Expiry};

// == Cache Builder ==
/// Configures a [`CachedFunction`] for one callable.
///
/// The namespace directory is, in order of precedence: the explicit
/// [`dir`](CacheBuilder::dir), the resolved [`name`](CacheBuilder::name)
/// below the root, or the resolved qualified name below the root.
///
/// # Example
/// ```no_run
/// use persist_cache::{Arguments, CacheBuilder, CallableDescriptor, Parameter, Value};
///
/// let descriptor = CallableDescriptor::new("reports::total").param(Parameter::required("year"));
/// let cached = CacheBuilder::new(descriptor).name("totals").build()?;
/// let total = cached.get_or_compute(&Arguments::new().arg(2024), || Ok(Value::from(42)))?;
/// # Ok::<(), persist_cache::CacheError>(())
/// ```
#[derive(Debug)]
pub struct CacheBuilder {
    descriptor: CallableDescriptor,
    name: Option<String>,
    dir: Option<PathBuf>,
    expiry: Option<Expiry>,
    resolver: Box<dyn NamespaceResolver>,
    config: Config,
}

impl CacheBuilder {
    /// Starts from [`Config::default`] and the [`HashedResolver`]. Pass
    /// [`Config::from_env`] through [`config`](CacheBuilder::config) to honour
    /// the environment.
    pub fn new(descriptor: CallableDescriptor) -> Self {
        Self {
            descriptor,
            name: None,
            dir: None,
            expiry: None,
            resolver: Box::new(HashedResolver),
            config: Config::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Uses `dir` as the namespace directory, bypassing name resolution.
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn resolver(mut self, resolver: impl NamespaceResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Creates the namespace directory and returns the handle.
    ///
    /// When an expiry applies, entries that already outlived it are flushed
    /// once before the handle is returned.
    pub fn build(self) -> Result<CachedFunction> {
        let dir = match self.dir {
            Some(dir) => dir,
            None => {
                let target = match &self.name {
                    Some(name) => NamespaceTarget::Name(name),
                    None => NamespaceTarget::Qualifier(self.descriptor.qualified_name()),
                };
                self.config.root_dir.join(self.resolver.resolve(target)?)
            }
        };

        let store = EntryStore::open(dir)?;
        let expiry = self.expiry.or(self.config.default_expiry);
        if let Some(expiry) = expiry {
            store.flush_expired(expiry)?;
        }

        info!(
            function = self.descriptor.qualified_name(),
            dir = %store.dir().display(),
            ?expiry,
            "Opened persistent cache"
        );
        let flush_interval = Duration::from_secs(self.config.flush_interval);
        Ok(CachedFunction::new(self.descriptor, store, expiry, flush_interval))
    }
}
