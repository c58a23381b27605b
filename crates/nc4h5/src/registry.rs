//! Process-wide filter registry and plugin search path.
//!
//! Both live behind a lazily created global handle. Files capture an
//! `Arc<FilterRegistry>` when they are opened, so tests can hand a private
//! registry to a file instead of touching the global one.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use nc4h5_container::filter_pipeline::{
    FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_NBIT, FILTER_SCALEOFFSET, FILTER_SHUFFLE, FILTER_SZIP,
};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable listing plugin directories.
pub const PLUGIN_PATH_ENV: &str = "HDF5_PLUGIN_PATH";

#[cfg(windows)]
pub const PLUGIN_PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PLUGIN_PATH_SEPARATOR: char = ':';

#[cfg(windows)]
const DEFAULT_PLUGIN_DIR: &str = "C:\\Program Files\\HDF_Group\\HDF5\\lib\\plugin";
#[cfg(not(windows))]
const DEFAULT_PLUGIN_DIR: &str = "/usr/local/hdf5/lib/plugin";

/// A registered filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescriptor {
    pub id: u32,
    pub name: String,
    /// Whether the filter can encode, not only decode.
    pub encoder: bool,
}

impl FilterDescriptor {
    pub fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            encoder: true,
        }
    }
}

fn builtins() -> [FilterDescriptor; 6] {
    [
        FilterDescriptor::new(FILTER_DEFLATE, "deflate"),
        FilterDescriptor::new(FILTER_SHUFFLE, "shuffle"),
        FilterDescriptor::new(FILTER_FLETCHER32, "fletcher32"),
        FilterDescriptor::new(FILTER_SZIP, "szip"),
        FilterDescriptor::new(FILTER_NBIT, "nbit"),
        FilterDescriptor::new(FILTER_SCALEOFFSET, "scaleoffset"),
    ]
}

/// Filters known to the process, keyed by id.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    filters: RwLock<BTreeMap<u32, FilterDescriptor>>,
}

static GLOBAL_REGISTRY: Lazy<Arc<FilterRegistry>> = Lazy::new(|| Arc::new(FilterRegistry::with_builtins()));

impl FilterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in filters.
    pub fn with_builtins() -> Self {
        let r = Self::new();
        r.initialize();
        r
    }

    /// The process-wide registry.
    pub fn global() -> Arc<FilterRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// (Re)register the built-in filters, keeping any others.
    pub fn initialize(&self) {
        let mut filters = self.filters.write();
        for d in builtins() {
            filters.insert(d.id, d);
        }
    }

    /// Drop every registration.
    pub fn finalize(&self) {
        self.filters.write().clear();
    }

    /// Register or replace a filter.
    pub fn register_filter(&self, descriptor: FilterDescriptor) -> Result<()> {
        if descriptor.id == 0 {
            return Err(Error::InvalidArgument("filter id 0 is reserved".into()));
        }
        debug!(id = descriptor.id, name = %descriptor.name, "filter registered");
        self.filters.write().insert(descriptor.id, descriptor);
        Ok(())
    }

    pub fn unregister_filter(&self, id: u32) -> Result<()> {
        self.filters
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("filter {id}")))
    }

    pub fn query_filter(&self, id: u32) -> Option<FilterDescriptor> {
        self.filters.read().get(&id).cloned()
    }

    pub fn is_registered(&self, id: u32) -> bool {
        self.filters.read().contains_key(&id)
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<u32> {
        self.filters.read().keys().copied().collect()
    }
}

/// Ordered list of directories searched for filter plugins.
#[derive(Debug, Default)]
pub struct PluginPaths {
    paths: RwLock<Vec<PathBuf>>,
}

static GLOBAL_PLUGIN_PATHS: Lazy<Arc<PluginPaths>> = Lazy::new(|| {
    let p = PluginPaths::default();
    p.initialize();
    Arc::new(p)
});

impl PluginPaths {
    pub fn global() -> Arc<PluginPaths> {
        Arc::clone(&GLOBAL_PLUGIN_PATHS)
    }

    /// Load the list from [`PLUGIN_PATH_ENV`], or the platform default.
    pub fn initialize(&self) {
        let paths = match std::env::var(PLUGIN_PATH_ENV) {
            Ok(v) if !v.is_empty() => parse_plugin_path(&v),
            _ => vec![PathBuf::from(DEFAULT_PLUGIN_DIR)],
        };
        *self.paths.write() = paths;
    }

    pub fn finalize(&self) {
        self.paths.write().clear();
    }

    pub fn get(&self) -> Vec<PathBuf> {
        self.paths.read().clone()
    }

    pub fn set(&self, paths: Vec<PathBuf>) {
        *self.paths.write() = paths;
    }
}

/// Split a separator-delimited path list, dropping empty entries.
pub fn parse_plugin_path(value: &str) -> Vec<PathBuf> {
    value
        .split(PLUGIN_PATH_SEPARATOR)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}
