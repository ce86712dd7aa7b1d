//! Loaded plugin handles for one engine instance.
//!
//! Populated lazily and never evicted during a run. Each plugin name gets
//! its own async lock so concurrent resolutions of the same plugin perform
//! at most one download.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::PluginHandle;

#[derive(Debug, Default)]
pub struct PluginRegistry {
    handles: DashMap<String, PluginHandle>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under its own name, replacing any previous one.
    pub fn register(&self, handle: PluginHandle) {
        tracing::debug!(plugin = %handle.name(), "plugin registered");
        self.handles.insert(handle.name().to_string(), handle);
    }

    pub fn get(&self, name: &str) -> Option<PluginHandle> {
        self.handles.get(name).map(|h| h.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    /// Registered plugin names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Lock serializing resolution of `name`.
    pub fn resolution_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
