// src/plugins/registry.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::{MemtaskError, Result};
use crate::plugins::Plugin;

/// Static mapping from plugin name to implementation.
///
/// Iteration follows registration order so listings are stable.
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    by_name: HashMap<&'static str, usize>,
}

impl PluginRegistry {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let mut by_name = HashMap::new();
        for (idx, plugin) in plugins.iter().enumerate() {
            // First registration wins; duplicates are a programming error.
            by_name.entry(plugin.name()).or_insert(idx);
        }
        Self { plugins, by_name }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.by_name.get(name).map(|&idx| &self.plugins[idx])
    }

    /// Like [`get`](Self::get) but fails with `UnknownPlugin`.
    pub fn require(&self, name: &str) -> Result<&Arc<dyn Plugin>> {
        self.get(name)
            .ok_or_else(|| MemtaskError::UnknownPlugin(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.plugins.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.plugins.iter().map(|p| p.name())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names().collect::<Vec<_>>())
            .finish()
    }
}
