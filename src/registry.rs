//! Generic plugin registry: named registration and lookup of strategy
//! implementations, with metadata (priority, description, version).
//!
//! One registry instance exists per strategy kind (`EventDetector`,
//! `FundSelector`, `SignalFilter`); [`crate::config`] resolves an
//! [`crate::config::EngineConfig`] against all three.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Metadata attached to a registered plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginMetadata {
    pub priority: i32,
    pub description: String,
    pub version: String,
}

impl Default for PluginMetadata {
    fn default() -> Self {
        Self {
            priority: 0,
            description: String::new(),
            version: "0.1.0".to_string(),
        }
    }
}

/// Constructs a strategy instance from its config subtree
/// (`event_config`, `fund_config`, or `filter_configs[name]`).
pub type Factory<T> = Arc<dyn Fn(&Value) -> Arc<T> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("plugin '{0}' is already registered")]
    DuplicateName(String),
    #[error("plugin '{0}' is not registered")]
    NotFound(String),
}

struct Entry<T: ?Sized> {
    factory: Factory<T>,
    metadata: PluginMetadata,
}

/// Named registration and O(1) lookup of strategy implementations.
///
/// Registration is expected to happen once at startup (or under a write
/// lock); lookups afterwards are read-only. Re-registering an existing name
/// is a [`RegistryError::DuplicateName`] rather than a silent overwrite.
pub struct PluginRegistry<T: ?Sized> {
    entries: DashMap<String, Entry<T>>,
}

impl<T: ?Sized> Default for PluginRegistry<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<T: ?Sized> PluginRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` with a `factory` and its `metadata`.
    ///
    /// # Errors
    /// Returns [`RegistryError::DuplicateName`] if `name` is already taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: Factory<T>,
        metadata: PluginMetadata,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.entries.insert(name, Entry { factory, metadata });
        Ok(())
    }

    /// Resolve `name` to a factory, then construct an instance with `config`.
    pub fn build(&self, name: &str, config: &Value) -> Result<Arc<T>, RegistryError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        Ok((entry.factory)(config))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// List registered names with metadata, ordered by descending priority
    /// then ascending name.
    pub fn list(&self) -> Vec<(String, PluginMetadata)> {
        let mut items: Vec<(String, PluginMetadata)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().metadata.clone()))
            .collect();
        items.sort_by(|a, b| b.1.priority.cmp(&a.1.priority).then_with(|| a.0.cmp(&b.0)));
        items
    }

    /// Names of every unresolved entry in `names`, preserving input order.
    pub fn missing<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        names
            .into_iter()
            .filter(|n| !self.contains(n))
            .map(str::to_string)
            .collect()
    }
}
