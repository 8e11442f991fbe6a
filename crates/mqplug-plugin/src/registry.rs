//! Plugin registry: name reservations and active plugin handles.
//!
//! A name is reserved as soon as a plugin loads, so two artifacts describing
//! the same name collide before either is initialized.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::PluginError;
use crate::instance::PluginHandle;
use crate::meta::PluginMeta;

#[derive(Debug)]
enum Slot {
    /// Loaded, not yet initialized.
    Reserved,
    /// Initialized and dispatching, with its activation sequence number.
    Active(u64, PluginHandle),
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    next_seq: u64,
}

/// Registry of loaded and active plugins.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    inner: RwLock<Inner>,
}

impl PluginRegistry {
    /// Creates a new empty plugin registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `name` for a freshly loaded plugin.
    pub async fn reserve(&self, name: &str) -> Result<(), PluginError> {
        let mut inner = self.inner.write().await;
        if inner.slots.contains_key(name) {
            return Err(PluginError::DuplicatePlugin {
                name: name.to_string(),
            });
        }
        inner.slots.insert(name.to_string(), Slot::Reserved);
        debug!(plugin = %name, "Plugin name reserved");
        Ok(())
    }

    /// Marks a reserved name active.
    pub async fn activate(&self, handle: PluginHandle) {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        info!(
            plugin = %handle.name(),
            version = %handle.meta().version,
            "Plugin activated"
        );
        inner
            .slots
            .insert(handle.name().to_string(), Slot::Active(seq, handle));
    }

    /// Frees a name; returns the handle if the plugin was active.
    pub async fn release(&self, name: &str) -> Option<PluginHandle> {
        let mut inner = self.inner.write().await;
        match inner.slots.remove(name) {
            Some(Slot::Active(_, handle)) => Some(handle),
            Some(Slot::Reserved) => {
                debug!(plugin = %name, "Plugin name released");
                None
            }
            None => None,
        }
    }

    /// Gets an active plugin by name.
    pub async fn get(&self, name: &str) -> Option<PluginHandle> {
        let inner = self.inner.read().await;
        match inner.slots.get(name) {
            Some(Slot::Active(_, handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Active plugins in activation order.
    pub async fn active(&self) -> Vec<PluginHandle> {
        let inner = self.inner.read().await;
        let mut handles: Vec<(u64, PluginHandle)> = inner
            .slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Active(seq, handle) => Some((*seq, handle.clone())),
                Slot::Reserved => None,
            })
            .collect();
        handles.sort_by_key(|(seq, _)| *seq);
        handles.into_iter().map(|(_, handle)| handle).collect()
    }

    /// Metadata of active plugins in activation order.
    pub async fn list(&self) -> Vec<PluginMeta> {
        self.active()
            .await
            .iter()
            .map(|handle| handle.meta().clone())
            .collect()
    }

    /// Whether `name` is reserved or active.
    pub async fn contains(&self, name: &str) -> bool {
        self.inner.read().await.slots.contains_key(name)
    }

    /// Number of reserved and active names.
    pub async fn count(&self) -> usize {
        self.inner.read().await.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_reservation() {
        let registry = PluginRegistry::new();
        registry.reserve("auth_plugin").await.expect("first");

        let err = registry.reserve("auth_plugin").await.expect_err("second");
        assert!(matches!(err, PluginError::DuplicatePlugin { name } if name == "auth_plugin"));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_release_frees_reserved_name() {
        let registry = PluginRegistry::new();
        registry.reserve("logger_plugin").await.expect("reserve");
        assert!(registry.release("logger_plugin").await.is_none());
        assert!(!registry.contains("logger_plugin").await);
        registry.reserve("logger_plugin").await.expect("reserve again");
    }
}
