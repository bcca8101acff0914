//! Registry of active plugins.

use indexmap::IndexMap;

use plugdock_core::PluginDescriptor;

use crate::types::{PanelHandle, Plugin};

/// An active plugin and the panels mounted for it.
#[derive(Debug)]
pub struct ActivePlugin {
    pub descriptor: PluginDescriptor,
    pub instance: Box<dyn Plugin>,
    pub panels: Vec<PanelHandle>,
}

/// In-memory set of active plugins, keyed by name, in activation order.
///
/// A name is present if and only if that plugin is active, with at most one
/// instance per name.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    active: IndexMap<String, ActivePlugin>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `plugin` under `name`.
    ///
    /// An entry already registered under `name` is deactivated first and
    /// returned; the new entry goes to the end of the activation order.
    pub fn activate(&mut self, name: impl Into<String>, plugin: ActivePlugin) -> Option<ActivePlugin> {
        let name = name.into();
        let previous = self.active.shift_remove(&name);
        self.active.insert(name, plugin);
        previous
    }

    /// Remove `name`, returning its entry. Unknown names return `None`.
    pub fn deactivate(&mut self, name: &str) -> Option<ActivePlugin> {
        self.active.shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ActivePlugin> {
        self.active.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ActivePlugin> {
        self.active.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.active.contains_key(name)
    }

    /// Names of active plugins in activation order.
    pub fn list_active(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Remove every entry, in activation order.
    pub fn drain(&mut self) -> Vec<(String, ActivePlugin)> {
        self.active.drain(..).collect()
    }
}
