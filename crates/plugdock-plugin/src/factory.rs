//! Plugin factories: how a plugin's code is brought to life.
//!
//! A factory turns an installed plugin directory plus its descriptor into an
//! owned [`Plugin`] instance. The loader picks a factory by the descriptor's
//! `runtime` field.

use std::collections::HashMap;
use std::path::Path;

use plugdock_core::PluginDescriptor;

use crate::types::{Plugin, PluginError, PluginResult};

/// Runtime name of compiled-in plugins.
pub const NATIVE_RUNTIME: &str = "native";

/// Constructs plugin instances for one runtime.
pub trait PluginFactory: Send + Sync {
    /// Value of the descriptor's `runtime` field this factory handles.
    fn runtime(&self) -> &'static str;

    /// Import the plugin's code from `dir` and construct its instance.
    fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
        dir: &Path,
    ) -> PluginResult<Box<dyn Plugin>>;
}

/// Constructor of a compiled-in plugin.
pub type NativeConstructor = Box<dyn Fn(&PluginDescriptor) -> Box<dyn Plugin> + Send + Sync>;

/// Table of plugins linked into the host binary, keyed by plugin name.
///
/// The managed directory of a native plugin still carries its entry file and
/// any data files; only the code comes from the table.
#[derive(Default)]
pub struct NativePlugins {
    constructors: HashMap<String, NativeConstructor>,
}

impl NativePlugins {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `name`.
    pub fn register<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&PluginDescriptor) -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
        self
    }

    /// Check if a plugin is linked under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Names of all linked plugins, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl PluginFactory for NativePlugins {
    fn runtime(&self) -> &'static str {
        NATIVE_RUNTIME
    }

    fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
        _dir: &Path,
    ) -> PluginResult<Box<dyn Plugin>> {
        let constructor =
            self.constructors
                .get(&descriptor.name)
                .ok_or_else(|| PluginError::NotLinked {
                    name: descriptor.name.clone(),
                })?;
        Ok(constructor(descriptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Panel;
    use plugdock_core::Side;

    struct Dashboard;

    impl Plugin for Dashboard {
        fn panels(&self) -> Vec<Panel> {
            vec![Panel::new("main", "Dashboard", Side::Right)]
        }
    }

    #[test]
    fn test_native_lookup() {
        let natives = NativePlugins::new().register("dashboard", |_| Box::new(Dashboard));
        assert!(natives.contains("dashboard"));
        assert_eq!(natives.names(), vec!["dashboard"]);

        let descriptor = PluginDescriptor::new("dashboard", "1.0").with_runtime(NATIVE_RUNTIME);
        let plugin = natives
            .instantiate(&descriptor, Path::new("/unused"))
            .unwrap();
        assert_eq!(plugin.panels().len(), 1);
    }

    #[test]
    fn test_native_missing() {
        let natives = NativePlugins::new();
        let descriptor = PluginDescriptor::new("ghost", "1.0").with_runtime(NATIVE_RUNTIME);
        let err = natives
            .instantiate(&descriptor, Path::new("/unused"))
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::NotLinked { .. }));
    }
}
