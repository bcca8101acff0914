//! Core types for the plugin contract.

use std::fmt;

use plugdock_core::Side;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for plugin hooks.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors raised by a plugin instance.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A lifecycle hook reported failure.
    #[error("Plugin '{name}' failed in {hook}: {message}")]
    HookFailed {
        name: String,
        hook: Hook,
        message: String,
    },

    /// The plugin's script could not be evaluated.
    #[error("Script error in plugin '{name}': {message}")]
    Script { name: String, message: String },

    /// The plugin declared something the host cannot use.
    #[error("Invalid declaration in plugin '{name}': {message}")]
    InvalidDeclaration { name: String, message: String },

    /// No compiled-in implementation is registered under the plugin's name.
    #[error("No compiled-in plugin named '{name}'")]
    NotLinked { name: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The lifecycle hooks every plugin exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Runs every time the plugin becomes active.
    Load,
    /// Runs only the first time the plugin is installed.
    Initialize,
    /// Runs once before the plugin is uninstalled.
    Remove,
    /// Runs when the host shuts down with the plugin active.
    Close,
}

impl Hook {
    /// All hooks, in lifecycle order.
    pub const ALL: [Hook; 4] = [Hook::Initialize, Hook::Load, Hook::Remove, Hook::Close];

    /// Script-level function name of this hook.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Initialize => "initialize",
            Self::Remove => "remove",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A UI panel contributed by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Panel {
    /// Identifier, unique within the plugin.
    pub id: String,
    /// Tab label shown by the host.
    pub title: String,
    /// Where the host should place the panel.
    #[serde(default)]
    pub side: Side,
}

impl Panel {
    /// Create a new panel.
    pub fn new(id: impl Into<String>, title: impl Into<String>, side: Side) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            side,
        }
    }
}

/// Handle to a panel mounted by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PanelHandle(pub u64);

impl PanelHandle {
    /// Create a new panel handle.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A live plugin instance.
///
/// Hooks default to no-ops so implementations only override what they need.
/// The registry is the sole owner of an active instance.
pub trait Plugin: Send {
    /// Called every time the plugin becomes active, including on reload.
    fn load(&mut self) -> PluginResult<()> {
        Ok(())
    }

    /// Called once, after the first install of the plugin.
    fn initialize(&mut self) -> PluginResult<()> {
        Ok(())
    }

    /// Called once, immediately before the plugin is uninstalled.
    fn remove(&mut self) -> PluginResult<()> {
        Ok(())
    }

    /// Called when the host shuts down while the plugin is active.
    fn close(&mut self) -> PluginResult<()> {
        Ok(())
    }

    /// Panels to mount, in display order.
    fn panels(&self) -> Vec<Panel> {
        Vec::new()
    }
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("panels", &self.panels().len())
            .finish_non_exhaustive()
    }
}

/// Run `hook` on `plugin`.
pub fn run_hook(plugin: &mut dyn Plugin, hook: Hook) -> PluginResult<()> {
    match hook {
        Hook::Load => plugin.load(),
        Hook::Initialize => plugin.initialize(),
        Hook::Remove => plugin.remove(),
        Hook::Close => plugin.close(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        calls: Vec<Hook>,
    }

    impl Plugin for Counter {
        fn load(&mut self) -> PluginResult<()> {
            self.calls.push(Hook::Load);
            Ok(())
        }

        fn remove(&mut self) -> PluginResult<()> {
            Err(PluginError::HookFailed {
                name: "counter".into(),
                hook: Hook::Remove,
                message: "busy".into(),
            })
        }
    }

    #[test]
    fn test_default_hooks_are_noops() {
        let mut plugin = Counter { calls: vec![] };
        assert!(run_hook(&mut plugin, Hook::Initialize).is_ok());
        assert!(run_hook(&mut plugin, Hook::Close).is_ok());
        assert!(run_hook(&mut plugin, Hook::Load).is_ok());
        assert!(run_hook(&mut plugin, Hook::Remove).is_err());
        assert_eq!(plugin.calls, vec![Hook::Load]);
        assert!(plugin.panels().is_empty());
    }

    #[test]
    fn test_hook_display() {
        assert_eq!(Hook::Initialize.to_string(), "initialize");
        let err = PluginError::HookFailed {
            name: "demo".into(),
            hook: Hook::Load,
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "Plugin 'demo' failed in load: boom");
    }
}
