//! Lua factory and plugin instance.

use std::path::Path;

use mlua::{Function, Lua, Table, Value as LuaValue};
use tracing::{debug, warn};

use plugdock_core::{PluginDescriptor, Side};

use crate::factory::PluginFactory;
use crate::types::{Hook, Panel, Plugin, PluginError, PluginResult};

use super::bindings;

/// Builds plugins whose entry script is Lua.
///
/// Every plugin gets its own Lua state, so plugins cannot observe each
/// other's globals.
#[derive(Debug, Default, Clone, Copy)]
pub struct LuaFactory;

impl LuaFactory {
    /// Create a new Lua factory.
    pub fn new() -> Self {
        Self
    }
}

impl PluginFactory for LuaFactory {
    fn runtime(&self) -> &'static str {
        "lua"
    }

    fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
        dir: &Path,
    ) -> PluginResult<Box<dyn Plugin>> {
        let entry = dir.join(descriptor.entry_file());
        let code = std::fs::read_to_string(&entry)?;

        let name = descriptor.name.clone();
        let script_error = |e: mlua::Error| PluginError::Script {
            name: name.clone(),
            message: e.to_string(),
        };

        let lua = Lua::new();
        bindings::prepare_environment(&lua, dir).map_err(script_error)?;
        let host = bindings::create_host_api(&lua, descriptor, dir).map_err(script_error)?;
        lua.globals().set("host", host).map_err(script_error)?;

        let module: Table = lua
            .load(&code)
            .set_name(format!("@{}", entry.display()))
            .eval()
            .map_err(script_error)?;

        let plugin = LuaPlugin {
            name,
            module,
            _lua: lua,
        };

        // Reject bad declarations at import time rather than on first use.
        for hook in Hook::ALL {
            plugin.hook_function(hook)?;
        }
        let panels = plugin.read_tabs()?;

        debug!(
            plugin = %plugin.name,
            panels = panels.len(),
            "Lua plugin instantiated"
        );

        Ok(Box::new(plugin))
    }
}

/// A plugin backed by a Lua module table.
struct LuaPlugin {
    name: String,
    module: Table,
    _lua: Lua,
}

impl LuaPlugin {
    fn invalid(&self, message: String) -> PluginError {
        PluginError::InvalidDeclaration {
            name: self.name.clone(),
            message,
        }
    }

    fn hook_function(&self, hook: Hook) -> PluginResult<Option<Function>> {
        let value: LuaValue = self
            .module
            .get(hook.name())
            .map_err(|e| self.invalid(e.to_string()))?;

        match value {
            LuaValue::Nil => Ok(None),
            LuaValue::Function(function) => Ok(Some(function)),
            other => Err(self.invalid(format!(
                "'{}' must be a function, found {}",
                hook,
                other.type_name()
            ))),
        }
    }

    fn call(&self, hook: Hook) -> PluginResult<()> {
        let Some(function) = self.hook_function(hook)? else {
            return Ok(());
        };

        // Called with the module as `self` so both `M.hook()` and
        // `M:hook()` definitions work.
        function
            .call::<()>(self.module.clone())
            .map_err(|e| PluginError::HookFailed {
                name: self.name.clone(),
                hook,
                message: e.to_string(),
            })
    }

    fn read_tabs(&self) -> PluginResult<Vec<Panel>> {
        let tabs = match self
            .module
            .get::<LuaValue>("tabs")
            .map_err(|e| self.invalid(e.to_string()))?
        {
            LuaValue::Nil => return Ok(Vec::new()),
            LuaValue::Table(tabs) => tabs,
            other => {
                return Err(self.invalid(format!(
                    "'tabs' must be an array, found {}",
                    other.type_name()
                )))
            }
        };

        let mut panels = Vec::new();
        for index in 1..=tabs.raw_len() {
            let entry: Table = tabs
                .raw_get(index)
                .map_err(|e| self.invalid(format!("tab {} is not a table: {}", index, e)))?;

            let title: String = entry
                .get("title")
                .map_err(|e| self.invalid(format!("tab {} has no title: {}", index, e)))?;
            let id: Option<String> = entry
                .get("id")
                .map_err(|e| self.invalid(format!("tab {} has a bad id: {}", index, e)))?;
            let side: Option<String> = entry
                .get("side")
                .map_err(|e| self.invalid(format!("tab {} has a bad side: {}", index, e)))?;

            let side = match side {
                None => Side::default(),
                Some(side) => side.parse::<Side>().map_err(|_| {
                    self.invalid(format!("tab '{}' has unknown side '{}'", title, side))
                })?,
            };

            let id = id.unwrap_or_else(|| format!("{}:{}", self.name, index));
            panels.push(Panel::new(id, title, side));
        }

        Ok(panels)
    }
}

impl Plugin for LuaPlugin {
    fn load(&mut self) -> PluginResult<()> {
        self.call(Hook::Load)
    }

    fn initialize(&mut self) -> PluginResult<()> {
        self.call(Hook::Initialize)
    }

    fn remove(&mut self) -> PluginResult<()> {
        self.call(Hook::Remove)
    }

    fn close(&mut self) -> PluginResult<()> {
        self.call(Hook::Close)
    }

    fn panels(&self) -> Vec<Panel> {
        self.read_tabs().unwrap_or_else(|e| {
            warn!(plugin = %self.name, error = %e, "Ignoring invalid tab declaration");
            Vec::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn instantiate(script: &str) -> PluginResult<Box<dyn Plugin>> {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("main.lua"), script).unwrap();
        let descriptor = PluginDescriptor::new("demo", "1.0");
        LuaFactory::new().instantiate(&descriptor, temp.path())
    }

    #[test]
    fn test_tabs_and_hooks() {
        let mut plugin = instantiate(
            r#"
            local M = {
                loads = 0,
                tabs = {
                    { id = "main", title = "Demo", side = "right" },
                    { title = "Log" },
                },
            }
            function M:load()
                self.loads = self.loads + 1
                host.log_info("loaded " .. host.plugin_name)
            end
            function M.remove()
                error("cannot clean up")
            end
            return M
            "#,
        )
        .unwrap();

        let panels = plugin.panels();
        assert_eq!(panels.len(), 2);
        assert_eq!(panels[0], Panel::new("main", "Demo", Side::Right));
        assert_eq!(panels[1].id, "demo:2");
        assert_eq!(panels[1].side, Side::Left);

        plugin.load().unwrap();
        plugin.close().unwrap();
        let err = plugin.remove().unwrap_err();
        assert!(matches!(
            err,
            PluginError::HookFailed {
                hook: Hook::Remove,
                ..
            }
        ));
        assert!(err.to_string().contains("cannot clean up"));
    }

    #[test]
    fn test_require_from_plugin_dir() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("util.lua"), "return { value = 42 }").unwrap();
        fs::write(
            temp.path().join("main.lua"),
            r#"
            assert(loadfile == nil)
            assert(dofile == nil)
            local util = require("util")
            return { tabs = { { title = "v" .. util.value } } }
            "#,
        )
        .unwrap();

        let descriptor = PluginDescriptor::new("demo", "1.0");
        let plugin = LuaFactory::new()
            .instantiate(&descriptor, temp.path())
            .unwrap();
        assert_eq!(plugin.panels()[0].title, "v42");
    }

    #[test]
    fn test_invalid_declarations() {
        let err = instantiate("return { load = 5 }").err().unwrap();
        assert!(matches!(err, PluginError::InvalidDeclaration { .. }));

        let err = instantiate(r#"return { tabs = { { title = "x", side = "top" } } }"#)
            .err()
            .unwrap();
        assert!(err.to_string().contains("unknown side"));
    }

    #[test]
    fn test_script_error() {
        let err = instantiate("return {").err().unwrap();
        assert!(matches!(err, PluginError::Script { .. }));

        let err = instantiate("return 42").err().unwrap();
        assert!(matches!(err, PluginError::Script { .. }));
    }

    #[test]
    fn test_missing_entry_script() {
        let temp = TempDir::new().unwrap();
        let descriptor = PluginDescriptor::new("demo", "1.0");
        let err = LuaFactory::new()
            .instantiate(&descriptor, temp.path())
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::Io(_)));
    }
}
