//! Rhai factory and plugin instance.

use std::collections::HashSet;
use std::path::Path;

use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Scope, AST};
use tracing::{debug, warn};

use plugdock_core::{PluginDescriptor, Side};

use crate::factory::PluginFactory;
use crate::types::{Hook, Panel, Plugin, PluginError, PluginResult};

const TABS_FN: &str = "tabs";

/// Builds plugins whose entry script is Rhai.
#[derive(Debug, Default, Clone, Copy)]
pub struct RhaiFactory;

impl RhaiFactory {
    /// Create a new Rhai factory.
    pub fn new() -> Self {
        Self
    }

    fn create_engine(descriptor: &PluginDescriptor, dir: &Path) -> Engine {
        let mut engine = Engine::new();

        // Configure safety limits
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(64);
        engine.set_max_operations(1_000_000);
        engine.set_max_modules(100);
        engine.set_max_string_size(1024 * 1024); // 1MB strings
        engine.set_max_array_size(10_000);
        engine.set_max_map_size(10_000);

        engine.register_fn("log_info", |msg: &str| {
            tracing::info!(target: "plugin", "{}", msg);
        });

        engine.register_fn("log_warn", |msg: &str| {
            tracing::warn!(target: "plugin", "{}", msg);
        });

        engine.register_fn("log_error", |msg: &str| {
            tracing::error!(target: "plugin", "{}", msg);
        });

        let plugin_name = descriptor.name.clone();
        engine.register_fn("plugin_name", move || plugin_name.clone());

        let plugin_dir = dir.to_string_lossy().into_owned();
        engine.register_fn("plugin_dir", move || plugin_dir.clone());

        engine
    }
}

impl PluginFactory for RhaiFactory {
    fn runtime(&self) -> &'static str {
        "rhai"
    }

    fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
        dir: &Path,
    ) -> PluginResult<Box<dyn Plugin>> {
        let entry = dir.join(descriptor.entry_file());
        let code = std::fs::read_to_string(&entry)?;

        let engine = Self::create_engine(descriptor, dir);
        let ast = engine.compile(&code).map_err(|e| PluginError::Script {
            name: descriptor.name.clone(),
            message: e.to_string(),
        })?;

        let mut functions = HashSet::new();
        for func in ast.iter_functions() {
            let is_known =
                func.name == TABS_FN || Hook::ALL.iter().any(|hook| hook.name() == func.name);
            if !is_known {
                continue;
            }
            if !func.params.is_empty() {
                return Err(PluginError::InvalidDeclaration {
                    name: descriptor.name.clone(),
                    message: format!("'{}' must not take parameters", func.name),
                });
            }
            functions.insert(func.name.to_string());
        }

        // Top-level statements run once, at import.
        engine.run_ast(&ast).map_err(|e| PluginError::Script {
            name: descriptor.name.clone(),
            message: e.to_string(),
        })?;

        let plugin = RhaiPlugin {
            name: descriptor.name.clone(),
            engine,
            ast,
            functions,
        };
        let panels = plugin.read_tabs()?;

        debug!(
            plugin = %plugin.name,
            panels = panels.len(),
            "Rhai plugin instantiated"
        );

        Ok(Box::new(plugin))
    }
}

/// A plugin backed by a compiled Rhai script.
struct RhaiPlugin {
    name: String,
    engine: Engine,
    ast: AST,
    functions: HashSet<String>,
}

impl RhaiPlugin {
    fn invalid(&self, message: String) -> PluginError {
        PluginError::InvalidDeclaration {
            name: self.name.clone(),
            message,
        }
    }

    fn call_fn(&self, name: &str) -> Result<Dynamic, Box<EvalAltResult>> {
        let mut scope = Scope::new();
        let options = CallFnOptions::new().eval_ast(false);
        self.engine
            .call_fn_with_options::<Dynamic>(options, &mut scope, &self.ast, name, ())
    }

    fn call(&self, hook: Hook) -> PluginResult<()> {
        if !self.functions.contains(hook.name()) {
            return Ok(());
        }

        self.call_fn(hook.name())
            .map(|_| ())
            .map_err(|e| PluginError::HookFailed {
                name: self.name.clone(),
                hook,
                message: e.to_string(),
            })
    }

    fn read_tabs(&self) -> PluginResult<Vec<Panel>> {
        if !self.functions.contains(TABS_FN) {
            return Ok(Vec::new());
        }

        let value = self
            .call_fn(TABS_FN)
            .map_err(|e| self.invalid(format!("tabs() failed: {}", e)))?;
        let type_name = value.type_name();
        let Some(tabs) = value.try_cast::<rhai::Array>() else {
            return Err(self.invalid(format!("tabs() must return an array, found {}", type_name)));
        };

        let mut panels = Vec::with_capacity(tabs.len());
        for (i, item) in tabs.into_iter().enumerate() {
            let index = i + 1;
            let Some(map) = item.try_cast::<rhai::Map>() else {
                return Err(self.invalid(format!("tab {} is not a map", index)));
            };

            let text = |key: &str| map.get(key).and_then(|v| v.clone().into_string().ok());

            let title = text("title")
                .ok_or_else(|| self.invalid(format!("tab {} has no title", index)))?;
            let side = match map.get("side") {
                None => Side::default(),
                Some(_) => text("side")
                    .and_then(|side| side.parse::<Side>().ok())
                    .ok_or_else(|| {
                        self.invalid(format!("tab '{}' has unknown side", title))
                    })?,
            };
            let id = text("id").unwrap_or_else(|| format!("{}:{}", self.name, index));

            panels.push(Panel::new(id, title, side));
        }

        Ok(panels)
    }
}

impl Plugin for RhaiPlugin {
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
