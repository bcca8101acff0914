//! Plugin loader: metadata resolution, content installation and
//! instantiation.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use plugdock_core::{validate_plugin_name, PluginDescriptor, ENTRY_FILE};
use plugdock_ops::{copy_tree, purge_dir_contents, PurgeReport};

use crate::error::{LoadError, LoadResult};
use crate::factory::PluginFactory;
use crate::lua::LuaFactory;
use crate::rhai::RhaiFactory;
use crate::types::Plugin;

/// A freshly constructed plugin and the descriptor it was built from.
#[derive(Debug)]
pub struct LoadedPlugin {
    pub descriptor: PluginDescriptor,
    pub instance: Box<dyn Plugin>,
}

/// Outcome of installing content into a managed directory.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    /// No managed directory existed before the install.
    pub fresh_install: bool,
    /// Result of purging the previous content.
    pub purge: PurgeReport,
    /// Bytes copied into the managed directory.
    pub bytes_copied: u64,
}

/// Resolves, installs and instantiates plugins under a plugins root.
///
/// The loader holds no per-plugin state, so one instance is shared between
/// the lifecycle manager and import workers.
pub struct PluginLoader {
    plugins_root: PathBuf,
    factories: HashMap<&'static str, Box<dyn PluginFactory>>,
}

impl PluginLoader {
    /// Create a loader with the Lua and Rhai script runtimes.
    pub fn new(plugins_root: impl Into<PathBuf>) -> Self {
        Self::empty(plugins_root)
            .with_factory(LuaFactory::new())
            .with_factory(RhaiFactory::new())
    }

    /// Create a loader with no runtimes registered.
    pub fn empty(plugins_root: impl Into<PathBuf>) -> Self {
        Self {
            plugins_root: plugins_root.into(),
            factories: HashMap::new(),
        }
    }

    /// Register a factory, replacing any factory for the same runtime.
    pub fn with_factory(mut self, factory: impl PluginFactory + 'static) -> Self {
        self.factories.insert(factory.runtime(), Box::new(factory));
        self
    }

    /// Root directory holding one managed directory per plugin.
    pub fn plugins_root(&self) -> &Path {
        &self.plugins_root
    }

    /// Managed directory of the plugin called `name`.
    ///
    /// Names that are not a single directory name (empty, `..`, containing
    /// separators) are rejected, so the result is always a direct child of
    /// the plugins root.
    pub fn managed_dir(&self, name: &str) -> LoadResult<PathBuf> {
        validate_plugin_name(name).map_err(|reason| LoadError::InvalidName {
            name: name.to_string(),
            reason,
        })?;
        Ok(self.plugins_root.join(name))
    }

    /// Runtimes this loader can instantiate, sorted.
    pub fn runtimes(&self) -> Vec<&'static str> {
        let mut runtimes: Vec<&'static str> = self.factories.keys().copied().collect();
        runtimes.sort_unstable();
        runtimes
    }

    /// Read the descriptor from the entry file in `dir`.
    pub fn resolve_entry_metadata(&self, dir: &Path) -> LoadResult<PluginDescriptor> {
        let path = dir.join(ENTRY_FILE);
        if !path.is_file() {
            return Err(LoadError::MissingEntryPoint {
                dir: dir.to_path_buf(),
            });
        }

        let text = fs::read_to_string(&path).map_err(|e| LoadError::MalformedMetadata {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let descriptor =
            PluginDescriptor::parse(&text).map_err(|e| LoadError::MalformedMetadata {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if !is_contained(Path::new(descriptor.entry_file())) {
            return Err(LoadError::MalformedMetadata {
                path,
                message: format!(
                    "entry '{}' must be a relative path inside the plugin",
                    descriptor.entry_file()
                ),
            });
        }

        debug!(plugin = %descriptor.name, dir = %dir.display(), "Resolved plugin metadata");
        Ok(descriptor)
    }

    /// Find the plugin content inside an extraction directory.
    ///
    /// Archives either carry the entry file at their top level or wrap the
    /// whole plugin in a single top-level folder.
    pub fn locate_content_root(&self, scratch: &Path) -> LoadResult<PathBuf> {
        if scratch.join(ENTRY_FILE).is_file() {
            return Ok(scratch.to_path_buf());
        }

        let missing = || LoadError::MissingEntryPoint {
            dir: scratch.to_path_buf(),
        };

        let entries: Vec<PathBuf> = fs::read_dir(scratch)
            .map_err(|_| missing())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();

        match entries.as_slice() {
            [only] if only.is_dir() && only.join(ENTRY_FILE).is_file() => Ok(only.clone()),
            _ => Err(missing()),
        }
    }

    /// Replace the contents of `managed_dir` with the contents of
    /// `plugin_dir`.
    ///
    /// Previous content is purged first, best effort: an entry that cannot
    /// be removed is logged and the purge continues with its siblings.
    pub fn install_content(
        &self,
        plugin_dir: &Path,
        managed_dir: &Path,
    ) -> LoadResult<InstallReport> {
        let fresh_install = !managed_dir.exists();

        let purge = purge_dir_contents(managed_dir);
        if !purge.is_clean() {
            warn!(
                dir = %managed_dir.display(),
                failures = purge.failures.len(),
                "Stale plugin files could not all be removed"
            );
        }

        let bytes_copied =
            copy_tree(plugin_dir, managed_dir).map_err(|source| LoadError::CopyFailed {
                managed_dir: managed_dir.to_path_buf(),
                source,
            })?;

        info!(
            dir = %managed_dir.display(),
            fresh_install,
            removed = purge.removed,
            bytes = bytes_copied,
            "Plugin content installed"
        );

        Ok(InstallReport {
            fresh_install,
            purge,
            bytes_copied,
        })
    }

    /// Import the installed plugin `name` and construct its instance.
    pub fn instantiate(&self, name: &str) -> LoadResult<LoadedPlugin> {
        let dir = self.managed_dir(name)?;
        let descriptor = self.resolve_entry_metadata(&dir)?;

        if descriptor.name != name {
            return Err(LoadError::MalformedMetadata {
                path: dir.join(ENTRY_FILE),
                message: format!(
                    "declares name '{}' but is installed as '{}'",
                    descriptor.name, name
                ),
            });
        }

        let factory = self
            .factories
            .get(descriptor.runtime.as_str())
            .ok_or_else(|| {
                LoadError::import_failed(
                    name,
                    format!("unsupported runtime '{}'", descriptor.runtime),
                )
            })?;

        let instance = factory
            .instantiate(&descriptor, &dir)
            .map_err(|e| LoadError::import_failed(name, e))?;

        info!(plugin = %descriptor, "Plugin instantiated");
        Ok(LoadedPlugin {
            descriptor,
            instance,
        })
    }

    /// Delete the managed directory of `name`.
    ///
    /// Returns `false` if there was nothing to delete.
    pub fn delete_content(&self, name: &str) -> LoadResult<bool> {
        let dir = self.managed_dir(name)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(dir = %dir.display(), "Plugin content deleted");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(LoadError::DeleteFailed { path: dir, source }),
        }
    }

    /// Descriptors of every installed plugin, sorted by name.
    ///
    /// Directories without valid metadata are skipped.
    pub fn installed(&self) -> Vec<PluginDescriptor> {
        let Ok(entries) = fs::read_dir(&self.plugins_root) else {
            return Vec::new();
        };

        let mut descriptors: Vec<PluginDescriptor> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let dir = entry.path();
                match self.resolve_entry_metadata(&dir) {
                    Ok(descriptor) => Some(descriptor),
                    Err(e) => {
                        debug!(dir = %dir.display(), error = %e, "Skipping plugin directory");
                        None
                    }
                }
            })
            .collect();

        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }
}

/// Whether `path` stays inside the directory it is joined to.
fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
