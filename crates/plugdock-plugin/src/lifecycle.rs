//! Plugin lifecycle manager.
//!
//! Every registry mutation and every call into the panel host goes through
//! [`LifecycleManager`], which runs on the interactive side. Background
//! imports report through [`LifecycleManager::handle_import_event`].
//!
//! Per-name states are `Absent -> Loading -> Active -> Removing -> Absent`.
//! A name in `Loading` or `Removing` rejects other operations with
//! [`LifecycleError::Busy`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use plugdock_core::PluginDescriptor;

use crate::error::{LifecycleError, LifecycleResult, UserMessage};
use crate::host::PanelHost;
use crate::loader::PluginLoader;
use crate::registry::{ActivePlugin, PluginRegistry};
use crate::settings::SettingsSource;
use crate::types::{Hook, Plugin};
use crate::worker::{ImportEvent, ImportedPlugin};

/// Lifecycle state of a plugin name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    Absent,
    Loading,
    Active,
    Removing,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Loading => write!(f, "loading"),
            Self::Active => write!(f, "active"),
            Self::Removing => write!(f, "removing"),
        }
    }
}

/// What a project switch changed.
#[derive(Debug, Default)]
pub struct ProjectReload {
    /// Plugins activated, in project order.
    pub activated: Vec<String>,
    /// Plugins removed because the project no longer enables them.
    pub deactivated: Vec<String>,
    /// Plugins that could not be activated or removed.
    pub failed: Vec<(String, LifecycleError)>,
}

impl ProjectReload {
    /// Check if every transition succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Orchestrates activation, reload and removal of plugins.
pub struct LifecycleManager<H: PanelHost> {
    registry: PluginRegistry,
    loader: Arc<PluginLoader>,
    host: H,
    transitions: HashMap<String, PluginState>,
    import_claim: Option<String>,
}

impl<H: PanelHost> LifecycleManager<H> {
    pub fn new(loader: Arc<PluginLoader>, host: H) -> Self {
        Self {
            registry: PluginRegistry::new(),
            loader,
            host,
            transitions: HashMap::new(),
            import_claim: None,
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn loader(&self) -> &Arc<PluginLoader> {
        &self.loader
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Current state of `name`.
    pub fn state(&self, name: &str) -> PluginState {
        match self.transitions.get(name) {
            Some(state) => *state,
            None if self.registry.contains(name) => PluginState::Active,
            None => PluginState::Absent,
        }
    }

    fn ensure_idle(&self, name: &str) -> LifecycleResult<()> {
        if self.transitions.contains_key(name) {
            return Err(LifecycleError::Busy {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Activate the installed plugin `name`, reloading it if already active.
    ///
    /// A reload unmounts and discards the old instance without running its
    /// `remove()` hook, then imports the code again from disk.
    pub fn add_or_reload_plugin(&mut self, name: &str) -> LifecycleResult<()> {
        self.loader.managed_dir(name)?;
        self.ensure_idle(name)?;
        self.transitions
            .insert(name.to_string(), PluginState::Loading);

        let result = self.discard_and_load(name);

        self.transitions.remove(name);
        result
    }

    /// Reload `name`, which must be active.
    pub fn reload_plugin(&mut self, name: &str) -> LifecycleResult<()> {
        if !self.registry.contains(name) {
            return Err(LifecycleError::NotActive {
                name: name.to_string(),
            });
        }
        self.add_or_reload_plugin(name)
    }

    fn discard_and_load(&mut self, name: &str) -> LifecycleResult<()> {
        self.discard_for_reload(name);
        let loaded = self.loader.instantiate(name)?;
        self.activate_instance(loaded.descriptor, loaded.instance, false)
    }

    /// Drop the active instance of `name`, if any, without `remove()`.
    fn discard_for_reload(&mut self, name: &str) {
        if let Some(previous) = self.registry.deactivate(name) {
            self.host.unmount_all_panels_for_plugin(name);
            debug!(
                plugin = name,
                panels = previous.panels.len(),
                "Discarded previous instance"
            );
        }
    }

    fn activate_instance(
        &mut self,
        descriptor: PluginDescriptor,
        mut instance: Box<dyn Plugin>,
        run_initialize: bool,
    ) -> LifecycleResult<()> {
        let name = descriptor.name.clone();

        if run_initialize {
            instance
                .initialize()
                .map_err(|source| LifecycleError::Hook {
                    name: name.clone(),
                    source,
                })?;
        }
        instance.load().map_err(|source| LifecycleError::Hook {
            name: name.clone(),
            source,
        })?;

        let panels: Vec<_> = instance
            .panels()
            .iter()
            .map(|panel| self.host.mount_panel(panel, &name, panel.side))
            .collect();

        info!(plugin = %descriptor, panels = panels.len(), "Plugin activated");
        self.registry.activate(
            name,
            ActivePlugin {
                descriptor,
                instance,
                panels,
            },
        );
        Ok(())
    }

    /// Remove `name`: run its `remove()` hook, unmount its panels and evict
    /// it. A plugin that is not active is left alone.
    ///
    /// A failing `remove()` hook is logged and removal continues.
    pub fn remove_plugin(&mut self, name: &str) -> LifecycleResult<()> {
        self.loader.managed_dir(name)?;
        self.ensure_idle(name)?;
        let Some(entry) = self.registry.get_mut(name) else {
            debug!(plugin = name, "Remove requested for inactive plugin");
            return Ok(());
        };

        self.transitions
            .insert(name.to_string(), PluginState::Removing);

        if let Err(e) = entry.instance.remove() {
            warn!(plugin = name, error = %e, "Plugin {} hook failed", Hook::Remove);
        }
        self.host.unmount_all_panels_for_plugin(name);
        self.registry.deactivate(name);

        self.transitions.remove(name);
        info!(plugin = name, "Plugin removed");
        Ok(())
    }

    /// Delete the managed directory of `name`, which must not be active.
    ///
    /// Returns `false` if nothing was installed.
    pub fn delete_plugin_files(&mut self, name: &str) -> LifecycleResult<bool> {
        self.loader.managed_dir(name)?;
        self.ensure_idle(name)?;
        if self.registry.contains(name) {
            return Err(LifecycleError::AlreadyActive {
                name: name.to_string(),
            });
        }

        Ok(self.loader.delete_content(name)?)
    }

    /// Remove `name` and delete its files.
    pub fn uninstall_plugin(&mut self, name: &str) -> LifecycleResult<bool> {
        self.remove_plugin(name)?;
        self.delete_plugin_files(name)
    }

    /// Switch to a project's plugin list.
    ///
    /// Active plugins missing from `names` are removed; the rest of `names`
    /// are activated in order. Plugins that are already active stay mounted
    /// as they are. Failures are collected and the switch continues.
    pub fn reload_all_for_project(&mut self, names: &[String]) -> ProjectReload {
        let mut report = ProjectReload::default();
        let desired: HashSet<&str> = names.iter().map(String::as_str).collect();

        let stale: Vec<String> = self
            .registry
            .list_active()
            .into_iter()
            .filter(|name| !desired.contains(name.as_str()))
            .collect();
        for name in stale {
            match self.remove_plugin(&name) {
                Ok(()) => report.deactivated.push(name),
                Err(e) => {
                    warn!(plugin = %name, error = %e, "Failed to deactivate plugin");
                    report.failed.push((name, e));
                }
            }
        }

        for name in names {
            if self.registry.contains(name) {
                debug!(plugin = %name, "Plugin already active");
                continue;
            }
            match self.add_or_reload_plugin(name) {
                Ok(()) => report.activated.push(name.clone()),
                Err(e) => {
                    warn!(plugin = %name, error = %e, "Failed to activate plugin");
                    report.failed.push((name.clone(), e));
                }
            }
        }

        info!(
            activated = report.activated.len(),
            deactivated = report.deactivated.len(),
            failed = report.failed.len(),
            "Project plugins reloaded"
        );
        report
    }

    /// [`reload_all_for_project`](Self::reload_all_for_project) with the
    /// names enabled for `project` in `settings`.
    pub fn reload_for_project(
        &mut self,
        settings: &impl SettingsSource,
        project: &str,
    ) -> ProjectReload {
        let names = settings.enabled_plugin_names(project);
        self.reload_all_for_project(&names)
    }

    /// Run `close()` on every active plugin and clear the registry.
    ///
    /// Hook failures are logged; every plugin is closed regardless.
    pub fn shutdown(&mut self) {
        for (name, mut entry) in self.registry.drain() {
            if let Err(e) = entry.instance.close() {
                warn!(plugin = %name, error = %e, "Plugin {} hook failed", Hook::Close);
            } else {
                debug!(plugin = %name, "Plugin closed");
            }
        }
        self.transitions.clear();
        self.import_claim = None;
    }

    /// Apply a notification from an import job.
    ///
    /// Returns a message for the user when the import failed.
    pub fn handle_import_event(&mut self, event: ImportEvent) -> Option<UserMessage> {
        match event {
            ImportEvent::UnarchiveFinished => {
                debug!("Plugin archive extracted");
                None
            }
            ImportEvent::UnarchiveFailed { archive, reason } => {
                warn!(archive = %archive.display(), %reason, "Plugin archive could not be extracted");
                None
            }
            ImportEvent::Finalizing { name, claim } => {
                if self.transitions.contains_key(&name) {
                    warn!(plugin = %name, state = %self.state(&name), "Refusing import for busy plugin");
                    claim.refuse();
                    return None;
                }

                self.transitions.insert(name.clone(), PluginState::Loading);
                self.import_claim = Some(name);
                if !claim.grant() {
                    debug!("Import stopped before its name claim was granted");
                    self.release_import_claim();
                }
                None
            }
            ImportEvent::ImportFinished(imported) => {
                self.release_import_claim();
                match self.activate_imported(imported) {
                    Ok(()) => None,
                    Err(e) => {
                        error!(error = %e, "Imported plugin could not be activated");
                        Some(UserMessage::from(&e))
                    }
                }
            }
            ImportEvent::ImportFailed(err) => {
                self.release_import_claim();
                Some(UserMessage::from(&err))
            }
            ImportEvent::ImportCancelled => {
                self.release_import_claim();
                None
            }
        }
    }

    fn release_import_claim(&mut self) {
        if let Some(name) = self.import_claim.take() {
            self.transitions.remove(&name);
        }
    }

    fn activate_imported(&mut self, imported: ImportedPlugin) -> LifecycleResult<()> {
        let name = imported.descriptor.name.clone();
        self.ensure_idle(&name)?;
        self.transitions.insert(name.clone(), PluginState::Loading);

        self.discard_for_reload(&name);
        let result = self.activate_instance(
            imported.descriptor,
            imported.instance,
            imported.fresh_install,
        );

        self.transitions.remove(&name);
        result
    }
}
