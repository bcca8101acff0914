//! Plugin loading, registry and lifecycle management for plugdock.
//!
//! # Architecture
//!
//! - [`PluginLoader`] reads a plugin's entry metadata, installs its content
//!   into the managed plugins directory and constructs instances through a
//!   [`PluginFactory`] chosen by the descriptor's runtime (Lua, Rhai, or a
//!   compiled-in [`NativePlugins`] table).
//! - [`PluginRegistry`] holds the active instances in activation order.
//! - [`LifecycleManager`] is the single writer of the registry and the only
//!   caller of the [`PanelHost`].
//! - [`start_import`] runs the archive-to-instance pipeline on a background
//!   task and reports [`ImportEvent`]s back over a channel.
//!
//! # Example
//!
//! ```ignore
//! use plugdock_plugin::{Installer, LifecycleManager, PluginLoader};
//!
//! let loader = Arc::new(PluginLoader::new(config.plugins_root.clone()));
//! let mut manager = LifecycleManager::new(loader.clone(), host);
//! let mut installer = Installer::new(loader, config);
//!
//! let mut import = installer.start("demo.plugin")?;
//! while let Some(event) = import.events.recv().await {
//!     if let Some(message) = manager.handle_import_event(event) {
//!         show(message);
//!     }
//! }
//! ```

mod error;
mod factory;
mod host;
mod lifecycle;
mod loader;
pub mod lua;
mod registry;
pub mod rhai;
mod settings;
mod types;
mod worker;

pub use error::{
    cause_chain, ImportError, LifecycleError, LifecycleResult, LoadError, LoadResult, UserMessage,
};
pub use factory::{NativeConstructor, NativePlugins, PluginFactory, NATIVE_RUNTIME};
pub use host::PanelHost;
pub use lifecycle::{LifecycleManager, PluginState, ProjectReload};
pub use loader::{InstallReport, LoadedPlugin, PluginLoader};
pub use registry::{ActivePlugin, PluginRegistry};
pub use settings::{PluginRecord, ProjectSettings, SettingsSource};
pub use types::{run_hook, Hook, Panel, PanelHandle, Plugin, PluginError, PluginResult};
pub use worker::{
    name_hint, start_import, validate_archive_path, ImportEvent, ImportHandle, ImportRequest,
    ImportedPlugin, Installer, JobOutcome, NameClaim, IMPORT_CHANNEL_SIZE,
};
