//! Core types and configuration for plugdock.
//!
//! This crate provides the data model shared by the extraction engine, the
//! plugin loader and the lifecycle manager: plugin descriptors read from the
//! entry file, panel placement, and host configuration.

mod config;
mod descriptor;
mod name;
mod side;

pub use config::{ConfigError, HostConfig, HostConfigBuilder};
pub use descriptor::{DescriptorError, PluginDescriptor};
pub use name::validate_plugin_name;
pub use side::Side;

/// Well-known entry-metadata file at the top level of every plugin.
pub const ENTRY_FILE: &str = "plugin.toml";

/// File extension of packaged plugin archives.
pub const ARCHIVE_EXTENSION: &str = "plugin";
