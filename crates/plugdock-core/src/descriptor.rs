//! Plugin descriptor read from a plugin's entry file.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::name::validate_plugin_name;

/// Errors raised while parsing an entry file.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// The file is not valid TOML or has the wrong shape.
    #[error("Invalid entry file: {message}")]
    Syntax { message: String },

    /// A required field is absent or empty.
    #[error("Missing required field '{field}'")]
    MissingField { field: &'static str },

    /// The declared name cannot be used as a plugin directory.
    #[error("Invalid plugin name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
}

/// Static metadata describing a plugin.
///
/// The `name` is the plugin's identity: it keys the registry, names the
/// managed directory, and stays stable across reloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin identifier.
    pub name: String,

    /// Plugin version string.
    pub version: String,

    /// Plugin author.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Runtime that instantiates the plugin (lua, rhai, native).
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Entry script, relative to the plugin directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
}

/// Shape accepted from disk before required fields are checked.
#[derive(Deserialize)]
struct RawDescriptor {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    author: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_runtime")]
    runtime: String,
    entry: Option<String>,
}

fn default_runtime() -> String {
    "lua".to_string()
}

impl PluginDescriptor {
    /// Create a descriptor with the default runtime.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            author: String::new(),
            description: String::new(),
            runtime: default_runtime(),
            entry: None,
        }
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the runtime.
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Set an explicit entry script.
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    /// Parse and validate the contents of an entry file.
    pub fn parse(text: &str) -> Result<Self, DescriptorError> {
        let raw: RawDescriptor = toml::from_str(text).map_err(|e| DescriptorError::Syntax {
            message: e.message().to_string(),
        })?;

        let name = required(raw.name, "name")?;
        let version = required(raw.version, "version")?;

        validate_plugin_name(&name).map_err(|reason| DescriptorError::InvalidName {
            name: name.clone(),
            reason,
        })?;

        Ok(Self {
            name,
            version,
            author: raw.author,
            description: raw.description,
            runtime: raw.runtime,
            entry: raw.entry,
        })
    }

    /// Serialize back to entry-file form.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    /// Entry script for this plugin, falling back to the runtime default.
    pub fn entry_file(&self) -> &str {
        if let Some(entry) = &self.entry {
            return entry;
        }
        match self.runtime.as_str() {
            "lua" => "main.lua",
            "rhai" => "main.rhai",
            _ => "main",
        }
    }
}

impl fmt::Display for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name, self.version)?;
        if !self.author.is_empty() {
            write!(f, " by {}", self.author)?;
        }
        Ok(())
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, DescriptorError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(DescriptorError::MissingField { field }),
    }
}
