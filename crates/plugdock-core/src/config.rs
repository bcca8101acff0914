//! Host configuration.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML.
    #[error("Invalid config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// A value failed validation.
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration for the plugin host.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct HostConfig {
    /// Managed plugins directory; one subdirectory per plugin name.
    pub plugins_root: PathBuf,

    /// Parent directory for scratch extraction (None = system temp).
    #[builder(default)]
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,

    /// Project settings file (None = `settings.toml` beside the plugins root).
    #[builder(default)]
    #[serde(default)]
    pub settings_path: Option<PathBuf>,

    /// External program used for 7z-format archives.
    #[builder(default = "default_seven_zip()")]
    #[serde(default = "default_seven_zip")]
    pub seven_zip_program: String,

    /// Capacity of the import notification channel.
    #[builder(default = "16")]
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
}

fn default_seven_zip() -> String {
    "7z".to_string()
}

fn default_channel_size() -> usize {
    16
}

/// Base data directory for plugdock.
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("plugdock")
}

impl HostConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.plugins_root {
            Some(ref root) if root.as_os_str().is_empty() => {
                Err("Plugins root cannot be empty".to_string())
            }
            Some(_) => {
                if self.channel_size == Some(0) {
                    return Err("Channel size must be at least 1".to_string());
                }
                Ok(())
            }
            None => Err("Plugins root is required".to_string()),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::new(default_data_dir().join("plugins"))
    }
}

impl HostConfig {
    /// Create a new config builder.
    pub fn builder() -> HostConfigBuilder {
        HostConfigBuilder::default()
    }

    /// Create a config rooted at the given plugins directory.
    pub fn new(plugins_root: impl Into<PathBuf>) -> Self {
        Self {
            plugins_root: plugins_root.into(),
            scratch_root: None,
            settings_path: None,
            seven_zip_program: default_seven_zip(),
            channel_size: default_channel_size(),
        }
    }

    /// Load a config from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Override the plugins root.
    pub fn with_plugins_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.plugins_root = root.into();
        self
    }

    /// Resolved project settings file.
    pub fn settings_file(&self) -> PathBuf {
        if let Some(path) = &self.settings_path {
            return path.clone();
        }
        self.plugins_root
            .parent()
            .unwrap_or(&self.plugins_root)
            .join("settings.toml")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.plugins_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                message: "plugins_root cannot be empty".into(),
            });
        }
        if self.channel_size == 0 {
            return Err(ConfigError::Invalid {
                message: "channel_size must be at least 1".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_root() {
        assert!(HostConfig::builder().build().is_err());
        assert!(HostConfig::builder().plugins_root("").build().is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let config = HostConfig::builder()
            .plugins_root("/data/plugins")
            .build()
            .unwrap();
        assert_eq!(config.seven_zip_program, "7z");
        assert_eq!(config.channel_size, 16);
        assert_eq!(config.settings_file(), PathBuf::from("/data/settings.toml"));
    }

    #[test]
    fn test_builder_rejects_zero_channel() {
        let result = HostConfig::builder()
            .plugins_root("/data/plugins")
            .channel_size(0usize)
            .build();
        assert!(result.is_err());
    }
}
