//! Per-project record of enabled plugins.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use plugdock_core::{ConfigError, PluginDescriptor};

/// Source of the plugins each project wants active.
pub trait SettingsSource {
    /// Names of the plugins enabled for `project`, in activation order.
    fn enabled_plugin_names(&self, project: &str) -> Vec<String>;
}

/// A plugin enabled for a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub name: String,
    #[serde(default)]
    pub author: String,
    pub version: String,
    pub enabled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProjectEntry {
    #[serde(default)]
    plugins: Vec<PluginRecord>,
}

/// TOML-backed project settings.
///
/// ```toml
/// [[projects.default.plugins]]
/// name = "demo"
/// author = "someone"
/// version = "1.0"
/// enabled_at = "2024-05-01T10:00:00Z"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(skip)]
    path: Option<PathBuf>,
    #[serde(default)]
    projects: BTreeMap<String, ProjectEntry>,
}

impl ProjectSettings {
    /// Create empty settings bound to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            projects: BTreeMap::new(),
        }
    }

    /// Load settings from `path`. A missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No project settings yet");
            return Ok(Self::new(path));
        }

        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut settings: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        settings.path = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Write settings back to the file they were loaded from.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.path.as_deref().ok_or_else(|| ConfigError::Invalid {
            message: "project settings have no backing file".to_string(),
        })?;

        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        fs::write(path, text).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Enabled plugins of `project`, in activation order.
    pub fn plugins(&self, project: &str) -> &[PluginRecord] {
        self.projects
            .get(project)
            .map(|entry| entry.plugins.as_slice())
            .unwrap_or_default()
    }

    /// Check if `name` is enabled for `project`.
    pub fn is_enabled(&self, project: &str, name: &str) -> bool {
        self.plugins(project).iter().any(|record| record.name == name)
    }

    /// Enable `descriptor` for `project`.
    ///
    /// A plugin that is already enabled keeps its position; its author and
    /// version are refreshed.
    pub fn enable(&mut self, project: &str, descriptor: &PluginDescriptor) {
        let entry = self.projects.entry(project.to_string()).or_default();
        if let Some(record) = entry.plugins.iter_mut().find(|r| r.name == descriptor.name) {
            record.author = descriptor.author.clone();
            record.version = descriptor.version.clone();
            return;
        }

        entry.plugins.push(PluginRecord {
            name: descriptor.name.clone(),
            author: descriptor.author.clone(),
            version: descriptor.version.clone(),
            enabled_at: Utc::now(),
        });
    }

    /// Disable `name` for `project`. Returns `false` if it was not enabled.
    pub fn disable(&mut self, project: &str, name: &str) -> bool {
        let Some(entry) = self.projects.get_mut(project) else {
            return false;
        };
        let before = entry.plugins.len();
        entry.plugins.retain(|record| record.name != name);
        entry.plugins.len() != before
    }
}

impl SettingsSource for ProjectSettings {
    fn enabled_plugin_names(&self, project: &str) -> Vec<String> {
        self.plugins(project)
            .iter()
            .map(|record| record.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_enable_disable_order() {
        let mut settings = ProjectSettings::default();
        settings.enable("p", &PluginDescriptor::new("a", "1.0"));
        settings.enable("p", &PluginDescriptor::new("b", "1.0"));
        settings.enable("p", &PluginDescriptor::new("a", "1.1"));

        assert_eq!(settings.enabled_plugin_names("p"), vec!["a", "b"]);
        assert_eq!(settings.plugins("p")[0].version, "1.1");
        assert!(settings.enabled_plugin_names("other").is_empty());

        assert!(settings.disable("p", "a"));
        assert!(!settings.disable("p", "a"));
        assert_eq!(settings.enabled_plugin_names("p"), vec!["b"]);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("settings.toml");

        let mut settings = ProjectSettings::load(&path).unwrap();
        assert!(settings.plugins("default").is_empty());
        settings.enable(
            "default",
            &PluginDescriptor::new("demo", "1.0").with_author("someone"),
        );
        settings.save().unwrap();

        let loaded = ProjectSettings::load(&path).unwrap();
        let records = loaded.plugins("default");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].author, "someone");
        assert!(loaded.is_enabled("default", "demo"));
    }

    #[test]
    fn test_save_without_path_fails() {
        let settings = ProjectSettings::default();
        assert!(matches!(settings.save(), Err(ConfigError::Invalid { .. })));
    }
}
