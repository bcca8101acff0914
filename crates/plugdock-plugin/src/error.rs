//! Error types for loading, lifecycle transitions and imports.

use std::error::Error as StdError;
use std::path::PathBuf;

use plugdock_ops::{CopyError, ExtractError};
use thiserror::Error;

use crate::types::PluginError;

/// Result type for loader operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Errors raised while resolving, installing or instantiating a plugin.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The plugin directory has no entry file.
    #[error("No plugin entry file found in {}", dir.display())]
    MissingEntryPoint { dir: PathBuf },

    /// The entry file exists but does not describe a valid plugin.
    #[error("Malformed plugin metadata in {}: {message}", path.display())]
    MalformedMetadata { path: PathBuf, message: String },

    /// The plugin's code could not be imported or constructed.
    #[error("Failed to import plugin '{name}': {source}")]
    ImportFailed {
        name: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// Content could not be copied into the managed directory.
    #[error("Failed to install plugin content into {}", managed_dir.display())]
    CopyFailed {
        managed_dir: PathBuf,
        #[source]
        source: CopyError,
    },

    /// The name cannot address a managed directory.
    #[error("Invalid plugin name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// The managed directory could not be deleted.
    #[error("Failed to delete {}: {source}", path.display())]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LoadError {
    /// Create an import failure preserving `source` as the cause.
    pub fn import_failed(
        name: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::ImportFailed {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// Errors raised by lifecycle transitions.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Another transition on the same plugin is still running.
    #[error("Plugin '{name}' is busy with another operation")]
    Busy { name: String },

    /// The operation requires an active plugin.
    #[error("Plugin '{name}' is not active")]
    NotActive { name: String },

    /// The operation requires the plugin to be inactive.
    #[error("Plugin '{name}' is active; remove it first")]
    AlreadyActive { name: String },

    /// Loading the plugin failed.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A fatal plugin hook failed.
    #[error("Plugin '{name}' could not be activated: {source}")]
    Hook {
        name: String,
        #[source]
        source: PluginError,
    },
}

/// Errors that end an import job.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The archive could not be extracted.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// The extracted content is not a loadable plugin.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The selected path is not a readable archive file.
    #[error("Invalid plugin archive {}: {reason}", path.display())]
    InvalidArchive { path: PathBuf, reason: String },

    /// The selected file does not carry the plugin archive extension.
    #[error("Expecting plugin file to have '.{}' extension: {}", plugdock_core::ARCHIVE_EXTENSION, path.display())]
    InvalidExtension { path: PathBuf },

    /// Another import is still running.
    #[error("Another plugin import is already in progress")]
    InProgress,

    /// The lifecycle manager refused to hand over the plugin's name.
    #[error("Plugin '{name}' is busy; import not installed")]
    NameBusy { name: String },

    /// The worker task itself failed.
    #[error("Import worker failed: {message}")]
    Worker { message: String },
}

/// A user-facing notification: short title, message, and optional
/// expandable technical detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    pub title: String,
    pub message: String,
    pub detail: Option<String>,
}

impl UserMessage {
    /// Create a message without detail.
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            detail: None,
        }
    }

    /// Attach technical detail.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<&LoadError> for UserMessage {
    fn from(err: &LoadError) -> Self {
        match err {
            LoadError::MissingEntryPoint { dir } => UserMessage::new(
                "Missing plugin metadata",
                format!(
                    "No '{}' file was found in '{}'.",
                    plugdock_core::ENTRY_FILE,
                    dir.display()
                ),
            ),
            LoadError::MalformedMetadata { path, message } => UserMessage::new(
                "Invalid plugin metadata",
                format!("The file '{}' is invalid: {}", path.display(), message),
            ),
            LoadError::ImportFailed { name, .. } => UserMessage::new(
                "Plugin import failed",
                format!("The plugin '{}' could not be loaded.", name),
            )
            .with_detail(cause_chain(err)),
            LoadError::CopyFailed { managed_dir, .. } => UserMessage::new(
                "Plugin installation failed",
                format!("Could not copy the plugin into '{}'.", managed_dir.display()),
            )
            .with_detail(cause_chain(err)),
            LoadError::InvalidName { name, reason } => UserMessage::new(
                "Invalid plugin name",
                format!("'{}' is not a valid plugin name: {}", name, reason),
            ),
            LoadError::DeleteFailed { path, .. } => UserMessage::new(
                "Plugin removal failed",
                format!("Could not delete '{}'.", path.display()),
            )
            .with_detail(cause_chain(err)),
        }
    }
}

impl From<&ImportError> for UserMessage {
    fn from(err: &ImportError) -> Self {
        match err {
            ImportError::Extract(ExtractError::Corrupted { archive }) => UserMessage::new(
                "Corrupted archive",
                format!(
                    "The archive '{}' is corrupted, please remove and re-download it.",
                    archive.display()
                ),
            ),
            ImportError::Extract(ExtractError::Cancelled) => {
                UserMessage::new("Import cancelled", "The plugin import was cancelled.")
            }
            ImportError::Extract(extract @ ExtractError::IoFailure { path, .. }) => {
                UserMessage::new(
                    "Extraction failed",
                    format!("Could not extract the archive into '{}'.", path.display()),
                )
                .with_detail(cause_chain(extract))
            }
            ImportError::Load(load) => UserMessage::from(load),
            ImportError::InvalidArchive { path, reason } => UserMessage::new(
                "Invalid plugin archive",
                format!("Cannot import '{}': {}", path.display(), reason),
            ),
            ImportError::InvalidExtension { .. } => UserMessage::new(
                "Invalid extension",
                format!(
                    "Expecting plugin file to have '.{}' extension",
                    plugdock_core::ARCHIVE_EXTENSION
                ),
            ),
            ImportError::InProgress => UserMessage::new(
                "Import in progress",
                "Wait for the current plugin import to finish before starting another.",
            ),
            ImportError::NameBusy { name } => UserMessage::new(
                "Plugin busy",
                format!(
                    "The plugin '{}' is being changed by another operation; try the import again.",
                    name
                ),
            ),
            ImportError::Worker { message } => {
                UserMessage::new("Plugin import failed", "The import stopped unexpectedly.")
                    .with_detail(message.clone())
            }
        }
    }
}

impl From<&LifecycleError> for UserMessage {
    fn from(err: &LifecycleError) -> Self {
        match err {
            LifecycleError::Load(load) => UserMessage::from(load),
            LifecycleError::Hook { name, .. } => UserMessage::new(
                "Plugin activation failed",
                format!("The plugin '{}' failed to start.", name),
            )
            .with_detail(cause_chain(err)),
            other => UserMessage::new("Plugin operation refused", other.to_string()),
        }
    }
}

/// Render an error and its sources, one per line.
pub fn cause_chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\ncaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
