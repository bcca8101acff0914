//! Background import of plugin archives.
//!
//! An import runs as one tokio task per archive: extract into a scratch
//! directory, resolve the descriptor, install into the managed directory and
//! instantiate. Progress and the terminal outcome are reported over a
//! bounded channel; the task never touches the registry or the panel host.
//!
//! Before installing, the job hands the plugin name to the lifecycle manager
//! through a [`NameClaim`] and waits for the answer. The managed directory is
//! only written once the name has been granted.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use plugdock_core::{HostConfig, PluginDescriptor, ARCHIVE_EXTENSION};
use plugdock_ops::{extract, ExtractError, ExtractOptions};

use crate::error::ImportError;
use crate::loader::PluginLoader;
use crate::types::Plugin;

/// Default capacity of the import notification channel.
pub const IMPORT_CHANNEL_SIZE: usize = 16;

/// A request to import one archive.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub archive: PathBuf,
}

impl ImportRequest {
    pub fn new(archive: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
        }
    }

    /// Display name guessed from the archive file name.
    pub fn name_hint(&self) -> Option<String> {
        name_hint(&self.archive)
    }
}

/// A plugin produced by a successful import, ready to be activated.
#[derive(Debug)]
pub struct ImportedPlugin {
    pub descriptor: PluginDescriptor,
    pub instance: Box<dyn Plugin>,
    /// No managed directory existed before this import.
    pub fresh_install: bool,
}

/// Request for exclusive use of a plugin name during install.
///
/// Answered exactly once. Dropping the claim unanswered counts as a refusal.
#[derive(Debug)]
pub struct NameClaim {
    reply: oneshot::Sender<bool>,
}

impl NameClaim {
    pub(crate) fn new() -> (Self, oneshot::Receiver<bool>) {
        let (reply, answer) = oneshot::channel();
        (Self { reply }, answer)
    }

    /// Let the import install under the claimed name.
    ///
    /// Returns `false` if the import is no longer waiting for the answer.
    pub fn grant(self) -> bool {
        self.reply.send(true).is_ok()
    }

    /// Stop the import before it touches the managed directory.
    pub fn refuse(self) {
        if self.reply.send(false).is_err() {
            debug!("Name claim refused after the import stopped waiting");
        }
    }
}

/// Notifications sent by an import job.
#[derive(Debug)]
pub enum ImportEvent {
    /// The archive was extracted.
    UnarchiveFinished,
    /// Extraction failed; `reason` describes why.
    UnarchiveFailed { archive: PathBuf, reason: String },
    /// Metadata resolved. The job waits on `claim` before installing under
    /// the plugin's real name.
    Finalizing { name: String, claim: NameClaim },
    /// The plugin is installed and instantiated.
    ImportFinished(ImportedPlugin),
    /// The import failed.
    ImportFailed(ImportError),
    /// The import was cancelled before anything was installed.
    ImportCancelled,
}

/// Terminal outcome of an import job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { name: String },
    Failed { reason: String },
    /// Stopped before the managed directory was written.
    Cancelled,
}

/// Handle to a running import.
#[derive(Debug)]
pub struct ImportHandle {
    /// Notifications from the job, closed once it is terminal.
    pub events: mpsc::Receiver<ImportEvent>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    task: JoinHandle<JobOutcome>,
}

impl ImportHandle {
    /// Request cancellation.
    ///
    /// Checked between pipeline steps; a running extraction is terminated.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this import when triggered.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Wait for the job to reach its terminal outcome.
    ///
    /// Unread notifications are discarded first, which refuses a pending
    /// [`NameClaim`].
    pub async fn join(self) -> JobOutcome {
        let Self { events, task, .. } = self;
        drop(events);
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => JobOutcome::Failed {
                reason: format!("Import worker failed: {}", e),
            },
        }
    }
}

/// Check that `path` is an existing `.plugin` file.
pub fn validate_archive_path(path: &Path) -> Result<(), ImportError> {
    if !path.is_file() {
        return Err(ImportError::InvalidArchive {
            path: path.to_path_buf(),
            reason: "file does not exist".to_string(),
        });
    }

    let valid = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION));
    if !valid {
        return Err(ImportError::InvalidExtension {
            path: path.to_path_buf(),
        });
    }

    Ok(())
}

/// Archive file name without its last extension.
///
/// Only a hint for display before the real name is read from the metadata.
pub fn name_hint(path: &Path) -> Option<String> {
    path.extension()?;
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

/// Start importing `request.archive` in the background.
pub fn start_import(
    request: ImportRequest,
    loader: Arc<PluginLoader>,
    config: &HostConfig,
) -> ImportHandle {
    let capacity = match config.channel_size {
        0 => IMPORT_CHANNEL_SIZE,
        size => size,
    };
    let (tx, rx) = mpsc::channel(capacity);
    let cancel = CancellationToken::new();
    let running = Arc::new(AtomicBool::new(true));

    let job = ArchiveJob {
        archive: request.archive,
        scratch_root: config.scratch_root.clone(),
        options: ExtractOptions::default().with_seven_zip(config.seven_zip_program.clone()),
        loader,
        cancel: cancel.clone(),
        tx,
    };

    let guard = RunningGuard(running.clone());
    let task = tokio::spawn(async move {
        let _guard = guard;
        job.run().await
    });

    ImportHandle {
        events: rx,
        cancel,
        running,
        task,
    }
}

/// Clears the running flag when the job ends, including by panic.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One in-flight import.
struct ArchiveJob {
    archive: PathBuf,
    scratch_root: Option<PathBuf>,
    options: ExtractOptions,
    loader: Arc<PluginLoader>,
    cancel: CancellationToken,
    tx: mpsc::Sender<ImportEvent>,
}

impl ArchiveJob {
    async fn emit(&self, event: ImportEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("Import notification dropped; receiver closed");
        }
    }

    async fn fail(&self, err: ImportError) -> JobOutcome {
        warn!(archive = %self.archive.display(), error = %err, "Plugin import failed");
        let reason = err.to_string();
        self.emit(ImportEvent::ImportFailed(err)).await;
        JobOutcome::Failed { reason }
    }

    async fn cancelled(&self) -> JobOutcome {
        info!(archive = %self.archive.display(), "Plugin import cancelled");
        self.emit(ImportEvent::ImportCancelled).await;
        JobOutcome::Cancelled
    }

    fn create_scratch(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("plugdock-import-");
        match &self.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
    }

    async fn run(self) -> JobOutcome {
        if self.cancel.is_cancelled() {
            return self.cancelled().await;
        }

        // Step 1: extract into a fresh scratch directory.
        let extracted = match self.create_scratch() {
            Ok(scratch) => {
                let content = scratch.path().join("content");
                extract(&self.archive, &content, &self.options, self.cancel.clone())
                    .await
                    .map(|()| (scratch, content))
            }
            Err(e) => {
                let path = self.scratch_root.clone().unwrap_or_else(std::env::temp_dir);
                Err(ExtractError::io(path, e))
            }
        };
        let (scratch, content) = match extracted {
            Ok(extracted) => {
                self.emit(ImportEvent::UnarchiveFinished).await;
                extracted
            }
            Err(ExtractError::Cancelled) => return self.cancelled().await,
            Err(err) => {
                self.emit(ImportEvent::UnarchiveFailed {
                    archive: self.archive.clone(),
                    reason: err.to_string(),
                })
                .await;
                return self.fail(err.into()).await;
            }
        };

        if self.cancel.is_cancelled() {
            return self.cancelled().await;
        }

        // Step 2: resolve metadata from the extracted tree.
        let loader = self.loader.clone();
        let resolved = tokio::task::spawn_blocking(move || {
            let root = loader.locate_content_root(&content)?;
            let descriptor = loader.resolve_entry_metadata(&root)?;
            Ok::<_, crate::error::LoadError>((root, descriptor))
        })
        .await;
        let (root, descriptor) = match resolved {
            Ok(Ok(resolved)) => resolved,
            Ok(Err(e)) => return self.fail(e.into()).await,
            Err(e) => {
                return self
                    .fail(ImportError::Worker {
                        message: e.to_string(),
                    })
                    .await
            }
        };

        if self.cancel.is_cancelled() {
            return self.cancelled().await;
        }

        // Step 3: claim the name from the lifecycle manager.
        let name = descriptor.name.clone();
        let (claim, answer) = NameClaim::new();
        self.emit(ImportEvent::Finalizing {
            name: name.clone(),
            claim,
        })
        .await;
        let granted = tokio::select! {
            answer = answer => answer.unwrap_or(false),
            _ = self.cancel.cancelled() => return self.cancelled().await,
        };
        if !granted {
            return self.fail(ImportError::NameBusy { name }).await;
        }

        if self.cancel.is_cancelled() {
            return self.cancelled().await;
        }

        // Step 4: promote into the managed directory named after the
        // descriptor, not the archive file.
        let managed_dir = match self.loader.managed_dir(&name) {
            Ok(dir) => dir,
            Err(e) => return self.fail(e.into()).await,
        };
        let loader = self.loader.clone();
        let installed = tokio::task::spawn_blocking(move || {
            loader.install_content(&root, &managed_dir)
        })
        .await;
        let report = match installed {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => return self.fail(e.into()).await,
            Err(e) => {
                return self
                    .fail(ImportError::Worker {
                        message: e.to_string(),
                    })
                    .await
            }
        };

        // Step 5: instantiate from the managed directory. The content is
        // already promoted, so cancellation is no longer observed.
        let loader = self.loader.clone();
        let plugin_name = name.clone();
        let instantiated =
            tokio::task::spawn_blocking(move || loader.instantiate(&plugin_name)).await;
        let loaded = match instantiated {
            Ok(Ok(loaded)) => loaded,
            Ok(Err(e)) => return self.fail(e.into()).await,
            Err(e) => {
                return self
                    .fail(ImportError::Worker {
                        message: e.to_string(),
                    })
                    .await
            }
        };

        drop(scratch);

        info!(plugin = %loaded.descriptor, fresh_install = report.fresh_install, "Plugin imported");
        self.emit(ImportEvent::ImportFinished(ImportedPlugin {
            descriptor: loaded.descriptor,
            instance: loaded.instance,
            fresh_install: report.fresh_install,
        }))
        .await;

        JobOutcome::Succeeded { name }
    }
}

/// Enforces one import at a time.
pub struct Installer {
    loader: Arc<PluginLoader>,
    config: HostConfig,
    current: Option<(Arc<AtomicBool>, CancellationToken)>,
}

impl Installer {
    pub fn new(loader: Arc<PluginLoader>, config: HostConfig) -> Self {
        Self {
            loader,
            config,
            current: None,
        }
    }

    /// Check if an import is still running.
    pub fn is_busy(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|(running, _)| running.load(Ordering::Acquire))
    }

    /// Validate `archive` and start importing it.
    pub fn start(&mut self, archive: impl Into<PathBuf>) -> Result<ImportHandle, ImportError> {
        if self.is_busy() {
            return Err(ImportError::InProgress);
        }

        let archive = archive.into();
        validate_archive_path(&archive)?;

        let handle = start_import(
            ImportRequest::new(archive),
            self.loader.clone(),
            &self.config,
        );
        self.current = Some((handle.running.clone(), handle.cancel_token()));
        Ok(handle)
    }

    /// Cancel the running import, if any.
    pub fn cancel(&self) {
        if let Some((_, cancel)) = &self.current {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_name_hint() {
        assert_eq!(name_hint(Path::new("/tmp/demo.plugin")).as_deref(), Some("demo"));
        assert_eq!(
            name_hint(Path::new("demo.v2.plugin")).as_deref(),
            Some("demo.v2")
        );
        assert_eq!(name_hint(Path::new("demo")), None);
    }

    #[test]
    fn test_validate_archive_path() {
        let temp = tempfile::TempDir::new().unwrap();
        let good = temp.path().join("demo.PLUGIN");
        let bad = temp.path().join("demo.zip");
        fs::write(&good, b"x").unwrap();
        fs::write(&bad, b"x").unwrap();

        assert!(validate_archive_path(&good).is_ok());
        assert!(matches!(
            validate_archive_path(&bad),
            Err(ImportError::InvalidExtension { .. })
        ));
        assert!(matches!(
            validate_archive_path(&temp.path().join("missing.plugin")),
            Err(ImportError::InvalidArchive { .. })
        ));
    }
}
