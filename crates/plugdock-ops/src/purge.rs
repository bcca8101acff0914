//! Best-effort directory purge.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Outcome of purging a directory's contents.
#[derive(Debug, Clone, Default)]
pub struct PurgeReport {
    /// Entries removed.
    pub removed: usize,
    /// Entries that could not be removed, with the reason.
    pub failures: Vec<(PathBuf, String)>,
}

impl PurgeReport {
    /// Check if every entry was removed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Remove every entry inside `dir`, leaving `dir` itself in place.
///
/// Directories are removed recursively and files individually. A failure on
/// one entry is logged and recorded, and the purge continues with its
/// siblings. A missing `dir` is an empty purge.
pub fn purge_dir_contents(dir: &Path) -> PurgeReport {
    let mut report = PurgeReport::default();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Failed to list directory for purge");
            report.failures.push((dir.to_path_buf(), e.to_string()));
            return report;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Failed to read directory entry");
                report.failures.push((dir.to_path_buf(), e.to_string()));
                continue;
            }
        };

        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let result = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };

        match result {
            Ok(()) => report.removed += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove entry during purge");
                report.failures.push((path, e.to_string()));
            }
        }
    }

    report
}
