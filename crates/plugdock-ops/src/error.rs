//! Extraction error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for extraction.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Errors raised while copying a directory tree.
#[derive(Debug, Error)]
pub enum CopyError {
    /// The destination directory could not be created.
    #[error("Failed to create {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Copying the contents failed part way.
    #[error("Failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: fs_extra::error::Error,
    },
}

/// Errors that can occur while extracting a plugin archive.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The archive is malformed, truncated, or not an archive at all.
    #[error("Archive is corrupted: {archive}")]
    Corrupted { archive: PathBuf },

    /// Extraction was cancelled before it completed.
    #[error("Extraction cancelled")]
    Cancelled,

    /// Reading the archive or writing the output failed.
    #[error("I/O error at {path}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoFailure {
            path: path.into(),
            source,
        }
    }

    /// Create a corruption error for an archive.
    pub fn corrupted(archive: impl Into<PathBuf>) -> Self {
        Self::Corrupted {
            archive: archive.into(),
        }
    }

    /// Classify an error raised while decoding archive data.
    ///
    /// Malformed input surfaces from the decoders as `InvalidData`,
    /// `InvalidInput` or `UnexpectedEof`; everything else is treated as a
    /// genuine I/O failure at `path`.
    pub fn from_decode(
        archive: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        match source.kind() {
            std::io::ErrorKind::InvalidData
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::UnexpectedEof => Self::corrupted(archive),
            _ => Self::io(path, source),
        }
    }

    /// Whether this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_decode_classification() {
        let err = ExtractError::from_decode(
            "a.plugin",
            "/out",
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"),
        );
        assert!(matches!(err, ExtractError::Corrupted { .. }));

        let err = ExtractError::from_decode(
            "a.plugin",
            "/out",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, ExtractError::IoFailure { .. }));
    }
}
