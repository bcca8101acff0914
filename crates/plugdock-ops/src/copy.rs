//! Directory tree copy and sizing.

use std::fs;
use std::path::Path;

use fs_extra::dir::CopyOptions;

use crate::error::CopyError;

/// Copy the contents of `from` into `to`, creating `to` if needed.
///
/// Existing files at the destination are overwritten. Returns the number of
/// bytes copied.
pub fn copy_tree(from: &Path, to: &Path) -> Result<u64, CopyError> {
    fs::create_dir_all(to).map_err(|source| CopyError::CreateDir {
        path: to.to_path_buf(),
        source,
    })?;

    let mut options = CopyOptions::new();
    options.overwrite = true;
    options.content_only = true;

    fs_extra::dir::copy(from, to, &options).map_err(|source| CopyError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })
}

/// Total size in bytes of all files under `dir`.
pub fn dir_size(dir: &Path) -> u64 {
    fs_extra::dir::get_size(dir).unwrap_or(0)
}
