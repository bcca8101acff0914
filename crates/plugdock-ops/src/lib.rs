//! Archive extraction and managed-directory operations for plugdock.
//!
//! Plugin packages are unpacked into scratch directories off the
//! interactive thread, with cooperative cancellation for in-process formats
//! and process-level termination for archives handed to an external tool.
//! The purge and copy helpers implement the replace-on-install policy for
//! managed plugin directories.

mod copy;
mod error;
mod extract;
mod format;
mod purge;

pub use copy::{copy_tree, dir_size};
pub use error::{CopyError, ExtractError, ExtractResult};
pub use extract::{extract, ExtractOptions};
pub use format::ArchiveFormat;
pub use purge::{purge_dir_contents, PurgeReport};
