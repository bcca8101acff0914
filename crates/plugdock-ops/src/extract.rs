//! Cancellable archive extraction.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ExtractError, ExtractResult};
use crate::format::ArchiveFormat;
use crate::purge::purge_dir_contents;

/// Options for archive extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Program invoked for 7z-format archives (`7z x -y -o<dir> <archive>`).
    pub seven_zip_program: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            seven_zip_program: "7z".to_string(),
        }
    }
}

impl ExtractOptions {
    /// Set the external 7z program.
    pub fn with_seven_zip(mut self, program: impl Into<String>) -> Self {
        self.seven_zip_program = program.into();
        self
    }
}

/// Extract `archive` into `target`.
///
/// `target` is created if missing and must be empty. Zip and tar-family
/// archives are unpacked in-process on a blocking thread, checking `cancel`
/// between entries; 7z archives run through the external program, which is
/// killed when `cancel` fires. A cancelled or corrupted extraction leaves
/// `target` empty.
pub async fn extract(
    archive: &Path,
    target: &Path,
    options: &ExtractOptions,
    cancel: CancellationToken,
) -> ExtractResult<()> {
    if cancel.is_cancelled() {
        return Err(ExtractError::Cancelled);
    }

    let format = ArchiveFormat::sniff(archive)
        .map_err(|e| ExtractError::io(archive, e))?
        .ok_or_else(|| {
            debug!(archive = %archive.display(), "Unrecognized archive signature");
            ExtractError::corrupted(archive)
        })?;

    prepare_target(target)?;

    info!(
        archive = %archive.display(),
        target = %target.display(),
        %format,
        "Extracting plugin archive"
    );

    let result = if format.is_external() {
        run_external(&options.seven_zip_program, archive, target, &cancel).await
    } else {
        let archive_owned = archive.to_path_buf();
        let target_owned = target.to_path_buf();
        let token = cancel.clone();
        tokio::task::spawn_blocking(move || {
            unpack_in_process(format, &archive_owned, &target_owned, &token)
        })
        .await
        .unwrap_or_else(|e| {
            Err(ExtractError::io(
                archive,
                std::io::Error::other(format!("Extraction task failed: {}", e)),
            ))
        })
    };

    if let Err(err) = &result {
        if matches!(err, ExtractError::Corrupted { .. } | ExtractError::Cancelled) {
            let report = purge_dir_contents(target);
            if !report.is_clean() {
                warn!(
                    target = %target.display(),
                    failures = report.failures.len(),
                    "Partial extraction output could not be fully removed"
                );
            }
        }
    }

    result
}

/// Create `target` or check that it is empty.
fn prepare_target(target: &Path) -> ExtractResult<()> {
    fs::create_dir_all(target).map_err(|e| ExtractError::io(target, e))?;

    let mut entries = fs::read_dir(target).map_err(|e| ExtractError::io(target, e))?;
    if entries.next().is_some() {
        return Err(ExtractError::io(
            target,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "extraction target is not empty",
            ),
        ));
    }

    Ok(())
}

fn unpack_in_process(
    format: ArchiveFormat,
    archive: &Path,
    target: &Path,
    cancel: &CancellationToken,
) -> ExtractResult<()> {
    let file = File::open(archive).map_err(|e| ExtractError::io(archive, e))?;
    let reader = BufReader::new(file);

    match format {
        ArchiveFormat::Zip => unpack_zip(reader, archive, target, cancel),
        ArchiveFormat::Tar => unpack_tar(reader, archive, target, cancel),
        ArchiveFormat::TarGz => unpack_tar(
            flate2::read::GzDecoder::new(reader),
            archive,
            target,
            cancel,
        ),
        ArchiveFormat::TarXz => {
            unpack_tar(xz2::read::XzDecoder::new(reader), archive, target, cancel)
        }
        ArchiveFormat::TarBz2 => {
            unpack_tar(bzip2::read::BzDecoder::new(reader), archive, target, cancel)
        }
        ArchiveFormat::SevenZip => Err(ExtractError::corrupted(archive)),
    }
}

fn unpack_zip(
    reader: BufReader<File>,
    archive: &Path,
    target: &Path,
    cancel: &CancellationToken,
) -> ExtractResult<()> {
    let mut zip = zip::ZipArchive::new(reader).map_err(|e| {
        debug!(archive = %archive.display(), error = %e, "Failed to open zip archive");
        ExtractError::corrupted(archive)
    })?;

    for i in 0..zip.len() {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let mut entry = zip.by_index(i).map_err(|e| {
            debug!(archive = %archive.display(), index = i, error = %e, "Bad zip entry");
            ExtractError::corrupted(archive)
        })?;

        // Entries that would escape the target are rejected.
        let Some(relative) = entry.enclosed_name() else {
            warn!(archive = %archive.display(), entry = entry.name(), "Unsafe path in archive");
            return Err(ExtractError::corrupted(archive));
        };
        let out_path: PathBuf = target.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| ExtractError::io(&out_path, e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
        }

        let mut out_file = File::create(&out_path).map_err(|e| ExtractError::io(&out_path, e))?;
        std::io::copy(&mut entry, &mut out_file)
            .map_err(|e| ExtractError::from_decode(archive, &out_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode)).ok();
            }
        }
    }

    Ok(())
}

fn unpack_tar<R: Read>(
    reader: R,
    archive: &Path,
    target: &Path,
    cancel: &CancellationToken,
) -> ExtractResult<()> {
    let mut tar = tar::Archive::new(reader);
    let entries = tar.entries().map_err(|e| {
        debug!(archive = %archive.display(), error = %e, "Failed to read tar stream");
        ExtractError::corrupted(archive)
    })?;

    for entry in entries {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let mut entry = entry.map_err(|e| {
            debug!(archive = %archive.display(), error = %e, "Bad tar entry");
            ExtractError::corrupted(archive)
        })?;

        let unpacked = entry
            .unpack_in(target)
            .map_err(|e| ExtractError::from_decode(archive, target, e))?;
        if !unpacked {
            warn!(archive = %archive.display(), "Unsafe path in archive");
            return Err(ExtractError::corrupted(archive));
        }
    }

    Ok(())
}

/// Run the external 7z program, killing it if `cancel` fires.
async fn run_external(
    program: &str,
    archive: &Path,
    target: &Path,
    cancel: &CancellationToken,
) -> ExtractResult<()> {
    let mut child = Command::new(program)
        .arg("x")
        .arg("-y")
        .arg(format!("-o{}", target.display()))
        .arg(archive)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExtractError::io(program, e))?;

    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|e| ExtractError::io(archive, e))?;
            if status.success() {
                Ok(())
            } else {
                warn!(
                    archive = %archive.display(),
                    code = ?status.code(),
                    "External extractor reported failure"
                );
                Err(ExtractError::corrupted(archive))
            }
        }
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to terminate extraction process");
            }
            info!(archive = %archive.display(), "Extraction process terminated");
            Err(ExtractError::Cancelled)
        }
    }
}
