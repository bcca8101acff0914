//! Archive format detection.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];
const BZIP2_MAGIC: &[u8] = b"BZh";
const SEVEN_ZIP_MAGIC: &[u8] = &[b'7', b'z', 0xbc, 0xaf, 0x27, 0x1c];
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";

/// Container formats accepted inside a `.plugin` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarXz,
    TarBz2,
    /// Handed to an external extractor.
    SevenZip,
}

impl ArchiveFormat {
    /// Detect the format from leading bytes.
    pub fn from_magic(header: &[u8]) -> Option<Self> {
        if header.starts_with(ZIP_MAGIC) || header.starts_with(ZIP_EMPTY_MAGIC) {
            Some(Self::Zip)
        } else if header.starts_with(SEVEN_ZIP_MAGIC) {
            Some(Self::SevenZip)
        } else if header.starts_with(GZIP_MAGIC) {
            Some(Self::TarGz)
        } else if header.starts_with(XZ_MAGIC) {
            Some(Self::TarXz)
        } else if header.starts_with(BZIP2_MAGIC) {
            Some(Self::TarBz2)
        } else if header.len() >= TAR_MAGIC_OFFSET + TAR_MAGIC.len()
            && &header[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC
        {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Detect the format of a file on disk.
    ///
    /// Returns `Ok(None)` when the file does not start with a known signature.
    pub fn sniff(path: &Path) -> std::io::Result<Option<Self>> {
        let mut file = File::open(path)?;
        let mut header = [0u8; 512];
        let mut filled = 0;

        while filled < header.len() {
            let n = file.read(&mut header[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        Ok(Self::from_magic(&header[..filled]))
    }

    /// Whether extraction runs in an external process.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::SevenZip)
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zip => write!(f, "zip"),
            Self::Tar => write!(f, "tar"),
            Self::TarGz => write!(f, "tar.gz"),
            Self::TarXz => write!(f, "tar.xz"),
            Self::TarBz2 => write!(f, "tar.bz2"),
            Self::SevenZip => write!(f, "7z"),
        }
    }
}
