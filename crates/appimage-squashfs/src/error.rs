use crate::compression::Compression;
use std::io;
use std::path::PathBuf;

/// Errors returned by [`Archive`](crate::Archive) operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// No usable SquashFS superblock at the requested offset.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("no SquashFS image at offset {offset:#x} (found magic {found:#010x})")]
    NotAnArchive { offset: u64, found: u32 },
    #[error("unsupported SquashFS version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },
    #[error("invalid block size {size} (block log {log})")]
    BadBlockSize { size: u32, log: u16 },
    #[error("superblock table offsets are inconsistent")]
    InconsistentTables,
    #[error("{0} compression is not supported by this build")]
    UnsupportedCompression(Compression),
}

/// The host file could not be opened or read.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("failed to open {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("truncated SquashFS image: {what} needs {needed} bytes at offset {offset:#x}")]
    Truncated {
        what: &'static str,
        offset: u64,
        needed: u64,
    },
    #[error("failed to read SquashFS image")]
    Read(#[source] io::Error),
    #[error("failed to write file contents")]
    Write(#[source] io::Error),
}

/// Navigation failed inside an archive that opened successfully.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchiveError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("not a regular file: {0}")]
    NotAFile(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("corrupt SquashFS image: {0}")]
    Corrupt(#[from] Corruption),
}

/// The specific structural problem behind [`ArchiveError::Corrupt`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Corruption {
    #[error("block at {position:#x} failed to decompress: {reason}")]
    Decompression { position: u64, reason: String },
    #[error("block at {position:#x} decompressed to {actual} bytes, expected {expected}")]
    BlockLength {
        position: u64,
        expected: usize,
        actual: usize,
    },
    #[error("metadata block at {position:#x} has invalid size {size}")]
    MetadataBlockSize { position: u64, size: u16 },
    #[error("data block at {position:#x} has invalid size {size}")]
    DataBlockSize { position: u64, size: u32 },
    #[error("unknown inode type {0}")]
    UnknownInodeType(u16),
    #[error("fragment index {0} is out of range")]
    FragmentIndex(u32),
    #[error("fragment slice {offset}+{len} exceeds the {available} byte fragment block")]
    FragmentRange {
        offset: u32,
        len: u64,
        available: usize,
    },
    #[error("file assembled to {actual} bytes, inode says {expected}")]
    FileSize { expected: u64, actual: u64 },
    #[error("directory listing is malformed")]
    DirectoryListing,
    #[error("image data ends unexpectedly at {0:#x}")]
    UnexpectedEnd(u64),
    #[error("offset arithmetic overflowed")]
    Overflow,
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

impl From<Corruption> for Error {
    fn from(value: Corruption) -> Self {
        Self::Archive(ArchiveError::Corrupt(value))
    }
}
