use std::io;
use std::path::PathBuf;

/// Errors returned while computing the payload offset of an ELF file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Io(#[from] IoError),
}

/// The bytes do not describe an ELF file this crate can measure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("not an ELF file (leading bytes {0:02x?})")]
    BadMagic([u8; 4]),
    #[error("unknown ELF class {0:#04x}")]
    UnknownClass(u8),
    #[error("unknown ELF data encoding {0:#04x}")]
    UnknownEncoding(u8),
    #[error("section header table arithmetic overflows the 64-bit offset space")]
    OffsetOverflow,
}

/// The file could not be opened or ended before a fixed-size structure did.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("failed to open {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("truncated ELF file: {what} needs {needed} bytes at offset {offset:#x}")]
    Truncated {
        what: &'static str,
        offset: u64,
        needed: usize,
    },
    #[error("failed to read ELF file")]
    Read(#[source] io::Error),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
