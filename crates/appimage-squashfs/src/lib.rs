//! # SquashFS Reader
//!
//! Navigates a SquashFS 4.0 image that starts at an arbitrary byte offset of
//! a host file, such as the payload appended to an AppImage runtime. Nothing
//! is mounted or copied: the [`Archive`] handle seeks through its own reader,
//! decoding metadata and data blocks as paths are resolved.
//!
//! ```no_run
//! use appimage_squashfs::Archive;
//!
//! let mut archive = Archive::open("Some.AppImage", 188_392)?;
//! for entry in archive.list_directory("/")? {
//!     println!("{:?} {}", entry.kind(), entry.name_lossy());
//! }
//! let desktop = archive.read_file("app.desktop")?;
//! archive.close();
//! # Ok::<(), appimage_squashfs::Error>(())
//! ```
//!
//! ## Features
//!
//! Each supported compressor sits behind a Cargo feature, all enabled by
//! default: `gzip`, `xz` (which also covers legacy lzma) and `zstd`. Images
//! using a disabled or unsupported compressor are rejected when opened
//! unless a [`Decompressor`] is supplied through
//! [`Archive::with_decompressor`].

mod archive;
pub mod compression;
mod data;
mod dir;
pub mod error;
mod inode;
mod metadata;
mod source;
mod superblock;

pub use archive::Archive;
pub use compression::{Compression, DecompressError, Decompressor};
pub use dir::{DirectoryEntry, EntryKind};
pub use error::{ArchiveError, Corruption, Error, FormatError, IoError, Result};
pub use metadata::InodeRef;
pub use superblock::{SQUASHFS_MAGIC, SUPERBLOCK_SIZE, Superblock, SuperblockFlags};
