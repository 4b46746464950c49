//! # AppImage Payload Access
//!
//! The surface a desktop environment needs from an AppImage: where its
//! SquashFS payload starts, what a directory inside it contains, and the
//! bytes of a named file.
//!
//! ```no_run
//! use appimage_payload::{compute_archive_offset, read_archive_file};
//! use std::path::Path;
//!
//! let path = Path::new("Some.AppImage");
//! let offset = compute_archive_offset(path)?;
//! let icon = read_archive_file(path, offset, ".DirIcon")?;
//! # Ok::<(), appimage_payload::Error>(())
//! ```
//!
//! [`AppImage`] bundles a path with its offset and adds desktop entry and
//! icon lookup; [`OffsetCache`] avoids recomputing offsets of unchanged
//! files.

mod appimage;
mod cache;
pub mod error;
mod payload;

pub use appimage::{AppImage, DIR_ICON, DesktopEntry};
pub use appimage_squashfs::{ArchiveError, DirectoryEntry, EntryKind};
pub use cache::OffsetCache;
pub use error::{Error, ErrorCategory, Result};
pub use payload::{compute_archive_offset, list_archive, read_archive_file};
