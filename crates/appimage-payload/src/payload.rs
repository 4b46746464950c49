//! The three stateless operations. Each list or read opens its own archive
//! handle and drops it before returning.

use crate::error::Result;
use appimage_squashfs::{Archive, DirectoryEntry};
use log::debug;
use std::path::Path;

/// Byte offset of the SquashFS payload inside the AppImage at `path`.
///
/// # Errors
/// [`ErrorCategory::Format`](crate::ErrorCategory::Format) if `path` is not
/// an ELF file, [`ErrorCategory::Io`](crate::ErrorCategory::Io) if it cannot
/// be read.
pub fn compute_archive_offset(path: &Path) -> Result<u64> {
    Ok(appimage_elf::compute_archive_offset(path)?.into())
}

/// Entries of the directory `inner_path` inside the payload at `offset`.
///
/// # Errors
/// Format and I/O failures opening the payload, or an
/// [`ArchiveError`](appimage_squashfs::ArchiveError) if `inner_path` does
/// not name a directory.
pub fn list_archive(path: &Path, offset: u64, inner_path: &str) -> Result<Vec<DirectoryEntry>> {
    let mut archive = Archive::open(path, offset)?;
    let entries = archive.list_directory(inner_path)?;
    archive.close();
    Ok(entries)
}

/// Contents of the regular file `inner_path` inside the payload at `offset`.
///
/// # Errors
/// Format and I/O failures opening the payload, or an
/// [`ArchiveError`](appimage_squashfs::ArchiveError) if `inner_path` is
/// missing, not a regular file, or damaged.
pub fn read_archive_file(path: &Path, offset: u64, inner_path: &str) -> Result<Vec<u8>> {
    let mut archive = Archive::open(path, offset)?;
    let contents = archive.read_file(inner_path)?;
    archive.close();
    debug!(
        "Read {inner_path:?} from {}: {} bytes",
        path.display(),
        contents.len()
    );
    Ok(contents)
}
