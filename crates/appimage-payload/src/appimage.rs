//! # AppImage Convenience Wrapper

use crate::cache::OffsetCache;
use crate::error::{Error, Result};
use crate::payload::{compute_archive_offset, list_archive, read_archive_file};
use appimage_squashfs::{DirectoryEntry, EntryKind};
use std::path::{Path, PathBuf};

/// Name of the icon file at the root of every AppImage payload.
pub const DIR_ICON: &str = ".DirIcon";

const DESKTOP_SUFFIX: &[u8] = b".desktop";

/// A path together with the offset of its payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppImage {
    path: PathBuf,
    offset: u64,
}

/// A `.desktop` file found at the payload root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopEntry {
    pub file_name: String,
    pub contents: Vec<u8>,
}

impl AppImage {
    /// Computes the payload offset of `path`.
    ///
    /// # Errors
    /// As [`compute_archive_offset`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let offset = compute_archive_offset(&path)?;
        Ok(Self { path, offset })
    }

    /// Like [`AppImage::open`], but takes the offset from `cache`.
    ///
    /// # Errors
    /// As [`OffsetCache::offset`].
    pub fn open_cached(path: impl Into<PathBuf>, cache: &mut OffsetCache) -> Result<Self> {
        let path = path.into();
        let offset = cache.offset(&path)?;
        Ok(Self { path, offset })
    }

    /// Uses a known offset without inspecting the file.
    #[must_use]
    pub fn with_offset(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// # Errors
    /// As [`list_archive`].
    pub fn list(&self, inner_path: &str) -> Result<Vec<DirectoryEntry>> {
        list_archive(&self.path, self.offset, inner_path)
    }

    /// # Errors
    /// As [`read_archive_file`].
    pub fn read(&self, inner_path: &str) -> Result<Vec<u8>> {
        read_archive_file(&self.path, self.offset, inner_path)
    }

    /// The first `*.desktop` file or symlink at the payload root, in
    /// on-disk order.
    ///
    /// # Errors
    /// [`ArchiveError::NotFound`](appimage_squashfs::ArchiveError::NotFound)
    /// if the root has none, otherwise as [`AppImage::read`].
    pub fn desktop_entry(&self) -> Result<DesktopEntry> {
        let entry = self
            .list("/")?
            .into_iter()
            .find(is_desktop_file)
            .ok_or_else(|| Error::not_found("*.desktop"))?;
        let file_name = entry.name_lossy().into_owned();
        let contents = self.read(&file_name)?;
        Ok(DesktopEntry {
            file_name,
            contents,
        })
    }

    /// Contents of [`DIR_ICON`], following its symlink.
    ///
    /// # Errors
    /// As [`AppImage::read`].
    pub fn dir_icon(&self) -> Result<Vec<u8>> {
        self.read(DIR_ICON)
    }
}

fn is_desktop_file(entry: &DirectoryEntry) -> bool {
    matches!(entry.kind(), EntryKind::File | EntryKind::Symlink)
        && entry.name().len() > DESKTOP_SUFFIX.len()
        && entry.name().ends_with(DESKTOP_SUFFIX)
        && std::str::from_utf8(entry.name()).is_ok()
}
