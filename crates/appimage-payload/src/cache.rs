//! # Offset Cache
//!
//! Computing an offset means opening the file and reading two ELF
//! structures. A file manager asking for the icon and the desktop entry of
//! every AppImage in a folder would repeat that for each request, so callers
//! may keep an [`OffsetCache`] around instead. It is plain data owned by the
//! caller; nothing is shared between instances.

use crate::error::{Error, Result};
use crate::payload::compute_archive_offset;
use log::trace;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Stamp {
    modified: SystemTime,
    len: u64,
}

/// Payload offsets keyed by canonical path, valid while the file's
/// modification time and length stay the same.
#[derive(Debug, Default, Clone)]
pub struct OffsetCache {
    entries: HashMap<PathBuf, (Stamp, u64)>,
}

impl OffsetCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The payload offset of `path`, computed only if the cached value is
    /// missing or stale.
    ///
    /// # Errors
    /// [`Error::Inspect`] if the path cannot be canonicalized or stat'ed,
    /// otherwise as [`compute_archive_offset`].
    pub fn offset(&mut self, path: &Path) -> Result<u64> {
        let inspect = |source: io::Error| Error::Inspect {
            path: path.to_path_buf(),
            source,
        };
        let canonical = fs::canonicalize(path).map_err(inspect)?;
        let metadata = fs::metadata(&canonical).map_err(inspect)?;
        let stamp = Stamp {
            modified: metadata.modified().map_err(inspect)?,
            len: metadata.len(),
        };

        if let Some(&(cached, offset)) = self.entries.get(&canonical)
            && cached == stamp
        {
            trace!("Offset cache hit for {}", canonical.display());
            return Ok(offset);
        }

        let offset = compute_archive_offset(&canonical)?;
        trace!("Offset cache miss for {}: {offset}", canonical.display());
        self.entries.insert(canonical, (stamp, offset));
        Ok(offset)
    }

    /// Forgets `path`. Returns whether it was cached.
    pub fn invalidate(&mut self, path: &Path) -> bool {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.entries.remove(&key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
