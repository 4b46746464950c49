//! # Archive Handle
//!
//! [`Archive`] owns the reader, the block decoder and the metadata cache for
//! one SquashFS image embedded at a byte offset of some host file. Paths are
//! resolved from the root inode on every call; there is no current directory.

use crate::compression::Decompressor;
use crate::data::copy_file_data;
use crate::dir::{DirectoryEntry, read_listing};
use crate::error::{ArchiveError, IoError, Result};
use crate::inode::{DirectoryInode, FileInode, Inode};
use crate::metadata::{InodeRef, MetadataReader};
use crate::source::BlockSource;
use crate::superblock::{SUPERBLOCK_SIZE, Superblock};
use log::{debug, trace};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Files larger than this are still read, just without reserving their full
/// size up front.
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// An open, read-only view of a SquashFS image.
pub struct Archive<R> {
    source: BlockSource<R>,
    superblock: Superblock,
    offset: u64,
}

impl Archive<File> {
    /// Opens the image starting `offset` bytes into the file at `path`.
    ///
    /// # Errors
    /// [`IoError::Open`] if the file cannot be opened; otherwise as
    /// [`Archive::from_reader`].
    pub fn open(path: impl AsRef<Path>, offset: u64) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| IoError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Opening SquashFS image in {} at {offset:#x}", path.display());
        Self::from_reader(file, offset)
    }
}

impl<R: Read + Seek> Archive<R> {
    /// Validates the superblock at `offset` and selects the built-in decoder
    /// for its compression id.
    ///
    /// # Errors
    /// - [`FormatError`](crate::FormatError) if there is no usable SquashFS
    ///   4.0 superblock at `offset` or its compressor is not supported.
    /// - [`IoError::Truncated`] if the reader ends before the superblock or
    ///   before the `bytes_used` it declares.
    pub fn from_reader(reader: R, offset: u64) -> Result<Self> {
        Self::with(reader, offset, None)
    }

    /// Like [`Archive::from_reader`], but decodes blocks with `decompressor`
    /// regardless of the compression id in the superblock.
    ///
    /// # Errors
    /// As [`Archive::from_reader`], except that the compression id is never
    /// rejected.
    pub fn with_decompressor(
        reader: R,
        offset: u64,
        decompressor: impl Decompressor + 'static,
    ) -> Result<Self> {
        Self::with(reader, offset, Some(Box::new(decompressor)))
    }

    fn with(
        mut reader: R,
        offset: u64,
        decompressor: Option<Box<dyn Decompressor>>,
    ) -> Result<Self> {
        let superblock = read_superblock(&mut reader, offset)?;

        let file_len = reader.seek(SeekFrom::End(0)).map_err(IoError::Read)?;
        if file_len.saturating_sub(offset) < superblock.bytes_used {
            return Err(IoError::Truncated {
                what: "SquashFS image",
                offset,
                needed: superblock.bytes_used,
            }
            .into());
        }

        let decompressor = match decompressor {
            Some(decompressor) => decompressor,
            None => superblock.compression.decompressor()?,
        };

        debug!(
            "SquashFS {}.{} at {offset:#x}: {} compression, {} byte blocks, {} inodes, {} bytes",
            superblock.version_major,
            superblock.version_minor,
            superblock.compression,
            superblock.block_size,
            superblock.inode_count,
            superblock.bytes_used
        );

        Ok(Self {
            source: BlockSource::new(reader, offset, superblock.bytes_used, decompressor),
            superblock,
            offset,
        })
    }

    /// The parsed superblock.
    #[must_use]
    pub const fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Where the image starts in the host file.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// All entries of the directory at `inner_path`, in on-disk order.
    ///
    /// # Errors
    /// - [`ArchiveError::NotFound`] if a component is missing or is not a
    ///   directory, including the last one.
    /// - [`ArchiveError::NotADirectory`] if the root inode is not a directory.
    /// - [`ArchiveError::Corrupt`] on structural damage.
    pub fn list_directory(&mut self, inner_path: &str) -> Result<Vec<DirectoryEntry>> {
        let components = split_path(inner_path);
        match self.resolve(&components)? {
            Some(Inode::Directory(dir)) => {
                let entries = self.listing(&dir)?;
                debug!("Listed {inner_path:?}: {} entries", entries.len());
                Ok(entries)
            }
            _ => Err(ArchiveError::NotFound(inner_path.to_owned()).into()),
        }
    }

    /// The contents of the regular file at `inner_path`.
    ///
    /// A symlink in the last position is followed once; its target must be a
    /// regular file.
    ///
    /// # Errors
    /// - [`ArchiveError::NotFound`] if the path or the symlink target does
    ///   not exist.
    /// - [`ArchiveError::NotAFile`] if it names a directory, a special file
    ///   or a symlink that does not lead straight to a regular file.
    /// - [`ArchiveError::Corrupt`] on any decoding failure; no partial
    ///   contents are returned.
    pub fn read_file(&mut self, inner_path: &str) -> Result<Vec<u8>> {
        let file = self.file_inode(inner_path)?;
        let capacity = usize::try_from(file.size.min(MAX_PREALLOCATION)).unwrap_or_default();
        let mut contents = Vec::with_capacity(capacity);
        copy_file_data(&mut self.source, &self.superblock, &file, &mut contents)?;
        Ok(contents)
    }

    /// Streams the regular file at `inner_path` into `writer` and returns the
    /// number of bytes written.
    ///
    /// On error, `writer` may already hold a prefix of the contents.
    ///
    /// # Errors
    /// As [`Archive::read_file`], plus [`IoError::Write`] if `writer` fails.
    pub fn copy_file<W: Write>(&mut self, inner_path: &str, mut writer: W) -> Result<u64> {
        let file = self.file_inode(inner_path)?;
        copy_file_data(&mut self.source, &self.superblock, &file, &mut writer)
    }

    /// The raw target of the symlink at `inner_path`.
    ///
    /// # Errors
    /// - [`ArchiveError::NotFound`] if the path does not exist.
    /// - [`ArchiveError::NotAFile`] if it is not a symlink.
    /// - [`ArchiveError::Corrupt`] on structural damage.
    pub fn read_link(&mut self, inner_path: &str) -> Result<Vec<u8>> {
        match self.resolve(&split_path(inner_path))? {
            Some(Inode::Symlink(link)) => Ok(link.target),
            Some(_) => Err(ArchiveError::NotAFile(inner_path.to_owned()).into()),
            None => Err(ArchiveError::NotFound(inner_path.to_owned()).into()),
        }
    }

    /// Releases the reader and all cached blocks.
    pub fn close(self) {
        trace!("Closing SquashFS image at {:#x}", self.offset);
    }

    fn file_inode(&mut self, inner_path: &str) -> Result<FileInode> {
        let components = split_path(inner_path);
        let link = match self.resolve(&components)? {
            Some(Inode::File(file)) => return Ok(file),
            Some(Inode::Symlink(link)) => link,
            Some(_) => return Err(ArchiveError::NotAFile(inner_path.to_owned()).into()),
            None => return Err(ArchiveError::NotFound(inner_path.to_owned()).into()),
        };

        let parent = &components[..components.len().saturating_sub(1)];
        let target = symlink_target(parent, &link.target);
        trace!(
            "Following {inner_path:?} to {:?}",
            String::from_utf8_lossy(&link.target)
        );
        match self.resolve(&target)? {
            Some(Inode::File(file)) => Ok(file),
            Some(_) => Err(ArchiveError::NotAFile(inner_path.to_owned()).into()),
            None => Err(ArchiveError::NotFound(
                String::from_utf8_lossy(&link.target).into_owned(),
            )
            .into()),
        }
    }

    /// Walks `components` from the root. `None` if a component is missing or
    /// a non-final component is not a directory.
    fn resolve(&mut self, components: &[&[u8]]) -> Result<Option<Inode>> {
        let Inode::Directory(mut current) = self.inode(self.superblock.root_inode)? else {
            return Err(ArchiveError::NotADirectory("/".to_owned()).into());
        };

        let Some((last, parents)) = components.split_last() else {
            return Ok(Some(Inode::Directory(current)));
        };

        for &name in parents {
            match self.child(&current, name)? {
                Some(Inode::Directory(dir)) => current = dir,
                _ => return Ok(None),
            }
        }
        self.child(&current, last)
    }

    fn child(&mut self, dir: &DirectoryInode, name: &[u8]) -> Result<Option<Inode>> {
        let entries = self.listing(dir)?;
        let Some(entry) = entries.iter().find(|e| e.name() == name) else {
            return Ok(None);
        };
        let inode = self.inode(entry.inode())?;
        if let Inode::Other { kind, inode_number } = inode {
            trace!("Inode {inode_number} has special type {kind}");
        }
        Ok(Some(inode))
    }

    fn listing(&mut self, dir: &DirectoryInode) -> Result<Vec<DirectoryEntry>> {
        read_listing(
            &mut self.source,
            self.superblock.directory_table_start,
            dir,
        )
    }

    fn inode(&mut self, reference: InodeRef) -> Result<Inode> {
        let mut reader = MetadataReader::at(
            &mut self.source,
            self.superblock.inode_table_start,
            reference,
        )?;
        let inode = Inode::read(&mut reader, self.superblock.block_size)?;
        trace!(
            "Inode {} at {:#x}+{}",
            inode.inode_number(),
            reference.block(),
            reference.offset()
        );
        Ok(inode)
    }
}

impl<R> core::fmt::Debug for Archive<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Archive")
            .field("offset", &self.offset)
            .field("superblock", &self.superblock)
            .finish_non_exhaustive()
    }
}

fn read_superblock<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<Superblock> {
    let mut bytes = [0u8; SUPERBLOCK_SIZE];
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(IoError::Read)?;
    reader.read_exact(&mut bytes).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => IoError::Truncated {
            what: "superblock",
            offset,
            needed: SUPERBLOCK_SIZE as u64,
        },
        _ => IoError::Read(e),
    })?;
    Ok(Superblock::parse(&bytes, offset)?)
}

/// Splits on `/`, dropping empty components.
fn split_path(path: &str) -> Vec<&[u8]> {
    path.split('/')
        .filter(|c| !c.is_empty())
        .map(str::as_bytes)
        .collect()
}

/// Resolves a symlink target against the components of the link's parent
/// directory, collapsing `.` and `..`.
fn symlink_target<'a>(parent: &[&'a [u8]], target: &'a [u8]) -> Vec<&'a [u8]> {
    let mut out = if target.starts_with(b"/") {
        Vec::new()
    } else {
        parent.to_vec()
    };
    for component in target.split(|&b| b == b'/') {
        match component {
            b"" | b"." => {}
            b".." => {
                out.pop();
            }
            name => out.push(name),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_components_are_ignored() {
        assert!(split_path("").is_empty());
        assert!(split_path("/").is_empty());
        assert_eq!(split_path("/a//b/"), [b"a".as_slice(), b"b".as_slice()]);
        assert_eq!(split_path("a/b"), split_path("//a///b"));
    }

    #[test]
    fn relative_targets_resolve_against_parent() {
        let parent = [b"usr".as_slice(), b"share".as_slice()];
        assert_eq!(
            symlink_target(&parent, b"icons/app.png"),
            [
                b"usr".as_slice(),
                b"share".as_slice(),
                b"icons".as_slice(),
                b"app.png".as_slice()
            ]
        );
        assert_eq!(
            symlink_target(&parent, b"../bin/./app"),
            [b"usr".as_slice(), b"bin".as_slice(), b"app".as_slice()]
        );
        assert_eq!(
            symlink_target(&parent, b"/app.png"),
            [b"app.png".as_slice()]
        );
        assert_eq!(symlink_target(&[], b"../../x"), [b"x".as_slice()]);
    }
}
