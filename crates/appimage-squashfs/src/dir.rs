//! # Directory Listings
//!
//! A listing is a sequence of runs. Each run header names the inode
//! metadata block shared by the entries that follow and a base inode number
//! the entries store deltas against.

use crate::error::{Corruption, Result};
use crate::inode::DirectoryInode;
use crate::metadata::{InodeRef, MetadataReader};
use crate::source::BlockSource;
use std::borrow::Cow;
use std::io::{Read, Seek};

const RUN_HEADER_SIZE: u64 = 12;
const ENTRY_HEADER_SIZE: u64 = 8;
const MAX_RUN_LENGTH: u32 = 256;

/// What a [`DirectoryEntry`] names.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    /// Device, FIFO or socket.
    Other,
}

impl EntryKind {
    /// Maps the basic and extended inode type numbers.
    ///
    /// # Errors
    /// [`Corruption::UnknownInodeType`] outside `1..=14`.
    pub const fn from_inode_type(kind: u16) -> Result<Self, Corruption> {
        match kind {
            1 | 8 => Ok(Self::Directory),
            2 | 9 => Ok(Self::File),
            3 | 10 => Ok(Self::Symlink),
            4..=7 | 11..=14 => Ok(Self::Other),
            _ => Err(Corruption::UnknownInodeType(kind)),
        }
    }
}

/// One name in a directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectoryEntry {
    name: Vec<u8>,
    kind: EntryKind,
    inode: InodeRef,
    inode_number: u32,
}

impl DirectoryEntry {
    /// The raw name; SquashFS does not mandate an encoding.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[must_use]
    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    #[must_use]
    pub const fn kind(&self) -> EntryKind {
        self.kind
    }

    #[must_use]
    pub const fn inode_number(&self) -> u32 {
        self.inode_number
    }

    pub(crate) const fn inode(&self) -> InodeRef {
        self.inode
    }
}

/// Reads every entry of `dir`, in on-disk order.
pub fn read_listing<R: Read + Seek>(
    source: &mut BlockSource<R>,
    directory_table_start: u64,
    dir: &DirectoryInode,
) -> Result<Vec<DirectoryEntry>> {
    let mut remaining = u64::from(dir.file_size)
        .checked_sub(3)
        .ok_or(Corruption::DirectoryListing)?;
    let mut entries = Vec::new();
    if remaining == 0 {
        return Ok(entries);
    }

    let position = directory_table_start
        .checked_add(u64::from(dir.block_index))
        .ok_or(Corruption::Overflow)?;
    let mut reader = MetadataReader::new(source, position, usize::from(dir.block_offset))?;

    while remaining > 0 {
        remaining = consume(remaining, RUN_HEADER_SIZE)?;
        let count = reader.u32()?;
        let block = reader.u32()?;
        let base = reader.u32()?;
        if count >= MAX_RUN_LENGTH {
            return Err(Corruption::DirectoryListing.into());
        }

        for _ in 0..=count {
            remaining = consume(remaining, ENTRY_HEADER_SIZE)?;
            let offset = reader.u16()?;
            let delta = reader.i16()?;
            let kind = EntryKind::from_inode_type(reader.u16()?)?;
            let name_size = reader.u16()?;

            remaining = consume(remaining, u64::from(name_size) + 1)?;
            let name = reader.read_vec(usize::from(name_size) + 1)?;
            if name.contains(&b'/') {
                return Err(Corruption::DirectoryListing.into());
            }

            let inode_number = base
                .checked_add_signed(i32::from(delta))
                .ok_or(Corruption::DirectoryListing)?;
            entries.push(DirectoryEntry {
                name,
                kind,
                inode: InodeRef::new().with_block(block).with_offset(offset),
                inode_number,
            });
        }
    }

    Ok(entries)
}

fn consume(remaining: u64, len: u64) -> Result<u64, Corruption> {
    remaining.checked_sub(len).ok_or(Corruption::DirectoryListing)
}
