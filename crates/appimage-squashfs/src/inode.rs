//! # Inodes
//!
//! Every inode starts with a common 16-byte header whose first word selects
//! one of fourteen layouts. Only directories, regular files and symlinks are
//! decoded in full; the remaining types are reported without their bodies.

use crate::data::DataBlockSize;
use crate::dir::EntryKind;
use crate::error::Result;
use crate::metadata::MetadataReader;
use std::io::{Read, Seek};

pub const BASIC_DIRECTORY: u16 = 1;
pub const BASIC_FILE: u16 = 2;
pub const BASIC_SYMLINK: u16 = 3;
pub const EXTENDED_DIRECTORY: u16 = 8;
pub const EXTENDED_FILE: u16 = 9;
pub const EXTENDED_SYMLINK: u16 = 10;

const NO_FRAGMENT: u32 = 0xFFFF_FFFF;

/// `mode`, `uid`, `gid` and `mtime` of the common header.
const HEADER_SKIPPED: usize = 2 + 2 + 2 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inode {
    Directory(DirectoryInode),
    File(FileInode),
    Symlink(SymlinkInode),
    Other { kind: u16, inode_number: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryInode {
    pub inode_number: u32,
    /// Start of the listing's metadata block, relative to the directory table.
    pub block_index: u32,
    /// Offset of the listing inside that block.
    pub block_offset: u16,
    /// Listing size plus three.
    pub file_size: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FragmentRef {
    pub index: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInode {
    pub inode_number: u32,
    pub blocks_start: u64,
    pub size: u64,
    pub fragment: Option<FragmentRef>,
    pub block_sizes: Vec<DataBlockSize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkInode {
    pub inode_number: u32,
    pub target: Vec<u8>,
}

impl Inode {
    /// Decodes the inode the reader is positioned at.
    pub fn read<R: Read + Seek>(reader: &mut MetadataReader<'_, R>, block_size: u32) -> Result<Self> {
        let kind = reader.u16()?;
        // Unknown types fail before the body is read.
        EntryKind::from_inode_type(kind)?;
        reader.skip(HEADER_SKIPPED)?;
        let inode_number = reader.u32()?;

        let inode = match kind {
            BASIC_DIRECTORY => {
                let block_index = reader.u32()?;
                let _link_count = reader.u32()?;
                let file_size = u32::from(reader.u16()?);
                let block_offset = reader.u16()?;
                let _parent = reader.u32()?;
                Self::Directory(DirectoryInode {
                    inode_number,
                    block_index,
                    block_offset,
                    file_size,
                })
            }
            EXTENDED_DIRECTORY => {
                let _link_count = reader.u32()?;
                let file_size = reader.u32()?;
                let block_index = reader.u32()?;
                let _parent = reader.u32()?;
                let _index_count = reader.u16()?;
                let block_offset = reader.u16()?;
                Self::Directory(DirectoryInode {
                    inode_number,
                    block_index,
                    block_offset,
                    file_size,
                })
            }
            BASIC_FILE => {
                let blocks_start = u64::from(reader.u32()?);
                let fragment = fragment_ref(reader.u32()?, reader.u32()?);
                let size = u64::from(reader.u32()?);
                Self::File(FileInode::read_blocks(
                    reader,
                    inode_number,
                    blocks_start,
                    size,
                    fragment,
                    block_size,
                )?)
            }
            EXTENDED_FILE => {
                let blocks_start = reader.u64()?;
                let size = reader.u64()?;
                let _sparse = reader.u64()?;
                let _link_count = reader.u32()?;
                let fragment = fragment_ref(reader.u32()?, reader.u32()?);
                let _xattr = reader.u32()?;
                Self::File(FileInode::read_blocks(
                    reader,
                    inode_number,
                    blocks_start,
                    size,
                    fragment,
                    block_size,
                )?)
            }
            BASIC_SYMLINK | EXTENDED_SYMLINK => {
                let _link_count = reader.u32()?;
                let target_size = reader.u32()? as usize;
                let target = reader.read_vec(target_size)?;
                Self::Symlink(SymlinkInode {
                    inode_number,
                    target,
                })
            }
            _ => Self::Other { kind, inode_number },
        };
        Ok(inode)
    }

    #[must_use]
    pub const fn inode_number(&self) -> u32 {
        match self {
            Self::Directory(d) => d.inode_number,
            Self::File(f) => f.inode_number,
            Self::Symlink(s) => s.inode_number,
            Self::Other { inode_number, .. } => *inode_number,
        }
    }
}

impl FileInode {
    fn read_blocks<R: Read + Seek>(
        reader: &mut MetadataReader<'_, R>,
        inode_number: u32,
        blocks_start: u64,
        size: u64,
        fragment: Option<FragmentRef>,
        block_size: u32,
    ) -> Result<Self> {
        let count = block_count(size, block_size, fragment.is_some());
        let mut block_sizes = Vec::new();
        for _ in 0..count {
            block_sizes.push(DataBlockSize::from_bits(reader.u32()?));
        }
        Ok(Self {
            inode_number,
            blocks_start,
            size,
            fragment,
            block_sizes,
        })
    }
}

const fn fragment_ref(index: u32, offset: u32) -> Option<FragmentRef> {
    if index == NO_FRAGMENT {
        None
    } else {
        Some(FragmentRef { index, offset })
    }
}

/// Full blocks only when the tail lives in a fragment; otherwise the last,
/// partial block is stored like any other.
fn block_count(size: u64, block_size: u32, has_fragment: bool) -> u64 {
    let block_size = u64::from(block_size);
    if has_fragment {
        size / block_size
    } else {
        size.div_ceil(block_size)
    }
}
