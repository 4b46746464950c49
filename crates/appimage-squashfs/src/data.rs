//! # File Data
//!
//! A regular file is a run of consecutive data blocks starting at
//! `blocks_start`, each described by a [`DataBlockSize`] word in the inode,
//! optionally followed by a tail stored inside a shared fragment block.

use crate::error::{Corruption, IoError, Result};
use crate::inode::FileInode;
use crate::metadata::MetadataReader;
use crate::source::BlockSource;
use crate::superblock::Superblock;
use byteorder::{ByteOrder, LittleEndian};
use log::trace;
use std::io::{Read, Seek, Write};

const FRAGMENT_ENTRY_SIZE: usize = 16;
const FRAGMENT_ENTRIES_PER_BLOCK: u32 = 512;

/// On-disk size word of a data or fragment block.
///
/// An all-zero word marks a sparse block: `block_size` zero bytes that are
/// not stored at all.
#[bitfield_struct::bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct DataBlockSize {
    #[bits(24)]
    pub size: u32,
    pub uncompressed: bool,
    #[bits(7)]
    __unused: u8,
}

impl DataBlockSize {
    #[must_use]
    pub const fn is_sparse(self) -> bool {
        self.size() == 0
    }
}

/// Where a fragment block lives and how it is stored.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct FragmentEntry {
    start: u64,
    size: DataBlockSize,
}

fn fragment_entry<R: Read + Seek>(
    source: &mut BlockSource<R>,
    superblock: &Superblock,
    index: u32,
) -> Result<FragmentEntry> {
    if index >= superblock.fragment_entry_count {
        return Err(Corruption::FragmentIndex(index).into());
    }

    let pointer_position = u64::from(index / FRAGMENT_ENTRIES_PER_BLOCK)
        .checked_mul(8)
        .and_then(|p| p.checked_add(superblock.fragment_table_start))
        .ok_or(Corruption::Overflow)?;
    let mut pointer = [0u8; 8];
    source.read_at(pointer_position, &mut pointer)?;

    let within = (index % FRAGMENT_ENTRIES_PER_BLOCK) as usize * FRAGMENT_ENTRY_SIZE;
    let mut reader = MetadataReader::new(source, LittleEndian::read_u64(&pointer), within)?;
    let start = reader.u64()?;
    let size = DataBlockSize::from_bits(reader.u32()?);
    Ok(FragmentEntry { start, size })
}

/// Streams the contents of `file` into `writer`, one block at a time.
///
/// Returns the number of bytes written, which always equals the inode's
/// file size on success.
pub fn copy_file_data<R: Read + Seek, W: Write>(
    source: &mut BlockSource<R>,
    superblock: &Superblock,
    file: &FileInode,
    writer: &mut W,
) -> Result<u64> {
    let block_size = superblock.block_size as usize;
    let mut position = file.blocks_start;
    let mut remaining = file.size;
    let mut written = 0u64;

    for &word in &file.block_sizes {
        let expected = remaining.min(u64::from(superblock.block_size));
        let block = if word.is_sparse() {
            vec![0u8; block_len(expected)?]
        } else {
            let block = source.data_block(position, word, block_size)?;
            if block.len() as u64 != expected {
                return Err(Corruption::BlockLength {
                    position,
                    expected: block_len(expected)?,
                    actual: block.len(),
                }
                .into());
            }
            position = position
                .checked_add(u64::from(word.size()))
                .ok_or(Corruption::Overflow)?;
            block
        };

        writer.write_all(&block).map_err(IoError::Write)?;
        written += expected;
        remaining -= expected;
    }

    if let Some(fragment) = file.fragment
        && remaining > 0
    {
        let entry = fragment_entry(source, superblock, fragment.index)?;
        let block = source.fragment_block(entry.start, entry.size, block_size)?;
        trace!(
            "Fragment {} at {:#x}: {remaining} byte tail at offset {}",
            fragment.index, entry.start, fragment.offset
        );

        let out_of_range = || Corruption::FragmentRange {
            offset: fragment.offset,
            len: remaining,
            available: block.len(),
        };
        let start = fragment.offset as usize;
        let end = start
            .checked_add(usize::try_from(remaining).map_err(|_| out_of_range())?)
            .ok_or_else(out_of_range)?;
        let tail = block.get(start..end).ok_or_else(out_of_range)?;

        writer.write_all(tail).map_err(IoError::Write)?;
        written += remaining;
    }

    if written != file.size {
        return Err(Corruption::FileSize {
            expected: file.size,
            actual: written,
        }
        .into());
    }
    Ok(written)
}

/// `expected` never exceeds the block size, which fits in 32 bits.
fn block_len(expected: u64) -> Result<usize> {
    usize::try_from(expected).map_err(|_| Corruption::Overflow.into())
}
