//! # Superblock
//!
//! The first 96 bytes of the image. All table positions it records are
//! relative to the start of the image, not to the host file.

use crate::compression::Compression;
use crate::error::FormatError;
use crate::metadata::InodeRef;
use byteorder::{ByteOrder, LittleEndian};

pub const SQUASHFS_MAGIC: u32 = 0x7371_7368;
pub const SUPERBLOCK_SIZE: usize = 96;

const MIN_BLOCK_LOG: u16 = 12;
const MAX_BLOCK_LOG: u16 = 20;

/// `flags` word of the superblock.
///
/// Only informational here: every block carries its own "stored
/// uncompressed" bit, which is what the reader honours.
#[bitfield_struct::bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct SuperblockFlags {
    #[bits(1)]
    pub uncompressed_inodes: bool,
    #[bits(1)]
    pub uncompressed_data: bool,
    #[bits(1)]
    __reserved: bool,
    #[bits(1)]
    pub uncompressed_fragments: bool,
    #[bits(1)]
    pub no_fragments: bool,
    #[bits(1)]
    pub always_fragments: bool,
    #[bits(1)]
    pub duplicates: bool,
    #[bits(1)]
    pub exportable: bool,
    #[bits(1)]
    pub uncompressed_xattrs: bool,
    #[bits(1)]
    pub no_xattrs: bool,
    #[bits(1)]
    pub compressor_options: bool,
    #[bits(1)]
    pub uncompressed_ids: bool,
    #[bits(4)]
    __unused: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub inode_count: u32,
    pub modification_time: u32,
    pub block_size: u32,
    pub fragment_entry_count: u32,
    pub compression: Compression,
    pub block_log: u16,
    pub flags: SuperblockFlags,
    pub id_count: u16,
    pub version_major: u16,
    pub version_minor: u16,
    pub root_inode: InodeRef,
    pub bytes_used: u64,
    pub id_table_start: u64,
    pub xattr_id_table_start: u64,
    pub inode_table_start: u64,
    pub directory_table_start: u64,
    pub fragment_table_start: u64,
    pub export_table_start: u64,
}

impl Superblock {
    /// Decode and validate the superblock.
    ///
    /// `offset` is only used to describe where the image was expected.
    ///
    /// # Errors
    /// - [`FormatError::NotAnArchive`] on a magic mismatch.
    /// - [`FormatError::UnsupportedVersion`] for anything but 4.0.
    /// - [`FormatError::BadBlockSize`] if the block size is not a power of two
    ///   between 4 KiB and 1 MiB matching the block log.
    /// - [`FormatError::InconsistentTables`] if the inode or directory table
    ///   lies outside the image.
    pub fn parse(bytes: &[u8; SUPERBLOCK_SIZE], offset: u64) -> Result<Self, FormatError> {
        let magic = LittleEndian::read_u32(&bytes[0..]);
        if magic != SQUASHFS_MAGIC {
            return Err(FormatError::NotAnArchive {
                offset,
                found: magic,
            });
        }

        let sb = Self {
            inode_count: LittleEndian::read_u32(&bytes[4..]),
            modification_time: LittleEndian::read_u32(&bytes[8..]),
            block_size: LittleEndian::read_u32(&bytes[12..]),
            fragment_entry_count: LittleEndian::read_u32(&bytes[16..]),
            compression: Compression::from_id(LittleEndian::read_u16(&bytes[20..])),
            block_log: LittleEndian::read_u16(&bytes[22..]),
            flags: SuperblockFlags::from_bits(LittleEndian::read_u16(&bytes[24..])),
            id_count: LittleEndian::read_u16(&bytes[26..]),
            version_major: LittleEndian::read_u16(&bytes[28..]),
            version_minor: LittleEndian::read_u16(&bytes[30..]),
            root_inode: InodeRef::from_bits(LittleEndian::read_u64(&bytes[32..])),
            bytes_used: LittleEndian::read_u64(&bytes[40..]),
            id_table_start: LittleEndian::read_u64(&bytes[48..]),
            xattr_id_table_start: LittleEndian::read_u64(&bytes[56..]),
            inode_table_start: LittleEndian::read_u64(&bytes[64..]),
            directory_table_start: LittleEndian::read_u64(&bytes[72..]),
            fragment_table_start: LittleEndian::read_u64(&bytes[80..]),
            export_table_start: LittleEndian::read_u64(&bytes[88..]),
        };

        if (sb.version_major, sb.version_minor) != (4, 0) {
            return Err(FormatError::UnsupportedVersion {
                major: sb.version_major,
                minor: sb.version_minor,
            });
        }

        let log_in_range = (MIN_BLOCK_LOG..=MAX_BLOCK_LOG).contains(&sb.block_log);
        if !log_in_range || sb.block_size != 1 << sb.block_log {
            return Err(FormatError::BadBlockSize {
                size: sb.block_size,
                log: sb.block_log,
            });
        }

        let header_end = SUPERBLOCK_SIZE as u64;
        if sb.inode_table_start < header_end
            || sb.inode_table_start > sb.directory_table_start
            || sb.directory_table_start > sb.bytes_used
        {
            return Err(FormatError::InconsistentTables);
        }

        Ok(sb)
    }

    /// Whether the image stores any file tails in fragment blocks.
    #[must_use]
    pub const fn has_fragments(&self) -> bool {
        self.fragment_entry_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn superblock_bytes() -> [u8; SUPERBLOCK_SIZE] {
        let mut b = [0u8; SUPERBLOCK_SIZE];
        b[0..4].copy_from_slice(&SQUASHFS_MAGIC.to_le_bytes());
        b[4..8].copy_from_slice(&5u32.to_le_bytes());
        b[12..16].copy_from_slice(&131_072u32.to_le_bytes());
        b[20..22].copy_from_slice(&4u16.to_le_bytes());
        b[22..24].copy_from_slice(&17u16.to_le_bytes());
        b[24..26].copy_from_slice(&0x0200u16.to_le_bytes());
        b[28..30].copy_from_slice(&4u16.to_le_bytes());
        b[32..40].copy_from_slice(&((0x40u64 << 16) | 0x20).to_le_bytes());
        b[40..48].copy_from_slice(&0x2000u64.to_le_bytes());
        b[64..72].copy_from_slice(&0x1000u64.to_le_bytes());
        b[72..80].copy_from_slice(&0x1800u64.to_le_bytes());
        b
    }

    #[test]
    fn parses_fields() {
        let sb = Superblock::parse(&superblock_bytes(), 0).unwrap();
        assert_eq!(sb.inode_count, 5);
        assert_eq!(sb.block_size, 128 * 1024);
        assert_eq!(sb.compression, Compression::Xz);
        assert!(sb.flags.no_xattrs());
        assert!(!sb.flags.compressor_options());
        assert_eq!(sb.root_inode.block(), 0x40);
        assert_eq!(sb.root_inode.offset(), 0x20);
        assert_eq!(sb.bytes_used, 0x2000);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut b = superblock_bytes();
        b[0..4].copy_from_slice(b"sqsh");
        assert_eq!(
            Superblock::parse(&b, 0x1234),
            Err(FormatError::NotAnArchive {
                offset: 0x1234,
                found: u32::from_le_bytes(*b"sqsh")
            })
        );
    }

    #[test]
    fn rejects_other_versions() {
        let mut b = superblock_bytes();
        b[28..30].copy_from_slice(&3u16.to_le_bytes());
        assert_eq!(
            Superblock::parse(&b, 0),
            Err(FormatError::UnsupportedVersion { major: 3, minor: 0 })
        );
    }

    #[test]
    fn rejects_mismatched_block_log() {
        let mut b = superblock_bytes();
        b[22..24].copy_from_slice(&16u16.to_le_bytes());
        assert!(matches!(
            Superblock::parse(&b, 0),
            Err(FormatError::BadBlockSize { .. })
        ));

        let mut b = superblock_bytes();
        b[12..16].copy_from_slice(&(1u32 << 21).to_le_bytes());
        b[22..24].copy_from_slice(&21u16.to_le_bytes());
        assert!(matches!(
            Superblock::parse(&b, 0),
            Err(FormatError::BadBlockSize { .. })
        ));
    }

    #[test]
    fn rejects_tables_outside_image() {
        let mut b = superblock_bytes();
        b[72..80].copy_from_slice(&0x3000u64.to_le_bytes());
        assert_eq!(
            Superblock::parse(&b, 0),
            Err(FormatError::InconsistentTables)
        );
    }
}
