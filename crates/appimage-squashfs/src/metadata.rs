//! # Metadata Blocks
//!
//! Inodes, directory listings, and the fragment and id tables live in
//! metadata blocks: a 16-bit header followed by at most 8 KiB of (usually
//! compressed) payload. A single structure may straddle two blocks, so
//! [`MetadataReader`] presents a table as one continuous byte stream.

use crate::error::{Corruption, Result};
use crate::source::{BlockSource, MetadataBlock};
use byteorder::{ByteOrder, LittleEndian};
use std::io::{Read, Seek};
use std::sync::Arc;

/// Upper bound on the decoded size of one metadata block.
pub const METADATA_BLOCK_SIZE: usize = 8192;

/// The 16-bit word in front of every metadata block.
#[bitfield_struct::bitfield(u16)]
pub struct MetadataHeader {
    /// On-disk size of the payload that follows.
    #[bits(15)]
    pub size: u16,
    /// Payload is stored as-is.
    pub uncompressed: bool,
}

/// Location of an inode: a metadata block relative to the inode table and
/// an offset into its decoded payload.
#[bitfield_struct::bitfield(u64)]
#[derive(PartialEq, Eq, Hash)]
pub struct InodeRef {
    pub offset: u16,
    pub block: u32,
    __unused: u16,
}

/// Sequential little-endian reader over a chain of metadata blocks.
pub struct MetadataReader<'a, R> {
    source: &'a mut BlockSource<R>,
    block: Arc<MetadataBlock>,
    position: u64,
    offset: usize,
}

impl<'a, R: Read + Seek> MetadataReader<'a, R> {
    /// Starts at `offset` bytes into the decoded block at `position`.
    pub fn new(source: &'a mut BlockSource<R>, position: u64, offset: usize) -> Result<Self> {
        let block = source.metadata_block(position)?;
        if offset > block.data.len() {
            return Err(Corruption::UnexpectedEnd(position).into());
        }
        Ok(Self {
            source,
            block,
            position,
            offset,
        })
    }

    /// Starts at `reference`, interpreted relative to `table_start`.
    pub fn at(source: &'a mut BlockSource<R>, table_start: u64, reference: InodeRef) -> Result<Self> {
        let position = table_start
            .checked_add(u64::from(reference.block()))
            .ok_or(Corruption::Overflow)?;
        Self::new(source, position, usize::from(reference.offset()))
    }

    fn advance(&mut self) -> Result<()> {
        let next = self.block.next;
        self.block = self.source.metadata_block(next)?;
        self.position = next;
        self.offset = 0;
        Ok(())
    }

    /// Bytes left in the current block, moving on to the next block first if
    /// this one is exhausted.
    fn available(&mut self) -> Result<&[u8]> {
        while self.offset == self.block.data.len() {
            self.advance()?;
        }
        Ok(&self.block.data[self.offset..])
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let chunk = self.available()?;
            let n = chunk.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&chunk[..n]);
            self.offset += n;
            filled += n;
        }
        Ok(())
    }

    /// Reads `len` bytes without reserving them up front, so a corrupt length
    /// fails at the end of the table rather than in the allocator.
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while out.len() < len {
            let wanted = len - out.len();
            let chunk = self.available()?;
            let n = chunk.len().min(wanted);
            out.extend_from_slice(&chunk[..n]);
            self.offset += n;
        }
        Ok(out)
    }

    pub fn skip(&mut self, mut len: usize) -> Result<()> {
        while len > 0 {
            let n = self.available()?.len().min(len);
            self.offset += n;
            len -= n;
        }
        Ok(())
    }

    pub fn u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(LittleEndian::read_u16(&buf))
    }

    pub fn i16(&mut self) -> Result<i16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(LittleEndian::read_i16(&buf))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(LittleEndian::read_u32(&buf))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(LittleEndian::read_u64(&buf))
    }

    /// Start of the block the reader is currently in.
    #[cfg(test)]
    pub const fn position(&self) -> u64 {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Compression;
    use crate::error::{ArchiveError, Error};
    use std::io::Cursor;

    fn stored(payload: &[u8]) -> Vec<u8> {
        let header = MetadataHeader::new()
            .with_size(u16::try_from(payload.len()).unwrap())
            .with_uncompressed(true);
        let mut out = header.into_bits().to_le_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    fn source(image: Vec<u8>) -> BlockSource<Cursor<Vec<u8>>> {
        let len = image.len() as u64;
        BlockSource::new(
            Cursor::new(image),
            0,
            len,
            Compression::Gzip.decompressor().unwrap(),
        )
    }

    #[test]
    fn header_bits() {
        let h = MetadataHeader::from_bits(0x8000 | 0x1234);
        assert!(h.uncompressed());
        assert_eq!(h.size(), 0x1234);
        assert!(!MetadataHeader::from_bits(0x7FFF).uncompressed());
    }

    #[test]
    fn inode_ref_bits() {
        let r = InodeRef::from_bits(0x0000_1234_5678_9ABC);
        assert_eq!(r.block(), 0x1234_5678);
        assert_eq!(r.offset(), 0x9ABC);
        assert_eq!(
            InodeRef::new().with_block(0x1234_5678).with_offset(0x9ABC),
            r
        );
    }

    #[test]
    fn values_may_span_blocks() {
        let mut first = vec![0xAA; METADATA_BLOCK_SIZE - 2];
        first.extend_from_slice(&[0x78, 0x56]);
        let mut image = stored(&first);
        image.extend_from_slice(&stored(&[0x34, 0x12, 0xFF]));

        let mut src = source(image);
        let mut reader = MetadataReader::new(&mut src, 0, METADATA_BLOCK_SIZE - 2).unwrap();
        assert_eq!(reader.u32().unwrap(), 0x1234_5678);
        assert_eq!(reader.position(), 2 + METADATA_BLOCK_SIZE as u64);
        assert_eq!(reader.read_vec(1).unwrap(), vec![0xFF]);
    }

    #[test]
    fn reading_past_the_table_is_corrupt() {
        let mut src = source(stored(&[1, 2, 3]));
        let mut reader = MetadataReader::new(&mut src, 0, 1).unwrap();
        reader.skip(2).unwrap();
        assert!(matches!(
            reader.u16(),
            Err(Error::Archive(ArchiveError::Corrupt(Corruption::UnexpectedEnd(_))))
        ));
    }

    #[test]
    fn offset_beyond_block_is_corrupt() {
        let mut src = source(stored(&[1, 2, 3]));
        assert!(MetadataReader::new(&mut src, 0, 4).is_err());
    }

    #[test]
    fn oversized_block_header_is_rejected() {
        let mut image = (0x8000u16 | 0x2001).to_le_bytes().to_vec();
        image.resize(0x2010, 0);
        let mut src = source(image);
        assert!(matches!(
            MetadataReader::new(&mut src, 0, 0),
            Err(Error::Archive(ArchiveError::Corrupt(
                Corruption::MetadataBlockSize { position: 0, .. }
            )))
        ));
    }
}
