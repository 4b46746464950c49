//! Positioned access to the image bytes.
//!
//! Every position handled here is relative to the start of the image; the
//! host-file offset is added only when seeking. Reads beyond `bytes_used`
//! are corruption, reads beyond the end of the host file are truncation.

use crate::compression::Decompressor;
use crate::data::DataBlockSize;
use crate::error::{Corruption, IoError, Result};
use crate::metadata::{METADATA_BLOCK_SIZE, MetadataHeader};
use log::trace;
use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

/// A decoded metadata block and the position of the block after it.
#[derive(Debug)]
pub struct MetadataBlock {
    pub data: Vec<u8>,
    pub next: u64,
}

pub struct BlockSource<R> {
    reader: R,
    base: u64,
    len: u64,
    decompressor: Box<dyn Decompressor>,
    metadata: HashMap<u64, Arc<MetadataBlock>>,
    fragment: Option<(u64, Arc<Vec<u8>>)>,
}

impl<R: Read + Seek> BlockSource<R> {
    pub fn new(reader: R, base: u64, len: u64, decompressor: Box<dyn Decompressor>) -> Self {
        Self {
            reader,
            base,
            len,
            decompressor,
            metadata: HashMap::new(),
            fragment: None,
        }
    }

    pub fn read_at(&mut self, position: u64, buf: &mut [u8]) -> Result<()> {
        let needed = buf.len() as u64;
        let end = position.checked_add(needed).ok_or(Corruption::Overflow)?;
        if end > self.len {
            return Err(Corruption::UnexpectedEnd(position).into());
        }

        let absolute = self.base.checked_add(position).ok_or(Corruption::Overflow)?;
        self.reader
            .seek(SeekFrom::Start(absolute))
            .map_err(IoError::Read)?;
        self.reader.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => IoError::Truncated {
                what: "image data",
                offset: absolute,
                needed,
            },
            _ => IoError::Read(e),
        })?;
        Ok(())
    }

    /// The decoded metadata block at `position`, from cache if already read.
    pub fn metadata_block(&mut self, position: u64) -> Result<Arc<MetadataBlock>> {
        if let Some(block) = self.metadata.get(&position) {
            return Ok(Arc::clone(block));
        }

        let mut word = [0u8; 2];
        self.read_at(position, &mut word)?;
        let header = MetadataHeader::from_bits(u16::from_le_bytes(word));
        let size = header.size();
        if size == 0 || usize::from(size) > METADATA_BLOCK_SIZE {
            return Err(Corruption::MetadataBlockSize { position, size }.into());
        }

        let payload = position + 2;
        let mut raw = vec![0u8; usize::from(size)];
        self.read_at(payload, &mut raw)?;
        let data = if header.uncompressed() {
            raw
        } else {
            self.decode(position, &raw, METADATA_BLOCK_SIZE)?
        };

        trace!(
            "Metadata block at {position:#x}: {size} bytes on disk, {} decoded",
            data.len()
        );
        let block = Arc::new(MetadataBlock {
            data,
            next: payload + u64::from(size),
        });
        self.metadata.insert(position, Arc::clone(&block));
        Ok(block)
    }

    /// One data block, decoded. `limit` is the block size of the image.
    pub fn data_block(&mut self, position: u64, size: DataBlockSize, limit: usize) -> Result<Vec<u8>> {
        let on_disk = size.size() as usize;
        if on_disk > limit {
            return Err(Corruption::DataBlockSize {
                position,
                size: size.into_bits(),
            }
            .into());
        }

        let mut raw = vec![0u8; on_disk];
        self.read_at(position, &mut raw)?;
        if size.uncompressed() {
            Ok(raw)
        } else {
            self.decode(position, &raw, limit)
        }
    }

    /// Like [`Self::data_block`], but keeps the most recent block so that
    /// consecutive tails packed into one fragment decode it only once.
    pub fn fragment_block(
        &mut self,
        position: u64,
        size: DataBlockSize,
        limit: usize,
    ) -> Result<Arc<Vec<u8>>> {
        if let Some((cached, block)) = &self.fragment
            && *cached == position
        {
            return Ok(Arc::clone(block));
        }
        let block = Arc::new(self.data_block(position, size, limit)?);
        self.fragment = Some((position, Arc::clone(&block)));
        Ok(block)
    }

    fn decode(&self, position: u64, input: &[u8], limit: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(limit);
        self.decompressor
            .decompress(input, &mut out, limit)
            .map_err(|e| Corruption::Decompression {
                position,
                reason: e.0,
            })?;
        if out.len() > limit {
            return Err(Corruption::BlockLength {
                position,
                expected: limit,
                actual: out.len(),
            }
            .into());
        }
        Ok(out)
    }
}
