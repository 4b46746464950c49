//! A small SquashFS 4.0 image writer.
//!
//! Produces images with one id (0), no xattrs and no export table. Inodes
//! use the basic layouts unless extended ones are requested. Blocks are zlib-compressed when that makes them smaller and
//! compression is enabled; otherwise they carry the "stored uncompressed" bit.

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::collections::BTreeMap;
use std::io::Write;

const MAGIC: u32 = 0x7371_7368;
const SUPERBLOCK_SIZE: usize = 96;
const METADATA_SIZE: usize = 8192;
const METADATA_UNCOMPRESSED: u16 = 1 << 15;
const DATA_UNCOMPRESSED: u32 = 1 << 24;
const NO_FRAGMENT: u32 = 0xFFFF_FFFF;
const NO_TABLE: u64 = u64::MAX;
const COMPRESSION_GZIP: u16 = 1;

const BASIC_DIR: u16 = 1;
const BASIC_FILE: u16 = 2;
const BASIC_SYMLINK: u16 = 3;
const BASIC_FIFO: u16 = 6;
const EXTENDED_DIR: u16 = 8;
const EXTENDED_FILE: u16 = 9;
const EXTENDED_SYMLINK: u16 = 10;
const NO_XATTR: u32 = 0xFFFF_FFFF;

const FLAG_NO_XATTRS: u16 = 1 << 9;

#[derive(Debug, Clone)]
pub enum Node {
    File(Vec<u8>),
    Dir(Tree),
    Symlink(String),
    Fifo,
}

/// A directory's children, kept sorted by name as SquashFS requires.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    entries: BTreeMap<String, Node>,
}

impl Tree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn file(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.entries.insert(name.to_owned(), Node::File(data.into()));
        self
    }

    #[must_use]
    pub fn dir(mut self, name: &str, tree: Self) -> Self {
        self.entries.insert(name.to_owned(), Node::Dir(tree));
        self
    }

    #[must_use]
    pub fn symlink(mut self, name: &str, target: &str) -> Self {
        self.entries
            .insert(name.to_owned(), Node::Symlink(target.to_owned()));
        self
    }

    #[must_use]
    pub fn fifo(mut self, name: &str) -> Self {
        self.entries.insert(name.to_owned(), Node::Fifo);
        self
    }

    fn count(&self) -> usize {
        self.entries
            .values()
            .map(|node| match node {
                Node::Dir(tree) => 1 + tree.count(),
                _ => 1,
            })
            .sum()
    }
}

/// Image settings plus the root directory.
#[derive(Debug, Clone)]
pub struct SquashfsImage {
    root: Tree,
    block_size: u32,
    compress: bool,
    fragments: bool,
    sparse: bool,
    extended: bool,
}

impl SquashfsImage {
    #[must_use]
    pub const fn new(root: Tree) -> Self {
        Self {
            root,
            block_size: 4096,
            compress: false,
            fragments: false,
            sparse: false,
            extended: false,
        }
    }

    /// Must be a power of two between 4 KiB and 1 MiB.
    #[must_use]
    pub const fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    #[must_use]
    pub const fn compressed(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Packs file tails into shared fragment blocks.
    #[must_use]
    pub const fn fragments(mut self, fragments: bool) -> Self {
        self.fragments = fragments;
        self
    }

    /// Writes all-zero full blocks as sparse (size 0) blocks.
    #[must_use]
    pub const fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    /// Writes directories, files and symlinks with the extended inode
    /// layouts. Listings keep the basic type numbers, as `mksquashfs` does.
    #[must_use]
    pub const fn extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut writer = ImageWriter {
            image: self,
            data: vec![0u8; SUPERBLOCK_SIZE],
            inodes: MetadataWriter::new(self.compress),
            dirs: MetadataWriter::new(self.compress),
            fragments: Vec::new(),
            pending_fragment: Vec::new(),
            next_inode: 1,
        };

        let total_inodes = u32::try_from(self.root.count() + 1).expect("too many inodes");
        let root_no = writer.alloc_inode();
        let (root_ref, _) = writer.write_dir(&self.root, root_no, total_inodes + 1);
        writer.flush_fragment();
        writer.finish(root_ref, total_inodes)
    }
}

struct ImageWriter<'a> {
    image: &'a SquashfsImage,
    data: Vec<u8>,
    inodes: MetadataWriter,
    dirs: MetadataWriter,
    fragments: Vec<(u64, u32)>,
    pending_fragment: Vec<u8>,
    next_inode: u32,
}

struct Child {
    name: Vec<u8>,
    block: u32,
    offset: u16,
    number: u32,
    kind: u16,
}

impl ImageWriter<'_> {
    const fn alloc_inode(&mut self) -> u32 {
        let n = self.next_inode;
        self.next_inode += 1;
        n
    }

    fn inode_header(&mut self, kind: u16, mode: u16, number: u32) -> (u32, u16) {
        let position = self.inodes.position();
        let mut hdr = Vec::with_capacity(16);
        hdr.write_u16::<LittleEndian>(kind).unwrap();
        hdr.write_u16::<LittleEndian>(mode).unwrap();
        hdr.write_u16::<LittleEndian>(0).unwrap(); // uid index
        hdr.write_u16::<LittleEndian>(0).unwrap(); // gid index
        hdr.write_u32::<LittleEndian>(0).unwrap(); // mtime
        hdr.write_u32::<LittleEndian>(number).unwrap();
        self.inodes.write(&hdr);
        position
    }

    fn write_dir(&mut self, tree: &Tree, number: u32, parent: u32) -> (u64, u16) {
        let mut children = Vec::with_capacity(tree.entries.len());
        let mut subdirs = 0;
        for (name, node) in &tree.entries {
            let child_no = self.alloc_inode();
            let ((block, offset), kind) = match node {
                Node::File(data) => (self.write_file(data, child_no), BASIC_FILE),
                Node::Dir(sub) => {
                    subdirs += 1;
                    let (r, _) = self.write_dir(sub, child_no, number);
                    (split_ref(r), BASIC_DIR)
                }
                Node::Symlink(target) => (self.write_symlink(target, child_no), BASIC_SYMLINK),
                Node::Fifo => {
                    let position = self.inode_header(BASIC_FIFO, 0o644, child_no);
                    self.inodes.write(&1u32.to_le_bytes());
                    (position, BASIC_FIFO)
                }
            };
            children.push(Child {
                name: name.as_bytes().to_vec(),
                block,
                offset,
                number: child_no,
                kind,
            });
        }

        let (listing_block, listing_offset) = self.dirs.position();
        let listing = encode_listing(&children);
        self.dirs.write(&listing);

        let file_size = listing.len() + 3;
        let mut body = Vec::with_capacity(24);
        let position = if self.image.extended {
            let position = self.inode_header(EXTENDED_DIR, 0o755, number);
            body.write_u32::<LittleEndian>(2 + subdirs).unwrap();
            body.write_u32::<LittleEndian>(u32::try_from(file_size).unwrap())
                .unwrap();
            body.write_u32::<LittleEndian>(listing_block).unwrap();
            body.write_u32::<LittleEndian>(parent).unwrap();
            body.write_u16::<LittleEndian>(0).unwrap(); // index count
            body.write_u16::<LittleEndian>(listing_offset).unwrap();
            body.write_u32::<LittleEndian>(NO_XATTR).unwrap();
            position
        } else {
            let position = self.inode_header(BASIC_DIR, 0o755, number);
            body.write_u32::<LittleEndian>(listing_block).unwrap();
            body.write_u32::<LittleEndian>(2 + subdirs).unwrap();
            body.write_u16::<LittleEndian>(u16::try_from(file_size).expect("directory too large"))
                .unwrap();
            body.write_u16::<LittleEndian>(listing_offset).unwrap();
            body.write_u32::<LittleEndian>(parent).unwrap();
            position
        };
        self.inodes.write(&body);

        (join_ref(position), BASIC_DIR)
    }

    fn write_file(&mut self, data: &[u8], number: u32) -> (u32, u16) {
        let block_size = self.image.block_size as usize;
        let tail_len = data.len() % block_size;
        let full_len = if self.image.fragments {
            data.len() - tail_len
        } else {
            data.len()
        };

        let blocks_start = self.data.len() as u64;
        let sizes: Vec<u32> = data[..full_len]
            .chunks(block_size)
            .map(|chunk| self.write_data_block(chunk, true))
            .collect();

        let (fragment, fragment_offset) = if full_len < data.len() {
            let tail = &data[full_len..];
            if self.pending_fragment.len() + tail.len() > block_size {
                self.flush_fragment();
            }
            let index = u32::try_from(self.fragments.len()).unwrap();
            let offset = u32::try_from(self.pending_fragment.len()).unwrap();
            self.pending_fragment.extend_from_slice(tail);
            (index, offset)
        } else {
            (NO_FRAGMENT, 0)
        };

        let mut body = Vec::with_capacity(40 + 4 * sizes.len());
        let position = if self.image.extended {
            let position = self.inode_header(EXTENDED_FILE, 0o644, number);
            body.write_u64::<LittleEndian>(blocks_start).unwrap();
            body.write_u64::<LittleEndian>(data.len() as u64).unwrap();
            body.write_u64::<LittleEndian>(0).unwrap(); // sparse bytes
            body.write_u32::<LittleEndian>(1).unwrap(); // link count
            body.write_u32::<LittleEndian>(fragment).unwrap();
            body.write_u32::<LittleEndian>(fragment_offset).unwrap();
            body.write_u32::<LittleEndian>(NO_XATTR).unwrap();
            position
        } else {
            let position = self.inode_header(BASIC_FILE, 0o644, number);
            body.write_u32::<LittleEndian>(u32::try_from(blocks_start).unwrap())
                .unwrap();
            body.write_u32::<LittleEndian>(fragment).unwrap();
            body.write_u32::<LittleEndian>(fragment_offset).unwrap();
            body.write_u32::<LittleEndian>(u32::try_from(data.len()).unwrap())
                .unwrap();
            position
        };
        for size in sizes {
            body.write_u32::<LittleEndian>(size).unwrap();
        }
        self.inodes.write(&body);
        position
    }

    fn write_symlink(&mut self, target: &str, number: u32) -> (u32, u16) {
        let kind = if self.image.extended {
            EXTENDED_SYMLINK
        } else {
            BASIC_SYMLINK
        };
        let position = self.inode_header(kind, 0o777, number);
        let mut body = Vec::with_capacity(12 + target.len());
        body.write_u32::<LittleEndian>(1).unwrap();
        body.write_u32::<LittleEndian>(u32::try_from(target.len()).unwrap())
            .unwrap();
        body.extend_from_slice(target.as_bytes());
        if self.image.extended {
            body.write_u32::<LittleEndian>(NO_XATTR).unwrap();
        }
        self.inodes.write(&body);
        position
    }

    fn write_data_block(&mut self, chunk: &[u8], allow_sparse: bool) -> u32 {
        if allow_sparse
            && self.image.sparse
            && chunk.len() == self.image.block_size as usize
            && chunk.iter().all(|&b| b == 0)
        {
            return 0;
        }
        if self.image.compress {
            let packed = zlib(chunk);
            if packed.len() < chunk.len() {
                self.data.extend_from_slice(&packed);
                return u32::try_from(packed.len()).unwrap();
            }
        }
        self.data.extend_from_slice(chunk);
        u32::try_from(chunk.len()).unwrap() | DATA_UNCOMPRESSED
    }

    fn flush_fragment(&mut self) {
        if self.pending_fragment.is_empty() {
            return;
        }
        let start = self.data.len() as u64;
        let pending = std::mem::take(&mut self.pending_fragment);
        let size = self.write_data_block(&pending, false);
        self.fragments.push((start, size));
    }

    fn finish(mut self, root_ref: u64, inode_count: u32) -> Vec<u8> {
        let compress = self.image.compress;

        let inode_table_start = self.data.len() as u64;
        self.data.extend_from_slice(&self.inodes.finish());

        let directory_table_start = self.data.len() as u64;
        self.data.extend_from_slice(&self.dirs.finish());

        let mut fragment_entries = Vec::with_capacity(self.fragments.len() * 16);
        for &(start, size) in &self.fragments {
            fragment_entries.write_u64::<LittleEndian>(start).unwrap();
            fragment_entries.write_u32::<LittleEndian>(size).unwrap();
            fragment_entries.write_u32::<LittleEndian>(0).unwrap();
        }
        let fragment_table_start = self.write_lookup_table(&fragment_entries, compress);

        let id_table_start = self.write_lookup_table(&0u32.to_le_bytes(), compress);

        let bytes_used = self.data.len() as u64;
        let block_size = self.image.block_size;

        let mut sb = Vec::with_capacity(SUPERBLOCK_SIZE);
        sb.write_u32::<LittleEndian>(MAGIC).unwrap();
        sb.write_u32::<LittleEndian>(inode_count).unwrap();
        sb.write_u32::<LittleEndian>(0).unwrap(); // mtime
        sb.write_u32::<LittleEndian>(block_size).unwrap();
        sb.write_u32::<LittleEndian>(u32::try_from(self.fragments.len()).unwrap())
            .unwrap();
        sb.write_u16::<LittleEndian>(COMPRESSION_GZIP).unwrap();
        sb.write_u16::<LittleEndian>(u16::try_from(block_size.trailing_zeros()).unwrap())
            .unwrap();
        sb.write_u16::<LittleEndian>(FLAG_NO_XATTRS).unwrap();
        sb.write_u16::<LittleEndian>(1).unwrap(); // id count
        sb.write_u16::<LittleEndian>(4).unwrap();
        sb.write_u16::<LittleEndian>(0).unwrap();
        sb.write_u64::<LittleEndian>(root_ref).unwrap();
        sb.write_u64::<LittleEndian>(bytes_used).unwrap();
        sb.write_u64::<LittleEndian>(id_table_start).unwrap();
        sb.write_u64::<LittleEndian>(NO_TABLE).unwrap(); // xattr ids
        sb.write_u64::<LittleEndian>(inode_table_start).unwrap();
        sb.write_u64::<LittleEndian>(directory_table_start).unwrap();
        sb.write_u64::<LittleEndian>(fragment_table_start).unwrap();
        sb.write_u64::<LittleEndian>(NO_TABLE).unwrap(); // export
        debug_assert_eq!(sb.len(), SUPERBLOCK_SIZE);

        self.data[..SUPERBLOCK_SIZE].copy_from_slice(&sb);
        self.data
    }

    /// Writes `entries` as metadata blocks followed by the u64 array pointing
    /// at them; returns the array position.
    fn write_lookup_table(&mut self, entries: &[u8], compress: bool) -> u64 {
        let mut pointers = Vec::new();
        for chunk in entries.chunks(METADATA_SIZE) {
            pointers.push(self.data.len() as u64);
            self.data.extend_from_slice(&encode_metadata_block(chunk, compress));
        }
        let table_start = self.data.len() as u64;
        for pointer in pointers {
            self.data.write_u64::<LittleEndian>(pointer).unwrap();
        }
        table_start
    }
}

/// Accumulates a metadata table and splits it into 8 KiB blocks.
struct MetadataWriter {
    compress: bool,
    out: Vec<u8>,
    current: Vec<u8>,
}

impl MetadataWriter {
    const fn new(compress: bool) -> Self {
        Self {
            compress,
            out: Vec::new(),
            current: Vec::new(),
        }
    }

    /// (block start relative to the table, offset inside the block)
    fn position(&self) -> (u32, u16) {
        (
            u32::try_from(self.out.len()).unwrap(),
            u16::try_from(self.current.len()).unwrap(),
        )
    }

    fn write(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let room = METADATA_SIZE - self.current.len();
            let take = room.min(bytes.len());
            self.current.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.current.len() == METADATA_SIZE {
                self.flush();
            }
        }
    }

    fn flush(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let block = encode_metadata_block(&self.current, self.compress);
        self.out.extend_from_slice(&block);
        self.current.clear();
    }

    fn finish(&mut self) -> Vec<u8> {
        self.flush();
        std::mem::take(&mut self.out)
    }
}

fn encode_metadata_block(payload: &[u8], compress: bool) -> Vec<u8> {
    let mut block = Vec::with_capacity(payload.len() + 2);
    if compress {
        let packed = zlib(payload);
        if packed.len() < payload.len() {
            block
                .write_u16::<LittleEndian>(u16::try_from(packed.len()).unwrap())
                .unwrap();
            block.extend_from_slice(&packed);
            return block;
        }
    }
    block
        .write_u16::<LittleEndian>(u16::try_from(payload.len()).unwrap() | METADATA_UNCOMPRESSED)
        .unwrap();
    block.extend_from_slice(payload);
    block
}

fn encode_listing(children: &[Child]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < children.len() {
        let base = &children[i];
        let run = children[i..]
            .iter()
            .take(256)
            .take_while(|c| {
                c.block == base.block && c.number.abs_diff(base.number) <= u32::from(i16::MAX.unsigned_abs())
            })
            .count();

        out.write_u32::<LittleEndian>(u32::try_from(run - 1).unwrap())
            .unwrap();
        out.write_u32::<LittleEndian>(base.block).unwrap();
        out.write_u32::<LittleEndian>(base.number).unwrap();
        for child in &children[i..i + run] {
            let delta = i64::from(child.number) - i64::from(base.number);
            out.write_u16::<LittleEndian>(child.offset).unwrap();
            out.write_i16::<LittleEndian>(i16::try_from(delta).unwrap())
                .unwrap();
            out.write_u16::<LittleEndian>(child.kind).unwrap();
            out.write_u16::<LittleEndian>(u16::try_from(child.name.len() - 1).unwrap())
                .unwrap();
            out.extend_from_slice(&child.name);
        }
        i += run;
    }
    out
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

const fn join_ref((block, offset): (u32, u16)) -> u64 {
    ((block as u64) << 16) | offset as u64
}

const fn split_ref(r: u64) -> (u32, u16) {
    ((r >> 16) as u32, (r & 0xFFFF) as u16)
}
