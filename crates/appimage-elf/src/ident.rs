//! # ELF Identification

use crate::error::FormatError;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Size of `e_ident` in bytes.
pub const EI_NIDENT: usize = 16;

/// `0x7F 'E' 'L' 'F'`
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;

const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;

const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

/// AppImage runtimes stamp `'A' 'I' <type>` into the `e_ident` padding.
const EI_APPIMAGE: usize = 8;
const APPIMAGE_MARKER: [u8; 2] = [b'A', b'I'];

/// Address class of the file; selects the header and section entry layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Class {
    Elf32,
    Elf64,
}

/// Byte order of every multi-byte field after `e_ident`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Encoding {
    Little,
    Big,
}

/// The decoded `e_ident` block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ElfIdentity {
    pub class: Class,
    pub encoding: Encoding,
    /// AppImage type (1 or 2 in practice) if the runtime carries the marker.
    pub appimage_type: Option<u8>,
}

impl ElfIdentity {
    /// Decode and validate an identification block.
    ///
    /// # Errors
    /// Returns [`FormatError::BadMagic`], [`FormatError::UnknownClass`] or
    /// [`FormatError::UnknownEncoding`] for the first field that does not validate.
    pub fn parse(ident: &[u8; EI_NIDENT]) -> Result<Self, FormatError> {
        let magic = [ident[0], ident[1], ident[2], ident[3]];
        if magic != ELF_MAGIC {
            return Err(FormatError::BadMagic(magic));
        }

        let class = match ident[EI_CLASS] {
            ELFCLASS32 => Class::Elf32,
            ELFCLASS64 => Class::Elf64,
            other => return Err(FormatError::UnknownClass(other)),
        };

        let encoding = match ident[EI_DATA] {
            ELFDATA2LSB => Encoding::Little,
            ELFDATA2MSB => Encoding::Big,
            other => return Err(FormatError::UnknownEncoding(other)),
        };

        let appimage_type = (ident[EI_APPIMAGE..EI_APPIMAGE + 2] == APPIMAGE_MARKER)
            .then_some(ident[EI_APPIMAGE + 2]);

        Ok(Self {
            class,
            encoding,
            appimage_type,
        })
    }
}

impl Encoding {
    /// Reads a `u16` from the first two bytes of `bytes`.
    #[must_use]
    pub fn u16(self, bytes: &[u8]) -> u16 {
        match self {
            Self::Little => LittleEndian::read_u16(bytes),
            Self::Big => BigEndian::read_u16(bytes),
        }
    }

    /// Reads a `u32` from the first four bytes of `bytes`.
    #[must_use]
    pub fn u32(self, bytes: &[u8]) -> u32 {
        match self {
            Self::Little => LittleEndian::read_u32(bytes),
            Self::Big => BigEndian::read_u32(bytes),
        }
    }

    /// Reads a `u64` from the first eight bytes of `bytes`.
    #[must_use]
    pub fn u64(self, bytes: &[u8]) -> u64 {
        match self {
            Self::Little => LittleEndian::read_u64(bytes),
            Self::Big => BigEndian::read_u64(bytes),
        }
    }

    /// Reads an address-sized word (`Elf32_Off` or `Elf64_Off`) widened to `u64`.
    #[must_use]
    pub fn word(self, class: Class, bytes: &[u8]) -> u64 {
        match class {
            Class::Elf32 => u64::from(self.u32(bytes)),
            Class::Elf64 => self.u64(bytes),
        }
    }
}

impl core::fmt::Display for Class {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Elf32 => f.write_str("ELF32"),
            Self::Elf64 => f.write_str("ELF64"),
        }
    }
}

impl core::fmt::Display for Encoding {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Little => f.write_str("little-endian"),
            Self::Big => f.write_str("big-endian"),
        }
    }
}
