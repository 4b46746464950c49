//! # ELF Header and Section Header Layouts
//!
//! Only the fields needed to find the end of the section data are decoded.
//! Everything else in `Elf{32,64}_Ehdr` and `Elf{32,64}_Shdr` is skipped.

use crate::error::FormatError;
use crate::ident::{Class, ElfIdentity};

/// Byte positions of the decoded fields within one class-specific layout.
#[derive(Debug)]
struct Layout {
    header_size: usize,
    e_shoff: usize,
    e_shentsize: usize,
    e_shnum: usize,
    entry_size: usize,
    sh_offset: usize,
    sh_size: usize,
}

const ELF32: Layout = Layout {
    header_size: 52,
    e_shoff: 0x20,
    e_shentsize: 0x2E,
    e_shnum: 0x30,
    entry_size: 40,
    sh_offset: 0x10,
    sh_size: 0x14,
};

const ELF64: Layout = Layout {
    header_size: 64,
    e_shoff: 0x28,
    e_shentsize: 0x3A,
    e_shnum: 0x3C,
    entry_size: 64,
    sh_offset: 0x18,
    sh_size: 0x20,
};

impl Class {
    const fn layout(self) -> &'static Layout {
        match self {
            Self::Elf32 => &ELF32,
            Self::Elf64 => &ELF64,
        }
    }

    /// Size of `Elf{32,64}_Ehdr`.
    #[must_use]
    pub const fn header_size(self) -> usize {
        self.layout().header_size
    }

    /// Size of `Elf{32,64}_Shdr`.
    #[must_use]
    pub const fn section_entry_size(self) -> usize {
        self.layout().entry_size
    }
}

/// Section header table location from the file header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ElfHeader {
    /// `e_shoff`
    pub sh_offset: u64,
    /// `e_shentsize`
    pub sh_entsize: u16,
    /// `e_shnum`
    pub sh_num: u16,
}

impl ElfHeader {
    /// Decode the header from `bytes`, which start at file offset 0.
    ///
    /// Returns `None` if `bytes` is shorter than the class-specific header.
    #[must_use]
    pub fn parse(identity: &ElfIdentity, bytes: &[u8]) -> Option<Self> {
        let layout = identity.class.layout();
        let bytes = bytes.get(..layout.header_size)?;
        let enc = identity.encoding;

        Some(Self {
            sh_offset: enc.word(identity.class, &bytes[layout.e_shoff..]),
            sh_entsize: enc.u16(&bytes[layout.e_shentsize..]),
            sh_num: enc.u16(&bytes[layout.e_shnum..]),
        })
    }

    /// First byte after the section header table.
    ///
    /// # Errors
    /// [`FormatError::OffsetOverflow`] if the table extends past `u64::MAX`.
    pub fn table_end(&self) -> Result<u64, FormatError> {
        self.entry_offset(self.sh_num)
    }

    /// File offset of the last section header entry, or `None` without entries.
    ///
    /// # Errors
    /// [`FormatError::OffsetOverflow`] if the entry lies past `u64::MAX`.
    pub fn last_entry_offset(&self) -> Result<Option<u64>, FormatError> {
        match self.sh_num.checked_sub(1) {
            Some(last) => self.entry_offset(last).map(Some),
            None => Ok(None),
        }
    }

    fn entry_offset(&self, index: u16) -> Result<u64, FormatError> {
        u64::from(self.sh_entsize)
            .checked_mul(u64::from(index))
            .and_then(|span| self.sh_offset.checked_add(span))
            .ok_or(FormatError::OffsetOverflow)
    }
}

/// File extent of a single section.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SectionHeaderEntry {
    /// `sh_offset`
    pub sh_offset: u64,
    /// `sh_size`
    pub sh_size: u64,
}

impl SectionHeaderEntry {
    /// Decode one section header entry.
    ///
    /// Returns `None` if `bytes` is shorter than the class-specific entry.
    #[must_use]
    pub fn parse(identity: &ElfIdentity, bytes: &[u8]) -> Option<Self> {
        let layout = identity.class.layout();
        let bytes = bytes.get(..layout.entry_size)?;
        let enc = identity.encoding;

        Some(Self {
            sh_offset: enc.word(identity.class, &bytes[layout.sh_offset..]),
            sh_size: enc.word(identity.class, &bytes[layout.sh_size..]),
        })
    }

    /// First byte after the section's data.
    ///
    /// # Errors
    /// [`FormatError::OffsetOverflow`] if the section extends past `u64::MAX`.
    pub fn data_end(&self) -> Result<u64, FormatError> {
        self.sh_offset
            .checked_add(self.sh_size)
            .ok_or(FormatError::OffsetOverflow)
    }
}
