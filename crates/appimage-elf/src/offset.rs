//! # Payload Offset Calculation

use crate::error::{FormatError, IoError, Result};
use crate::header::{ElfHeader, SectionHeaderEntry};
use crate::ident::{EI_NIDENT, ELF_MAGIC, ElfIdentity};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Byte position in the host file where an appended payload starts.
///
/// Equal to the file length when nothing is appended.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ArchiveOffset(u64);

impl ArchiveOffset {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<ArchiveOffset> for u64 {
    fn from(value: ArchiveOffset) -> Self {
        value.0
    }
}

impl core::fmt::Display for ArchiveOffset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Computes the offset of the first byte not covered by the ELF structure of `path`.
///
/// # Errors
/// [`IoError::Open`] if the file cannot be opened, otherwise see
/// [`archive_offset_from_reader`].
pub fn compute_archive_offset(path: impl AsRef<Path>) -> Result<ArchiveOffset> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|source| IoError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let offset = archive_offset_from_reader(&mut file)?;
    log::debug!("{}: payload offset {offset}", path.display());
    Ok(offset)
}

/// Computes `max(section_header_table_end, last_section_data_end)` for the ELF
/// image readable from `reader`.
///
/// A file without section headers (`e_shnum == 0`) yields `e_shoff` unchanged.
///
/// # Errors
/// - [`FormatError`] if the identification block does not validate.
/// - [`IoError::Truncated`] if the header or last section entry is cut short.
pub fn archive_offset_from_reader<R: Read + Seek>(reader: &mut R) -> Result<ArchiveOffset> {
    let identity = read_identity(reader)?;

    let mut buf = [0u8; 64];
    let header_bytes = &mut buf[..identity.class.header_size()];
    read_exact_at(reader, 0, header_bytes, "ELF header")?;
    let header = ElfHeader::parse(&identity, header_bytes).ok_or(IoError::Truncated {
        what: "ELF header",
        offset: 0,
        needed: identity.class.header_size(),
    })?;
    log::trace!("{header:?}");

    let sht_end = header.table_end()?;

    let Some(last_entry) = header.last_entry_offset()? else {
        log::warn!(
            "no section headers (e_shnum == 0), using e_shoff {:#x} as payload offset",
            header.sh_offset
        );
        return Ok(ArchiveOffset(header.sh_offset));
    };

    let entry_bytes = &mut buf[..identity.class.section_entry_size()];
    read_exact_at(reader, last_entry, entry_bytes, "last section header")?;
    let entry = SectionHeaderEntry::parse(&identity, entry_bytes).ok_or(IoError::Truncated {
        what: "last section header",
        offset: last_entry,
        needed: identity.class.section_entry_size(),
    })?;
    log::trace!("last section: {entry:?}");

    let last_section_end = entry.data_end()?;
    Ok(ArchiveOffset(sht_end.max(last_section_end)))
}

/// Reads and validates `e_ident` from the start of `reader`.
///
/// Input that does not begin with the four magic bytes is reported as
/// [`FormatError::BadMagic`] even when it is shorter than the identification block.
///
/// # Errors
/// [`FormatError`] for invalid fields, [`IoError::Truncated`] if the magic matches
/// but fewer than 16 bytes follow.
pub fn read_identity<R: Read + Seek>(reader: &mut R) -> Result<ElfIdentity> {
    let mut ident = [0u8; EI_NIDENT];
    reader.seek(SeekFrom::Start(0)).map_err(IoError::Read)?;
    let filled = read_fill(reader, &mut ident).map_err(IoError::Read)?;

    if filled < ELF_MAGIC.len() || ident[..ELF_MAGIC.len()] != ELF_MAGIC {
        return Err(FormatError::BadMagic([ident[0], ident[1], ident[2], ident[3]]).into());
    }
    if filled < EI_NIDENT {
        return Err(IoError::Truncated {
            what: "identification block",
            offset: 0,
            needed: EI_NIDENT,
        }
        .into());
    }

    let identity = ElfIdentity::parse(&ident)?;
    log::debug!(
        "{} {} ELF image{}",
        identity.class,
        identity.encoding,
        identity
            .appimage_type
            .map_or_else(String::new, |t| format!(", AppImage type {t}"))
    );
    Ok(identity)
}

fn read_exact_at<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    buf: &mut [u8],
    what: &'static str,
) -> Result<()> {
    let needed = buf.len();
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(IoError::Read)?;
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => IoError::Truncated {
            what,
            offset,
            needed,
        },
        _ => IoError::Read(e),
    })?;
    Ok(())
}

/// Like `read_exact`, but reports how many bytes were available instead of failing at EOF.
fn read_fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io::Cursor;

    fn elf64_le(shoff: u64, shnum: u16) -> Vec<u8> {
        let mut bytes = vec![0u8; 64];
        bytes[..4].copy_from_slice(&ELF_MAGIC);
        bytes[4] = 2;
        bytes[5] = 1;
        bytes[0x28..0x30].copy_from_slice(&shoff.to_le_bytes());
        bytes[0x3A..0x3C].copy_from_slice(&64_u16.to_le_bytes());
        bytes[0x3C..0x3E].copy_from_slice(&shnum.to_le_bytes());
        bytes
    }

    #[test]
    fn short_non_elf_input_is_bad_magic() {
        let inputs: [&[u8]; 4] = [b"", b"\x7fE", b"MZ\x90\x00", b"#!/bin/sh\necho hi\n"];
        for input in inputs {
            let err = archive_offset_from_reader(&mut Cursor::new(input)).unwrap_err();
            assert!(
                matches!(err, Error::Format(FormatError::BadMagic(_))),
                "{input:?}: {err:?}"
            );
        }
    }

    #[test]
    fn short_identification_is_truncated() {
        let err = archive_offset_from_reader(&mut Cursor::new(b"\x7fELF\x02\x01")).unwrap_err();
        assert!(matches!(err, Error::Io(IoError::Truncated { needed: 16, .. })));
    }

    #[test]
    fn short_header_is_truncated() {
        let mut bytes = elf64_le(0, 0);
        bytes.truncate(40);
        let err = archive_offset_from_reader(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(
            err,
            Error::Io(IoError::Truncated {
                what: "ELF header",
                needed: 64,
                ..
            })
        ));
    }

    #[test]
    fn missing_section_table_is_truncated() {
        let bytes = elf64_le(0x1000, 3);
        let err = archive_offset_from_reader(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(
            err,
            Error::Io(IoError::Truncated {
                offset: 0x1080,
                ..
            })
        ));
    }

    #[test]
    fn zero_sections_yield_shoff() {
        let bytes = elf64_le(0x4242, 0);
        let offset = archive_offset_from_reader(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(offset, ArchiveOffset::new(0x4242));
    }
}
