//! Minimal ELF runtime stubs.
//!
//! The stub has a file header, the given section payloads and a section
//! header table (index 0 is the null section). Program headers are omitted.

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Bits {
    B32,
    B64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone)]
pub struct ElfStub {
    bits: Bits,
    endian: Endian,
    sections: Vec<Vec<u8>>,
    table_first: bool,
    appimage_type: Option<u8>,
    no_table_at: Option<u64>,
}

impl ElfStub {
    #[must_use]
    pub const fn new(bits: Bits, endian: Endian) -> Self {
        Self {
            bits,
            endian,
            sections: Vec::new(),
            table_first: false,
            appimage_type: None,
            no_table_at: None,
        }
    }

    /// Appends a `PROGBITS` section holding `data`.
    #[must_use]
    pub fn section(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.sections.push(data.into());
        self
    }

    /// Places the section header table directly after the file header, so the
    /// last section's data ends the file.
    #[must_use]
    pub const fn table_first(mut self) -> Self {
        self.table_first = true;
        self
    }

    #[must_use]
    pub const fn appimage_type(mut self, ty: u8) -> Self {
        self.appimage_type = Some(ty);
        self
    }

    /// Emits `e_shnum = 0` with `e_shoff = shoff` and no table at all.
    #[must_use]
    pub const fn without_section_table(mut self, shoff: u64) -> Self {
        self.no_table_at = Some(shoff);
        self
    }

    const fn header_size(&self) -> usize {
        match self.bits {
            Bits::B32 => 52,
            Bits::B64 => 64,
        }
    }

    const fn entry_size(&self) -> usize {
        match self.bits {
            Bits::B32 => 40,
            Bits::B64 => 64,
        }
    }

    const fn align(&self) -> usize {
        match self.bits {
            Bits::B32 => 4,
            Bits::B64 => 8,
        }
    }

    /// Serializes the stub; its length is the expected payload offset.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        match self.endian {
            Endian::Little => self.build_with::<LittleEndian>(),
            Endian::Big => self.build_with::<BigEndian>(),
        }
    }

    fn build_with<E: ByteOrder>(&self) -> Vec<u8> {
        let header_size = self.header_size();
        let entry_size = self.entry_size();
        let count = self.sections.len() + 1;
        let table_size = count * entry_size;

        let (shoff, data_start) = if self.table_first {
            (header_size, header_size + table_size)
        } else {
            let data_len: usize = self.sections.iter().map(Vec::len).sum();
            (align_up(header_size + data_len, self.align()), header_size)
        };

        let mut out = Vec::new();
        let (shoff_field, shnum) = match self.no_table_at {
            Some(at) => (at, 0),
            None => (shoff as u64, u16::try_from(count).expect("too many sections")),
        };
        self.write_header::<E>(&mut out, shoff_field, shnum);
        debug_assert_eq!(out.len(), header_size);

        let mut placements = Vec::with_capacity(self.sections.len());
        let mut cursor = data_start;
        for data in &self.sections {
            placements.push((cursor as u64, data.len() as u64));
            cursor += data.len();
        }

        let write_table = |out: &mut Vec<u8>| {
            self.write_entry::<E>(out, 0, 0, 0);
            for &(offset, size) in &placements {
                self.write_entry::<E>(out, 1, offset, size);
            }
        };

        if self.no_table_at.is_some() {
            for data in &self.sections {
                out.extend_from_slice(data);
            }
        } else if self.table_first {
            write_table(&mut out);
            for data in &self.sections {
                out.extend_from_slice(data);
            }
        } else {
            for data in &self.sections {
                out.extend_from_slice(data);
            }
            out.resize(shoff, 0);
            write_table(&mut out);
        }

        out
    }

    fn write_word<E: ByteOrder>(&self, out: &mut Vec<u8>, value: u64) {
        match self.bits {
            Bits::B32 => out
                .write_u32::<E>(u32::try_from(value).expect("value exceeds ELF32 word"))
                .unwrap(),
            Bits::B64 => out.write_u64::<E>(value).unwrap(),
        }
    }

    fn write_header<E: ByteOrder>(&self, out: &mut Vec<u8>, shoff: u64, shnum: u16) {
        let mut ident = [0u8; 16];
        ident[..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        ident[4] = match self.bits {
            Bits::B32 => 1,
            Bits::B64 => 2,
        };
        ident[5] = match self.endian {
            Endian::Little => 1,
            Endian::Big => 2,
        };
        ident[6] = 1;
        if let Some(ty) = self.appimage_type {
            ident[8..11].copy_from_slice(&[b'A', b'I', ty]);
        }
        out.extend_from_slice(&ident);

        let machine = match self.bits {
            Bits::B32 => 3,
            Bits::B64 => 62,
        };
        out.write_u16::<E>(2).unwrap(); // e_type: ET_EXEC
        out.write_u16::<E>(machine).unwrap();
        out.write_u32::<E>(1).unwrap(); // e_version
        self.write_word::<E>(out, 0); // e_entry
        self.write_word::<E>(out, 0); // e_phoff
        self.write_word::<E>(out, shoff);
        out.write_u32::<E>(0).unwrap(); // e_flags
        out.write_u16::<E>(self.header_size() as u16).unwrap();
        out.write_u16::<E>(0).unwrap(); // e_phentsize
        out.write_u16::<E>(0).unwrap(); // e_phnum
        out.write_u16::<E>(self.entry_size() as u16).unwrap();
        out.write_u16::<E>(shnum).unwrap();
        out.write_u16::<E>(0).unwrap(); // e_shstrndx
    }

    fn write_entry<E: ByteOrder>(&self, out: &mut Vec<u8>, ty: u32, offset: u64, size: u64) {
        out.write_u32::<E>(0).unwrap(); // sh_name
        out.write_u32::<E>(ty).unwrap();
        self.write_word::<E>(out, 0); // sh_flags
        self.write_word::<E>(out, 0); // sh_addr
        self.write_word::<E>(out, offset);
        self.write_word::<E>(out, size);
        out.write_u32::<E>(0).unwrap(); // sh_link
        out.write_u32::<E>(0).unwrap(); // sh_info
        self.write_word::<E>(out, 1); // sh_addralign
        self.write_word::<E>(out, 0); // sh_entsize
    }
}

const fn align_up(x: usize, align: usize) -> usize {
    (x + align - 1) & !(align - 1)
}
