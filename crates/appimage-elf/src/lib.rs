//! # ELF Payload Offset
//!
//! AppImage-style executables are an ELF runtime with a filesystem image
//! appended to it. The ELF structure says nothing about the appended bytes,
//! so the only way to find them is to work out where the ELF content ends:
//!
//! ```text
//! offset = max(e_shoff + e_shentsize * e_shnum, last.sh_offset + last.sh_size)
//! ```
//!
//! The section header table is normally the last thing a linker writes, but
//! stripped or hand-assembled runtimes may place section data after it, hence
//! the `max`.
//!
//! Both the 32-bit and 64-bit layouts are supported in either byte order;
//! the class and encoding bytes of `e_ident` select the layout at run time.
//! Nothing else (program headers, symbols, machine type) is interpreted.
//!
//! ```no_run
//! let offset = appimage_elf::compute_archive_offset("Some.AppImage")?;
//! println!("SquashFS image starts at byte {offset}");
//! # Ok::<(), appimage_elf::Error>(())
//! ```

pub mod error;
pub mod header;
pub mod ident;
mod offset;

pub use error::{Error, FormatError, IoError, Result};
pub use header::{ElfHeader, SectionHeaderEntry};
pub use ident::{Class, ELF_MAGIC, ElfIdentity, Encoding};
pub use offset::{ArchiveOffset, archive_offset_from_reader, compute_archive_offset, read_identity};
