//! # Test Fixtures
//!
//! Writers for the two halves of an AppImage: an ELF runtime stub
//! ([`elf::ElfStub`]) and a SquashFS image ([`squashfs::SquashfsImage`]),
//! plus [`TempFile`] for tests that need a real path on disk.

#![allow(clippy::missing_panics_doc, clippy::cast_possible_truncation)]

pub mod elf;
pub mod squashfs;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

pub use elf::{Bits, ElfStub, Endian};
pub use squashfs::{SquashfsImage, Tree};

/// Contents of the canonical `app.desktop` fixture.
pub const DESKTOP_ENTRY: &str = "[Desktop Entry]\nType=Application\nName=App\nExec=app\nIcon=app\nCategories=Utility;\n";

/// Contents of the canonical `app.png` fixture.
pub const ICON: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR fixture icon";

/// Root layout of a typical AppImage payload.
#[must_use]
pub fn appimage_root() -> Tree {
    Tree::new()
        .symlink(".DirIcon", "app.png")
        .file("AppRun", "#!/bin/sh\nexec \"$APPDIR/usr/bin/app\" \"$@\"\n")
        .file("app.desktop", DESKTOP_ENTRY)
        .file("app.png", ICON)
        .dir(
            "usr",
            Tree::new()
                .dir("bin", Tree::new().file("app", vec![0x7F, b'E', b'L', b'F', 2, 1, 1]))
                .dir(
                    "share",
                    Tree::new().dir("doc", Tree::new().file("README", "hello from the payload\n")),
                ),
        )
}

/// A 64-bit little-endian runtime with a handful of sections.
#[must_use]
pub fn runtime_stub() -> Vec<u8> {
    ElfStub::new(Bits::B64, Endian::Little)
        .appimage_type(2)
        .section(vec![0x90; 300])
        .section(b"runtime data".to_vec())
        .section(b"\0.text\0.data\0.shstrtab\0".to_vec())
        .build()
}

/// `runtime ++ image`, returned together with the offset of `image`.
#[must_use]
pub fn appimage(runtime: &[u8], image: &[u8]) -> (Vec<u8>, u64) {
    let mut bytes = Vec::with_capacity(runtime.len() + image.len());
    bytes.extend_from_slice(runtime);
    bytes.extend_from_slice(image);
    (bytes, runtime.len() as u64)
}

/// A uniquely named file under the system temp directory, removed on drop.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    pub fn with_contents(contents: &[u8]) -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "appimage-testkit-{}-{n}.AppImage",
            std::process::id()
        ));
        std::fs::write(&path, contents).expect("failed to write fixture");
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the contents in place.
    pub fn rewrite(&self, contents: &[u8]) {
        std::fs::write(&self.path, contents).expect("failed to rewrite fixture");
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
