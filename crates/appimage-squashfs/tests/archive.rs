use appimage_squashfs::{
    Archive, ArchiveError, Compression, Corruption, DecompressError, EntryKind, Error, FormatError,
    IoError,
};
use appimage_testkit::{DESKTOP_ENTRY, ICON, SquashfsImage, TempFile, Tree, appimage, appimage_root, runtime_stub};
use std::collections::BTreeSet;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn open(image: Vec<u8>) -> Archive<Cursor<Vec<u8>>> {
    Archive::from_reader(Cursor::new(image), 0).unwrap()
}

fn names(archive: &mut Archive<Cursor<Vec<u8>>>, path: &str) -> BTreeSet<String> {
    archive
        .list_directory(path)
        .unwrap()
        .iter()
        .map(|e| e.name_lossy().into_owned())
        .collect()
}

/// Text that compresses well but is not a single repeated byte.
fn text(len: usize) -> Vec<u8> {
    (0..)
        .flat_map(|i: u32| format!("line {i}: {}\n", i.wrapping_mul(2_654_435_761)).into_bytes())
        .take(len)
        .collect()
}

#[test]
fn lists_the_appimage_root() {
    let mut archive = open(SquashfsImage::new(appimage_root()).build());

    let expected: BTreeSet<String> = [".DirIcon", "AppRun", "app.desktop", "app.png", "usr"]
        .into_iter()
        .map(str::to_owned)
        .collect();
    assert_eq!(names(&mut archive, "/"), expected);
    assert_eq!(names(&mut archive, ""), expected);

    let kinds: Vec<_> = archive
        .list_directory("/")
        .unwrap()
        .into_iter()
        .map(|e| (e.name_lossy().into_owned(), e.kind()))
        .collect();
    assert!(kinds.contains(&(".DirIcon".to_owned(), EntryKind::Symlink)));
    assert!(kinds.contains(&("AppRun".to_owned(), EntryKind::File)));
    assert!(kinds.contains(&("usr".to_owned(), EntryKind::Directory)));
}

#[test]
fn lists_nested_directories() {
    let mut archive = open(SquashfsImage::new(appimage_root()).build());
    assert_eq!(
        names(&mut archive, "usr"),
        BTreeSet::from(["bin".to_owned(), "share".to_owned()])
    );
    assert_eq!(
        names(&mut archive, "/usr/share/doc"),
        BTreeSet::from(["README".to_owned()])
    );
}

#[test]
fn empty_components_are_ignored() {
    let mut archive = open(SquashfsImage::new(appimage_root()).build());
    let a = archive.read_file("/usr/share/doc/README").unwrap();
    let b = archive.read_file("//usr///share/doc//README").unwrap();
    assert_eq!(a, b);
    assert_eq!(a, b"hello from the payload\n");
}

#[test]
fn reads_uncompressed_and_compressed_files() {
    let contents = text(3 * 4096 + 123);
    let root = Tree::new()
        .file("name.txt", contents.clone())
        .file("empty", Vec::new());

    for compressed in [false, true] {
        let image = SquashfsImage::new(root.clone())
            .compressed(compressed)
            .build();
        let mut archive = open(image);
        assert_eq!(archive.read_file("name.txt").unwrap(), contents);
        assert!(archive.read_file("empty").unwrap().is_empty());
    }
}

#[test]
fn reads_fragment_tails() {
    let small = b"tiny".to_vec();
    let mixed = text(5000);
    let exact = text(2 * 4096);
    let root = Tree::new()
        .file("a", small.clone())
        .file("b", mixed.clone())
        .file("c", exact.clone())
        .dir("d", Tree::new().file("e", text(777)));

    for compressed in [false, true] {
        let image = SquashfsImage::new(root.clone())
            .fragments(true)
            .compressed(compressed)
            .build();
        let mut archive = open(image);
        assert!(archive.superblock().fragment_entry_count > 0);
        assert_eq!(archive.read_file("a").unwrap(), small);
        assert_eq!(archive.read_file("b").unwrap(), mixed);
        assert_eq!(archive.read_file("c").unwrap(), exact);
        assert_eq!(archive.read_file("d/e").unwrap(), text(777));
    }
}

#[test]
fn reads_through_extended_inodes() {
    let contents = text(2 * 4096 + 777);
    let root = appimage_root()
        .file("name.txt", contents.clone())
        .symlink("link.txt", "name.txt");

    for fragments in [false, true] {
        let image = SquashfsImage::new(root.clone())
            .compressed(true)
            .fragments(fragments)
            .extended(true)
            .build();
        let mut archive = open(image);

        assert!(names(&mut archive, "/").contains("usr"));
        assert_eq!(
            names(&mut archive, "usr/share/doc"),
            BTreeSet::from(["README".to_owned()])
        );
        assert_eq!(archive.read_file("name.txt").unwrap(), contents);
        assert_eq!(archive.read_file("link.txt").unwrap(), contents);
        assert_eq!(archive.read_link(".DirIcon").unwrap(), b"app.png");
        assert_eq!(archive.read_file(".DirIcon").unwrap(), ICON);
        assert!(matches!(
            archive.read_file("usr").unwrap_err(),
            Error::Archive(ArchiveError::NotAFile(_))
        ));
    }
}

#[test]
fn reads_sparse_blocks() {
    let mut contents = vec![0u8; 3 * 4096];
    contents.extend_from_slice(b"after the hole");
    contents.extend(std::iter::repeat_n(0, 4096));
    let image = SquashfsImage::new(Tree::new().file("sparse.bin", contents.clone()))
        .sparse(true)
        .build();
    assert!(image.len() < contents.len());

    let mut archive = open(image);
    assert_eq!(archive.read_file("sparse.bin").unwrap(), contents);
}

#[test]
fn large_blocks() {
    let contents = text(300_000);
    let image = SquashfsImage::new(Tree::new().file("big", contents.clone()))
        .block_size(128 * 1024)
        .compressed(true)
        .fragments(true)
        .build();
    let mut archive = open(image);
    assert_eq!(archive.superblock().block_size, 128 * 1024);
    assert_eq!(archive.superblock().block_log, 17);
    assert_eq!(archive.read_file("big").unwrap(), contents);
}

#[test]
fn directories_spanning_metadata_blocks() {
    let root = (0..600).fold(Tree::new(), |tree, i| {
        tree.file(&format!("file_{i:04}"), format!("contents of {i}"))
    });

    for compressed in [false, true] {
        let mut archive = open(SquashfsImage::new(root.clone()).compressed(compressed).build());
        let entries = archive.list_directory("/").unwrap();
        assert_eq!(entries.len(), 600);
        assert_eq!(entries[0].name(), b"file_0000");
        assert_eq!(entries[599].name(), b"file_0599");
        assert_eq!(archive.read_file("file_0599").unwrap(), b"contents of 599");
        assert_eq!(archive.read_file("file_0300").unwrap(), b"contents of 300");
    }
}

#[test]
fn copy_file_streams_contents() {
    let contents = text(10_000);
    let mut archive = open(SquashfsImage::new(Tree::new().file("f", contents.clone())).build());

    let mut out = Vec::new();
    let written = archive.copy_file("f", &mut out).unwrap();
    assert_eq!(written, 10_000);
    assert_eq!(out, contents);
}

#[test]
fn missing_paths_are_not_found() {
    let mut archive = open(SquashfsImage::new(appimage_root()).build());
    for path in ["does/not/exist", "nope", "usr/nope", "AppRun/child"] {
        assert!(
            matches!(
                archive.read_file(path),
                Err(Error::Archive(ArchiveError::NotFound(ref p))) if p == path
            ),
            "{path}"
        );
    }
    assert!(matches!(
        archive.list_directory("usr/nope"),
        Err(Error::Archive(ArchiveError::NotFound(_)))
    ));
}

#[test]
fn listing_a_file_is_not_found() {
    let mut archive = open(SquashfsImage::new(appimage_root()).build());
    assert!(matches!(
        archive.list_directory("AppRun"),
        Err(Error::Archive(ArchiveError::NotFound(_)))
    ));
}

#[test]
fn reading_non_files_fails() {
    let root = appimage_root().fifo("pipe");
    let mut archive = open(SquashfsImage::new(root).build());
    for path in ["/", "usr", "usr/share/", "pipe"] {
        assert!(
            matches!(
                archive.read_file(path),
                Err(Error::Archive(ArchiveError::NotAFile(_)))
            ),
            "{path}"
        );
    }
    let entries = archive.list_directory("/").unwrap();
    let pipe = entries.iter().find(|e| e.name() == b"pipe").unwrap();
    assert_eq!(pipe.kind(), EntryKind::Other);
}

#[test]
fn dir_icon_symlink_is_followed() {
    let mut archive = open(SquashfsImage::new(appimage_root()).build());
    assert_eq!(archive.read_file(".DirIcon").unwrap(), ICON);
    assert_eq!(archive.read_link(".DirIcon").unwrap(), b"app.png");
    assert_eq!(archive.read_file("app.desktop").unwrap(), DESKTOP_ENTRY.as_bytes());
}

#[test]
fn symlinks_resolve_relative_to_their_directory() {
    let root = Tree::new().file("app.png", ICON).dir(
        "usr",
        Tree::new()
            .dir("share", Tree::new().symlink("icon.png", "../../app.png"))
            .symlink("absolute", "/app.png")
            .symlink("dotted", "./share/../../app.png"),
    );
    let mut archive = open(SquashfsImage::new(root).build());
    assert_eq!(archive.read_file("usr/share/icon.png").unwrap(), ICON);
    assert_eq!(archive.read_file("usr/absolute").unwrap(), ICON);
    assert_eq!(archive.read_file("usr/dotted").unwrap(), ICON);
}

#[test]
fn symlinks_are_followed_only_once() {
    let root = Tree::new()
        .file("a.txt", "a")
        .symlink("first", "a.txt")
        .symlink("second", "first")
        .symlink("to_dir", "sub")
        .symlink("dangling", "missing.txt")
        .dir("sub", Tree::new());
    let mut archive = open(SquashfsImage::new(root).build());

    assert_eq!(archive.read_file("first").unwrap(), b"a");
    assert!(matches!(
        archive.read_file("second"),
        Err(Error::Archive(ArchiveError::NotAFile(_)))
    ));
    assert!(matches!(
        archive.read_file("to_dir"),
        Err(Error::Archive(ArchiveError::NotAFile(_)))
    ));
    assert!(matches!(
        archive.read_file("dangling"),
        Err(Error::Archive(ArchiveError::NotFound(ref p))) if p == "missing.txt"
    ));
    assert!(matches!(
        archive.read_link("a.txt"),
        Err(Error::Archive(ArchiveError::NotAFile(_)))
    ));
}

#[test]
fn flipped_compressed_byte_is_corrupt() {
    let mut image = SquashfsImage::new(Tree::new().file("big.txt", text(20_000)))
        .compressed(true)
        .build();
    // First data block: zlib header follows the superblock.
    assert_eq!(image[96], 0x78);
    image[97] ^= 0xFF;

    let mut archive = open(image);
    assert!(matches!(
        archive.read_file("big.txt"),
        Err(Error::Archive(ArchiveError::Corrupt(
            Corruption::Decompression { position: 96, .. }
        )))
    ));
}

#[test]
fn wrong_offset_is_not_an_archive() {
    let (bytes, offset) = appimage(&runtime_stub(), &SquashfsImage::new(appimage_root()).build());
    for wrong in [0, offset - 8, offset + 1] {
        assert!(
            matches!(
                Archive::from_reader(Cursor::new(bytes.clone()), wrong),
                Err(Error::Format(FormatError::NotAnArchive { offset, .. })) if offset == wrong
            ),
            "{wrong}"
        );
    }
}

#[test]
fn short_images_are_truncated() {
    let image = SquashfsImage::new(appimage_root()).build();

    assert!(matches!(
        Archive::from_reader(Cursor::new(image[..50].to_vec()), 0),
        Err(Error::Io(IoError::Truncated { what: "superblock", .. }))
    ));
    assert!(matches!(
        Archive::from_reader(Cursor::new(image[..image.len() - 1].to_vec()), 0),
        Err(Error::Io(IoError::Truncated { .. }))
    ));
}

#[test]
fn unsupported_compressor_can_be_replaced() {
    let mut image = SquashfsImage::new(Tree::new().file("f", text(9000)))
        .compressed(true)
        .build();
    // Relabel the gzip image as lzo.
    image[20..22].copy_from_slice(&3u16.to_le_bytes());

    assert!(matches!(
        Archive::from_reader(Cursor::new(image.clone()), 0),
        Err(Error::Format(FormatError::UnsupportedCompression(Compression::Lzo)))
    ));

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let zlib = move |input: &[u8], output: &mut Vec<u8>, limit: usize| -> Result<(), DecompressError> {
        counter.fetch_add(1, Ordering::Relaxed);
        flate2::read::ZlibDecoder::new(input)
            .take(limit as u64)
            .read_to_end(output)
            .map(drop)
            .map_err(DecompressError::new)
    };

    let mut archive = Archive::with_decompressor(Cursor::new(image), 0, zlib).unwrap();
    assert_eq!(archive.superblock().compression, Compression::Lzo);
    assert_eq!(archive.read_file("f").unwrap(), text(9000));
    assert!(calls.load(Ordering::Relaxed) > 0);
}

#[test]
fn repeated_calls_are_idempotent() {
    let mut archive = open(
        SquashfsImage::new(appimage_root())
            .compressed(true)
            .fragments(true)
            .build(),
    );
    let first = (
        archive.list_directory("/").unwrap(),
        archive.read_file("app.desktop").unwrap(),
    );
    for _ in 0..3 {
        assert_eq!(archive.list_directory("/").unwrap(), first.0);
        assert_eq!(archive.read_file("app.desktop").unwrap(), first.1);
    }
}

#[test]
fn opens_embedded_images_from_disk() {
    let (bytes, offset) = appimage(&runtime_stub(), &SquashfsImage::new(appimage_root()).build());
    let file = TempFile::with_contents(&bytes);

    let mut archive = Archive::open(file.path(), offset).unwrap();
    assert_eq!(archive.offset(), offset);
    assert_eq!(archive.read_file("usr/bin/app").unwrap(), [0x7F, b'E', b'L', b'F', 2, 1, 1]);
    archive.close();

    assert!(matches!(
        Archive::open(file.path().with_extension("missing"), offset),
        Err(Error::Io(IoError::Open { .. }))
    ));
}

#[test]
fn handles_are_send() {
    fn assert_send<T: Send>() {}
    assert_send::<Archive<std::fs::File>>();
}
