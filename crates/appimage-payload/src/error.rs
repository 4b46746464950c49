use appimage_squashfs::ArchiveError;
use std::io;
use std::path::PathBuf;

/// Any failure of the payload operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Elf(#[from] appimage_elf::Error),
    #[error(transparent)]
    Squashfs(#[from] appimage_squashfs::Error),
    /// The file's identity (canonical path, modification time) could not be
    /// determined for the offset cache.
    #[error("failed to inspect {}", path.display())]
    Inspect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Coarse classification of an [`Error`].
///
/// `Io` failures may succeed when retried; `Format` and `Archive` failures
/// are properties of the file's bytes and will not.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The bytes do not have the expected ELF or SquashFS structure.
    Format,
    /// The file could not be opened or read, or was shorter than declared.
    Io,
    /// The archive opened but the requested entry is missing, of the wrong
    /// kind, or damaged.
    Archive,
}

impl Error {
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Elf(appimage_elf::Error::Format(_))
            | Self::Squashfs(appimage_squashfs::Error::Format(_)) => ErrorCategory::Format,
            Self::Elf(appimage_elf::Error::Io(_))
            | Self::Squashfs(appimage_squashfs::Error::Io(_))
            | Self::Inspect { .. } => ErrorCategory::Io,
            Self::Squashfs(appimage_squashfs::Error::Archive(_)) => ErrorCategory::Archive,
        }
    }

    /// The archive-level cause, if this is an [`ErrorCategory::Archive`] error.
    #[must_use]
    pub const fn archive_error(&self) -> Option<&ArchiveError> {
        match self {
            Self::Squashfs(appimage_squashfs::Error::Archive(e)) => Some(e),
            _ => None,
        }
    }

    /// Shorthand for an [`ArchiveError::NotFound`] wrapped into this type.
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::Squashfs(ArchiveError::NotFound(what.into()).into())
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        let format: Error = appimage_elf::Error::from(appimage_elf::FormatError::BadMagic(*b"hsqs")).into();
        assert_eq!(format.category(), ErrorCategory::Format);

        let io: Error = appimage_squashfs::Error::from(appimage_squashfs::IoError::Truncated {
            what: "superblock",
            offset: 0,
            needed: 96,
        })
        .into();
        assert_eq!(io.category(), ErrorCategory::Io);
        assert!(io.archive_error().is_none());

        let archive = Error::not_found("app.desktop");
        assert_eq!(archive.category(), ErrorCategory::Archive);
        assert_eq!(
            archive.archive_error(),
            Some(&ArchiveError::NotFound("app.desktop".to_owned()))
        );
        assert_eq!(archive.to_string(), "no such file or directory: app.desktop");
    }
}
