//! # Block Decompression
//!
//! Archive traversal only ever asks for "these compressed bytes, decoded".
//! That capability is the [`Decompressor`] trait; the built-in codecs are
//! selected from the superblock's compression id, and callers may supply
//! their own through [`Archive::with_decompressor`](crate::Archive::with_decompressor).
//!
//! | Id | Codec | Feature |
//! |----|-------|---------|
//! | 1 | gzip (zlib stream) | `gzip` |
//! | 2 | lzma (legacy `.lzma`) | `xz` |
//! | 3 | lzo | unsupported |
//! | 4 | xz | `xz` |
//! | 5 | lz4 | unsupported |
//! | 6 | zstd | `zstd` |

use crate::error::FormatError;
use core::fmt;
#[cfg(any(feature = "gzip", feature = "zstd"))]
use std::io::Read;
#[cfg(feature = "xz")]
use std::io::{self, Write};

/// Compression algorithm recorded in the superblock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Compression {
    Gzip,
    Lzma,
    Lzo,
    Xz,
    Lz4,
    Zstd,
    Unknown(u16),
}

impl Compression {
    #[must_use]
    pub const fn from_id(id: u16) -> Self {
        match id {
            1 => Self::Gzip,
            2 => Self::Lzma,
            3 => Self::Lzo,
            4 => Self::Xz,
            5 => Self::Lz4,
            6 => Self::Zstd,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn id(self) -> u16 {
        match self {
            Self::Gzip => 1,
            Self::Lzma => 2,
            Self::Lzo => 3,
            Self::Xz => 4,
            Self::Lz4 => 5,
            Self::Zstd => 6,
            Self::Unknown(id) => id,
        }
    }

    /// The built-in decoder for this algorithm.
    ///
    /// # Errors
    /// [`FormatError::UnsupportedCompression`] if the codec is unknown or its
    /// feature is disabled.
    pub fn decompressor(self) -> Result<Box<dyn Decompressor>, FormatError> {
        match self {
            #[cfg(feature = "gzip")]
            Self::Gzip => Ok(Box::new(Gzip)),
            #[cfg(feature = "xz")]
            Self::Lzma => Ok(Box::new(Lzma)),
            #[cfg(feature = "xz")]
            Self::Xz => Ok(Box::new(Xz)),
            #[cfg(feature = "zstd")]
            Self::Zstd => Ok(Box::new(Zstd)),
            other => Err(FormatError::UnsupportedCompression(other)),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gzip => f.write_str("gzip"),
            Self::Lzma => f.write_str("lzma"),
            Self::Lzo => f.write_str("lzo"),
            Self::Xz => f.write_str("xz"),
            Self::Lz4 => f.write_str("lz4"),
            Self::Zstd => f.write_str("zstd"),
            Self::Unknown(id) => write!(f, "unknown (id {id})"),
        }
    }
}

/// Decoder failure, carried into [`Corruption::Decompression`](crate::Corruption::Decompression).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DecompressError(pub String);

impl DecompressError {
    pub fn new(reason: impl fmt::Display) -> Self {
        Self(reason.to_string())
    }
}

/// Decodes one compressed metadata or data block.
pub trait Decompressor: Send {
    /// Appends the decoded form of `input` to `output`.
    ///
    /// Implementations must fail rather than produce more than `limit` bytes.
    ///
    /// # Errors
    /// Any decoder failure, including output larger than `limit`.
    fn decompress(
        &self,
        input: &[u8],
        output: &mut Vec<u8>,
        limit: usize,
    ) -> Result<(), DecompressError>;
}

impl<F> Decompressor for F
where
    F: Fn(&[u8], &mut Vec<u8>, usize) -> Result<(), DecompressError> + Send,
{
    fn decompress(
        &self,
        input: &[u8],
        output: &mut Vec<u8>,
        limit: usize,
    ) -> Result<(), DecompressError> {
        self(input, output, limit)
    }
}

#[cfg(any(feature = "gzip", feature = "xz", feature = "zstd"))]
fn over_limit(limit: usize) -> DecompressError {
    DecompressError(format!("decoded output exceeds {limit} bytes"))
}

#[cfg(any(feature = "gzip", feature = "zstd"))]
fn check_limit(produced: usize, limit: usize) -> Result<(), DecompressError> {
    if produced > limit {
        return Err(over_limit(limit));
    }
    Ok(())
}

/// Appends to a buffer, failing any write past `room` bytes.
#[cfg(feature = "xz")]
struct BoundedWriter<'a> {
    output: &'a mut Vec<u8>,
    room: usize,
    exceeded: bool,
}

#[cfg(feature = "xz")]
impl<'a> BoundedWriter<'a> {
    const fn new(output: &'a mut Vec<u8>, room: usize) -> Self {
        Self {
            output,
            room,
            exceeded: false,
        }
    }

    /// Runs `decode` against the bounded buffer.
    fn decode<E: fmt::Display>(
        output: &'a mut Vec<u8>,
        limit: usize,
        decode: impl FnOnce(&mut Self) -> Result<(), E>,
    ) -> Result<(), DecompressError> {
        let mut writer = Self::new(output, limit);
        let result = decode(&mut writer);
        if writer.exceeded {
            return Err(over_limit(limit));
        }
        result.map_err(DecompressError::new)
    }
}

#[cfg(feature = "xz")]
impl Write for BoundedWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() > self.room {
            self.exceeded = true;
            return Err(io::Error::other("decoded output exceeds the block limit"));
        }
        self.room -= buf.len();
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// zlib streams, as written by `mksquashfs -comp gzip`.
#[cfg(feature = "gzip")]
#[derive(Debug, Default, Copy, Clone)]
pub struct Gzip;

#[cfg(feature = "gzip")]
impl Decompressor for Gzip {
    fn decompress(
        &self,
        input: &[u8],
        output: &mut Vec<u8>,
        limit: usize,
    ) -> Result<(), DecompressError> {
        let produced = flate2::read::ZlibDecoder::new(input)
            .take(limit as u64 + 1)
            .read_to_end(output)
            .map_err(DecompressError::new)?;
        check_limit(produced, limit)
    }
}

#[cfg(feature = "xz")]
#[derive(Debug, Default, Copy, Clone)]
pub struct Xz;

#[cfg(feature = "xz")]
impl Decompressor for Xz {
    fn decompress(
        &self,
        mut input: &[u8],
        output: &mut Vec<u8>,
        limit: usize,
    ) -> Result<(), DecompressError> {
        BoundedWriter::decode(output, limit, |writer| {
            lzma_rs::xz_decompress(&mut input, writer)
        })
    }
}

#[cfg(feature = "xz")]
#[derive(Debug, Default, Copy, Clone)]
pub struct Lzma;

#[cfg(feature = "xz")]
impl Decompressor for Lzma {
    fn decompress(
        &self,
        mut input: &[u8],
        output: &mut Vec<u8>,
        limit: usize,
    ) -> Result<(), DecompressError> {
        BoundedWriter::decode(output, limit, |writer| {
            lzma_rs::lzma_decompress(&mut input, writer)
        })
    }
}

#[cfg(feature = "zstd")]
#[derive(Debug, Default, Copy, Clone)]
pub struct Zstd;

#[cfg(feature = "zstd")]
impl Decompressor for Zstd {
    fn decompress(
        &self,
        input: &[u8],
        output: &mut Vec<u8>,
        limit: usize,
    ) -> Result<(), DecompressError> {
        let decoder =
            ruzstd::decoding::StreamingDecoder::new(input).map_err(DecompressError::new)?;
        let produced = decoder
            .take(limit as u64 + 1)
            .read_to_end(output)
            .map_err(DecompressError::new)?;
        check_limit(produced, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for id in 0..10 {
            assert_eq!(Compression::from_id(id).id(), id);
        }
        assert_eq!(Compression::from_id(6), Compression::Zstd);
        assert_eq!(Compression::from_id(9), Compression::Unknown(9));
    }

    #[test]
    fn lzo_and_lz4_are_unsupported() {
        for c in [Compression::Lzo, Compression::Lz4, Compression::Unknown(42)] {
            assert_eq!(
                c.decompressor().err(),
                Some(FormatError::UnsupportedCompression(c))
            );
        }
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn gzip_decodes_and_enforces_limit() {
        use flate2::write::ZlibEncoder;
        use std::io::Write;

        let payload = b"squashfs block payload ".repeat(20);
        let mut enc = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&payload).unwrap();
        let packed = enc.finish().unwrap();

        let mut out = Vec::new();
        Gzip.decompress(&packed, &mut out, payload.len()).unwrap();
        assert_eq!(out, payload);

        let mut out = Vec::new();
        assert!(Gzip.decompress(&packed, &mut out, payload.len() - 1).is_err());

        let mut out = Vec::new();
        assert!(Gzip.decompress(b"definitely not zlib", &mut out, 8192).is_err());
    }

    #[cfg(feature = "xz")]
    #[test]
    fn xz_decodes_and_enforces_limit() {
        let payload = b"xz block payload ".repeat(40);
        let mut packed = Vec::new();
        lzma_rs::xz_compress(&mut payload.as_slice(), &mut packed).unwrap();

        let mut out = Vec::new();
        Xz.decompress(&packed, &mut out, payload.len()).unwrap();
        assert_eq!(out, payload);

        let mut out = Vec::new();
        assert!(Xz.decompress(&packed, &mut out, payload.len() - 1).is_err());

        let mut out = Vec::new();
        assert!(Xz.decompress(b"definitely not xz", &mut out, 8192).is_err());
    }

    #[cfg(feature = "xz")]
    #[test]
    fn lzma_decodes_and_enforces_limit() {
        let payload = b"lzma block payload ".repeat(40);
        let mut packed = Vec::new();
        lzma_rs::lzma_compress(&mut payload.as_slice(), &mut packed).unwrap();

        let mut out = Vec::new();
        Lzma.decompress(&packed, &mut out, payload.len()).unwrap();
        assert_eq!(out, payload);

        let mut out = Vec::new();
        assert!(Lzma.decompress(&packed, &mut out, payload.len() - 1).is_err());
    }

    #[cfg(feature = "xz")]
    #[test]
    fn oversized_xz_output_stops_at_the_limit() {
        let zeros = vec![0u8; 4 << 20];
        let mut packed = Vec::new();
        lzma_rs::xz_compress(&mut zeros.as_slice(), &mut packed).unwrap();

        let mut out = Vec::new();
        let err = Xz.decompress(&packed, &mut out, 8192).unwrap_err();
        assert_eq!(err, over_limit(8192));
        assert!(out.len() <= 8192);
    }

    #[cfg(feature = "xz")]
    #[test]
    fn bounded_writer_rejects_overflow() {
        let mut out = b"head".to_vec();
        let mut writer = BoundedWriter::new(&mut out, 6);
        writer.write_all(b"abc").unwrap();
        assert!(writer.write_all(b"defg").is_err());
        assert!(writer.exceeded);
        assert_eq!(out, b"headabc");
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn zstd_decodes_and_enforces_limit() {
        use ruzstd::encoding::{CompressionLevel, compress_to_vec};

        let payload = b"zstd block payload ".repeat(40);
        let packed = compress_to_vec(payload.as_slice(), CompressionLevel::Fastest);

        let mut out = Vec::new();
        Zstd.decompress(&packed, &mut out, payload.len()).unwrap();
        assert_eq!(out, payload);

        let mut out = Vec::new();
        assert!(Zstd.decompress(&packed, &mut out, payload.len() - 1).is_err());

        let mut out = Vec::new();
        assert!(Zstd.decompress(b"definitely not zstd", &mut out, 8192).is_err());
    }

    #[test]
    fn closures_are_decompressors() {
        let identity = |input: &[u8], output: &mut Vec<u8>, _limit: usize| -> Result<(), DecompressError> {
            output.extend_from_slice(input);
            Ok(())
        };
        let mut out = Vec::new();
        identity.decompress(b"abc", &mut out, 3).unwrap();
        assert_eq!(out, b"abc");
    }
}
