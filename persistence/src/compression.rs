//! Compression utilities for share-link payloads and store collections
//!
//! Fragments are gzip by default, older links may carry zlib or raw deflate
//! streams, and the local store frames its collections with Zstd.

use crate::error::PersistenceError;
use crate::error::Result;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::read::GzDecoder;
use flate2::read::ZlibDecoder;
use flate2::write::DeflateEncoder;
use flate2::write::GzEncoder;
use flate2::write::ZlibEncoder;
use std::io::Read;
use std::io::Write;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b, 0x08];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const ZLIB_CMF: u8 = 0x78;

/// Number of leading bytes [`detect_codec`] looks at.
pub const DETECT_WINDOW: usize = 8;

/// Supported compression formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Codec {
    /// Self-framed gzip, the format new share links are written in
    #[default]
    Gzip,
    /// Deflate with a zlib header
    Deflate,
    /// Headerless deflate
    DeflateRaw,
    /// Zstd frames, used for store collection files
    Zstd,
}

impl Codec {
    pub const ALL: [Self; 4] = [Self::Gzip, Self::Deflate, Self::DeflateRaw, Self::Zstd];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::DeflateRaw => "deflate-raw",
            Self::Zstd => "zstd",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Codec {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|codec| codec.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| PersistenceError::Compression(format!("unknown codec {s:?}")))
    }
}

/// Guesses which codec produced `bytes` from at most its first
/// [`DETECT_WINDOW`] bytes.
///
/// Anything without a recognizable header is assumed to be raw deflate,
/// which carries none.
pub fn detect_codec(bytes: &[u8]) -> Codec {
    let header = &bytes[..bytes.len().min(DETECT_WINDOW)];
    if header.starts_with(GZIP_MAGIC) {
        Codec::Gzip
    } else if header.starts_with(ZSTD_MAGIC) {
        Codec::Zstd
    } else if is_zlib_header(header) {
        Codec::Deflate
    } else {
        Codec::DeflateRaw
    }
}

fn is_zlib_header(header: &[u8]) -> bool {
    match header {
        [cmf, flg, ..] => *cmf == ZLIB_CMF && ((u16::from(*cmf) << 8) | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}

/// Compression level, mapped onto each codec's own scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Fast compression
    Fast,
    /// Balanced compression
    #[default]
    Balanced,
    /// Maximum compression
    Maximum,
    /// Custom level, clamped to the codec's range
    Custom(i32),
}

impl CompressionLevel {
    /// Convert to a Zstd compression level (1-22)
    pub fn to_zstd_level(self) -> i32 {
        match self {
            Self::Fast => 1,
            Self::Balanced => 3,
            Self::Maximum => 9,
            Self::Custom(level) => level.clamp(1, 22),
        }
    }

    /// Convert to a flate2 compression level (0-9)
    pub fn to_flate_level(self) -> Compression {
        match self {
            Self::Fast => Compression::fast(),
            Self::Balanced => Compression::default(),
            Self::Maximum => Compression::best(),
            Self::Custom(level) => Compression::new(level.clamp(0, 9).unsigned_abs()),
        }
    }
}

fn compression_error(err: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Compression(err.to_string())
}

/// Buffer-at-a-time compressor
#[derive(Debug, Clone, Copy, Default)]
pub struct Compressor {
    level: CompressionLevel,
}

impl Compressor {
    /// Create a new compressor with the specified level
    pub const fn new(level: CompressionLevel) -> Self {
        Self { level }
    }

    pub fn compress(&self, data: &[u8], codec: Codec) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() / 2 + 16);
        StreamCompressor::new(self.level).compress_stream(data, &mut out, codec)?;
        Ok(out)
    }

    pub fn decompress(&self, compressed: &[u8], codec: Codec) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(compressed.len() * 2);
        StreamCompressor::new(self.level).decompress_stream(compressed, &mut out, codec)?;
        Ok(out)
    }

    /// Decompress with whatever codec [`detect_codec`] picks
    pub fn decompress_detected(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        self.decompress(compressed, detect_codec(compressed))
    }

    /// Calculate compression ratio
    pub fn compression_ratio(original_size: usize, compressed_size: usize) -> f32 {
        if original_size == 0 {
            return 0.0;
        }
        1.0 - (compressed_size as f32 / original_size as f32)
    }
}

/// Streaming compressor; large buffers never need to be held twice
pub struct StreamCompressor {
    level: CompressionLevel,
}

impl StreamCompressor {
    pub const fn new(level: CompressionLevel) -> Self {
        Self { level }
    }

    /// Compress from reader to writer, returning the number of input bytes
    pub fn compress_stream<R: Read, W: Write>(
        &self,
        mut reader: R,
        writer: W,
        codec: Codec,
    ) -> Result<u64> {
        let copied = match codec {
            Codec::Gzip => {
                let mut encoder = GzEncoder::new(writer, self.level.to_flate_level());
                let copied = std::io::copy(&mut reader, &mut encoder)?;
                encoder.finish().map_err(compression_error)?;
                copied
            }
            Codec::Deflate => {
                let mut encoder = ZlibEncoder::new(writer, self.level.to_flate_level());
                let copied = std::io::copy(&mut reader, &mut encoder)?;
                encoder.finish().map_err(compression_error)?;
                copied
            }
            Codec::DeflateRaw => {
                let mut encoder = DeflateEncoder::new(writer, self.level.to_flate_level());
                let copied = std::io::copy(&mut reader, &mut encoder)?;
                encoder.finish().map_err(compression_error)?;
                copied
            }
            Codec::Zstd => {
                let mut encoder = zstd::Encoder::new(writer, self.level.to_zstd_level())
                    .map_err(compression_error)?;
                let copied = std::io::copy(&mut reader, &mut encoder)?;
                encoder.finish().map_err(compression_error)?;
                copied
            }
        };
        Ok(copied)
    }

    /// Decompress from reader to writer, returning the number of output bytes
    ///
    /// Corrupt or truncated input is a [`PersistenceError::Compression`].
    pub fn decompress_stream<R: Read, W: Write>(
        &self,
        reader: R,
        mut writer: W,
        codec: Codec,
    ) -> Result<u64> {
        let copied = match codec {
            Codec::Gzip => std::io::copy(&mut GzDecoder::new(reader), &mut writer),
            Codec::Deflate => std::io::copy(&mut ZlibDecoder::new(reader), &mut writer),
            Codec::DeflateRaw => std::io::copy(&mut DeflateDecoder::new(reader), &mut writer),
            Codec::Zstd => {
                let mut decoder = zstd::Decoder::new(reader).map_err(compression_error)?;
                std::io::copy(&mut decoder, &mut writer)
            }
        };
        copied.map_err(compression_error)
    }
}
