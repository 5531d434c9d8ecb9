// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Tabula Commit Log - Block compression codecs
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A `BlockCodec` turns a payload into a self-describing stored block
// (`[BlockHeader][stored bytes]`) and back. Codecs are stateless per call.
// If compression does not shrink the payload, the block is stored verbatim
// and tagged `None`, so every codec can read verbatim blocks.

mod lz4;
mod none;
mod zlib;
mod zstd;

use std::fmt;

pub use lz4::Lz4Codec;
pub use none::NoneCodec;
pub use zlib::ZlibCodec;
pub use self::zstd::ZstdCodec;

use crate::block::BlockHeader;
use crate::checksum::fletcher32;
use crate::error::{CodecError, CodecResult};

// ---------------------------------------------------------------------------
// CompressionType
// ---------------------------------------------------------------------------

/// The compression tag stored in each block header.
///
/// Tags other than `None`, `Zlib`, `Lz4` and `Zstd` are reserved: they can
/// appear in the format but no codec is built for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionType {
    None = 0,
    Zlib = 1,
    Lz4 = 2,
    Zstd = 3,
    Snappy = 4,
    QuickLz = 5,
    Lzo = 6,
    Bmz = 7,
}

impl CompressionType {
    /// Decode a tag byte.
    pub fn from_byte(byte: u8) -> CodecResult<Self> {
        match byte {
            0 => Ok(Self::None),
            1 => Ok(Self::Zlib),
            2 => Ok(Self::Lz4),
            3 => Ok(Self::Zstd),
            4 => Ok(Self::Snappy),
            5 => Ok(Self::QuickLz),
            6 => Ok(Self::Lzo),
            7 => Ok(Self::Bmz),
            other => Err(CodecError::UnknownCompressionType(other)),
        }
    }

    /// Encode as a tag byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// The name used in codec specs.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Zlib => "zlib",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
            Self::Snappy => "snappy",
            Self::QuickLz => "quicklz",
            Self::Lzo => "lzo",
            Self::Bmz => "bmz",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        [
            Self::None,
            Self::Zlib,
            Self::Lz4,
            Self::Zstd,
            Self::Snappy,
            Self::QuickLz,
            Self::Lzo,
            Self::Bmz,
        ]
        .into_iter()
        .find(|t| t.name() == name)
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// BlockCodec
// ---------------------------------------------------------------------------

/// A block compression codec.
pub trait BlockCodec: Send + Sync + fmt::Debug {
    /// The tag this codec writes for blocks it actually compressed.
    fn compression_type(&self) -> CompressionType;

    /// Compress `input` with no framing.
    fn compress(&self, input: &[u8]) -> CodecResult<Vec<u8>>;

    /// Decompress `input`, which must expand to exactly `expected_len` bytes.
    fn decompress(&self, input: &[u8], expected_len: usize) -> CodecResult<Vec<u8>>;

    /// Apply codec arguments such as `--best`. Codecs without tunables reject
    /// any argument.
    fn set_args(&mut self, args: &[&str]) -> CodecResult<()> {
        match args.first() {
            Some(arg) => Err(CodecError::InvalidArgument {
                codec: self.compression_type().name().to_string(),
                arg: (*arg).to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Produce `[header][stored bytes]` for `input`, leaving `reserve` bytes
    /// of spare capacity for a caller trailer.
    ///
    /// `header` supplies magic, revision and cluster id; the codec fills in
    /// the compression tag, both lengths and the checksum of the stored
    /// bytes.
    fn deflate(&self, input: &[u8], header: &mut BlockHeader, reserve: usize) -> CodecResult<Vec<u8>> {
        let data_length = u32::try_from(input.len())
            .map_err(|_| CodecError::DeflateError(format!("block of {} bytes is too large", input.len())))?;

        let compressed = match self.compression_type() {
            CompressionType::None => None,
            _ => Some(self.compress(input)?).filter(|c| c.len() < input.len()),
        };
        let (stored, compression) = match &compressed {
            Some(c) => (c.as_slice(), self.compression_type()),
            None => (input, CompressionType::None),
        };

        header.set_compression(compression);
        header.set_data_length(data_length);
        header.set_data_zlength(stored.len() as u32);
        header.set_data_checksum(fletcher32(stored));

        let mut out = Vec::with_capacity(BlockHeader::ENCODED_LEN + stored.len() + reserve);
        header.encode_into(&mut out);
        out.extend_from_slice(stored);
        Ok(out)
    }

    /// Validate and decode a block produced by [`BlockCodec::deflate`].
    /// Bytes after the stored payload are ignored.
    fn inflate(&self, input: &[u8]) -> CodecResult<(BlockHeader, Vec<u8>)> {
        let header = BlockHeader::decode(input)?;
        let body = &input[BlockHeader::ENCODED_LEN..];
        let zlength = header.data_zlength() as usize;
        if body.len() < zlength {
            return Err(CodecError::BadHeader(format!(
                "block declares {zlength} stored bytes, only {} remain",
                body.len()
            )));
        }
        let stored = &body[..zlength];

        let actual = fletcher32(stored);
        if actual != header.data_checksum() {
            return Err(CodecError::ChecksumMismatch {
                expected: header.data_checksum(),
                actual,
            });
        }

        let expected_len = header.data_length() as usize;
        let output = match header.compression() {
            CompressionType::None => stored.to_vec(),
            found if found == self.compression_type() => self.decompress(stored, expected_len)?,
            found => {
                return Err(CodecError::CodecMismatch {
                    codec: self.compression_type().name().to_string(),
                    found: found.name().to_string(),
                })
            }
        };

        if output.len() != expected_len {
            return Err(CodecError::InflateError(format!(
                "expected {expected_len} bytes, got {}",
                output.len()
            )));
        }
        Ok((header, output))
    }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// Build a codec from a spec such as `"lz4"`, `"zlib --best"` or `"none"`.
pub fn create_block_codec(spec: &str) -> CodecResult<Box<dyn BlockCodec>> {
    let mut words = spec.split_whitespace();
    let name = words.next().unwrap_or("none").to_ascii_lowercase();
    let args: Vec<&str> = words.collect();

    let kind = CompressionType::from_name(&name).ok_or_else(|| CodecError::UnknownCodec(name.clone()))?;
    let mut codec = codec_for_type(kind)?;
    codec.set_args(&args)?;
    Ok(codec)
}

/// Build a default-configured codec able to inflate blocks tagged `kind`.
pub fn codec_for_type(kind: CompressionType) -> CodecResult<Box<dyn BlockCodec>> {
    match kind {
        CompressionType::None => Ok(Box::new(NoneCodec)),
        CompressionType::Zlib => Ok(Box::new(ZlibCodec::default())),
        CompressionType::Lz4 => Ok(Box::new(Lz4Codec)),
        CompressionType::Zstd => Ok(Box::new(ZstdCodec::default())),
        other => Err(CodecError::UnknownCodec(other.name().to_string())),
    }
}

/// Inflate a block whatever codec wrote it.
pub fn inflate_block(input: &[u8]) -> CodecResult<(BlockHeader, Vec<u8>)> {
    let header = BlockHeader::decode(input)?;
    codec_for_type(header.compression())?.inflate(input)
}
