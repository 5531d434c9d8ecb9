// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Tabula Commit Log - Zlib codec
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Zlib streams via `flate2`. Accepts `--best`, `--normal` and `--fast`.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::{BlockCodec, CompressionType};
use crate::error::{CodecError, CodecResult};

/// Zlib block compression.
#[derive(Debug, Clone, Copy)]
pub struct ZlibCodec {
    level: Compression,
}

impl ZlibCodec {
    /// A codec at an explicit compression level (0-9).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }

    /// The configured compression level.
    pub fn level(&self) -> u32 {
        self.level.level()
    }
}

impl Default for ZlibCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl BlockCodec for ZlibCodec {
    fn compression_type(&self) -> CompressionType {
        CompressionType::Zlib
    }

    fn compress(&self, input: &[u8]) -> CodecResult<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(input.len() / 2), self.level);
        encoder
            .write_all(input)
            .map_err(|e| CodecError::DeflateError(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| CodecError::DeflateError(e.to_string()))
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> CodecResult<Vec<u8>> {
        let mut output = Vec::with_capacity(expected_len);
        ZlibDecoder::new(input)
            .take(expected_len as u64 + 1)
            .read_to_end(&mut output)
            .map_err(|e| CodecError::InflateError(e.to_string()))?;
        if output.len() != expected_len {
            return Err(CodecError::InflateError(format!(
                "zlib block expanded to {} bytes, expected {expected_len}",
                output.len()
            )));
        }
        Ok(output)
    }

    fn set_args(&mut self, args: &[&str]) -> CodecResult<()> {
        for arg in args {
            self.level = match *arg {
                "--best" | "-9" => Compression::best(),
                "--normal" => Compression::default(),
                "--fast" | "-1" => Compression::fast(),
                other => {
                    return Err(CodecError::InvalidArgument {
                        codec: "zlib".to_string(),
                        arg: other.to_string(),
                    })
                }
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_args_levels() {
        let mut codec = ZlibCodec::default();
        codec.set_args(&["--best"]).unwrap();
        assert_eq!(codec.level(), 9);
        codec.set_args(&["--fast"]).unwrap();
        assert_eq!(codec.level(), 1);
        codec.set_args(&["--normal"]).unwrap();
        assert_eq!(codec.level(), 6);
    }

    #[test]
    fn test_truncated_stream_fails() {
        let codec = ZlibCodec::default();
        let mut seed = 0x2545_F491u32;
        let input: Vec<u8> = (0..4000)
            .map(|_| {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (seed >> 16) as u8
            })
            .collect();
        let compressed = codec.compress(&input).unwrap();
        assert!(codec.decompress(&compressed[..compressed.len() / 2], input.len()).is_err());
    }
}
