// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Tabula Commit Log - Zstandard codec
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Single-shot zstd frames via the `zstd` crate. Accepts `--ultra` (or `-20`)
// for the maximum level, `--best` for level 9 and `--normal` for the
// library default.

use super::{BlockCodec, CompressionType};
use crate::error::{CodecError, CodecResult};

/// Level selected by `--best`.
const BEST_LEVEL: i32 = 9;

/// Zstandard block compression.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    /// A codec at an explicit level, clamped to what the library supports.
    pub fn with_level(level: i32) -> Self {
        let range = zstd::compression_level_range();
        Self {
            level: level.clamp(*range.start(), *range.end()),
        }
    }

    /// The configured compression level.
    pub fn level(&self) -> i32 {
        self.level
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self {
            level: zstd::DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl BlockCodec for ZstdCodec {
    fn compression_type(&self) -> CompressionType {
        CompressionType::Zstd
    }

    fn compress(&self, input: &[u8]) -> CodecResult<Vec<u8>> {
        zstd::bulk::compress(input, self.level).map_err(|e| CodecError::DeflateError(e.to_string()))
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> CodecResult<Vec<u8>> {
        let output = zstd::bulk::decompress(input, expected_len)
            .map_err(|e| CodecError::InflateError(e.to_string()))?;
        if output.len() != expected_len {
            return Err(CodecError::InflateError(format!(
                "zstd block expanded to {} bytes, expected {expected_len}",
                output.len()
            )));
        }
        Ok(output)
    }

    fn set_args(&mut self, args: &[&str]) -> CodecResult<()> {
        for arg in args {
            self.level = match *arg {
                "--ultra" | "-20" => *zstd::compression_level_range().end(),
                "--best" => BEST_LEVEL,
                "--normal" => zstd::DEFAULT_COMPRESSION_LEVEL,
                other => {
                    return Err(CodecError::InvalidArgument {
                        codec: "zstd".to_string(),
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
        let mut codec = ZstdCodec::default();
        codec.set_args(&["--best"]).unwrap();
        assert_eq!(codec.level(), 9);
        codec.set_args(&["--ultra"]).unwrap();
        assert_eq!(codec.level(), 22);
        codec.set_args(&["--normal"]).unwrap();
        assert_eq!(codec.level(), zstd::DEFAULT_COMPRESSION_LEVEL);
        codec.set_args(&["-20"]).unwrap();
        assert_eq!(codec.level(), 22);
        assert!(matches!(
            codec.set_args(&["--fast"]),
            Err(CodecError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_with_level_clamps() {
        assert_eq!(ZstdCodec::with_level(100).level(), 22);
    }

    #[test]
    fn test_short_expected_len_fails() {
        let codec = ZstdCodec::default();
        let input = b"abcabcabcabcabcabcabcabcabcabcabcabcabcabcabc".repeat(20);
        let compressed = codec.compress(&input).unwrap();
        assert!(codec.decompress(&compressed, input.len() - 1).is_err());
        assert_eq!(codec.decompress(&compressed, input.len()).unwrap(), input);
    }
}
