// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Tabula Commit Log - LZ4 codec
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw LZ4 blocks via `lz4_flex`. The uncompressed size lives in the block
// header, so the size-prepended framing is not used.

use super::{BlockCodec, CompressionType};
use crate::error::{CodecError, CodecResult};

/// LZ4 block compression. Takes no arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Codec;

impl BlockCodec for Lz4Codec {
    fn compression_type(&self) -> CompressionType {
        CompressionType::Lz4
    }

    fn compress(&self, input: &[u8]) -> CodecResult<Vec<u8>> {
        Ok(lz4_flex::block::compress(input))
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> CodecResult<Vec<u8>> {
        let output = lz4_flex::block::decompress(input, expected_len)
            .map_err(|e| CodecError::InflateError(e.to_string()))?;
        if output.len() != expected_len {
            return Err(CodecError::InflateError(format!(
                "lz4 block expanded to {} bytes, expected {expected_len}",
                output.len()
            )));
        }
        Ok(output)
    }
}
