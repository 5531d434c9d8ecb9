// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Tabula Commit Log - Identity codec
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

use super::{BlockCodec, CompressionType};
use crate::error::{CodecError, CodecResult};

/// Stores every block verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneCodec;

impl BlockCodec for NoneCodec {
    fn compression_type(&self) -> CompressionType {
        CompressionType::None
    }

    fn compress(&self, input: &[u8]) -> CodecResult<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> CodecResult<Vec<u8>> {
        if input.len() != expected_len {
            return Err(CodecError::InflateError(format!(
                "stored block is {} bytes, expected {expected_len}",
                input.len()
            )));
        }
        Ok(input.to_vec())
    }
}
