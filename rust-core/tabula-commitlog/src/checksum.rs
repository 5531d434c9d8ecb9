// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Tabula Commit Log - Block checksum
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fletcher-32 over big-endian 16-bit words. Both sums start at 0xffff and
// are folded every 360 words; a trailing odd byte is treated as the high
// half of a final word. The result is part of the on-disk block format, so
// the arithmetic must not change.

/// Words summed between folds.
const BLOCK_WORDS: usize = 360;

#[inline]
fn fold(sum: u32) -> u32 {
    (sum & 0xffff).wrapping_add(sum >> 16)
}

/// Compute the Fletcher-32 checksum of `data`.
pub fn fletcher32(data: &[u8]) -> u32 {
    let mut sum1: u32 = 0xffff;
    let mut sum2: u32 = 0xffff;

    let even = data.len() & !1;
    for block in data[..even].chunks(BLOCK_WORDS * 2) {
        for word in block.chunks_exact(2) {
            sum1 = sum1.wrapping_add(u32::from(u16::from_be_bytes([word[0], word[1]])));
            sum2 = sum2.wrapping_add(sum1);
        }
        sum1 = fold(sum1);
        sum2 = fold(sum2);
    }

    if let Some(&last) = data.get(even) {
        sum1 = sum1.wrapping_add(u32::from(last) << 8);
        sum2 = sum2.wrapping_add(sum1);
        sum1 = fold(sum1);
        sum2 = fold(sum2);
    }

    sum1 = fold(sum1);
    sum2 = fold(sum2);
    (sum2 << 16) | sum1
}
