// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for block header decoding and inflation

#![no_main]

use libfuzzer_sys::fuzz_target;
use tabula_commitlog::{fletcher32, inflate_block, BlockHeader};

fuzz_target!(|data: &[u8]| {
    // Header decoding must reject garbage without panicking
    let _ = BlockHeader::decode(data);

    // Inflation must never hand back bytes that fail their own checksum
    if let Ok((header, payload)) = inflate_block(data) {
        assert_eq!(payload.len(), header.data_length() as usize);
        let stored = &data[BlockHeader::ENCODED_LEN..BlockHeader::ENCODED_LEN + header.data_zlength() as usize];
        assert_eq!(fletcher32(stored), header.data_checksum());
    }
});
