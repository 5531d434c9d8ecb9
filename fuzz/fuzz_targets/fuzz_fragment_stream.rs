// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for walking the blocks of a fragment file

#![no_main]

use libfuzzer_sys::fuzz_target;
use tabula_commitlog::stream::encode_file_header;
use tabula_commitlog::BlockStream;

fuzz_target!(|data: &[u8]| {
    let mut fragment = encode_file_header();
    fragment.extend_from_slice(data);

    let Ok(mut stream) = BlockStream::from_bytes("/fuzz/0", fragment) else {
        return;
    };
    // Every step either yields a block, ends, or reports corruption; the
    // offset must always move forward on success.
    let mut last = stream.offset();
    while let Ok(Some(block)) = stream.next_block() {
        assert_eq!(block.offset, last);
        assert!(stream.offset() > last);
        last = stream.offset();
    }
});
