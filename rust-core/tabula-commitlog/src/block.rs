// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Tabula Commit Log - Block header
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Every block in a fragment starts with a fixed-size header. All integers
// are little-endian:
//
//   [10 bytes: magic]            -- "COMMITDATA" or "COMMITLINK"
//   [8 bytes:  revision (i64)]
//   [8 bytes:  cluster_id (u64)]
//   [1 byte:   compression type]
//   [4 bytes:  data_length (u32)]   -- uncompressed size
//   [4 bytes:  data_zlength (u32)]  -- stored size
//   [4 bytes:  data_checksum (u32)] -- fletcher32 of the stored bytes

use crate::codec::CompressionType;
use crate::error::{CodecError, CodecResult};

/// Magic of a block carrying a serialized mutation batch.
pub const MAGIC_DATA: [u8; 10] = *b"COMMITDATA";

/// Magic of a block naming another log directory to replay.
pub const MAGIC_LINK: [u8; 10] = *b"COMMITLINK";

/// What a block's payload means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// A mutation batch.
    Data,
    /// A NUL-terminated path of a linked log directory.
    Link,
}

impl BlockKind {
    /// Classify a magic value. Returns `None` for anything unrecognised.
    pub fn from_magic(magic: &[u8; 10]) -> Option<Self> {
        match magic {
            m if *m == MAGIC_DATA => Some(Self::Data),
            m if *m == MAGIC_LINK => Some(Self::Link),
            _ => None,
        }
    }

    /// The magic written for this kind.
    pub fn magic(self) -> [u8; 10] {
        match self {
            Self::Data => MAGIC_DATA,
            Self::Link => MAGIC_LINK,
        }
    }
}

/// The fixed header in front of every stored block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    magic: [u8; 10],
    revision: i64,
    cluster_id: u64,
    compression: CompressionType,
    data_length: u32,
    data_zlength: u32,
    data_checksum: u32,
}

impl BlockHeader {
    /// Size of an encoded header in bytes.
    pub const ENCODED_LEN: usize = 10 + 8 + 8 + 1 + 4 + 4 + 4;

    /// A header template for a block of `kind`. Lengths and checksum are
    /// filled in by the codec.
    pub fn new(kind: BlockKind, revision: i64, cluster_id: u64) -> Self {
        Self {
            magic: kind.magic(),
            revision,
            cluster_id,
            compression: CompressionType::None,
            data_length: 0,
            data_zlength: 0,
            data_checksum: 0,
        }
    }

    pub fn magic(&self) -> &[u8; 10] {
        &self.magic
    }

    /// The block kind, if the magic is recognised.
    pub fn kind(&self) -> Option<BlockKind> {
        BlockKind::from_magic(&self.magic)
    }

    pub fn revision(&self) -> i64 {
        self.revision
    }

    pub fn cluster_id(&self) -> u64 {
        self.cluster_id
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    pub fn data_length(&self) -> u32 {
        self.data_length
    }

    pub fn data_zlength(&self) -> u32 {
        self.data_zlength
    }

    pub fn data_checksum(&self) -> u32 {
        self.data_checksum
    }

    pub fn set_compression(&mut self, compression: CompressionType) {
        self.compression = compression;
    }

    pub fn set_data_length(&mut self, len: u32) {
        self.data_length = len;
    }

    pub fn set_data_zlength(&mut self, len: u32) {
        self.data_zlength = len;
    }

    pub fn set_data_checksum(&mut self, checksum: u32) {
        self.data_checksum = checksum;
    }

    /// Append the encoded header to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(Self::ENCODED_LEN);
        out.extend_from_slice(&self.magic);
        out.extend_from_slice(&self.revision.to_le_bytes());
        out.extend_from_slice(&self.cluster_id.to_le_bytes());
        out.push(self.compression.to_byte());
        out.extend_from_slice(&self.data_length.to_le_bytes());
        out.extend_from_slice(&self.data_zlength.to_le_bytes());
        out.extend_from_slice(&self.data_checksum.to_le_bytes());
    }

    /// Encode the header into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        self.encode_into(&mut out);
        out
    }

    /// Decode a header from the front of `data`.
    ///
    /// Only the length and the compression tag are validated; the magic is
    /// left for the caller to interpret.
    pub fn decode(data: &[u8]) -> CodecResult<Self> {
        if data.len() < Self::ENCODED_LEN {
            return Err(CodecError::BadHeader(format!(
                "need {} header bytes, have {}",
                Self::ENCODED_LEN,
                data.len()
            )));
        }

        let mut magic = [0u8; 10];
        magic.copy_from_slice(&data[0..10]);
        let compression = CompressionType::from_byte(data[26])?;

        Ok(Self {
            magic,
            revision: i64::from_le_bytes(le_array(&data[10..18])),
            cluster_id: u64::from_le_bytes(le_array(&data[18..26])),
            compression,
            data_length: u32::from_le_bytes(le_array(&data[27..31])),
            data_zlength: u32::from_le_bytes(le_array(&data[31..35])),
            data_checksum: u32::from_le_bytes(le_array(&data[35..39])),
        })
    }
}

/// Copy a slice of known length into a fixed array.
fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_len() {
        assert_eq!(BlockHeader::ENCODED_LEN, 39);
        let header = BlockHeader::new(BlockKind::Data, 1, 2);
        assert_eq!(header.encode().len(), BlockHeader::ENCODED_LEN);
    }

    #[test]
    fn test_field_layout() {
        let mut header = BlockHeader::new(BlockKind::Link, -5, 0x0102_0304_0506_0708);
        header.set_compression(CompressionType::Zlib);
        header.set_data_length(300);
        header.set_data_zlength(20);
        header.set_data_checksum(0xAABB_CCDD);

        let bytes = header.encode();
        assert_eq!(&bytes[0..10], b"COMMITLINK");
        assert_eq!(&bytes[10..18], &(-5i64).to_le_bytes());
        assert_eq!(bytes[18], 0x08);
        assert_eq!(bytes[26], CompressionType::Zlib.to_byte());
        assert_eq!(&bytes[35..39], &[0xDD, 0xCC, 0xBB, 0xAA]);

        let decoded = BlockHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.kind(), Some(BlockKind::Link));
    }

    #[test]
    fn test_decode_short_input() {
        let bytes = BlockHeader::new(BlockKind::Data, 7, 0).encode();
        let err = BlockHeader::decode(&bytes[..20]).unwrap_err();
        assert!(matches!(err, CodecError::BadHeader(_)));
    }

    #[test]
    fn test_decode_unknown_compression_tag() {
        let mut bytes = BlockHeader::new(BlockKind::Data, 7, 0).encode();
        bytes[26] = 200;
        assert!(matches!(
            BlockHeader::decode(&bytes),
            Err(CodecError::UnknownCompressionType(200))
        ));
    }

    #[test]
    fn test_unknown_magic_decodes_without_kind() {
        let mut bytes = BlockHeader::new(BlockKind::Data, 7, 0).encode();
        bytes[0..10].copy_from_slice(b"GARBAGE!!!");
        let header = BlockHeader::decode(&bytes).unwrap();
        assert_eq!(header.kind(), None);
    }
}
