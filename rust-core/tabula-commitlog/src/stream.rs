// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Tabula Commit Log - Fragment block stream
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A fragment file is a fixed file header followed by blocks:
//
//   [8 bytes: magic "TBCLFRAG"]
//   [2 bytes: format version (u16 LE)]
//   [2 bytes: reserved]
//   [BlockHeader][stored bytes] ...
//
// `BlockStream` walks those blocks in order, validating each one before its
// payload is handed out.

use tabula_fs::{Filesystem, FsResult, OpenFlags, SmartFd};
use tracing::trace;

use crate::block::{BlockHeader, BlockKind};
use crate::codec::{inflate_block, BlockCodec, NoneCodec};
use crate::error::{CodecError, CodecResult, CommitLogError, CommitLogResult};

/// Magic at the start of every fragment file.
pub const FILE_MAGIC: [u8; 8] = *b"TBCLFRAG";

/// Current fragment format version.
pub const FORMAT_VERSION: u16 = 1;

/// Size of the fixed fragment file header.
pub const fn header_size() -> usize {
    FILE_MAGIC.len() + 2 + 2
}

/// The bytes written at the start of a fresh fragment.
pub fn encode_file_header() -> Vec<u8> {
    let mut out = Vec::with_capacity(header_size());
    out.extend_from_slice(&FILE_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// Returns the format version if `data` starts with a valid file header.
pub fn check_file_header(data: &[u8]) -> Option<u16> {
    if data.len() < header_size() || data[..FILE_MAGIC.len()] != FILE_MAGIC {
        return None;
    }
    let version = u16::from_le_bytes([data[8], data[9]]);
    (version == FORMAT_VERSION).then_some(version)
}

/// Encode a LINK block naming `log_dir`. The payload is the path plus a
/// trailing NUL, always stored uncompressed.
pub fn encode_link_block(cluster_id: u64, revision: i64, log_dir: &str) -> CodecResult<Vec<u8>> {
    let mut payload = Vec::with_capacity(log_dir.len() + 1);
    payload.extend_from_slice(log_dir.as_bytes());
    payload.push(0);
    let mut header = BlockHeader::new(BlockKind::Link, revision, cluster_id);
    NoneCodec.deflate(&payload, &mut header, 0)
}

/// The directory named by a LINK block payload.
pub fn link_target(payload: &[u8]) -> CodecResult<String> {
    let path = payload.strip_suffix(&[0]).unwrap_or(payload);
    String::from_utf8(path.to_vec())
        .map_err(|e| CodecError::BadHeader(format!("link target is not UTF-8: {e}")))
}

/// One validated block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBlock {
    /// DATA or LINK.
    pub kind: BlockKind,
    /// The decoded header.
    pub header: BlockHeader,
    /// Offset of the header within the fragment file.
    pub offset: u64,
    /// The inflated payload.
    pub payload: Vec<u8>,
}

/// Sequential reader over the blocks of one fragment file.
#[derive(Debug)]
pub struct BlockStream {
    path: String,
    data: Vec<u8>,
    offset: usize,
}

impl BlockStream {
    /// Read the whole fragment at `path` and check its file header.
    pub fn open(fs: &dyn Filesystem, path: &str) -> CommitLogResult<Self> {
        let data = read_file(fs, path)?;
        Self::from_bytes(path, data)
    }

    /// Wrap fragment bytes already in memory.
    pub fn from_bytes(path: impl Into<String>, data: Vec<u8>) -> CommitLogResult<Self> {
        let path = path.into();
        if check_file_header(&data).is_none() {
            return Err(CommitLogError::BadFileHeader(path));
        }
        Ok(Self {
            path,
            data,
            offset: header_size(),
        })
    }

    /// Path of the fragment being read.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Offset of the next unread block.
    pub fn offset(&self) -> u64 {
        self.offset as u64
    }

    /// Total length of the fragment file.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Returns `true` if the fragment holds no blocks at all.
    pub fn is_empty(&self) -> bool {
        self.data.len() <= header_size()
    }

    /// The next block, `Ok(None)` at a clean end of file, or a
    /// `Corruption` error naming the bad offset. After an error the stream
    /// stays positioned at the bad block.
    pub fn next_block(&mut self) -> CommitLogResult<Option<StreamBlock>> {
        if self.offset >= self.data.len() {
            return Ok(None);
        }
        let offset = self.offset;
        let corruption = |source| CommitLogError::Corruption {
            fragment: self.path.clone(),
            offset: offset as u64,
            source,
        };

        let (header, payload) = inflate_block(&self.data[offset..]).map_err(corruption)?;
        let kind = header
            .kind()
            .ok_or_else(|| corruption(CodecError::BadHeader("unrecognised block magic".to_string())))?;

        self.offset = offset + BlockHeader::ENCODED_LEN + header.data_zlength() as usize;
        trace!(
            fragment = %self.path,
            offset,
            revision = header.revision(),
            ?kind,
            "Read commit log block"
        );
        Ok(Some(StreamBlock {
            kind,
            header,
            offset: offset as u64,
            payload,
        }))
    }
}

/// Fragment numbers in `log_dir`, ascending. Entries that are not
/// integer-named files are ignored.
pub fn list_fragment_nums(fs: &dyn Filesystem, log_dir: &str) -> FsResult<Vec<u32>> {
    let mut nums: Vec<u32> = fs
        .readdir(log_dir)?
        .into_iter()
        .filter(|entry| !entry.is_dir)
        .filter_map(|entry| entry.name.parse::<u32>().ok())
        .collect();
    nums.sort_unstable();
    Ok(nums)
}

/// Read a whole file through the filesystem.
pub(crate) fn read_file(fs: &dyn Filesystem, path: &str) -> CommitLogResult<Vec<u8>> {
    let length = fs.length(path)?;
    let mut fd = SmartFd::new(path, OpenFlags::Read);
    fs.open(&mut fd)?;
    let result = fs.pread(&fd, 0, length as usize);
    let _ = fs.close(&mut fd);
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::create_block_codec;

    fn fragment_with(blocks: &[Vec<u8>]) -> Vec<u8> {
        let mut data = encode_file_header();
        for block in blocks {
            data.extend_from_slice(block);
        }
        data
    }

    fn data_block(revision: i64, payload: &[u8]) -> Vec<u8> {
        let codec = create_block_codec("zlib").unwrap();
        let mut header = BlockHeader::new(BlockKind::Data, revision, 9);
        codec.deflate(payload, &mut header, 0).unwrap()
    }

    #[test]
    fn test_file_header() {
        let header = encode_file_header();
        assert_eq!(header.len(), header_size());
        assert_eq!(header_size(), 12);
        assert_eq!(check_file_header(&header), Some(FORMAT_VERSION));
        assert_eq!(check_file_header(&header[..11]), None);
        assert_eq!(check_file_header(b"NOTAFRAGMENT"), None);
    }

    #[test]
    fn test_link_block_layout() {
        let block = encode_link_block(3, 77, "/logs/other").unwrap();
        let header = BlockHeader::decode(&block).unwrap();
        assert_eq!(header.kind(), Some(BlockKind::Link));
        assert_eq!(header.revision(), 77);
        assert_eq!(header.data_length(), 12);
        assert_eq!(header.data_zlength(), 12);
        assert_eq!(&block[BlockHeader::ENCODED_LEN..], b"/logs/other\0");
        assert_eq!(link_target(b"/logs/other\0").unwrap(), "/logs/other");
    }

    #[test]
    fn test_stream_yields_blocks_in_order() {
        let data = fragment_with(&[
            data_block(5, b"first batch"),
            encode_link_block(9, 6, "/logs/linked").unwrap(),
            data_block(7, &[1u8; 500]),
        ]);
        let mut stream = BlockStream::from_bytes("/logs/user/0", data).unwrap();

        let first = stream.next_block().unwrap().unwrap();
        assert_eq!(first.kind, BlockKind::Data);
        assert_eq!(first.payload, b"first batch");
        assert_eq!(first.offset, header_size() as u64);

        let link = stream.next_block().unwrap().unwrap();
        assert_eq!(link.kind, BlockKind::Link);
        assert_eq!(link_target(&link.payload).unwrap(), "/logs/linked");

        let third = stream.next_block().unwrap().unwrap();
        assert_eq!(third.header.revision(), 7);
        assert_eq!(third.payload, vec![1u8; 500]);

        assert!(stream.next_block().unwrap().is_none());
    }

    #[test]
    fn test_truncated_tail_is_corruption_at_its_offset() {
        let good = data_block(5, b"complete");
        let bad = data_block(6, b"this one gets cut off");
        let mut data = fragment_with(&[good.clone(), bad]);
        data.truncate(data.len() - 4);

        let mut stream = BlockStream::from_bytes("/logs/user/0", data).unwrap();
        assert!(stream.next_block().unwrap().is_some());
        match stream.next_block() {
            Err(CommitLogError::Corruption { offset, .. }) => {
                assert_eq!(offset, (header_size() + good.len()) as u64);
            }
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_magic_is_corruption() {
        let mut block = data_block(5, b"payload");
        block[0..10].copy_from_slice(b"NOTABLOCK!");
        let mut stream = BlockStream::from_bytes("/f", fragment_with(&[block])).unwrap();
        assert!(matches!(
            stream.next_block(),
            Err(CommitLogError::Corruption { source: CodecError::BadHeader(_), .. })
        ));
    }

    #[test]
    fn test_missing_file_header() {
        assert!(matches!(
            BlockStream::from_bytes("/f", b"short".to_vec()),
            Err(CommitLogError::BadFileHeader(_))
        ));
    }
}
