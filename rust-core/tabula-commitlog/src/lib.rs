// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Tabula Commit Log crate
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Every mutation accepted by a Tabula range server is appended here before
// it is acknowledged. On restart the log is replayed to rebuild the
// in-memory state that had not yet been flushed to cell stores.
//
// # Architecture
//
// A log is a directory of **fragment files** named `0`, `1`, `2`, ... on a
// brokered filesystem (`tabula-fs`). Each fragment starts with a fixed file
// header followed by checksummed, optionally compressed blocks. A fragment is
// rolled once it exceeds the configured size. A LINK block splices another
// log directory into replay order, and purge removes fragments whose
// revisions are durable elsewhere.
//
// ## On-disk block format (all integers little-endian)
//
// ```text
// [10 bytes: magic]           -- "COMMITDATA" or "COMMITLINK"
// [8 bytes:  revision (i64)]
// [8 bytes:  cluster_id (u64)]
// [1 byte:   compression]     -- 0=none, 1=zlib, 2=lz4, ...
// [4 bytes:  data_length]     -- inflated size
// [4 bytes:  data_zlength]    -- stored size
// [4 bytes:  data_checksum]   -- fletcher32 of the stored bytes
// [data_zlength bytes: stored payload]
// ```

//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use tabula_commitlog::{CommitLog, CommitLogConfig, CommitLogReader};
//! use tabula_fs::{AppendFlags, MemoryFilesystem};
//!
//! let fs = Arc::new(MemoryFilesystem::new());
//! let config = CommitLogConfig::default();
//!
//! let mut log = CommitLog::open(fs.clone(), "/logs/user", &config, false).unwrap();
//! log.write(1, b"mutation batch", 100, AppendFlags::Sync).unwrap();
//! log.close().unwrap();
//!
//! let mut reader = CommitLogReader::open(fs, "/logs/user").unwrap();
//! let block = reader.next_block().unwrap().unwrap();
//! assert_eq!(block.revision, 100);
//! assert_eq!(block.payload, b"mutation batch");
//! ```

pub mod block;
pub mod checksum;
pub mod codec;
pub mod commit_log;
pub mod config;
pub mod error;
pub mod fragment;
pub mod reader;
pub mod revision;
pub mod service;
pub mod stream;

pub use block::{BlockHeader, BlockKind};
pub use checksum::fletcher32;
pub use codec::{create_block_codec, inflate_block, BlockCodec, CompressionType};
pub use commit_log::{CommitLog, CommitLogStats, CumulativeFragmentData, CumulativeSizeMap, FragmentStats};
pub use config::{CommitLogConfig, Properties};
pub use error::{CodecError, CodecResult, CommitLogError, CommitLogResult};
pub use fragment::{FragmentId, FragmentInfo, FragmentQueue, LogBase};
pub use reader::{CommitLogReader, LogBlock, ReplayStats};
pub use revision::{is_valid_revision, revision_now, RevisionClock, TIMESTAMP_MIN};
pub use service::{CommitLogService, LinkSource};
pub use stream::{header_size, BlockStream, StreamBlock};
