// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Tabula Commit Log - Error types
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Codec errors describe a single block that cannot be trusted. Commit log
// errors wrap those and the filesystem errors, and add the states a caller
// must be able to tell apart: a closed log, a rejected revision, corruption
// found during replay, and a stopped service.

use tabula_fs::FsError;
use thiserror::Error;

/// Errors raised while encoding or decoding a single block.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The header is short, names an unknown compression tag, or declares
    /// more stored bytes than are available.
    #[error("bad block header: {0}")]
    BadHeader(String),

    /// The stored payload does not match the checksum in the header.
    #[error("block checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// The checksum recorded in the block header.
        expected: u32,
        /// The checksum computed over the stored bytes.
        actual: u32,
    },

    /// Decompression failed or produced the wrong number of bytes.
    #[error("inflate error: {0}")]
    InflateError(String),

    /// Compression failed.
    #[error("deflate error: {0}")]
    DeflateError(String),

    /// The compression tag byte is not a known compression type.
    #[error("unknown compression type {0}")]
    UnknownCompressionType(u8),

    /// No codec is available under that name.
    #[error("unknown block codec '{0}'")]
    UnknownCodec(String),

    /// A codec argument was not recognised.
    #[error("invalid argument '{arg}' for {codec} codec")]
    InvalidArgument {
        /// The codec being configured.
        codec: String,
        /// The offending argument.
        arg: String,
    },

    /// The block was compressed with a different codec than the one asked
    /// to inflate it.
    #[error("{codec} codec cannot inflate a {found} block")]
    CodecMismatch {
        /// The codec doing the inflate.
        codec: String,
        /// The compression type recorded in the block.
        found: String,
    },
}

/// Convenience type alias for codec results.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during commit log operations.
#[derive(Debug, Error)]
pub enum CommitLogError {
    /// The underlying filesystem reported an error.
    #[error("commit log filesystem error: {0}")]
    Fs(#[from] FsError),

    /// A block could not be encoded or decoded.
    #[error("commit log codec error: {0}")]
    Codec(#[from] CodecError),

    /// The log has been closed or has no open fragment.
    #[error("commit log '{0}' is closed")]
    Closed(String),

    /// Revisions must be positive.
    #[error("invalid revision {0}")]
    InvalidRevision(i64),

    /// A block in a fragment failed validation during replay.
    #[error("corrupt block in fragment {fragment} at offset {offset}: {source}")]
    Corruption {
        /// Path of the fragment file.
        fragment: String,
        /// Byte offset of the bad block.
        offset: u64,
        /// What was wrong with it.
        #[source]
        source: CodecError,
    },

    /// A fragment file does not start with a valid file header.
    #[error("bad fragment file header in {0}")]
    BadFileHeader(String),

    /// A configuration value could not be used.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The commit log service thread has exited.
    #[error("commit log service has stopped")]
    ServiceStopped,
}

/// Convenience type alias for commit log results.
pub type CommitLogResult<T> = Result<T, CommitLogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_mismatch_display() {
        let err = CodecError::ChecksumMismatch {
            expected: 0xDEAD_BEEF,
            actual: 0x0000_0001,
        };
        assert_eq!(
            err.to_string(),
            "block checksum mismatch: expected 0xdeadbeef, got 0x00000001"
        );
    }

    #[test]
    fn test_corruption_display_names_fragment() {
        let err = CommitLogError::Corruption {
            fragment: "/logs/user/3".to_string(),
            offset: 51,
            source: CodecError::BadHeader("truncated".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("/logs/user/3"));
        assert!(msg.contains("51"));
    }

    #[test]
    fn test_fs_error_converts() {
        let err: CommitLogError = FsError::NotFound("/logs/0".into()).into();
        assert!(matches!(err, CommitLogError::Fs(FsError::NotFound(_))));
    }

    #[test]
    fn test_closed_display() {
        assert_eq!(
            CommitLogError::Closed("/logs/user".into()).to_string(),
            "commit log '/logs/user' is closed"
        );
    }
}
