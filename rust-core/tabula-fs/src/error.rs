// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filesystem error types for the Tabula broker client contract.
//
// The taxonomy mirrors what a remote filesystem broker reports: connection
// level failures (transient, worth retrying), handle and I/O failures (also
// transient, since a broker restart invalidates handles), benign "already
// gone" failures during deletion, and caller errors.

use thiserror::Error;

/// Errors that can occur when talking to a (brokered) filesystem.
#[derive(Debug, Error)]
pub enum FsError {
    /// The client is not connected to the filesystem broker.
    #[error("not connected to filesystem broker: {0}")]
    NotConnected(String),

    /// An established broker connection was lost mid-request.
    #[error("broken connection to filesystem broker: {0}")]
    BrokenConnection(String),

    /// A connection to the broker could not be established.
    #[error("unable to connect to filesystem broker: {0}")]
    ConnectError(String),

    /// A request could not be sent to the broker.
    #[error("error sending request to filesystem broker: {0}")]
    SendError(String),

    /// The file descriptor is unknown to the broker (e.g. after a restart).
    #[error("bad file handle {0}")]
    BadFileHandle(u32),

    /// An I/O error occurred in the underlying storage layer.
    #[error("filesystem I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file or client has been closed.
    #[error("closed: {0}")]
    Closed(String),

    /// The named file or directory does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// The path is not a valid name in the filesystem namespace.
    #[error("bad filename: {0}")]
    BadFilename(String),

    /// The request did not complete before its deadline.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The request was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl FsError {
    /// Returns `true` for errors a retry of the same operation may cure:
    /// connection failures, timeouts, stale handles, I/O errors and closed
    /// handles.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FsError::NotConnected(_)
                | FsError::BrokenConnection(_)
                | FsError::ConnectError(_)
                | FsError::SendError(_)
                | FsError::Timeout(_)
                | FsError::BadFileHandle(_)
                | FsError::Io(_)
                | FsError::Closed(_)
        )
    }

    /// Returns `true` when the target is already gone. Deletion paths treat
    /// this as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_) | FsError::BadFilename(_))
    }

    /// Map an `io::Error` for `path`, turning `NotFound` into the dedicated
    /// variant so callers can match on it.
    pub fn from_io(path: &str, error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
            std::io::ErrorKind::TimedOut => FsError::Timeout(path.to_string()),
            _ => FsError::Io(error),
        }
    }
}

/// Convenience type alias for filesystem results.
pub type FsResult<T> = Result<T, FsError>;
