// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core filesystem trait for Tabula.
//
// Defines the `Filesystem` trait that the commit log writes through. The
// namespace is hierarchical with `/`-separated names; files are created,
// appended to, read positionally and removed. Calls are synchronous: a
// brokered implementation blocks the calling thread for a network round
// trip, so callers issue them from a dedicated thread.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FsError, FsResult};

/// A file descriptor handed out by a filesystem implementation.
pub type Fd = u32;

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlags {
    /// Open an existing file for reading.
    Read,
    /// Create the file, truncating any existing file of the same name.
    Overwrite,
    /// Create the file, failing if it already exists.
    CreateNew,
}

/// Durability requested for an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppendFlags {
    /// Leave the bytes wherever the implementation buffers them.
    #[default]
    None,
    /// Push the bytes out of client-side buffers.
    Flush,
    /// Force the bytes to stable storage before returning.
    Sync,
}

/// A named file together with its (possibly absent) descriptor.
///
/// The descriptor is cleared whenever the file is closed, including when the
/// close itself fails, so an invalid `SmartFd` never reaches the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartFd {
    path: String,
    flags: OpenFlags,
    fd: Option<Fd>,
}

impl SmartFd {
    /// Describe a file that has not been opened yet.
    pub fn new(path: impl Into<String>, flags: OpenFlags) -> Self {
        Self {
            path: path.into(),
            flags,
            fd: None,
        }
    }

    /// A descriptor-less placeholder with an empty path.
    pub fn invalid() -> Self {
        Self::new(String::new(), OpenFlags::Read)
    }

    /// The file's path in the filesystem namespace.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The flags the file is (to be) opened with.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// The live descriptor, if any.
    pub fn fd(&self) -> Option<Fd> {
        self.fd
    }

    /// Returns `true` if the file is currently open.
    pub fn is_valid(&self) -> bool {
        self.fd.is_some()
    }

    /// Record the descriptor returned by a successful open/create.
    pub fn set_fd(&mut self, fd: Fd) {
        self.fd = Some(fd);
    }

    /// Forget the descriptor.
    pub fn invalidate(&mut self) {
        self.fd = None;
    }

    /// The descriptor, or `FsError::Closed` if the file is not open.
    pub fn require_fd(&self) -> FsResult<Fd> {
        self.fd.ok_or_else(|| FsError::Closed(self.path.clone()))
    }
}

impl fmt::Display for SmartFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fd {
            Some(fd) => write!(f, "{} (fd={fd})", self.path),
            None => write!(f, "{} (closed)", self.path),
        }
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    /// The entry's name, without the directory prefix.
    pub name: String,
    /// Length in bytes (zero for directories).
    pub length: u64,
    /// Whether the entry is itself a directory.
    pub is_dir: bool,
}

/// Policy deciding whether a failed write may be re-attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of re-attempts for a single logical write.
    pub write_retry_limit: u32,
    /// Pause before each re-attempt, in milliseconds (0 = none).
    pub retry_delay_ms: u64,
}

impl RetryPolicy {
    /// Default number of write re-attempts.
    pub const DEFAULT_WRITE_RETRY_LIMIT: u32 = 3;

    /// A policy that never retries.
    pub fn never() -> Self {
        Self {
            write_retry_limit: 0,
            retry_delay_ms: 0,
        }
    }

    /// Returns `true` if another attempt is allowed after `attempts` retries
    /// have already been made for `error`.
    pub fn allows(&self, error: &FsError, attempts: u32) -> bool {
        attempts < self.write_retry_limit && error.is_transient()
    }

    /// The pause before a re-attempt, if any.
    pub fn delay(&self) -> Option<Duration> {
        (self.retry_delay_ms > 0).then(|| Duration::from_millis(self.retry_delay_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            write_retry_limit: Self::DEFAULT_WRITE_RETRY_LIMIT,
            retry_delay_ms: 0,
        }
    }
}

/// A hierarchical filesystem reached through a broker.
///
/// Implementations must be safe to share across threads. Every call may
/// block for a network round trip.
pub trait Filesystem: Send + Sync + fmt::Debug {
    /// Create the file named by `fd` (honouring its [`OpenFlags`]) with the
    /// given replication factor (`-1` = filesystem default) and store the new
    /// descriptor in `fd`.
    fn create(&self, fd: &mut SmartFd, replication: i32) -> FsResult<()>;

    /// Open the existing file named by `fd` for reading.
    fn open(&self, fd: &mut SmartFd) -> FsResult<()>;

    /// Append `data` to an open file. Returns the number of bytes written.
    fn append(&self, fd: &SmartFd, data: &[u8], flags: AppendFlags) -> FsResult<usize>;

    /// Read up to `len` bytes starting at `offset`. A short result means the
    /// end of the file was reached.
    fn pread(&self, fd: &SmartFd, offset: u64, len: usize) -> FsResult<Vec<u8>>;

    /// Close an open file. The descriptor is cleared even on error.
    fn close(&self, fd: &mut SmartFd) -> FsResult<()>;

    /// Push buffered appends out of the client.
    fn flush(&self, fd: &SmartFd) -> FsResult<()>;

    /// Force appended bytes to stable storage.
    fn sync(&self, fd: &SmartFd) -> FsResult<()>;

    /// Remove a file.
    fn remove(&self, path: &str) -> FsResult<()>;

    /// Remove a directory and everything beneath it.
    fn rmdir(&self, path: &str) -> FsResult<()>;

    /// List the entries of a directory.
    fn readdir(&self, path: &str) -> FsResult<Vec<Dirent>>;

    /// Create a directory and any missing ancestors. Idempotent.
    fn mkdirs(&self, path: &str) -> FsResult<()>;

    /// Returns `true` if a file or directory of that name exists.
    fn exists(&self, path: &str) -> FsResult<bool>;

    /// Length of a file in bytes.
    fn length(&self, path: &str) -> FsResult<u64>;

    /// The write retry policy of this client.
    fn retry_policy(&self) -> &RetryPolicy;

    /// Decide whether a failed write against `fd` may be re-attempted.
    ///
    /// The handle is always closed (best-effort). With `auto_retry` the
    /// partially written file is also removed, because the caller is about
    /// to re-create it from scratch; without it the file is kept, since its
    /// earlier contents are committed data and the caller will move on to a
    /// new file. Returns `true` and bumps `attempts` while the policy allows
    /// another attempt for this kind of error.
    fn retry_write_ok(
        &self,
        fd: &mut SmartFd,
        error: &FsError,
        attempts: &mut u32,
        auto_retry: bool,
    ) -> bool {
        if fd.is_valid() {
            if let Err(close_error) = self.close(fd) {
                debug!(file = %fd.path(), error = %close_error, "Ignoring close failure during write retry");
            }
        }
        fd.invalidate();

        if auto_retry && !fd.path().is_empty() {
            if let Err(remove_error) = self.remove(fd.path()) {
                if !remove_error.is_not_found() {
                    debug!(file = %fd.path(), error = %remove_error, "Ignoring remove failure during write retry");
                }
            }
        }

        let policy = self.retry_policy();
        if policy.allows(error, *attempts) {
            *attempts += 1;
            info!(attempt = *attempts, file = %fd.path(), %error, "Retrying filesystem write");
            if let Some(delay) = policy.delay() {
                std::thread::sleep(delay);
            }
            true
        } else {
            warn!(attempts = *attempts, file = %fd.path(), %error, "Giving up on filesystem write");
            false
        }
    }
}

/// Join a directory and a child name with exactly one `/`.
pub fn join_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smart_fd_lifecycle() {
        let mut fd = SmartFd::new("/logs/user/0", OpenFlags::Overwrite);
        assert!(!fd.is_valid());
        assert!(fd.require_fd().is_err());

        fd.set_fd(5);
        assert_eq!(fd.require_fd().unwrap(), 5);
        assert_eq!(fd.to_string(), "/logs/user/0 (fd=5)");

        fd.invalidate();
        assert!(!fd.is_valid());
        assert_eq!(fd.to_string(), "/logs/user/0 (closed)");
    }

    #[test]
    fn test_retry_policy_allows_transient_only() {
        let policy = RetryPolicy::default();
        let transient = FsError::BrokenConnection("broker".into());
        let fatal = FsError::InvalidArgument("bad".into());

        assert!(policy.allows(&transient, 0));
        assert!(policy.allows(&transient, 2));
        assert!(!policy.allows(&transient, 3));
        assert!(!policy.allows(&fatal, 0));
        assert!(!RetryPolicy::never().allows(&transient, 0));
    }

    #[test]
    fn test_retry_policy_delay() {
        assert_eq!(RetryPolicy::default().delay(), None);
        let policy = RetryPolicy {
            write_retry_limit: 1,
            retry_delay_ms: 25,
        };
        assert_eq!(policy.delay(), Some(Duration::from_millis(25)));
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/logs/user", "3"), "/logs/user/3");
        assert_eq!(join_path("/logs/user/", "/3"), "/logs/user/3");
    }
}
