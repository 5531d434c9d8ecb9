// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory filesystem for Tabula.
//
// Keeps file contents in a `BTreeMap` keyed by normalized path, so directory
// listings fall out of prefix ranges. Besides serving as a scratch filesystem
// it can inject broker failures into the next N creates, appends or syncs,
// which is how the commit log's retry and roll paths are exercised in tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::error::{FsError, FsResult};
use crate::filesystem::{AppendFlags, Dirent, Fd, Filesystem, OpenFlags, RetryPolicy, SmartFd};

/// The kind of failure an injected fault produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The broker connection drops (transient).
    BrokenConnection,
    /// The broker reports an I/O error (transient).
    Io,
    /// The request misses its deadline (transient).
    Timeout,
    /// The broker rejects the request outright (not retryable).
    InvalidArgument,
}

impl FaultKind {
    fn to_error(self, path: &str) -> FsError {
        match self {
            FaultKind::BrokenConnection => FsError::BrokenConnection(format!("injected fault on {path}")),
            FaultKind::Io => FsError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected fault on {path}"),
            )),
            FaultKind::Timeout => FsError::Timeout(format!("injected fault on {path}")),
            FaultKind::InvalidArgument => FsError::InvalidArgument(format!("injected fault on {path}")),
        }
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    creates: VecDeque<FaultKind>,
    appends: VecDeque<FaultKind>,
    syncs: VecDeque<FaultKind>,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    open: HashMap<Fd, String>,
    next_fd: Fd,
    faults: FaultPlan,
}

impl MemoryState {
    fn add_dirs(&mut self, path: &str) {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            self.dirs.insert(current.clone());
        }
    }

    fn open_path(&self, fd: &SmartFd) -> FsResult<&str> {
        let handle = fd.require_fd()?;
        self.open
            .get(&handle)
            .map(String::as_str)
            .ok_or(FsError::BadFileHandle(handle))
    }
}

/// A [`Filesystem`] that lives entirely in process memory.
///
/// Clones share the same namespace.
#[derive(Debug, Clone)]
pub struct MemoryFilesystem {
    state: Arc<Mutex<MemoryState>>,
    retry: RetryPolicy,
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn child_prefix(dir: &str) -> String {
    if dir == "/" {
        "/".to_string()
    } else {
        format!("{dir}/")
    }
}

impl MemoryFilesystem {
    /// Create an empty filesystem with the default retry policy.
    pub fn new() -> Self {
        Self::with_retry_policy(RetryPolicy::default())
    }

    /// Create an empty filesystem with an explicit retry policy.
    pub fn with_retry_policy(retry: RetryPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                next_fd: 1,
                ..MemoryState::default()
            })),
            retry,
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `count` creates fail with `kind`.
    pub fn fail_next_creates(&self, count: usize, kind: FaultKind) {
        self.state().faults.creates.extend(std::iter::repeat(kind).take(count));
    }

    /// Make the next `count` appends fail with `kind`. A failed append
    /// writes nothing.
    pub fn fail_next_appends(&self, count: usize, kind: FaultKind) {
        self.state().faults.appends.extend(std::iter::repeat(kind).take(count));
    }

    /// Make the next `count` flushes or syncs fail with `kind`.
    pub fn fail_next_syncs(&self, count: usize, kind: FaultKind) {
        self.state().faults.syncs.extend(std::iter::repeat(kind).take(count));
    }

    /// A copy of a file's contents, if it exists.
    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(&normalize(path)).cloned()
    }

    /// Write a whole file, creating parent directories.
    pub fn write_file(&self, path: &str, contents: &[u8]) {
        let path = normalize(path);
        let mut state = self.state();
        state.add_dirs(parent_of(&path));
        state.files.insert(path, contents.to_vec());
    }

    /// Cut a file down to `len` bytes, simulating a crash mid-append.
    pub fn truncate_file(&self, path: &str, len: usize) {
        if let Some(data) = self.state().files.get_mut(&normalize(path)) {
            data.truncate(len);
        }
    }

    /// Flip every bit of the byte at `offset`.
    pub fn corrupt_byte(&self, path: &str, offset: usize) {
        if let Some(byte) = self
            .state()
            .files
            .get_mut(&normalize(path))
            .and_then(|data| data.get_mut(offset))
        {
            *byte ^= 0xFF;
        }
    }

    /// All file paths, in sorted order.
    pub fn list_files(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }

    /// Number of currently open descriptors.
    pub fn open_handle_count(&self) -> usize {
        self.state().open.len()
    }
}

impl Default for MemoryFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Filesystem for MemoryFilesystem {
    fn create(&self, fd: &mut SmartFd, replication: i32) -> FsResult<()> {
        let path = normalize(fd.path());
        let mut state = self.state();
        if let Some(kind) = state.faults.creates.pop_front() {
            return Err(kind.to_error(&path));
        }
        match fd.flags() {
            OpenFlags::Overwrite => {}
            OpenFlags::CreateNew if state.files.contains_key(&path) => {
                return Err(FsError::InvalidArgument(format!("{path} already exists")));
            }
            OpenFlags::CreateNew => {}
            OpenFlags::Read => {
                return Err(FsError::InvalidArgument(format!(
                    "cannot create {path} with read-only flags"
                )));
            }
        }
        state.add_dirs(parent_of(&path));
        state.files.insert(path.clone(), Vec::new());
        let handle = state.next_fd;
        state.next_fd += 1;
        state.open.insert(handle, path.clone());
        trace!(file = %path, fd = handle, replication, "Created in-memory file");
        fd.set_fd(handle);
        Ok(())
    }

    fn open(&self, fd: &mut SmartFd) -> FsResult<()> {
        let path = normalize(fd.path());
        let mut state = self.state();
        if !state.files.contains_key(&path) {
            return Err(FsError::NotFound(path));
        }
        let handle = state.next_fd;
        state.next_fd += 1;
        state.open.insert(handle, path);
        fd.set_fd(handle);
        Ok(())
    }

    fn append(&self, fd: &SmartFd, data: &[u8], _flags: AppendFlags) -> FsResult<usize> {
        let mut state = self.state();
        let path = state.open_path(fd)?.to_string();
        if let Some(kind) = state.faults.appends.pop_front() {
            return Err(kind.to_error(&path));
        }
        let file = state
            .files
            .get_mut(&path)
            .ok_or_else(|| FsError::NotFound(path.clone()))?;
        file.extend_from_slice(data);
        Ok(data.len())
    }

    fn pread(&self, fd: &SmartFd, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        let state = self.state();
        let path = state.open_path(fd)?;
        let file = state
            .files
            .get(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(file.len());
        let end = start.saturating_add(len).min(file.len());
        Ok(file[start..end].to_vec())
    }

    fn close(&self, fd: &mut SmartFd) -> FsResult<()> {
        let handle = fd.require_fd();
        fd.invalidate();
        let handle = handle?;
        match self.state().open.remove(&handle) {
            Some(_) => Ok(()),
            None => Err(FsError::BadFileHandle(handle)),
        }
    }

    fn flush(&self, fd: &SmartFd) -> FsResult<()> {
        let mut state = self.state();
        let path = state.open_path(fd)?.to_string();
        match state.faults.syncs.pop_front() {
            Some(kind) => Err(kind.to_error(&path)),
            None => Ok(()),
        }
    }

    fn sync(&self, fd: &SmartFd) -> FsResult<()> {
        self.flush(fd)
    }

    fn remove(&self, path: &str) -> FsResult<()> {
        let path = normalize(path);
        match self.state().files.remove(&path) {
            Some(_) => Ok(()),
            None => Err(FsError::NotFound(path)),
        }
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        let path = normalize(path);
        let prefix = child_prefix(&path);
        let mut state = self.state();
        let had_dir = state.dirs.remove(&path);
        let before = state.files.len();
        state.files.retain(|name, _| !name.starts_with(&prefix));
        let removed_files = before != state.files.len();
        state.dirs.retain(|name| !name.starts_with(&prefix));
        if had_dir || removed_files {
            Ok(())
        } else {
            Err(FsError::NotFound(path))
        }
    }

    fn readdir(&self, path: &str) -> FsResult<Vec<Dirent>> {
        let path = normalize(path);
        let prefix = child_prefix(&path);
        let state = self.state();
        if path != "/" && !state.dirs.contains(&path) {
            return Err(FsError::NotFound(path));
        }

        let mut entries: BTreeMap<String, Dirent> = BTreeMap::new();
        for (name, data) in state.files.range(prefix.clone()..) {
            let Some(rest) = name.strip_prefix(&prefix) else { break };
            match rest.split_once('/') {
                None => {
                    entries.insert(
                        rest.to_string(),
                        Dirent {
                            name: rest.to_string(),
                            length: data.len() as u64,
                            is_dir: false,
                        },
                    );
                }
                Some((sub, _)) => {
                    entries.entry(sub.to_string()).or_insert_with(|| Dirent {
                        name: sub.to_string(),
                        length: 0,
                        is_dir: true,
                    });
                }
            }
        }
        for dir in state.dirs.range(prefix.clone()..) {
            let Some(rest) = dir.strip_prefix(&prefix) else { break };
            let sub = rest.split('/').next().unwrap_or(rest);
            if !sub.is_empty() {
                entries.entry(sub.to_string()).or_insert_with(|| Dirent {
                    name: sub.to_string(),
                    length: 0,
                    is_dir: true,
                });
            }
        }
        Ok(entries.into_values().collect())
    }

    fn mkdirs(&self, path: &str) -> FsResult<()> {
        self.state().add_dirs(&normalize(path));
        Ok(())
    }

    fn exists(&self, path: &str) -> FsResult<bool> {
        let path = normalize(path);
        let state = self.state();
        Ok(path == "/" || state.files.contains_key(&path) || state.dirs.contains(&path))
    }

    fn length(&self, path: &str) -> FsResult<u64> {
        let path = normalize(path);
        self.state()
            .files
            .get(&path)
            .map(|data| data.len() as u64)
            .ok_or(FsError::NotFound(path))
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(fs: &MemoryFilesystem, path: &str) -> SmartFd {
        let mut fd = SmartFd::new(path, OpenFlags::Overwrite);
        fs.create(&mut fd, -1).unwrap();
        fd
    }

    #[test]
    fn test_append_and_pread() {
        let fs = MemoryFilesystem::new();
        let fd = created(&fs, "/logs/user/0");
        fs.append(&fd, b"hello world", AppendFlags::None).unwrap();

        assert_eq!(fs.pread(&fd, 6, 5).unwrap(), b"world");
        assert_eq!(fs.pread(&fd, 20, 5).unwrap(), b"");
        assert_eq!(fs.length("/logs/user/0").unwrap(), 11);
    }

    #[test]
    fn test_readdir_lists_files_and_subdirs() {
        let fs = MemoryFilesystem::new();
        fs.write_file("/logs/user/0", b"a");
        fs.write_file("/logs/user/1", b"bb");
        fs.mkdirs("/logs/user/linked").unwrap();
        fs.write_file("/logs/user2/0", b"c");

        let entries = fs.readdir("/logs/user").unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["0", "1", "linked"]);
        assert_eq!(entries[1].length, 2);
        assert!(entries[2].is_dir);
    }

    #[test]
    fn test_readdir_missing_dir() {
        let fs = MemoryFilesystem::new();
        assert!(fs.readdir("/nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_rmdir_removes_subtree() {
        let fs = MemoryFilesystem::new();
        fs.write_file("/logs/a/0", b"x");
        fs.write_file("/logs/a/1", b"y");
        fs.write_file("/logs/ab/0", b"z");

        fs.rmdir("/logs/a").unwrap();
        assert_eq!(fs.list_files(), vec!["/logs/ab/0".to_string()]);
        assert!(!fs.exists("/logs/a").unwrap());
        assert!(fs.rmdir("/logs/a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_injected_append_fault_writes_nothing() {
        let fs = MemoryFilesystem::new();
        let fd = created(&fs, "/f");
        fs.fail_next_appends(1, FaultKind::BrokenConnection);

        let err = fs.append(&fd, b"data", AppendFlags::Sync).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(fs.file_contents("/f").unwrap(), b"");

        fs.append(&fd, b"data", AppendFlags::Sync).unwrap();
        assert_eq!(fs.file_contents("/f").unwrap(), b"data");
    }

    #[test]
    fn test_retry_write_ok_auto_retry_removes_file() {
        let fs = MemoryFilesystem::new();
        let mut fd = created(&fs, "/logs/7");
        let error = FsError::BrokenConnection("broker".into());
        let mut attempts = 0;

        assert!(fs.retry_write_ok(&mut fd, &error, &mut attempts, true));
        assert_eq!(attempts, 1);
        assert!(!fd.is_valid());
        assert!(!fs.exists("/logs/7").unwrap());
        assert_eq!(fs.open_handle_count(), 0);
    }

    #[test]
    fn test_retry_write_ok_keeps_file_without_auto_retry() {
        let fs = MemoryFilesystem::new();
        let mut fd = created(&fs, "/logs/7");
        fs.append(&fd, b"committed", AppendFlags::Sync).unwrap();
        let error = FsError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        let mut attempts = 0;

        assert!(fs.retry_write_ok(&mut fd, &error, &mut attempts, false));
        assert_eq!(fs.file_contents("/logs/7").unwrap(), b"committed");
    }

    #[test]
    fn test_retry_write_ok_exhausts_limit() {
        let fs = MemoryFilesystem::with_retry_policy(RetryPolicy {
            write_retry_limit: 1,
            retry_delay_ms: 0,
        });
        let mut fd = created(&fs, "/f");
        let error = FsError::BrokenConnection("broker".into());
        let mut attempts = 0;

        assert!(fs.retry_write_ok(&mut fd, &error, &mut attempts, false));
        assert!(!fs.retry_write_ok(&mut fd, &error, &mut attempts, false));
        assert_eq!(attempts, 1);

        let fatal = FsError::InvalidArgument("bad".into());
        let mut fresh = 0;
        assert!(!fs.retry_write_ok(&mut fd, &fatal, &mut fresh, false));
    }

    #[test]
    fn test_corrupt_and_truncate_helpers() {
        let fs = MemoryFilesystem::new();
        fs.write_file("/f", &[0x00, 0x11, 0x22]);
        fs.corrupt_byte("/f", 1);
        assert_eq!(fs.file_contents("/f").unwrap(), vec![0x00, 0xEE, 0x22]);
        fs.truncate_file("/f", 1);
        assert_eq!(fs.length("/f").unwrap(), 1);
    }
}
