// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local-disk filesystem for Tabula.
//
// Maps the `/`-separated filesystem namespace onto a directory tree under a
// root path. Open files are held in a descriptor table keyed by a
// monotonically assigned `Fd`, the same way a broker hands out handles.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::error::{FsError, FsResult};
use crate::filesystem::{AppendFlags, Dirent, Fd, Filesystem, OpenFlags, RetryPolicy, SmartFd};

/// A [`Filesystem`] rooted at a local directory.
#[derive(Debug)]
pub struct LocalFilesystem {
    root: PathBuf,
    files: Mutex<HashMap<Fd, File>>,
    next_fd: AtomicU32,
    retry: RetryPolicy,
}

impl LocalFilesystem {
    /// Serve the namespace from `root`, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> FsResult<Self> {
        Self::with_retry_policy(root, RetryPolicy::default())
    }

    /// Like [`LocalFilesystem::new`] with an explicit retry policy.
    pub fn with_retry_policy(root: impl Into<PathBuf>, retry: RetryPolicy) -> FsResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "Local filesystem opened");
        Ok(Self {
            root,
            files: Mutex::new(HashMap::new()),
            next_fd: AtomicU32::new(1),
            retry,
        })
    }

    /// The directory backing the namespace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a namespace path to a local path, rejecting anything that
    /// would escape the root.
    fn resolve(&self, name: &str) -> FsResult<PathBuf> {
        let relative = Path::new(name.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(FsError::BadFilename(name.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn table(&self) -> MutexGuard<'_, HashMap<Fd, File>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, file: File) -> Fd {
        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        self.table().insert(fd, file);
        fd
    }

    fn with_file<T>(
        &self,
        fd: &SmartFd,
        op: impl FnOnce(&mut File) -> std::io::Result<T>,
    ) -> FsResult<T> {
        let handle = fd.require_fd()?;
        let mut table = self.table();
        let file = table.get_mut(&handle).ok_or(FsError::BadFileHandle(handle))?;
        op(file).map_err(|e| FsError::from_io(fd.path(), e))
    }
}

impl Filesystem for LocalFilesystem {
    fn create(&self, fd: &mut SmartFd, replication: i32) -> FsResult<()> {
        let path = self.resolve(fd.path())?;
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        match fd.flags() {
            OpenFlags::Overwrite => options.create(true).truncate(true),
            OpenFlags::CreateNew => options.create_new(true),
            OpenFlags::Read => {
                return Err(FsError::InvalidArgument(format!(
                    "cannot create {} with read-only flags",
                    fd.path()
                )))
            }
        };
        let file = options.open(&path).map_err(|e| FsError::from_io(fd.path(), e))?;
        let handle = self.register(file);
        trace!(file = %fd.path(), fd = handle, replication, "Created file");
        fd.set_fd(handle);
        Ok(())
    }

    fn open(&self, fd: &mut SmartFd) -> FsResult<()> {
        let path = self.resolve(fd.path())?;
        let file = File::open(&path).map_err(|e| FsError::from_io(fd.path(), e))?;
        let handle = self.register(file);
        trace!(file = %fd.path(), fd = handle, "Opened file");
        fd.set_fd(handle);
        Ok(())
    }

    fn append(&self, fd: &SmartFd, data: &[u8], flags: AppendFlags) -> FsResult<usize> {
        self.with_file(fd, |file| {
            file.seek(SeekFrom::End(0))?;
            file.write_all(data)?;
            match flags {
                AppendFlags::None => {}
                AppendFlags::Flush => file.flush()?,
                AppendFlags::Sync => file.sync_data()?,
            }
            Ok(data.len())
        })
    }

    fn pread(&self, fd: &SmartFd, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        self.with_file(fd, |file| {
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = Vec::with_capacity(len);
            Read::by_ref(file).take(len as u64).read_to_end(&mut buf)?;
            Ok(buf)
        })
    }

    fn close(&self, fd: &mut SmartFd) -> FsResult<()> {
        let handle = fd.require_fd();
        fd.invalidate();
        let handle = handle?;
        match self.table().remove(&handle) {
            Some(_) => Ok(()),
            None => Err(FsError::BadFileHandle(handle)),
        }
    }

    fn flush(&self, fd: &SmartFd) -> FsResult<()> {
        self.with_file(fd, |file| file.flush())
    }

    fn sync(&self, fd: &SmartFd) -> FsResult<()> {
        self.with_file(fd, |file| file.sync_all())
    }

    fn remove(&self, path: &str) -> FsResult<()> {
        let local = self.resolve(path)?;
        fs::remove_file(&local).map_err(|e| FsError::from_io(path, e))
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        let local = self.resolve(path)?;
        fs::remove_dir_all(&local).map_err(|e| FsError::from_io(path, e))
    }

    fn readdir(&self, path: &str) -> FsResult<Vec<Dirent>> {
        let local = self.resolve(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&local).map_err(|e| FsError::from_io(path, e))? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            entries.push(Dirent {
                name: entry.file_name().to_string_lossy().into_owned(),
                length: if metadata.is_dir() { 0 } else { metadata.len() },
                is_dir: metadata.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn mkdirs(&self, path: &str) -> FsResult<()> {
        let local = self.resolve(path)?;
        fs::create_dir_all(&local).map_err(|e| FsError::from_io(path, e))
    }

    fn exists(&self, path: &str) -> FsResult<bool> {
        let local = self.resolve(path)?;
        Ok(local.try_exists()?)
    }

    fn length(&self, path: &str) -> FsResult<u64> {
        let local = self.resolve(path)?;
        let metadata = fs::metadata(&local).map_err(|e| FsError::from_io(path, e))?;
        Ok(metadata.len())
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_append_pread() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path()).unwrap();
        fs.mkdirs("/logs/user").unwrap();

        let mut fd = SmartFd::new("/logs/user/0", OpenFlags::Overwrite);
        fs.create(&mut fd, 3).unwrap();
        assert_eq!(fs.append(&fd, b"abcdef", AppendFlags::Flush).unwrap(), 6);
        assert_eq!(fs.pread(&fd, 2, 3).unwrap(), b"cde");
        assert_eq!(fs.pread(&fd, 4, 100).unwrap(), b"ef");
        fs.close(&mut fd).unwrap();

        assert!(!fd.is_valid());
        assert_eq!(fs.length("/logs/user/0").unwrap(), 6);
        assert!(dir.path().join("logs/user/0").exists());
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path()).unwrap();
        let err = fs.mkdirs("/logs/../../etc").unwrap_err();
        assert!(matches!(err, FsError::BadFilename(_)));
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path()).unwrap();
        assert!(fs.remove("/nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_close_twice_reports_bad_handle() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path()).unwrap();
        let mut fd = SmartFd::new("/f", OpenFlags::Overwrite);
        fs.create(&mut fd, -1).unwrap();
        let handle = fd.fd().unwrap();

        fs.close(&mut fd).unwrap();
        fd.set_fd(handle);
        assert!(matches!(fs.close(&mut fd), Err(FsError::BadFileHandle(h)) if h == handle));
        assert!(!fd.is_valid());
    }
}
