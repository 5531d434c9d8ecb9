// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Metrics-collecting wrapper for Tabula filesystems.
//
// Wraps any `Filesystem` and counts creates, appends, reads, removals and
// write retries, along with byte totals and append latency. The commit log
// reports these next to its own statistics.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;

use crate::error::{FsError, FsResult};
use crate::filesystem::{AppendFlags, Dirent, Filesystem, RetryPolicy, SmartFd};

/// Accumulated statistics for a filesystem.
///
/// All counters are monotonically increasing for the lifetime of the
/// [`MetricsFilesystem`] that owns them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FsStats {
    /// Number of `create` calls.
    pub create_count: u64,
    /// Number of `append` calls.
    pub append_count: u64,
    /// Number of `pread` calls.
    pub read_count: u64,
    /// Number of `remove` and `rmdir` calls.
    pub remove_count: u64,
    /// Number of `flush` and `sync` calls.
    pub sync_count: u64,
    /// Number of calls that returned an error.
    pub error_count: u64,
    /// Number of write retries authorized by the retry policy.
    pub retry_count: u64,
    /// Total bytes successfully appended.
    pub bytes_appended: u64,
    /// Total bytes returned by `pread`.
    pub bytes_read: u64,
    /// Cumulative wall-clock latency of all `append` calls, in milliseconds.
    pub append_latency_sum_ms: f64,
}

/// A filesystem wrapper that collects operation metrics.
#[derive(Debug)]
pub struct MetricsFilesystem<F: Filesystem> {
    inner: F,
    stats: Arc<Mutex<FsStats>>,
}

impl<F: Filesystem> MetricsFilesystem<F> {
    /// Wrap `inner` with metrics collection.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            stats: Arc::new(Mutex::new(FsStats::default())),
        }
    }

    /// A snapshot of the current statistics.
    pub fn stats(&self) -> FsStats {
        self.lock().clone()
    }

    /// Reset all counters to zero.
    pub fn reset_stats(&self) {
        *self.lock() = FsStats::default();
    }

    /// The wrapped filesystem.
    pub fn inner(&self) -> &F {
        &self.inner
    }

    fn lock(&self) -> MutexGuard<'_, FsStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record<T>(&self, result: FsResult<T>, update: impl FnOnce(&mut FsStats, &T)) -> FsResult<T> {
        let mut stats = self.lock();
        match &result {
            Ok(value) => update(&mut *stats, value),
            Err(_) => stats.error_count += 1,
        }
        result
    }
}

impl<F: Filesystem> Filesystem for MetricsFilesystem<F> {
    fn create(&self, fd: &mut SmartFd, replication: i32) -> FsResult<()> {
        self.lock().create_count += 1;
        self.record(self.inner.create(fd, replication), |_, _| {})
    }

    fn open(&self, fd: &mut SmartFd) -> FsResult<()> {
        self.record(self.inner.open(fd), |_, _| {})
    }

    fn append(&self, fd: &SmartFd, data: &[u8], flags: AppendFlags) -> FsResult<usize> {
        let start = Instant::now();
        let result = self.inner.append(fd, data, flags);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.record(result, |stats, written| {
            stats.append_count += 1;
            stats.bytes_appended += *written as u64;
            stats.append_latency_sum_ms += elapsed_ms;
        })
    }

    fn pread(&self, fd: &SmartFd, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        self.record(self.inner.pread(fd, offset, len), |stats, data| {
            stats.read_count += 1;
            stats.bytes_read += data.len() as u64;
        })
    }

    fn close(&self, fd: &mut SmartFd) -> FsResult<()> {
        self.record(self.inner.close(fd), |_, _| {})
    }

    fn flush(&self, fd: &SmartFd) -> FsResult<()> {
        self.record(self.inner.flush(fd), |stats, _| stats.sync_count += 1)
    }

    fn sync(&self, fd: &SmartFd) -> FsResult<()> {
        self.record(self.inner.sync(fd), |stats, _| stats.sync_count += 1)
    }

    fn remove(&self, path: &str) -> FsResult<()> {
        self.record(self.inner.remove(path), |stats, _| stats.remove_count += 1)
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        self.record(self.inner.rmdir(path), |stats, _| stats.remove_count += 1)
    }

    fn readdir(&self, path: &str) -> FsResult<Vec<Dirent>> {
        self.record(self.inner.readdir(path), |_, _| {})
    }

    fn mkdirs(&self, path: &str) -> FsResult<()> {
        self.record(self.inner.mkdirs(path), |_, _| {})
    }

    fn exists(&self, path: &str) -> FsResult<bool> {
        self.record(self.inner.exists(path), |_, _| {})
    }

    fn length(&self, path: &str) -> FsResult<u64> {
        self.record(self.inner.length(path), |_, _| {})
    }

    fn retry_policy(&self) -> &RetryPolicy {
        self.inner.retry_policy()
    }

    fn retry_write_ok(
        &self,
        fd: &mut SmartFd,
        error: &FsError,
        attempts: &mut u32,
        auto_retry: bool,
    ) -> bool {
        let authorized = self.inner.retry_write_ok(fd, error, attempts, auto_retry);
        if authorized {
            self.lock().retry_count += 1;
        }
        authorized
    }
}
