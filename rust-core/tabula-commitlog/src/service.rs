// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Tabula Commit Log - Channel-driven service
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `CommitLogService` moves a `CommitLog` onto a dedicated OS thread and
// serves it through a command channel:
//
//   callers ─→ [mpsc channel] ─→ log thread ─→ CommitLog (blocking I/O)
//                                     └──────→ [oneshot reply]
//
// The log thread is the only owner of the log, so requests are serialised
// without a lock, and filesystem round-trips never block an async executor.

use std::collections::HashSet;
use std::thread::JoinHandle;

use tabula_fs::AppendFlags;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::commit_log::{CommitLog, CommitLogStats, CumulativeSizeMap};
use crate::error::{CommitLogError, CommitLogResult};
use crate::fragment::LogBase;

/// Default number of requests that may queue before senders wait.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// A log handed to [`CommitLogService::link_log`]; returned once its
/// fragments have been taken.
pub type LinkSource = Box<dyn LogBase + Send>;

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Write {
        cluster_id: u64,
        payload: Vec<u8>,
        revision: i64,
        flags: AppendFlags,
        reply: Reply<CommitLogResult<()>>,
    },
    Link {
        cluster_id: u64,
        other: LinkSource,
        reply: Reply<(CommitLogResult<()>, LinkSource)>,
    },
    Roll(Reply<CommitLogResult<()>>),
    Purge {
        min_revision: i64,
        remove_ok_logs: HashSet<String>,
        reply: Reply<CommitLogResult<HashSet<String>>>,
    },
    Flush(Reply<CommitLogResult<()>>),
    Sync(Reply<CommitLogResult<()>>),
    Close(Reply<CommitLogResult<()>>),
    Stats(Reply<CommitLogStats>),
    SizeMap(Reply<Option<CumulativeSizeMap>>),
    LatestRevision(Reply<i64>),
}

/// Async handle to a commit log running on its own thread.
#[derive(Debug)]
pub struct CommitLogService {
    log_dir: String,
    tx: mpsc::Sender<Command>,
    handle: JoinHandle<CommitLog>,
}

impl CommitLogService {
    /// Start serving `log` with room for `queue_depth` pending requests.
    pub fn spawn(log: CommitLog, queue_depth: usize) -> CommitLogResult<Self> {
        let log_dir = log.log_dir().to_string();
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let handle = std::thread::Builder::new()
            .name(format!("commitlog:{log_dir}"))
            .spawn(move || run(log, rx))?;
        info!(log_dir = %log_dir, queue_depth, "Commit log service started");
        Ok(Self { log_dir, tx, handle })
    }

    pub fn log_dir(&self) -> &str {
        &self.log_dir
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> CommitLogResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| CommitLogError::ServiceStopped)?;
        rx.await.map_err(|_| CommitLogError::ServiceStopped)
    }

    /// Append a DATA block. Resolves once the block has been handed to the
    /// filesystem with `flags`.
    pub async fn write(
        &self,
        cluster_id: u64,
        payload: Vec<u8>,
        revision: i64,
        flags: AppendFlags,
    ) -> CommitLogResult<()> {
        self.request(|reply| Command::Write {
            cluster_id,
            payload,
            revision,
            flags,
            reply,
        })
        .await?
    }

    /// Link `other` into the log. `other` comes back with its fragment queue
    /// emptied, whatever the outcome.
    pub async fn link_log(&self, cluster_id: u64, other: LinkSource) -> (CommitLogResult<()>, Option<LinkSource>) {
        match self
            .request(|reply| Command::Link {
                cluster_id,
                other,
                reply,
            })
            .await
        {
            Ok((result, other)) => (result, Some(other)),
            Err(e) => (Err(e), None),
        }
    }

    pub async fn roll(&self) -> CommitLogResult<()> {
        self.request(Command::Roll).await?
    }

    /// Purge below `min_revision`. Returns the linked log directories that
    /// were removed.
    pub async fn purge(
        &self,
        min_revision: i64,
        remove_ok_logs: HashSet<String>,
    ) -> CommitLogResult<HashSet<String>> {
        self.request(|reply| Command::Purge {
            min_revision,
            remove_ok_logs,
            reply,
        })
        .await?
    }

    pub async fn flush(&self) -> CommitLogResult<()> {
        self.request(Command::Flush).await?
    }

    pub async fn sync(&self) -> CommitLogResult<()> {
        self.request(Command::Sync).await?
    }

    /// Close the log. The service keeps answering; later mutations fail
    /// with `Closed`.
    pub async fn close(&self) -> CommitLogResult<()> {
        self.request(Command::Close).await?
    }

    pub async fn stats(&self) -> CommitLogResult<CommitLogStats> {
        self.request(Command::Stats).await
    }

    pub async fn load_cumulative_size_map(&self) -> CommitLogResult<Option<CumulativeSizeMap>> {
        self.request(Command::SizeMap).await
    }

    pub async fn latest_revision(&self) -> CommitLogResult<i64> {
        self.request(Command::LatestRevision).await
    }

    /// Stop the service after queued requests drain, closing the log, and
    /// hand the log back.
    pub async fn shutdown(self) -> CommitLogResult<CommitLog> {
        let Self { log_dir, tx, handle } = self;
        drop(tx);
        let log = tokio::task::spawn_blocking(move || handle.join())
            .await
            .map_err(|_| CommitLogError::ServiceStopped)?
            .map_err(|_| CommitLogError::ServiceStopped)?;
        info!(log_dir = %log_dir, "Commit log service stopped");
        Ok(log)
    }
}

fn run(mut log: CommitLog, mut rx: mpsc::Receiver<Command>) -> CommitLog {
    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Write {
                cluster_id,
                payload,
                revision,
                flags,
                reply,
            } => {
                let _ = reply.send(log.write(cluster_id, &payload, revision, flags));
            }
            Command::Link {
                cluster_id,
                mut other,
                reply,
            } => {
                let result = log.link_log(cluster_id, other.as_mut());
                let _ = reply.send((result, other));
            }
            Command::Roll(reply) => {
                let _ = reply.send(log.roll());
            }
            Command::Purge {
                min_revision,
                remove_ok_logs,
                reply,
            } => {
                let mut removed = HashSet::new();
                let result = log
                    .purge(min_revision, &remove_ok_logs, &mut removed, None)
                    .map(|()| removed);
                let _ = reply.send(result);
            }
            Command::Flush(reply) => {
                let _ = reply.send(log.flush());
            }
            Command::Sync(reply) => {
                let _ = reply.send(log.sync());
            }
            Command::Close(reply) => {
                let _ = reply.send(log.close());
            }
            Command::Stats(reply) => {
                let _ = reply.send(log.stats());
            }
            Command::SizeMap(reply) => {
                let _ = reply.send(log.load_cumulative_size_map());
            }
            Command::LatestRevision(reply) => {
                let _ = reply.send(log.latest_revision());
            }
        }
    }

    debug!(log_dir = %log.log_dir(), "Command channel closed");
    if let Err(e) = log.close() {
        warn!(log_dir = %log.log_dir(), error = %e, "Error closing commit log at shutdown");
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommitLogConfig;
    use crate::reader::CommitLogReader;
    use std::sync::Arc;
    use tabula_fs::{Filesystem, MemoryFilesystem};

    fn config() -> CommitLogConfig {
        CommitLogConfig {
            range_reference_required: false,
            ..CommitLogConfig::default()
        }
    }

    #[tokio::test]
    async fn test_service_round_trip() {
        let fs = MemoryFilesystem::new();
        let log = CommitLog::open(Arc::new(fs.clone()), "/logs/svc", &config(), false).unwrap();
        let service = CommitLogService::spawn(log, 8).unwrap();

        for revision in 1..=5 {
            service
                .write(1, format!("batch {revision}").into_bytes(), revision, AppendFlags::Flush)
                .await
                .unwrap();
        }
        service.sync().await.unwrap();
        assert_eq!(service.latest_revision().await.unwrap(), 5);

        let log = service.shutdown().await.unwrap();
        assert!(log.is_closed());

        let mut reader = CommitLogReader::open(Arc::new(fs), "/logs/svc").unwrap();
        let revisions: Vec<i64> = reader.read_all().unwrap().iter().map(|b| b.revision).collect();
        assert_eq!(revisions, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_service_reports_errors() {
        let fs = MemoryFilesystem::new();
        let log = CommitLog::open(Arc::new(fs), "/logs/svc", &config(), false).unwrap();
        let service = CommitLogService::spawn(log, 8).unwrap();

        assert!(matches!(
            service.write(1, b"bad".to_vec(), 0, AppendFlags::None).await,
            Err(CommitLogError::InvalidRevision(0))
        ));
        service.close().await.unwrap();
        assert!(matches!(service.flush().await, Err(CommitLogError::Closed(_))));
        assert!(service.load_cumulative_size_map().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_service_link_and_purge() {
        let fs = MemoryFilesystem::new();
        let shared: Arc<dyn Filesystem> = Arc::new(fs.clone());

        let mut old = CommitLog::open(Arc::clone(&shared), "/logs/old", &config(), false).unwrap();
        old.write(1, b"old", 10, AppendFlags::Sync).unwrap();
        old.close().unwrap();

        let log = CommitLog::open(shared, "/logs/main", &config(), false).unwrap();
        let service = CommitLogService::spawn(log, 8).unwrap();

        let (result, old) = service.link_log(1, Box::new(old)).await;
        result.unwrap();
        assert!(old.unwrap().fragments().is_empty());

        service.write(1, b"new".to_vec(), 20, AppendFlags::Sync).await.unwrap();
        service.roll().await.unwrap();

        let removed = service.purge(100, HashSet::new()).await.unwrap();
        assert!(removed.contains("/logs/old"));
        assert!(!fs.exists("/logs/old").unwrap());
        assert!(service.stats().await.unwrap().fragments.is_empty());
    }
}
