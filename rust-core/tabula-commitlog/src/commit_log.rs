// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Tabula Commit Log - Writer and purge coordinator
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `CommitLog` owns one log directory on a brokered filesystem. Mutations are
// compressed into DATA blocks and appended to the current fragment file
// `<log_dir>/<num>`. Once a fragment grows past the roll limit it is closed
// and recorded in the fragment queue. Other logs can be spliced in with a
// LINK block, and `purge` deletes fragments whose revisions have been
// persisted elsewhere.
//
// All operations take `&mut self`; callers that share a log across threads
// either wrap it in a mutex or hand it to `CommitLogService`, which owns it
// on a dedicated thread.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tabula_fs::{join_path, AppendFlags, Filesystem, FsError, OpenFlags, SmartFd};
use tracing::{debug, error, info, warn};

use crate::block::{BlockHeader, BlockKind};
use crate::codec::BlockCodec;
use crate::config::CommitLogConfig;
use crate::error::{CommitLogError, CommitLogResult};
use crate::fragment::{FragmentId, FragmentInfo, FragmentQueue, LogBase};
use crate::revision::{is_valid_revision, TIMESTAMP_MIN};
use crate::stream::{encode_file_header, encode_link_block, header_size, list_fragment_nums};

// ---------------------------------------------------------------------------
// Public data types
// ---------------------------------------------------------------------------

/// One entry of the cumulative size map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CumulativeFragmentData {
    /// Bytes in this fragment.
    pub size: u64,
    /// Fragment number.
    pub fragno: u32,
    /// Position counted from the newest fragment (0 = newest).
    pub distance: u32,
    /// Bytes from the newest fragment down to and including this one.
    pub cumulative_size: u64,
}

/// Revision to size bookkeeping, keyed by fragment revision.
pub type CumulativeSizeMap = BTreeMap<i64, CumulativeFragmentData>;

/// Per-fragment statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FragmentStats {
    pub num: u32,
    pub dir: String,
    pub size: u64,
    pub revision: i64,
    pub references: u32,
}

/// A snapshot of a log's state for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitLogStats {
    pub log_dir: String,
    pub closed: bool,
    pub needs_roll: bool,
    pub current_fragment: FragmentStats,
    pub fragments: Vec<FragmentStats>,
    pub reap_set_len: usize,
    pub linked_logs: usize,
}

// ---------------------------------------------------------------------------
// CommitLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogState {
    /// A fragment is open for appends.
    Open,
    /// The current fragment is unusable; the next write rolls first.
    NeedsRoll,
    /// `close()` was called.
    Closed,
}

type DirHash = [u8; 32];

fn dir_hash(dir: &str) -> DirHash {
    Sha256::digest(dir.as_bytes()).into()
}

/// A durable, rolling, purgeable commit log.
pub struct CommitLog {
    fs: Arc<dyn Filesystem>,
    log_dir: String,
    replication: i32,
    max_fragment_size: u64,
    codec: Box<dyn BlockCodec>,
    range_reference_required: bool,

    /// Closed fragments not yet purged, ordered by revision.
    fragments: FragmentQueue,
    /// Fragments past the purge watermark that still have live children.
    reap_set: BTreeMap<FragmentId, FragmentInfo>,

    fd: SmartFd,
    cur_fragment_num: u32,
    cur_fragment_length: u64,
    /// Highest revision in the open fragment.
    latest_revision: i64,
    state: LogState,

    linked_logs: HashSet<DirHash>,
    last_purge_revision: Option<i64>,
}

impl std::fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLog")
            .field("log_dir", &self.log_dir)
            .field("state", &self.state)
            .field("cur_fragment_num", &self.cur_fragment_num)
            .field("cur_fragment_length", &self.cur_fragment_length)
            .field("latest_revision", &self.latest_revision)
            .field("fragments", &self.fragments.len())
            .field("reap_set", &self.reap_set.len())
            .finish()
    }
}

impl CommitLog {
    /// Open a log in `log_dir`, resuming numbering after any fragments
    /// already there.
    pub fn open(
        fs: Arc<dyn Filesystem>,
        log_dir: &str,
        config: &CommitLogConfig,
        is_meta: bool,
    ) -> CommitLogResult<Self> {
        Self::initialize(fs, log_dir, config, None, is_meta)
    }

    /// Open a log in `log_dir` that starts out owning every closed fragment
    /// of `init_log`.
    pub fn open_with_init_log(
        fs: Arc<dyn Filesystem>,
        log_dir: &str,
        config: &CommitLogConfig,
        init_log: &mut dyn LogBase,
        is_meta: bool,
    ) -> CommitLogResult<Self> {
        Self::initialize(fs, log_dir, config, Some(init_log), is_meta)
    }

    fn initialize(
        fs: Arc<dyn Filesystem>,
        log_dir: &str,
        config: &CommitLogConfig,
        init_log: Option<&mut dyn LogBase>,
        is_meta: bool,
    ) -> CommitLogResult<Self> {
        config.validate()?;
        let log_dir = normalize_dir(log_dir);
        let codec = config.codec()?;

        let mut range_reference_required = config.range_reference_required;
        let mut fragments = FragmentQueue::new();
        if let Some(init) = init_log {
            range_reference_required &= init.range_reference_required();
            fragments = init.take_fragments();
            info!(
                log_dir = %log_dir,
                init_log = %init.log_dir(),
                fragments = fragments.len(),
                "Stitched in fragments from init log"
            );
        }

        fs.mkdirs(&log_dir)?;

        let mut next_num = fragments.iter().map(|fi| fi.num() + 1).max().unwrap_or(0);
        if let Some(on_disk) = scan_max_fragment_num(fs.as_ref(), &log_dir)? {
            next_num = next_num.max(on_disk + 1);
        }

        let mut log = Self {
            fs,
            log_dir,
            replication: config.replication_for(is_meta),
            max_fragment_size: config.roll_limit,
            codec,
            range_reference_required,
            fragments,
            reap_set: BTreeMap::new(),
            fd: SmartFd::invalid(),
            cur_fragment_num: next_num,
            cur_fragment_length: 0,
            latest_revision: TIMESTAMP_MIN,
            state: LogState::NeedsRoll,
            linked_logs: HashSet::new(),
            last_purge_revision: None,
        };

        match log.create_next_log() {
            Ok(()) => log.state = LogState::Open,
            Err(e) => warn!(
                log_dir = %log.log_dir,
                error = %e,
                "Unable to open first fragment; the next write will retry"
            ),
        }
        info!(
            log_dir = %log.log_dir,
            fragment = log.cur_fragment_num,
            queued = log.fragments.len(),
            "Commit log opened"
        );
        Ok(log)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn cur_fragment_num(&self) -> u32 {
        self.cur_fragment_num
    }

    pub fn cur_fragment_length(&self) -> u64 {
        self.cur_fragment_length
    }

    /// Path of the fragment currently being appended to.
    pub fn current_fragment_path(&self) -> String {
        join_path(&self.log_dir, &self.cur_fragment_num.to_string())
    }

    pub fn max_fragment_size(&self) -> u64 {
        self.max_fragment_size
    }

    pub fn replication(&self) -> i32 {
        self.replication
    }

    pub fn is_closed(&self) -> bool {
        self.state == LogState::Closed
    }

    /// Returns `true` if the next write must roll to a new fragment first.
    pub fn needs_roll(&self) -> bool {
        self.state == LogState::NeedsRoll
    }

    /// Fragments deferred by purge because they still have live children.
    pub fn reap_set(&self) -> impl Iterator<Item = &FragmentInfo> {
        self.reap_set.values()
    }

    /// Look up a closed fragment in the queue or the reap set.
    pub fn fragment(&self, id: FragmentId) -> Option<&FragmentInfo> {
        self.fragments.get(id).or_else(|| self.reap_set.get(&id))
    }

    // -----------------------------------------------------------------------
    // Writing
    // -----------------------------------------------------------------------

    /// Append a DATA block holding `payload` at `revision`.
    ///
    /// Transient filesystem failures abandon the current fragment (its
    /// earlier blocks stay committed) and retry on a fresh one, as often as
    /// the filesystem's retry policy allows.
    pub fn write(
        &mut self,
        cluster_id: u64,
        payload: &[u8],
        revision: i64,
        flags: AppendFlags,
    ) -> CommitLogResult<()> {
        if !is_valid_revision(revision) {
            return Err(CommitLogError::InvalidRevision(revision));
        }
        self.ensure_not_closed()?;

        let mut header = BlockHeader::new(BlockKind::Data, revision, cluster_id);
        let block = self.codec.deflate(payload, &mut header, 0)?;

        self.append_block(&block, flags)?;
        self.latest_revision = self.latest_revision.max(revision);
        debug!(
            log_dir = %self.log_dir,
            fragment = self.cur_fragment_num,
            revision,
            stored = block.len(),
            "Appended commit log block"
        );

        if self.cur_fragment_length > self.max_fragment_size {
            if let Err(e) = self.roll_fragment() {
                warn!(
                    log_dir = %self.log_dir,
                    error = %e,
                    "Roll after write failed; the next write will retry"
                );
            }
        }
        Ok(())
    }

    /// Append an encoded block, rolling first if needed and re-rolling on
    /// retryable failures.
    fn append_block(&mut self, block: &[u8], flags: AppendFlags) -> CommitLogResult<()> {
        let mut attempts = 0;
        loop {
            if self.state == LogState::NeedsRoll || !self.fd.is_valid() {
                self.roll_fragment()?;
            }

            match self.fs.append(&self.fd, block, flags) {
                Ok(written) => {
                    self.cur_fragment_length += written as u64;
                    return Ok(());
                }
                Err(e) => {
                    error!(file = %self.fd, error = %e, "Problem writing commit log");
                    let retry = self.fs.retry_write_ok(&mut self.fd, &e, &mut attempts, false);
                    self.state = LogState::NeedsRoll;
                    if !retry {
                        return Err(e.into());
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Fragment rotation
    // -----------------------------------------------------------------------

    /// Close the current fragment and open the next one. A no-op if nothing
    /// has been written since the last roll.
    pub fn roll(&mut self) -> CommitLogResult<()> {
        self.ensure_not_closed()?;
        self.roll_fragment().map(|_| ())
    }

    fn roll_fragment(&mut self) -> CommitLogResult<Option<FragmentId>> {
        if self.fd.is_valid() && self.latest_revision == TIMESTAMP_MIN {
            return Ok(None);
        }

        self.state = LogState::NeedsRoll;
        let retired = self.retire_current_fragment().map(|info| {
            let id = info.id();
            self.fragments.push(info);
            id
        });

        self.create_next_log()?;
        self.state = LogState::Open;
        Ok(retired)
    }

    /// Close the current fragment (best-effort) and describe it. Returns
    /// `None` if no fragment file was ever created.
    fn retire_current_fragment(&mut self) -> Option<FragmentInfo> {
        if self.fd.is_valid() {
            if let Err(e) = self.fs.close(&mut self.fd) {
                error!(file = %self.fd, error = %e, "Problem closing commit log fragment");
            }
        }
        self.fd.invalidate();

        let latest = std::mem::replace(&mut self.latest_revision, TIMESTAMP_MIN);
        if self.cur_fragment_length == 0 {
            return None;
        }

        let revision = if self.cur_fragment_length > header_size() as u64 {
            latest
        } else {
            TIMESTAMP_MIN
        };
        let info = FragmentInfo::new(
            self.log_dir.clone(),
            self.cur_fragment_num,
            self.cur_fragment_length,
            revision,
        );
        info!(
            log_dir = %self.log_dir,
            fragment = self.cur_fragment_num,
            size = self.cur_fragment_length,
            revision,
            "Rolled commit log fragment"
        );

        self.cur_fragment_num += 1;
        self.cur_fragment_length = 0;
        Some(info)
    }

    /// Create `<log_dir>/<cur_fragment_num>` and write its file header,
    /// re-attempting transient failures from scratch.
    fn create_next_log(&mut self) -> CommitLogResult<()> {
        let path = self.current_fragment_path();
        let file_header = encode_file_header();
        let mut attempts = 0;

        loop {
            self.fd = SmartFd::new(path.as_str(), OpenFlags::Overwrite);
            let result = self
                .fs
                .create(&mut self.fd, self.replication)
                .and_then(|()| self.fs.append(&self.fd, &file_header, AppendFlags::Sync));

            match result {
                Ok(_) => {
                    self.cur_fragment_length = file_header.len() as u64;
                    info!(file = %path, replication = self.replication, "Created commit log fragment");
                    return Ok(());
                }
                Err(e) => {
                    error!(file = %path, error = %e, "Problem creating commit log fragment");
                    if self.fs.retry_write_ok(&mut self.fd, &e, &mut attempts, true) {
                        continue;
                    }
                    self.fd.invalidate();
                    self.cur_fragment_length = 0;
                    return Err(e.into());
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Linking
    // -----------------------------------------------------------------------

    /// Splice `other`'s fragments into this log behind a LINK block.
    ///
    /// The LINK goes into the current fragment, which is then closed so the
    /// link stands alone at the end of a committed fragment. That fragment
    /// becomes the parent of every transferred fragment that had none and
    /// will remove `other`'s directory when it is purged. Linking the same
    /// directory twice is a no-op.
    pub fn link_log(&mut self, cluster_id: u64, other: &mut dyn LogBase) -> CommitLogResult<()> {
        self.ensure_not_closed()?;

        let other_dir = normalize_dir(other.log_dir());
        let hash = dir_hash(&other_dir);
        if self.linked_logs.contains(&hash) {
            warn!(
                log_dir = %self.log_dir,
                linked = %other_dir,
                "Skipping log because it is already linked in"
            );
            return Ok(());
        }

        let link_revision = other.latest_revision();
        if !is_valid_revision(link_revision) {
            return Err(CommitLogError::InvalidRevision(link_revision));
        }

        let block = encode_link_block(cluster_id, link_revision, &other_dir)?;
        self.append_block(&block, AppendFlags::Sync)?;
        self.latest_revision = self.latest_revision.max(link_revision);
        info!(
            log_dir = %self.log_dir,
            linked = %other_dir,
            fragment = self.cur_fragment_num,
            link_revision,
            latest_revision = self.latest_revision,
            "Linked log into fragment"
        );

        self.state = LogState::NeedsRoll;
        let Some(mut link_info) = self.retire_current_fragment() else {
            return Err(CommitLogError::Closed(self.log_dir.clone()));
        };
        link_info.add_purge_dir(other_dir.clone());

        let transferred = other.take_fragments().drain();
        let count = transferred.len();
        for mut info in transferred {
            if info.parent().is_none() {
                info.set_parent(link_info.id());
                link_info.add_reference();
            }
            self.fragments.push(info);
        }
        debug!(
            linked = %other_dir,
            transferred = count,
            references = link_info.references(),
            "Transferred linked fragments"
        );
        self.fragments.push(link_info);
        self.linked_logs.insert(hash);

        match self.create_next_log() {
            Ok(()) => self.state = LogState::Open,
            Err(e) => warn!(
                log_dir = %self.log_dir,
                error = %e,
                "Link is durable but the next fragment could not be opened"
            ),
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Purge
    // -----------------------------------------------------------------------

    /// Delete fragments whose revisions are all below `min_revision`.
    ///
    /// With range references required, only fragments whose log directory
    /// appears in `remove_ok_logs` qualify. A qualifying fragment that still
    /// has live children moves to the reap set and is deleted on a later
    /// call once its children are gone. Directories removed along with LINK
    /// fragments are added to `removed_logs`. If `trace` is given, a dump of
    /// the reap set and the reason purge stopped are appended to it.
    pub fn purge(
        &mut self,
        min_revision: i64,
        remove_ok_logs: &HashSet<String>,
        removed_logs: &mut HashSet<String>,
        mut trace: Option<&mut String>,
    ) -> CommitLogResult<()> {
        self.ensure_not_closed()?;

        if let Some(previous) = self.last_purge_revision {
            if min_revision < previous {
                warn!(
                    log_dir = %self.log_dir,
                    previous,
                    min_revision,
                    "Purge revision moved backwards"
                );
            }
        }
        self.last_purge_revision = Some(min_revision);

        if let Some(out) = trace.as_deref_mut() {
            let _ = writeln!(out, "--- Reap set begin ({}) ---", self.log_dir);
            for info in self.reap_set.values() {
                let _ = writeln!(out, "{}", info.describe(remove_ok_logs));
            }
            let _ = writeln!(out, "--- Reap set end ({}) ---", self.log_dir);
        }

        let ready: Vec<FragmentId> = self
            .reap_set
            .values()
            .filter(|info| info.references() == 0 && self.removal_authorized(info, remove_ok_logs))
            .map(FragmentInfo::id)
            .collect();
        for id in ready {
            if let Some(info) = self.reap_set.remove(&id) {
                self.remove_file_info(info, removed_logs);
            }
        }

        loop {
            let eligible = match self.fragments.front() {
                None => break,
                Some(front) => {
                    front.revision() < min_revision && self.removal_authorized(front, remove_ok_logs)
                }
            };
            if !eligible {
                if let Some(front) = self.fragments.front() {
                    let msg = format!(
                        "purge({},rev={}) breaking on {}",
                        self.log_dir,
                        min_revision,
                        front.describe(remove_ok_logs)
                    );
                    info!("{msg}");
                    if let Some(out) = trace.as_deref_mut() {
                        out.push_str(&msg);
                        out.push('\n');
                    }
                }
                break;
            }

            let Some(info) = self.fragments.pop_front() else { break };
            if info.references() == 0 {
                self.remove_file_info(info, removed_logs);
            } else {
                debug!(fragment = %info.path(), references = info.references(), "Deferring fragment to reap set");
                self.reap_set.insert(info.id(), info);
            }
        }
        Ok(())
    }

    fn removal_authorized(&self, info: &FragmentInfo, remove_ok_logs: &HashSet<String>) -> bool {
        info.remove_ok(remove_ok_logs) || !self.range_reference_required
    }

    /// Delete a fragment file and its purge directories, then release its
    /// parent's reference.
    fn remove_file_info(&mut self, info: FragmentInfo, removed_logs: &mut HashSet<String>) {
        for dir in info.purge_dirs() {
            info!(dir = %dir, "Removing linked log directory because all fragments have been removed");
            removed_logs.insert(dir.clone());
            if let Err(e) = self.fs.rmdir(dir) {
                if !e.is_not_found() {
                    error!(dir = %dir, error = %e, "Problem removing log directory");
                }
            }
        }

        let path = info.path();
        info!(
            fragment = %path,
            revision = info.revision(),
            parent = ?info.parent().map(FragmentId::get),
            "Removing log fragment"
        );
        match self.fs.remove(&path) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => error!(fragment = %path, error = %e, "Problem removing log fragment"),
        }

        if let Some(parent) = info.parent() {
            if let Some(parent_info) = self.fragments.get_mut(parent) {
                parent_info.release_reference();
            } else if let Some(parent_info) = self.reap_set.get_mut(&parent) {
                parent_info.release_reference();
            } else {
                warn!(fragment = %path, parent = parent.get(), "Parent fragment no longer tracked");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Durability and shutdown
    // -----------------------------------------------------------------------

    /// Push appended blocks out of the filesystem client.
    pub fn flush(&mut self) -> CommitLogResult<()> {
        self.ensure_open_fragment()?;
        Ok(self.fs.flush(&self.fd)?)
    }

    /// Force appended blocks to stable storage.
    pub fn sync(&mut self) -> CommitLogResult<()> {
        self.ensure_open_fragment()?;
        Ok(self.fs.sync(&self.fd)?)
    }

    /// Close the current fragment. Later writes, flushes, syncs and purges
    /// return `Closed`. A fragment holding data is kept in the queue so the
    /// closed log can still be linked into another one. Idempotent.
    pub fn close(&mut self) -> CommitLogResult<()> {
        if self.state == LogState::Closed {
            return Ok(());
        }
        self.state = LogState::Closed;

        let result: Result<(), FsError> = if self.fd.is_valid() {
            self.fs.close(&mut self.fd)
        } else {
            Ok(())
        };
        if let Err(e) = &result {
            error!(file = %self.fd, error = %e, "Problem closing commit log file");
        }

        if let Some(info) = self.retire_current_fragment() {
            self.fragments.push(info);
        }
        info!(log_dir = %self.log_dir, fragments = self.fragments.len(), "Commit log closed");
        Ok(result?)
    }

    fn ensure_not_closed(&self) -> CommitLogResult<()> {
        if self.state == LogState::Closed {
            return Err(CommitLogError::Closed(self.log_dir.clone()));
        }
        Ok(())
    }

    fn ensure_open_fragment(&self) -> CommitLogResult<()> {
        if self.state == LogState::Closed || !self.fd.is_valid() {
            return Err(CommitLogError::Closed(self.log_dir.clone()));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Map each fragment revision to its size, its distance from the newest
    /// fragment and the bytes from the newest fragment down to it. Returns
    /// `None` once the log has no open fragment.
    pub fn load_cumulative_size_map(&self) -> Option<CumulativeSizeMap> {
        if self.state == LogState::Closed || !self.fd.is_valid() {
            warn!(log_dir = %self.log_dir, "Commit log has no active fragment");
            return None;
        }

        let mut map = CumulativeSizeMap::new();
        if self.latest_revision != TIMESTAMP_MIN {
            map.insert(
                self.latest_revision,
                CumulativeFragmentData {
                    size: self.cur_fragment_length,
                    fragno: self.cur_fragment_num,
                    ..CumulativeFragmentData::default()
                },
            );
        }
        for info in self.fragments.iter().rev() {
            map.insert(
                info.revision(),
                CumulativeFragmentData {
                    size: info.size(),
                    fragno: info.num(),
                    ..CumulativeFragmentData::default()
                },
            );
        }

        let mut total = 0;
        for (distance, entry) in map.values_mut().rev().enumerate() {
            total += entry.size;
            entry.distance = distance as u32;
            entry.cumulative_size = total;
        }
        Some(map)
    }

    /// Tab-separated `size`, `revision` and `dir` lines for every queued
    /// fragment and the open one.
    pub fn get_stats(&self, prefix: &str) -> String {
        let mut out = String::new();
        let mut line = |num: u32, size: u64, revision: i64, dir: &str| {
            let _ = writeln!(out, "{prefix}-log-fragment[{num}]\tsize\t{size}");
            let _ = writeln!(out, "{prefix}-log-fragment[{num}]\trevision\t{revision}");
            let _ = writeln!(out, "{prefix}-log-fragment[{num}]\tdir\t{dir}");
        };
        for info in self.fragments.iter() {
            line(info.num(), info.size(), info.revision(), info.log_dir());
        }
        line(
            self.cur_fragment_num,
            self.cur_fragment_length,
            self.latest_revision,
            &self.log_dir,
        );
        out
    }

    /// Structured form of [`CommitLog::get_stats`].
    pub fn stats(&self) -> CommitLogStats {
        let describe = |info: &FragmentInfo| FragmentStats {
            num: info.num(),
            dir: info.log_dir().to_string(),
            size: info.size(),
            revision: info.revision(),
            references: info.references(),
        };
        CommitLogStats {
            log_dir: self.log_dir.clone(),
            closed: self.is_closed(),
            needs_roll: self.needs_roll(),
            current_fragment: FragmentStats {
                num: self.cur_fragment_num,
                dir: self.log_dir.clone(),
                size: self.cur_fragment_length,
                revision: self.latest_revision,
                references: 0,
            },
            fragments: self.fragments.iter().map(describe).collect(),
            reap_set_len: self.reap_set.len(),
            linked_logs: self.linked_logs.len(),
        }
    }
}

impl LogBase for CommitLog {
    fn log_dir(&self) -> &str {
        &self.log_dir
    }

    fn latest_revision(&self) -> i64 {
        self.latest_revision.max(self.fragments.max_revision())
    }

    fn range_reference_required(&self) -> bool {
        self.range_reference_required
    }

    fn fragments(&self) -> &FragmentQueue {
        &self.fragments
    }

    fn take_fragments(&mut self) -> FragmentQueue {
        std::mem::take(&mut self.fragments)
    }
}

impl Drop for CommitLog {
    fn drop(&mut self) {
        if self.state != LogState::Closed {
            if let Err(e) = self.close() {
                warn!(log_dir = %self.log_dir, error = %e, "Error closing commit log on drop");
            }
        }
    }
}

fn normalize_dir(dir: &str) -> String {
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Highest fragment number already in `log_dir`.
fn scan_max_fragment_num(fs: &dyn Filesystem, log_dir: &str) -> CommitLogResult<Option<u32>> {
    match list_fragment_nums(fs, log_dir) {
        Ok(nums) => {
            debug!(log_dir = %log_dir, fragments = nums.len(), "Scanned log directory");
            Ok(nums.last().copied())
        }
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_fs::{FaultKind, MemoryFilesystem, RetryPolicy};

    fn config() -> CommitLogConfig {
        CommitLogConfig {
            compressor: "none".to_string(),
            range_reference_required: false,
            ..CommitLogConfig::default()
        }
    }

    fn open(fs: &MemoryFilesystem, dir: &str) -> CommitLog {
        CommitLog::open(Arc::new(fs.clone()), dir, &config(), false).unwrap()
    }

    #[test]
    fn test_open_creates_first_fragment_with_header() {
        let fs = MemoryFilesystem::new();
        let log = open(&fs, "/logs/user/");
        assert_eq!(log.log_dir(), "/logs/user");
        assert_eq!(log.cur_fragment_num(), 0);
        assert_eq!(log.cur_fragment_length(), header_size() as u64);
        assert_eq!(fs.file_contents("/logs/user/0").unwrap(), encode_file_header());
    }

    #[test]
    fn test_recovery_skips_past_existing_fragments() {
        let fs = MemoryFilesystem::new();
        for name in ["0", "1", "2", "5", "notes.txt"] {
            fs.write_file(&format!("/logs/user/{name}"), b"old");
        }
        fs.mkdirs("/logs/user/99").unwrap();

        let log = open(&fs, "/logs/user");
        assert_eq!(log.cur_fragment_num(), 6);
        assert_eq!(fs.file_contents("/logs/user/5").unwrap(), b"old");
        assert!(fs.exists("/logs/user/6").unwrap());
    }

    #[test]
    fn test_write_rejects_non_positive_revisions() {
        let fs = MemoryFilesystem::new();
        let mut log = open(&fs, "/logs/user");
        assert!(matches!(
            log.write(1, b"x", 0, AppendFlags::None),
            Err(CommitLogError::InvalidRevision(0))
        ));
        assert!(matches!(
            log.write(1, b"x", TIMESTAMP_MIN, AppendFlags::None),
            Err(CommitLogError::InvalidRevision(_))
        ));
    }

    #[test]
    fn test_roll_on_clean_fragment_is_noop() {
        let fs = MemoryFilesystem::new();
        let mut log = open(&fs, "/logs/user");
        log.roll().unwrap();
        log.roll().unwrap();
        assert_eq!(log.cur_fragment_num(), 0);
        assert!(log.fragments().is_empty());

        log.write(1, b"batch", 10, AppendFlags::None).unwrap();
        log.roll().unwrap();
        assert_eq!(log.cur_fragment_num(), 1);
        assert_eq!(log.fragments().len(), 1);
        assert_eq!(log.fragments().front().unwrap().revision(), 10);
    }

    #[test]
    fn test_closed_log_rejects_operations() {
        let fs = MemoryFilesystem::new();
        let mut log = open(&fs, "/logs/user");
        log.close().unwrap();
        log.close().unwrap();

        assert!(matches!(log.write(1, b"x", 5, AppendFlags::None), Err(CommitLogError::Closed(_))));
        assert!(matches!(log.flush(), Err(CommitLogError::Closed(_))));
        assert!(matches!(log.sync(), Err(CommitLogError::Closed(_))));
        assert!(matches!(log.roll(), Err(CommitLogError::Closed(_))));
        let mut removed = HashSet::new();
        assert!(matches!(
            log.purge(100, &HashSet::new(), &mut removed, None),
            Err(CommitLogError::Closed(_))
        ));
        assert!(log.load_cumulative_size_map().is_none());
    }

    #[test]
    fn test_close_keeps_data_fragment_queued() {
        let fs = MemoryFilesystem::new();
        let mut log = open(&fs, "/logs/a");
        log.write(1, b"one", 100, AppendFlags::Sync).unwrap();
        log.write(1, b"two", 101, AppendFlags::Sync).unwrap();
        log.close().unwrap();

        assert_eq!(log.fragments().len(), 1);
        assert_eq!(log.latest_revision(), 101);
        assert_eq!(fs.open_handle_count(), 0);
    }

    #[test]
    fn test_transient_append_failure_rolls_and_retries() {
        let fs = MemoryFilesystem::new();
        let mut log = open(&fs, "/logs/user");
        log.write(1, b"committed", 10, AppendFlags::Sync).unwrap();

        fs.fail_next_appends(1, FaultKind::BrokenConnection);
        log.write(1, b"retried", 11, AppendFlags::Sync).unwrap();

        assert_eq!(log.cur_fragment_num(), 1);
        assert_eq!(log.fragments().len(), 1);
        assert_eq!(log.fragments().front().unwrap().revision(), 10);
        assert!(fs.file_contents("/logs/user/0").unwrap().len() > header_size());
        assert!(fs.file_contents("/logs/user/1").unwrap().len() > header_size());
        assert!(!log.needs_roll());
    }

    #[test]
    fn test_append_timeout_rolls_and_retries() {
        let fs = MemoryFilesystem::new();
        let mut log = open(&fs, "/logs/user");
        log.write(1, b"committed", 10, AppendFlags::Sync).unwrap();

        fs.fail_next_appends(1, FaultKind::Timeout);
        log.write(1, b"after timeout", 11, AppendFlags::Sync).unwrap();

        assert_eq!(log.cur_fragment_num(), 1);
        assert_eq!(log.fragments().front().unwrap().revision(), 10);
        assert!(!log.needs_roll());
    }

    #[test]
    fn test_create_timeout_is_retried() {
        let fs = MemoryFilesystem::new();
        fs.fail_next_creates(1, FaultKind::Timeout);
        let log = open(&fs, "/logs/user");
        assert!(!log.needs_roll());
        assert_eq!(log.cur_fragment_num(), 0);
    }

    #[test]
    fn test_fatal_append_failure_is_returned() {
        let fs = MemoryFilesystem::new();
        let mut log = open(&fs, "/logs/user");
        fs.fail_next_appends(1, FaultKind::InvalidArgument);

        let err = log.write(1, b"lost", 10, AppendFlags::Sync).unwrap_err();
        assert!(matches!(err, CommitLogError::Fs(FsError::InvalidArgument(_))));
        assert!(log.needs_roll());

        log.write(1, b"next", 11, AppendFlags::Sync).unwrap();
        assert!(!log.needs_roll());
    }

    #[test]
    fn test_retry_limit_exhausted() {
        let fs = MemoryFilesystem::with_retry_policy(RetryPolicy {
            write_retry_limit: 2,
            retry_delay_ms: 0,
        });
        let mut log = CommitLog::open(Arc::new(fs.clone()), "/logs/user", &config(), false).unwrap();
        fs.fail_next_appends(10, FaultKind::Io);

        let err = log.write(1, b"doomed", 10, AppendFlags::Sync).unwrap_err();
        assert!(matches!(err, CommitLogError::Fs(FsError::Io(_))));
    }

    #[test]
    fn test_create_failure_retries_then_succeeds() {
        let fs = MemoryFilesystem::new();
        fs.fail_next_creates(2, FaultKind::BrokenConnection);
        let log = open(&fs, "/logs/user");
        assert!(!log.needs_roll());
        assert_eq!(fs.file_contents("/logs/user/0").unwrap(), encode_file_header());
    }

    #[test]
    fn test_open_survives_create_failure() {
        let fs = MemoryFilesystem::new();
        fs.fail_next_creates(1, FaultKind::InvalidArgument);
        let mut log = open(&fs, "/logs/user");
        assert!(log.needs_roll());

        log.write(1, b"later", 10, AppendFlags::Sync).unwrap();
        assert_eq!(log.cur_fragment_num(), 0);
        assert!(log.fragments().is_empty());
    }

    #[test]
    fn test_cumulative_size_map() {
        let fs = MemoryFilesystem::new();
        let mut log = open(&fs, "/logs/user");
        for revision in [10, 20, 30] {
            log.write(1, &[7u8; 100], revision, AppendFlags::None).unwrap();
            log.roll().unwrap();
        }
        log.write(1, &[7u8; 100], 40, AppendFlags::None).unwrap();

        let map = log.load_cumulative_size_map().unwrap();
        let revisions: Vec<i64> = map.keys().copied().collect();
        assert_eq!(revisions, vec![10, 20, 30, 40]);

        let newest = map[&40];
        assert_eq!(newest.distance, 0);
        assert_eq!(newest.fragno, 3);
        assert_eq!(newest.cumulative_size, newest.size);

        let oldest = map[&10];
        assert_eq!(oldest.distance, 3);
        assert_eq!(oldest.fragno, 0);
        let total: u64 = map.values().map(|d| d.size).sum();
        assert_eq!(oldest.cumulative_size, total);
    }

    #[test]
    fn test_get_stats_lines() {
        let fs = MemoryFilesystem::new();
        let mut log = open(&fs, "/logs/user");
        log.write(1, b"abc", 10, AppendFlags::None).unwrap();
        log.roll().unwrap();

        let stats = log.get_stats("user");
        assert!(stats.contains("user-log-fragment[0]\trevision\t10\n"));
        assert!(stats.contains("user-log-fragment[0]\tdir\t/logs/user\n"));
        assert!(stats.contains(&format!("user-log-fragment[1]\tsize\t{}\n", header_size())));

        let structured = log.stats();
        assert_eq!(structured.fragments.len(), 1);
        assert_eq!(structured.current_fragment.num, 1);
        let json = serde_json::to_value(&structured).unwrap();
        assert_eq!(json["fragments"][0]["revision"], 10);
    }
}
