// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Tabula Commit Log - Fragment bookkeeping
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A `FragmentInfo` describes one closed fragment file. The `FragmentQueue`
// keeps them ordered by revision, ties broken by insertion order, so purge
// can stop at the first fragment that is still needed.
//
// Links between fragments are expressed as `FragmentId`s rather than
// pointers: a fragment reached through a LINK block records the id of the
// fragment holding that LINK as its parent, and the parent counts how many
// such children are still alive.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use tabula_fs::join_path;

use crate::revision::TIMESTAMP_MIN;

// ---------------------------------------------------------------------------
// FragmentId
// ---------------------------------------------------------------------------

static NEXT_FRAGMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a `FragmentInfo`. Survives moves between
/// queues, logs and the reap set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId(u64);

impl FragmentId {
    fn next() -> Self {
        Self(NEXT_FRAGMENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// FragmentInfo
// ---------------------------------------------------------------------------

/// Bookkeeping for one closed fragment file `<log_dir>/<num>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentInfo {
    id: FragmentId,
    log_dir: String,
    num: u32,
    size: u64,
    revision: i64,
    references: u32,
    parent: Option<FragmentId>,
    purge_dirs: BTreeSet<String>,
}

impl FragmentInfo {
    /// Describe fragment `num` of `log_dir`. `revision` is the highest DATA
    /// revision it holds, or [`TIMESTAMP_MIN`] if it holds none.
    pub fn new(log_dir: impl Into<String>, num: u32, size: u64, revision: i64) -> Self {
        Self {
            id: FragmentId::next(),
            log_dir: log_dir.into(),
            num,
            size,
            revision,
            references: 0,
            parent: None,
            purge_dirs: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> FragmentId {
        self.id
    }

    pub fn log_dir(&self) -> &str {
        &self.log_dir
    }

    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn revision(&self) -> i64 {
        self.revision
    }

    /// Number of live fragments whose parent is this one.
    pub fn references(&self) -> u32 {
        self.references
    }

    pub fn parent(&self) -> Option<FragmentId> {
        self.parent
    }

    /// Directories removed together with this fragment.
    pub fn purge_dirs(&self) -> &BTreeSet<String> {
        &self.purge_dirs
    }

    /// Full path of the fragment file.
    pub fn path(&self) -> String {
        join_path(&self.log_dir, &self.num.to_string())
    }

    /// Returns `true` if the fragment holds no DATA blocks.
    pub fn is_symbolic(&self) -> bool {
        self.revision == TIMESTAMP_MIN
    }

    /// Returns `true` if the fragment's log directory is in `remove_ok_logs`.
    pub fn remove_ok(&self, remove_ok_logs: &HashSet<String>) -> bool {
        remove_ok_logs.contains(&self.log_dir)
    }

    /// One-line description used in purge traces.
    pub fn describe(&self, remove_ok_logs: &HashSet<String>) -> String {
        let revision = if self.is_symbolic() {
            "none".to_string()
        } else {
            self.revision.to_string()
        };
        let mut out = format!(
            "{} id={} revision={} size={} references={} remove_ok={}",
            self.path(),
            self.id.0,
            revision,
            self.size,
            self.references,
            self.remove_ok(remove_ok_logs)
        );
        if let Some(parent) = self.parent {
            let _ = write!(out, " parent={}", parent.0);
        }
        if !self.purge_dirs.is_empty() {
            let dirs: Vec<&str> = self.purge_dirs.iter().map(String::as_str).collect();
            let _ = write!(out, " purge_dirs={}", dirs.join(","));
        }
        out
    }

    pub(crate) fn set_parent(&mut self, parent: FragmentId) {
        self.parent = Some(parent);
    }

    pub(crate) fn add_reference(&mut self) {
        self.references += 1;
    }

    /// Drop one child reference.
    ///
    /// # Panics
    ///
    /// Panics if the count is already zero: that means a child was removed
    /// twice and the parent could have been deleted while still needed.
    pub(crate) fn release_reference(&mut self) {
        assert!(
            self.references > 0,
            "reference count underflow on log fragment {}",
            self.path()
        );
        self.references -= 1;
    }

    pub(crate) fn add_purge_dir(&mut self, dir: impl Into<String>) {
        self.purge_dirs.insert(dir.into());
    }
}

// ---------------------------------------------------------------------------
// FragmentQueue
// ---------------------------------------------------------------------------

/// Closed fragments ordered by revision, ties in insertion order.
#[derive(Debug, Default, Clone)]
pub struct FragmentQueue {
    entries: BTreeMap<(i64, u64), FragmentInfo>,
    index: HashMap<FragmentId, (i64, u64)>,
    next_seq: u64,
}

impl FragmentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fragment at its revision position.
    pub fn push(&mut self, info: FragmentInfo) {
        let key = (info.revision, self.next_seq);
        self.next_seq += 1;
        self.index.insert(info.id, key);
        self.entries.insert(key, info);
    }

    /// The oldest fragment.
    pub fn front(&self) -> Option<&FragmentInfo> {
        self.entries.values().next()
    }

    /// The newest fragment.
    pub fn back(&self) -> Option<&FragmentInfo> {
        self.entries.values().next_back()
    }

    /// Remove and return the oldest fragment.
    pub fn pop_front(&mut self) -> Option<FragmentInfo> {
        let (_, info) = self.entries.pop_first()?;
        self.index.remove(&info.id);
        Some(info)
    }

    pub fn get(&self, id: FragmentId) -> Option<&FragmentInfo> {
        self.index.get(&id).and_then(|key| self.entries.get(key))
    }

    pub(crate) fn get_mut(&mut self, id: FragmentId) -> Option<&mut FragmentInfo> {
        let key = self.index.get(&id)?;
        self.entries.get_mut(key)
    }

    pub fn contains(&self, id: FragmentId) -> bool {
        self.index.contains_key(&id)
    }

    /// Fragments from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &FragmentInfo> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest revision held, or [`TIMESTAMP_MIN`] when empty.
    pub fn max_revision(&self) -> i64 {
        self.entries
            .keys()
            .next_back()
            .map_or(TIMESTAMP_MIN, |(revision, _)| *revision)
    }

    /// Remove every fragment, oldest first.
    pub fn drain(&mut self) -> Vec<FragmentInfo> {
        self.index.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

// ---------------------------------------------------------------------------
// LogBase
// ---------------------------------------------------------------------------

/// Anything that owns a directory of fragments and can hand them over to
/// another log: a live `CommitLog` or a `CommitLogReader`.
pub trait LogBase {
    /// The log's directory.
    fn log_dir(&self) -> &str;

    /// Highest revision held by the log.
    fn latest_revision(&self) -> i64;

    /// Whether purging this log's fragments requires the caller's
    /// per-directory confirmation.
    fn range_reference_required(&self) -> bool;

    /// The closed fragments.
    fn fragments(&self) -> &FragmentQueue;

    /// Take ownership of all closed fragments, leaving the log's queue empty.
    fn take_fragments(&mut self) -> FragmentQueue;
}
