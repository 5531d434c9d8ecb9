// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Tabula Commit Log - Reader for crash recovery
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The `CommitLogReader` replays a log directory fragment by fragment in
// ascending fragment number. A LINK block suspends the current fragment and
// replays the linked directory first, depth-first, so the linked (older)
// revisions come out before the ones written after the link.
//
// A torn block at the end of the newest fragment of the top-level log is the
// expected result of a crash mid-append and ends replay cleanly. Corruption
// anywhere else is data loss and is reported, unless `skip_errors` is set.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tabula_fs::{join_path, Filesystem};
use tracing::{debug, info, trace, warn};

use crate::block::BlockKind;
use crate::config::CommitLogConfig;
use crate::error::{CommitLogError, CommitLogResult};
use crate::fragment::{FragmentInfo, FragmentQueue, LogBase};
use crate::revision::TIMESTAMP_MIN;
use crate::stream::{link_target, list_fragment_nums, BlockStream};

/// One replayed DATA block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBlock {
    pub revision: i64,
    pub cluster_id: u64,
    /// Path of the fragment the block came from.
    pub fragment: String,
    /// The inflated mutation batch.
    pub payload: Vec<u8>,
}

/// Counters describing a replay so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    pub blocks: u64,
    pub bytes: u64,
    pub links_followed: u64,
    pub fragments_skipped: u64,
    /// A torn tail was dropped from the newest fragment.
    pub truncated_tail: bool,
}

/// Replay position within one log directory.
#[derive(Debug)]
struct DirCursor {
    dir: String,
    nums: Vec<u32>,
    next: usize,
    stream: Option<BlockStream>,
    top_level: bool,
}

impl DirCursor {
    fn new(dir: String, nums: Vec<u32>, top_level: bool) -> Self {
        Self {
            dir,
            nums,
            next: 0,
            stream: None,
            top_level,
        }
    }

    /// Whether the open stream is the newest fragment of the top-level log.
    fn on_live_tail(&self) -> bool {
        self.top_level && self.next == self.nums.len()
    }
}

enum Step {
    Yield(LogBlock),
    Descend(String),
    Continue,
    Pop,
}

/// Replays a commit log and describes its fragments.
pub struct CommitLogReader {
    fs: Arc<dyn Filesystem>,
    log_dir: String,
    skip_errors: bool,
    range_reference_required: bool,
    fragments: FragmentQueue,
    latest_revision: i64,

    stack: Vec<DirCursor>,
    visited: HashSet<String>,
    failed: bool,
    stats: ReplayStats,
}

impl std::fmt::Debug for CommitLogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLogReader")
            .field("log_dir", &self.log_dir)
            .field("fragments", &self.fragments.len())
            .field("latest_revision", &self.latest_revision)
            .field("stats", &self.stats)
            .finish()
    }
}

impl CommitLogReader {
    /// Open `log_dir` with default settings.
    pub fn open(fs: Arc<dyn Filesystem>, log_dir: &str) -> CommitLogResult<Self> {
        Self::open_with_config(fs, log_dir, &CommitLogConfig::default())
    }

    /// Open `log_dir`, scanning every fragment (following LINK blocks) to
    /// build the fragment queue. Replay starts at the oldest fragment.
    pub fn open_with_config(
        fs: Arc<dyn Filesystem>,
        log_dir: &str,
        config: &CommitLogConfig,
    ) -> CommitLogResult<Self> {
        let log_dir = log_dir.trim_end_matches('/').to_string();
        let nums = list_fragment_nums(fs.as_ref(), &log_dir)?;

        let mut scanned = HashSet::new();
        scanned.insert(log_dir.clone());
        let infos = scan_dir(fs.as_ref(), &log_dir, &nums, &mut scanned)?;

        let mut fragments = FragmentQueue::new();
        for info in infos {
            fragments.push(info);
        }
        let latest_revision = fragments.max_revision();
        info!(
            log_dir = %log_dir,
            fragments = fragments.len(),
            linked_dirs = scanned.len() - 1,
            latest_revision,
            "Opened commit log for replay"
        );

        let mut visited = HashSet::new();
        visited.insert(log_dir.clone());
        Ok(Self {
            stack: vec![DirCursor::new(log_dir.clone(), nums, true)],
            fs,
            log_dir,
            skip_errors: config.skip_errors,
            range_reference_required: config.range_reference_required,
            fragments,
            latest_revision,
            visited,
            failed: false,
            stats: ReplayStats::default(),
        })
    }

    pub fn replay_stats(&self) -> ReplayStats {
        self.stats
    }

    /// The next DATA block in replay order, or `None` once replay is done.
    /// After an error every later call returns `None`.
    pub fn next_block(&mut self) -> CommitLogResult<Option<LogBlock>> {
        if self.failed {
            return Ok(None);
        }
        loop {
            let step = match self.step() {
                Ok(Step::Descend(dir)) => self.descend(dir).map(|()| Step::Continue),
                other => other,
            };
            let step = match step {
                Ok(step) => step,
                Err(e) => {
                    self.failed = true;
                    return Err(e);
                }
            };
            match step {
                Step::Yield(block) => {
                    self.stats.blocks += 1;
                    self.stats.bytes += block.payload.len() as u64;
                    self.latest_revision = self.latest_revision.max(block.revision);
                    return Ok(Some(block));
                }
                Step::Descend(_) | Step::Continue => {}
                Step::Pop => {
                    if let Some(done) = self.stack.pop() {
                        debug!(log_dir = %done.dir, "Finished replaying log directory");
                    }
                    if self.stack.is_empty() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Replay everything that is left.
    pub fn read_all(&mut self) -> CommitLogResult<Vec<LogBlock>> {
        let mut blocks = Vec::new();
        while let Some(block) = self.next_block()? {
            blocks.push(block);
        }
        Ok(blocks)
    }

    fn step(&mut self) -> CommitLogResult<Step> {
        let fs = Arc::clone(&self.fs);
        let Some(cursor) = self.stack.last_mut() else {
            return Ok(Step::Pop);
        };

        let Some(stream) = cursor.stream.as_mut() else {
            let Some(&num) = cursor.nums.get(cursor.next) else {
                return Ok(Step::Pop);
            };
            cursor.next += 1;
            let path = join_path(&cursor.dir, &num.to_string());
            match BlockStream::open(fs.as_ref(), &path) {
                Ok(stream) => {
                    debug!(fragment = %path, length = stream.len(), "Replaying fragment");
                    cursor.stream = Some(stream);
                }
                Err(e) => {
                    let live_tail = cursor.on_live_tail();
                    self.tolerate(e, &path, live_tail)?;
                }
            }
            return Ok(Step::Continue);
        };

        match stream.next_block() {
            Ok(None) => {
                cursor.stream = None;
                Ok(Step::Continue)
            }
            Ok(Some(block)) => match block.kind {
                BlockKind::Data => Ok(Step::Yield(LogBlock {
                    revision: block.header.revision(),
                    cluster_id: block.header.cluster_id(),
                    fragment: stream.path().to_string(),
                    payload: block.payload,
                })),
                BlockKind::Link => {
                    let target = link_target(&block.payload)?;
                    trace!(fragment = %stream.path(), target = %target, "Following link");
                    Ok(Step::Descend(target))
                }
            },
            Err(e) => {
                let path = stream.path().to_string();
                let live_tail = cursor.on_live_tail();
                cursor.stream = None;
                self.tolerate(e, &path, live_tail)?;
                Ok(Step::Continue)
            }
        }
    }

    /// Decide whether a bad fragment ends replay, gets skipped or fails it.
    fn tolerate(&mut self, error: CommitLogError, path: &str, live_tail: bool) -> CommitLogResult<()> {
        if live_tail {
            warn!(fragment = %path, error = %error, "Dropping torn tail of newest fragment");
            self.stats.truncated_tail = true;
            return Ok(());
        }
        if self.skip_errors {
            warn!(fragment = %path, error = %error, "Skipping remainder of corrupt fragment");
            self.stats.fragments_skipped += 1;
            return Ok(());
        }
        Err(error)
    }

    fn descend(&mut self, dir: String) -> CommitLogResult<()> {
        let dir = dir.trim_end_matches('/').to_string();
        if !self.visited.insert(dir.clone()) {
            warn!(log_dir = %dir, "Linked log already replayed, skipping");
            return Ok(());
        }
        match list_fragment_nums(self.fs.as_ref(), &dir) {
            Ok(nums) => {
                self.stats.links_followed += 1;
                debug!(log_dir = %dir, fragments = nums.len(), "Descending into linked log");
                self.stack.push(DirCursor::new(dir, nums, false));
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!(log_dir = %dir, "Linked log directory is gone, skipping");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Iterator for CommitLogReader {
    type Item = CommitLogResult<LogBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}

impl LogBase for CommitLogReader {
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

/// Describe every fragment of `dir` and, recursively, of the logs it links
/// to. Fragments of a linked log that have no parent yet are parented to the
/// fragment holding the LINK.
fn scan_dir(
    fs: &dyn Filesystem,
    dir: &str,
    nums: &[u32],
    scanned: &mut HashSet<String>,
) -> CommitLogResult<Vec<FragmentInfo>> {
    let mut infos = Vec::new();

    for &num in nums {
        let path = join_path(dir, &num.to_string());
        let length = fs.length(&path)?;
        let mut revision = TIMESTAMP_MIN;
        let mut links = Vec::new();

        match BlockStream::open(fs, &path) {
            Ok(mut stream) => loop {
                match stream.next_block() {
                    Ok(Some(block)) => {
                        revision = revision.max(block.header.revision());
                        if block.kind == BlockKind::Link {
                            links.push(link_target(&block.payload)?);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(fragment = %path, error = %e, "Scan stopped at unreadable block");
                        break;
                    }
                }
            },
            Err(e) => debug!(fragment = %path, error = %e, "Scan skipped unreadable fragment"),
        }

        let mut info = FragmentInfo::new(dir, num, length, revision);
        for target in links {
            let target = target.trim_end_matches('/').to_string();
            if !scanned.insert(target.clone()) {
                warn!(fragment = %path, target = %target, "Link cycle or repeated link, skipping");
                continue;
            }
            let target_nums = match list_fragment_nums(fs, &target) {
                Ok(target_nums) => target_nums,
                Err(e) if e.is_not_found() => {
                    warn!(fragment = %path, target = %target, "Linked log directory is gone");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            for mut child in scan_dir(fs, &target, &target_nums, scanned)? {
                if child.parent().is_none() {
                    child.set_parent(info.id());
                    info.add_reference();
                }
                infos.push(child);
            }
            info.add_purge_dir(target);
        }
        infos.push(info);
    }
    Ok(infos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockHeader;
    use crate::codec::create_block_codec;
    use crate::stream::{encode_file_header, encode_link_block};
    use tabula_fs::MemoryFilesystem;

    fn data_block(revision: i64, payload: &[u8]) -> Vec<u8> {
        let codec = create_block_codec("lz4").unwrap();
        let mut header = BlockHeader::new(BlockKind::Data, revision, 1);
        codec.deflate(payload, &mut header, 0).unwrap()
    }

    fn fragment(blocks: &[Vec<u8>]) -> Vec<u8> {
        let mut data = encode_file_header();
        for block in blocks {
            data.extend_from_slice(block);
        }
        data
    }

    fn revisions(reader: &mut CommitLogReader) -> Vec<i64> {
        reader.read_all().unwrap().iter().map(|b| b.revision).collect()
    }

    #[test]
    fn test_replays_fragments_in_numeric_order() {
        let fs = MemoryFilesystem::new();
        fs.write_file("/log/10", &fragment(&[data_block(30, b"c")]));
        fs.write_file("/log/2", &fragment(&[data_block(10, b"a"), data_block(20, b"b")]));

        let mut reader = CommitLogReader::open(Arc::new(fs), "/log").unwrap();
        assert_eq!(revisions(&mut reader), vec![10, 20, 30]);
        assert_eq!(reader.latest_revision(), 30);
        assert_eq!(reader.replay_stats().blocks, 3);
    }

    #[test]
    fn test_link_replayed_depth_first() {
        let fs = MemoryFilesystem::new();
        fs.write_file("/old/0", &fragment(&[data_block(1, b"x"), data_block(2, b"y")]));
        fs.write_file(
            "/log/0",
            &fragment(&[encode_link_block(1, 2, "/old").unwrap(), data_block(3, b"z")]),
        );

        let mut reader = CommitLogReader::open(Arc::new(fs), "/log").unwrap();
        let blocks = reader.read_all().unwrap();
        let revs: Vec<i64> = blocks.iter().map(|b| b.revision).collect();
        assert_eq!(revs, vec![1, 2, 3]);
        assert_eq!(blocks[0].fragment, "/old/0");
        assert_eq!(reader.replay_stats().links_followed, 1);
    }

    #[test]
    fn test_scan_builds_parented_queue() {
        let fs = MemoryFilesystem::new();
        fs.write_file("/old/0", &fragment(&[data_block(1, b"x")]));
        fs.write_file("/old/1", &fragment(&[data_block(2, b"y")]));
        fs.write_file("/log/0", &fragment(&[encode_link_block(1, 2, "/old").unwrap()]));

        let reader = CommitLogReader::open(Arc::new(fs), "/log").unwrap();
        let queue = reader.fragments();
        assert_eq!(queue.len(), 3);

        let link = queue.iter().find(|fi| fi.log_dir() == "/log").unwrap();
        assert_eq!(link.references(), 2);
        assert_eq!(link.revision(), 2);
        assert!(link.purge_dirs().contains("/old"));
        for child in queue.iter().filter(|fi| fi.log_dir() == "/old") {
            assert_eq!(child.parent(), Some(link.id()));
        }
    }

    #[test]
    fn test_torn_tail_of_newest_fragment_ends_replay() {
        let fs = MemoryFilesystem::new();
        let mut data = fragment(&[data_block(5, b"complete"), data_block(6, b"torn block payload")]);
        data.truncate(data.len() - 3);
        fs.write_file("/log/0", &data);

        let mut reader = CommitLogReader::open(Arc::new(fs), "/log").unwrap();
        assert_eq!(revisions(&mut reader), vec![5]);
        assert!(reader.replay_stats().truncated_tail);
    }

    #[test]
    fn test_corruption_in_older_fragment_fails() {
        let fs = MemoryFilesystem::new();
        fs.write_file("/log/0", &fragment(&[data_block(5, b"will be corrupted")]));
        fs.write_file("/log/1", &fragment(&[data_block(6, b"fine")]));
        fs.corrupt_byte("/log/0", 60);

        let mut reader = CommitLogReader::open(Arc::new(fs), "/log").unwrap();
        assert!(matches!(reader.next_block(), Err(CommitLogError::Corruption { .. })));
        assert!(reader.next_block().unwrap().is_none());
    }

    #[test]
    fn test_skip_errors_moves_past_corruption() {
        let fs = MemoryFilesystem::new();
        fs.write_file("/log/0", &fragment(&[data_block(5, b"will be corrupted")]));
        fs.write_file("/log/1", &fragment(&[data_block(6, b"fine")]));
        fs.corrupt_byte("/log/0", 60);

        let config = CommitLogConfig {
            skip_errors: true,
            ..CommitLogConfig::default()
        };
        let mut reader = CommitLogReader::open_with_config(Arc::new(fs), "/log", &config).unwrap();
        assert_eq!(revisions(&mut reader), vec![6]);
        assert_eq!(reader.replay_stats().fragments_skipped, 1);
    }

    #[test]
    fn test_link_cycle_is_not_followed_twice() {
        let fs = MemoryFilesystem::new();
        fs.write_file("/a/0", &fragment(&[data_block(1, b"a"), encode_link_block(1, 1, "/b").unwrap()]));
        fs.write_file("/b/0", &fragment(&[data_block(2, b"b"), encode_link_block(1, 2, "/a").unwrap()]));

        let mut reader = CommitLogReader::open(Arc::new(fs), "/a").unwrap();
        assert_eq!(revisions(&mut reader), vec![1, 2]);
    }

    #[test]
    fn test_missing_directory() {
        let fs = MemoryFilesystem::new();
        assert!(matches!(
            CommitLogReader::open(Arc::new(fs), "/nowhere"),
            Err(CommitLogError::Fs(_))
        ));
    }
}
