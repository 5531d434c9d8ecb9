// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Tabula Commit Log - Revisions
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Revisions are i64 nanosecond-resolution stamps. They only need to be
// monotonic per log, so `RevisionClock` never hands out the same value
// twice even when the wall clock stalls or steps backwards.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// "No revision". Marks fragments that hold no DATA blocks.
pub const TIMESTAMP_MIN: i64 = i64::MIN;

/// The current wall-clock time in nanoseconds since the Unix epoch.
pub fn revision_now() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000))
}

/// Returns `true` for revisions that may be written to a log.
pub fn is_valid_revision(revision: i64) -> bool {
    revision > 0
}

/// Hands out strictly increasing revisions derived from the wall clock.
#[derive(Debug, Default)]
pub struct RevisionClock {
    last: AtomicI64,
}

impl RevisionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock that will never return a value at or below `floor`, e.g. the
    /// latest revision recovered from a log.
    pub fn starting_after(floor: i64) -> Self {
        Self {
            last: AtomicI64::new(floor),
        }
    }

    /// The next revision.
    pub fn next(&self) -> i64 {
        let now = revision_now();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}
