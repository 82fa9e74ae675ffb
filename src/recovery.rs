/// Snapshot-based resynchronization
///
/// Decides whether a freshly fetched snapshot is recent enough to resume
/// streaming from, and bounds how many snapshots one resync may try.

use crate::config::SnapshotBoundary;
use crate::protocol::{Seq, Snapshot};

/// Verdict on one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotCheck {
    /// Apply it and stream from `cursor`
    Accepted { cursor: Seq },
    /// Behind `required`; try another snapshot
    Stale { cursor: Seq, required: Seq },
    /// Stale and out of attempts
    Exhausted { cursor: Seq, required: Seq },
    /// The snapshot's next cursor does not fit in a seq
    Overflow,
}

#[derive(Debug, Clone)]
pub struct RecoveryManager {
    boundary: SnapshotBoundary,
    max_attempts: u32,
    attempts: u32,
    required: Seq,
}

impl RecoveryManager {
    pub fn new(boundary: SnapshotBoundary, max_attempts: u32) -> Self {
        RecoveryManager {
            boundary,
            max_attempts: max_attempts.max(1),
            attempts: 0,
            required: 0,
        }
    }

    /// Start a recovery that must land at or past both the cursor and the
    /// server's oldest retained seq
    pub fn begin(&mut self, cursor: Seq, min_available: Option<Seq>) {
        self.attempts = 0;
        self.required = cursor.max(min_available.unwrap_or(0));
    }

    /// First seq to stream after applying `snapshot`
    pub fn next_cursor(&self, snapshot: &Snapshot) -> Option<Seq> {
        match (snapshot.state_seq, self.boundary) {
            (None, _) => Some(0),
            (Some(seq), SnapshotBoundary::Inclusive) => seq.checked_add(1),
            (Some(seq), SnapshotBoundary::Exclusive) => Some(seq),
        }
    }

    /// Count an attempt and judge the snapshot
    pub fn check(&mut self, snapshot: &Snapshot) -> SnapshotCheck {
        self.attempts += 1;

        let cursor = match self.next_cursor(snapshot) {
            Some(cursor) => cursor,
            None => return SnapshotCheck::Overflow,
        };

        if cursor >= self.required {
            SnapshotCheck::Accepted { cursor }
        } else if self.attempts >= self.max_attempts {
            SnapshotCheck::Exhausted {
                cursor,
                required: self.required,
            }
        } else {
            SnapshotCheck::Stale {
                cursor,
                required: self.required,
            }
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn required(&self) -> Seq {
        self.required
    }
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new(SnapshotBoundary::default(), 5)
    }
}
