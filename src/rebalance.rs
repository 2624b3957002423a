// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Rebalance guard.
//!
//! The replication loop holds the guard from the moment a polled batch is
//! handed to the producer until its offsets are committed (or the batch is
//! abandoned and rewound). The group-membership callback consults it on every
//! revocation and records the revoked partitions.
//!
//! librdkafka only serves rebalance callbacks from inside a poll, and the
//! loop does not poll while it holds the guard, so a revocation can only land
//! while a poll is still collecting records. The consumer stops collecting at
//! the first revocation and drops every record from a revoked partition with
//! [`RebalanceGuard::discard_revoked`]: the loop never holds uncommitted
//! offsets for a partition it no longer owns. The callback never blocks.

use crate::client::ConsumedRecord;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct GuardState {
    /// A batch is between produce and commit.
    blocked: bool,
    /// Partitions revoked since the last [`RebalanceGuard::clear_revocations`].
    revoked: HashSet<(String, i32)>,
}

/// Shared "commit pending" flag plus the partitions revoked during a poll.
///
/// Clone is cheap; all clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct RebalanceGuard {
    inner: Arc<Mutex<GuardState>>,
}

impl RebalanceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GuardState> {
        // A poisoned state is still a valid flag and set.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark a batch as in flight until [`release`](Self::release).
    pub fn block(&self) {
        self.state().blocked = true;
    }

    pub fn release(&self) {
        self.state().blocked = false;
    }

    pub fn is_blocked(&self) -> bool {
        self.state().blocked
    }

    /// Hold the guard until the returned handle is dropped.
    pub fn hold(&self) -> RebalanceHold {
        self.block();
        RebalanceHold { guard: self.clone() }
    }

    /// Record a revocation. Returns `true` if a batch was in flight.
    pub fn note_revoked<I>(&self, partitions: I) -> bool
    where
        I: IntoIterator<Item = (String, i32)>,
    {
        let mut state = self.state();
        state.revoked.extend(partitions);
        state.blocked
    }

    pub fn has_revocations(&self) -> bool {
        !self.state().revoked.is_empty()
    }

    /// Forget revocations recorded so far. Called when a poll starts.
    pub fn clear_revocations(&self) {
        self.state().revoked.clear();
    }

    /// Drop records whose partition was revoked since the last clear.
    /// Returns how many were dropped.
    pub fn discard_revoked(&self, records: &mut Vec<ConsumedRecord>) -> usize {
        let state = self.state();
        if state.revoked.is_empty() {
            return 0;
        }
        let before = records.len();
        records.retain(|r| !state.revoked.contains(&(r.topic.clone(), r.partition)));
        before - records.len()
    }
}

/// Releases its [`RebalanceGuard`] on drop.
#[derive(Debug)]
pub struct RebalanceHold {
    guard: RebalanceGuard,
}

impl Drop for RebalanceHold {
    fn drop(&mut self) {
        self.guard.release();
    }
}
