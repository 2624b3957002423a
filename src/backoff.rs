// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fetch-error backoff for the replication loop.
//!
//! Consecutive poll failures sleep for the square of the failure count, in
//! seconds, capped at the configured maximum. Any successful poll (empty or
//! not) resets the count.
//!
//! # Backoff Schedule
//!
//! ```text
//! Failure  Delay (max 600s)
//! -------  -----
//! 1        1s
//! 2        4s
//! 3        9s
//! 10       100s
//! 25       600s   (625s capped)
//! ```
//!
//! The sleep is cut short by shutdown, see [`sleep_or_shutdown`].

use std::time::Duration;
use tokio::sync::watch;

/// Per-loop fetch error state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    pub consecutive_fetch_errors: u32,
}

/// Computes delays from a [`BackoffState`].
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    max_backoff: Duration,
}

impl BackoffPolicy {
    pub fn new(max_backoff: Duration) -> Self {
        Self { max_backoff }
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Delay for the `n`th consecutive failure: `min(n², max)` seconds.
    pub fn delay_for(&self, consecutive_errors: u32) -> Duration {
        let n = u64::from(consecutive_errors);
        let secs = n.saturating_mul(n);
        Duration::from_secs(secs).min(self.max_backoff)
    }

    /// Count a fetch failure and return how long to wait before the next poll.
    pub fn on_fetch_error(&self, state: &mut BackoffState) -> Duration {
        state.consecutive_fetch_errors = state.consecutive_fetch_errors.saturating_add(1);
        self.delay_for(state.consecutive_fetch_errors)
    }

    /// Reset after a successful fetch.
    pub fn on_fetch_success(&self, state: &mut BackoffState) {
        state.consecutive_fetch_errors = 0;
    }
}

/// Sleep for `delay` unless shutdown is signalled first.
///
/// Returns `true` if the full delay elapsed, `false` if shutdown
/// interrupted it (or had already been requested).
pub async fn sleep_or_shutdown(delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }

    tokio::select! {
        biased;

        // Sender dropped counts as shutdown.
        _ = shutdown_rx.changed() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
