// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Emitted through the `metrics` facade; the binary decides whether an
//! exporter is installed. Covers:
//! - Records polled, produced and skipped per direction
//! - Batch outcomes (committed, abandoned with reason)
//! - Fetch errors and the current backoff
//! - Topic provisioning
//! - Agent lifecycle state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `mirror_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use mirror_agent::metrics;
//! use std::time::Duration;
//!
//! metrics::record_records_polled("source>destination", 42);
//! metrics::record_batch_committed("source>destination", 42, Duration::from_millis(80));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record records returned by a poll.
pub fn record_records_polled(direction: &str, count: usize) {
    counter!("mirror_records_polled_total", "direction" => direction.to_string()).increment(count as u64);
}

/// Record records acknowledged by the destination.
pub fn record_records_produced(direction: &str, count: usize) {
    counter!("mirror_records_produced_total", "direction" => direction.to_string()).increment(count as u64);
}

/// Record records skipped because their topic has no route.
pub fn record_records_unroutable(direction: &str, count: usize) {
    counter!("mirror_records_unroutable_total", "direction" => direction.to_string()).increment(count as u64);
}

/// Record a committed batch.
pub fn record_batch_committed(direction: &str, records: usize, duration: Duration) {
    counter!("mirror_batches_committed_total", "direction" => direction.to_string()).increment(1);
    histogram!("mirror_batch_size", "direction" => direction.to_string()).record(records as f64);
    histogram!("mirror_batch_duration_seconds", "direction" => direction.to_string())
        .record(duration.as_secs_f64());
}

/// Record an abandoned batch.
///
/// `reason` is one of `produce_failed`, `shutdown`.
pub fn record_batch_abandoned(direction: &str, reason: &str) {
    counter!(
        "mirror_batches_abandoned_total",
        "direction" => direction.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a failed offset commit.
pub fn record_commit_failure(direction: &str) {
    counter!("mirror_commit_failures_total", "direction" => direction.to_string()).increment(1);
}

/// Record a consumer rewind after an abandoned batch.
pub fn record_rewind(direction: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("mirror_rewinds_total", "direction" => direction.to_string(), "status" => status).increment(1);
}

/// Record a failed poll.
pub fn record_fetch_error(direction: &str) {
    counter!("mirror_fetch_errors_total", "direction" => direction.to_string()).increment(1);
}

/// Current backoff delay (0 when polling normally).
pub fn set_backoff_seconds(direction: &str, secs: u64) {
    gauge!("mirror_backoff_seconds", "direction" => direction.to_string()).set(secs as f64);
}

/// Record a topic creation attempt.
pub fn record_topic_created(cluster: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("mirror_topics_created_total", "cluster" => cluster.to_string(), "status" => status).increment(1);
}

/// Number of running replication loops.
pub fn set_active_replicators(count: usize) {
    gauge!("mirror_active_replicators").set(count as f64);
}

/// Record agent lifecycle state.
pub fn set_agent_state(state: &str) {
    // Numeric encoding for alerting
    let value = match state {
        "Created" => 0.0,
        "Provisioning" => 1.0,
        "Running" => 2.0,
        "ShuttingDown" => 3.0,
        "Stopped" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    };
    gauge!("mirror_agent_state").set(value);
}
