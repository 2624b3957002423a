// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Orderly shutdown of the replication loops and both endpoints.
//!
//! Shutdown sequence:
//! 1. Signal every loop through the shared watch channel
//! 2. Join each loop (bounded by the drain timeout)
//! 3. Close both endpoints, attempting each even if the other fails

use super::replicator::LoopReport;
use crate::endpoint::MirrorContext;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of a shutdown.
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Reports of loops that stopped in time.
    pub loops: Vec<LoopReport>,
    /// Directions whose loop did not stop within the drain timeout (or panicked).
    pub unfinished: Vec<String>,
    /// First endpoint close failure, if any.
    pub close_error: Option<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.unfinished.is_empty() && self.close_error.is_none()
    }
}

/// Owns the cancellation signal and the loop task handles.
pub struct ShutdownCoordinator {
    shutdown_tx: watch::Sender<bool>,
    loops: Vec<(String, JoinHandle<LoopReport>)>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            loops: Vec::new(),
            drain_timeout,
        }
    }

    /// A receiver for a new loop.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Track a spawned loop so shutdown can join it.
    pub fn register(&mut self, direction: impl Into<String>, handle: JoinHandle<LoopReport>) {
        self.loops.push((direction.into(), handle));
    }

    pub fn loop_count(&self) -> usize {
        self.loops.len()
    }

    pub fn is_triggered(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Signal every loop to stop. Idempotent.
    pub fn trigger(&self) {
        // send_replace works with no receivers left
        if !self.shutdown_tx.send_replace(true) {
            info!("Shutdown signalled");
        }
    }

    /// Stop every loop, then close both endpoints.
    pub async fn shutdown(&mut self, context: &MirrorContext) -> ShutdownReport {
        self.trigger();
        let mut report = ShutdownReport::default();

        let loops = std::mem::take(&mut self.loops);
        if !loops.is_empty() {
            info!(loops = loops.len(), "Waiting for replication loops to finish");
        }

        for (direction, mut handle) in loops {
            match tokio::time::timeout(self.drain_timeout, &mut handle).await {
                Ok(Ok(loop_report)) => {
                    debug!(direction = %direction, "Replication loop finished");
                    report.loops.push(loop_report);
                }
                Ok(Err(e)) => {
                    error!(direction = %direction, error = %e, "Replication loop panicked");
                    report.unfinished.push(direction);
                }
                Err(_) => {
                    warn!(
                        direction = %direction,
                        timeout_ms = self.drain_timeout.as_millis() as u64,
                        "Replication loop did not stop in time, aborting (batch not committed)"
                    );
                    handle.abort();
                    report.unfinished.push(direction);
                }
            }
        }

        if let Err(e) = context.close().await {
            error!(error = %e, "Failed to close endpoints cleanly");
            report.close_error = Some(e.to_string());
        }

        report
    }
}
