// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication loop: consume from one cluster, produce to the other.
//!
//! One [`ReplicationEngine`] runs per direction that has topics to consume.
//! Each iteration ([`ReplicationEngine::step`]) is:
//!
//! 1. Poll up to `max_poll_records` records
//! 2. Hold the rebalance guard
//! 3. Produce every record to its mapped destination topic
//! 4. Wait for every acknowledgment (the batch barrier)
//! 5. Commit the batch's offsets, then release the guard
//!
//! # Failure Handling
//!
//! - **Fetch error**: quadratic backoff, interruptible by shutdown. No offset moves.
//! - **Produce error**: the batch is abandoned. Nothing is committed and the
//!   consumer is rewound to the first offset of each partition in the batch,
//!   so the next poll re-reads it. Destination duplicates are expected.
//! - **Rewind error**: retried before every poll with the fetch backoff. The
//!   loop keeps polling in between (rebalances are only served by a poll) but
//!   holds back records from the partitions still awaiting the rewind, so no
//!   commit ever moves past the abandoned batch.
//! - **Commit error**: logged; the loop moves on. The next successful commit
//!   covers the same partitions.
//!
//! # Graceful Shutdown
//!
//! Shutdown is checked before every poll and interrupts a pending poll or
//! backoff sleep immediately. A batch whose produces are in flight gets
//! `shutdown_grace` to collect its acknowledgments; if they all arrive the
//! commit still runs, otherwise the batch is abandoned without a commit.

use super::types::LoopPhase;
use crate::backoff::{sleep_or_shutdown, BackoffPolicy, BackoffState};
use crate::batch::{failed_ranges, Batch, BatchOffsets, BatchResult};
use crate::client::{ClientError, ConsumedRecord, RecordConsumer, RecordProducer};
use crate::config::AgentConfig;
use crate::endpoint::Endpoint;
use crate::metrics;
use crate::rebalance::RebalanceGuard;
use crate::topic::TopicRoutes;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Loop parameters, taken from the agent configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub max_poll_records: usize,
    pub backoff: BackoffPolicy,
    /// How long in-flight produces may take once shutdown was signalled.
    pub shutdown_grace: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_poll_records: config.max_poll_records,
            backoff: BackoffPolicy::new(config.max_backoff()),
            shutdown_grace: config.tuning.shutdown_grace(),
        }
    }
}

/// What one [`ReplicationEngine::step`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The poll returned nothing.
    Idle,
    /// A batch was produced and its offsets committed.
    Committed { records: usize },
    /// A produce failed (or shutdown cut the wait short); nothing committed.
    Abandoned { failed: usize },
    /// Every record was acknowledged but the commit failed.
    CommitFailed,
    /// The poll failed; the loop slept for `backoff`.
    FetchFailed { backoff: Duration },
    /// Shutdown was signalled; the loop must exit.
    Shutdown,
}

/// Totals for one loop, returned when it stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub direction: String,
    pub batches_committed: u64,
    pub batches_abandoned: u64,
    pub records_replicated: u64,
    pub records_unroutable: u64,
    pub fetch_errors: u64,
    pub commit_failures: u64,
}

/// Consume from one endpoint, produce to the other.
pub struct ReplicationEngine {
    direction: String,
    consumer: Arc<dyn RecordConsumer>,
    producer: Arc<dyn RecordProducer>,
    guard: RebalanceGuard,
    routes: TopicRoutes,
    settings: EngineSettings,
    backoff: BackoffState,
    /// Offsets to seek back to before the next poll.
    pending_rewind: Option<BatchOffsets>,
    phase: LoopPhase,
    report: LoopReport,
}

impl ReplicationEngine {
    /// Engine consuming `from`'s topics and producing into `to`.
    ///
    /// Returns `None` when `from` has nothing to consume.
    pub fn between(from: &Endpoint, to: &Endpoint, settings: EngineSettings) -> Option<Self> {
        let consumer = Arc::clone(from.consumer()?);
        let direction = format!("{}>{}", from.name(), to.name());
        Some(Self {
            report: LoopReport {
                direction: direction.clone(),
                ..Default::default()
            },
            direction,
            consumer,
            producer: Arc::clone(to.producer()),
            guard: from.rebalance_guard().clone(),
            routes: TopicRoutes::new(from.topics()),
            settings,
            backoff: BackoffState::default(),
            pending_rewind: None,
            phase: LoopPhase::Polling,
        })
    }

    /// `"<consumed cluster>><produced cluster>"`, used as the metrics label.
    pub fn direction(&self) -> &str {
        &self.direction
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn backoff_state(&self) -> BackoffState {
        self.backoff
    }

    pub fn report(&self) -> &LoopReport {
        &self.report
    }

    /// Run until shutdown, then return the loop's totals.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> LoopReport {
        let span = info_span!("replicator", direction = %self.direction);

        async move {
            info!(routes = self.routes.len(), "Starting replication loop");

            while self.step(&mut shutdown_rx).await != StepOutcome::Shutdown {}

            self.phase = LoopPhase::ShuttingDown;
            metrics::set_backoff_seconds(&self.direction, 0);
            info!(
                batches_committed = self.report.batches_committed,
                batches_abandoned = self.report.batches_abandoned,
                records = self.report.records_replicated,
                fetch_errors = self.report.fetch_errors,
                "Replication loop stopped"
            );
            self.report
        }
        .instrument(span)
        .await
    }

    /// One poll-produce-commit cycle.
    pub async fn step(&mut self, shutdown_rx: &mut watch::Receiver<bool>) -> StepOutcome {
        if *shutdown_rx.borrow() {
            return StepOutcome::Shutdown;
        }

        if let Some(offsets) = self.pending_rewind.take() {
            if let Err(e) = self.rewind(offsets).await {
                if self.back_off("rewind", e, shutdown_rx).await == StepOutcome::Shutdown {
                    return StepOutcome::Shutdown;
                }
            }
        }

        self.phase = LoopPhase::Polling;
        let polled = tokio::select! {
            biased;

            // Sender dropped counts as shutdown
            _ = shutdown_rx.changed() => return StepOutcome::Shutdown,
            result = self.consumer.poll(self.settings.max_poll_records) => result,
        };

        let mut records = match polled {
            // A pending rewind keeps the backoff growing
            Ok(records) if self.pending_rewind.is_some() => records,
            Ok(records) => {
                if self.backoff.consecutive_fetch_errors > 0 {
                    info!(
                        after_errors = self.backoff.consecutive_fetch_errors,
                        "Fetch recovered"
                    );
                    metrics::set_backoff_seconds(&self.direction, 0);
                }
                self.settings.backoff.on_fetch_success(&mut self.backoff);
                records
            }
            Err(e) => return self.back_off("poll", e, shutdown_rx).await,
        };

        if let Some(ref pending) = self.pending_rewind {
            let before = records.len();
            records.retain(|r| !pending.contains(&r.topic, r.partition));
            if records.len() < before {
                debug!(
                    held_back = before - records.len(),
                    "Holding back records from partitions awaiting rewind"
                );
            }
        }

        if records.is_empty() {
            return StepOutcome::Idle;
        }

        self.replicate(records, shutdown_rx).await
    }

    async fn back_off(
        &mut self,
        operation: &str,
        error: ClientError,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> StepOutcome {
        self.phase = LoopPhase::Backoff;
        self.report.fetch_errors += 1;
        metrics::record_fetch_error(&self.direction);

        let delay = self.settings.backoff.on_fetch_error(&mut self.backoff);
        metrics::set_backoff_seconds(&self.direction, delay.as_secs());
        warn!(
            operation,
            error = %error,
            consecutive_errors = self.backoff.consecutive_fetch_errors,
            backoff_secs = delay.as_secs(),
            "Fetch failed, backing off"
        );

        if sleep_or_shutdown(delay, shutdown_rx).await {
            StepOutcome::FetchFailed { backoff: delay }
        } else {
            StepOutcome::Shutdown
        }
    }

    /// Produce a polled batch and commit it, holding the rebalance guard
    /// throughout.
    async fn replicate(
        &mut self,
        records: Vec<ConsumedRecord>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> StepOutcome {
        let started = Instant::now();
        let _hold = self.guard.hold();

        self.phase = LoopPhase::Draining;
        metrics::record_records_polled(&self.direction, records.len());

        let batch = Batch::assemble(records, &self.routes);
        for record in &batch.unroutable {
            error!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "No route for consumed topic, skipping record"
            );
        }
        if !batch.unroutable.is_empty() {
            self.report.records_unroutable += batch.unroutable.len() as u64;
            metrics::record_records_unroutable(&self.direction, batch.unroutable.len());
        }

        let Batch {
            records,
            offsets,
            unroutable,
        } = batch;
        let mut result = BatchResult {
            total: records.len(),
            skipped: unroutable.len(),
            ..Default::default()
        };

        let producer = Arc::clone(&self.producer);
        let produce_all = join_all(records.into_iter().map(|record| {
            let producer = Arc::clone(&producer);
            async move {
                let origin = (
                    record.source_topic.clone(),
                    record.source_partition,
                    record.source_offset,
                );
                producer.produce(record).await.map_err(|e| (origin, e))
            }
        }));
        tokio::pin!(produce_all);

        let outcomes = tokio::select! {
            outcomes = &mut produce_all => Some(outcomes),
            _ = shutdown_signalled(shutdown_rx) => {
                info!(
                    records = result.total,
                    grace_ms = self.settings.shutdown_grace.as_millis() as u64,
                    "Shutdown during produce wait, waiting for outstanding acknowledgments"
                );
                tokio::time::timeout(self.settings.shutdown_grace, &mut produce_all)
                    .await
                    .ok()
            }
        };

        let Some(outcomes) = outcomes else {
            warn!(
                records = result.total,
                "Acknowledgments outstanding at shutdown, batch not committed"
            );
            self.report.batches_abandoned += 1;
            metrics::record_batch_abandoned(&self.direction, "shutdown");
            return StepOutcome::Abandoned { failed: result.total };
        };

        let failures: Vec<_> = outcomes.into_iter().filter_map(|o| o.err()).collect();
        result.failed = failures.len();
        result.acknowledged = result.total - result.failed;
        metrics::record_records_produced(&self.direction, result.acknowledged);

        if !result.is_success() {
            for range in failed_ranges(
                failures
                    .iter()
                    .map(|((topic, partition, offset), e)| {
                        (topic.as_str(), *partition, *offset, e.to_string())
                    }),
            ) {
                error!(
                    partition = %range.partition,
                    first_offset = range.first_offset,
                    last_offset = range.last_offset,
                    failed = range.count,
                    error = %range.error,
                    "Produce failed, abandoning batch"
                );
            }
            self.report.batches_abandoned += 1;
            metrics::record_batch_abandoned(&self.direction, "produce_failed");

            if let Err(e) = self.rewind(offsets).await {
                warn!(error = %e, "Rewind failed, retrying before next poll");
            }
            return StepOutcome::Abandoned { failed: result.failed };
        }

        // Acknowledged work is committed even if shutdown arrived meanwhile
        self.phase = LoopPhase::Committing;
        match self.consumer.commit(offsets).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                self.report.batches_committed += 1;
                self.report.records_replicated += result.acknowledged as u64;
                metrics::record_batch_committed(&self.direction, result.acknowledged, elapsed);
                log_batch_result(&self.direction, &result, elapsed);
                StepOutcome::Committed { records: result.acknowledged }
            }
            Err(e) => {
                error!(error = %e, records = result.total, "Offset commit failed");
                self.report.commit_failures += 1;
                metrics::record_commit_failure(&self.direction);
                StepOutcome::CommitFailed
            }
        }
    }

    /// Seek back to the start of an abandoned batch. On failure the offsets
    /// are kept and the seek is retried before the next poll.
    async fn rewind(&mut self, offsets: BatchOffsets) -> Result<(), ClientError> {
        match self.consumer.rewind(offsets.clone()).await {
            Ok(()) => {
                debug!(partitions = offsets.len(), "Consumer rewound to start of batch");
                metrics::record_rewind(&self.direction, true);
                Ok(())
            }
            Err(e) => {
                metrics::record_rewind(&self.direction, false);
                self.pending_rewind = Some(offsets);
                Err(e)
            }
        }
    }
}

/// Resolve once shutdown is signalled (or the sender is gone).
async fn shutdown_signalled(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// Log a committed batch at a level matching its outcome.
fn log_batch_result(direction: &str, result: &BatchResult, duration: Duration) {
    if result.total == 0 && result.skipped == 0 {
        return;
    }
    if result.skipped > 0 {
        info!(
            direction,
            produced = result.acknowledged,
            skipped = result.skipped,
            duration_ms = duration.as_millis() as u64,
            "Batch committed with unroutable records"
        );
    } else {
        debug!(
            direction,
            produced = result.acknowledged,
            duration_ms = duration.as_millis() as u64,
            "Batch committed"
        );
    }
}
