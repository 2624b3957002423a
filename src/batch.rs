// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batch assembly for the replication loop.
//!
//! A batch is everything one poll returned. It is mapped onto destination
//! topics, produced as a unit and committed as a unit:
//!
//! ```text
//! poll ──► Batch::assemble ──► produce all ──► await all acks ──► commit offsets
//!              │                                     │
//!              └── BatchOffsets (first, next)        └── any failure: rewind to `first`
//! ```
//!
//! [`BatchOffsets`] records, per partition, the first offset seen and the
//! offset after the last one seen. Commits use `next`; rewinds use `first`.

use crate::client::{ConsumedRecord, ReplicationRecord};
use crate::topic::TopicRoutes;
use std::collections::BTreeMap;
use std::fmt;

/// A topic partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// Offsets covered by a batch on one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionSpan {
    /// First offset in the batch.
    pub first: i64,
    /// Offset after the last record in the batch (the value to commit).
    pub next: i64,
}

impl PartitionSpan {
    /// Number of offsets spanned (including any gaps from compaction).
    pub fn width(&self) -> i64 {
        self.next - self.first
    }
}

/// Per-partition offset spans of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOffsets {
    spans: BTreeMap<TopicPartition, PartitionSpan>,
}

impl BatchOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `offset` of `topic`/`partition` is part of the batch.
    pub fn track(&mut self, topic: &str, partition: i32, offset: i64) {
        let tp = TopicPartition {
            topic: topic.to_string(),
            partition,
        };
        self.spans
            .entry(tp)
            .and_modify(|span| {
                span.first = span.first.min(offset);
                span.next = span.next.max(offset + 1);
            })
            .or_insert(PartitionSpan {
                first: offset,
                next: offset + 1,
            });
    }

    pub fn get(&self, topic: &str, partition: i32) -> Option<PartitionSpan> {
        self.spans
            .iter()
            .find(|(tp, _)| tp.topic == topic && tp.partition == partition)
            .map(|(_, span)| *span)
    }

    pub fn contains(&self, topic: &str, partition: i32) -> bool {
        self.get(topic, partition).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TopicPartition, &PartitionSpan)> {
        self.spans.iter()
    }

    /// Keep only the partitions for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&TopicPartition) -> bool) {
        self.spans.retain(|tp, _| keep(tp));
    }

    /// Number of partitions covered.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// A polled batch mapped onto its destination topics.
#[derive(Debug, Default)]
pub struct Batch {
    /// Records to produce, in poll order.
    pub records: Vec<ReplicationRecord>,
    /// Offsets of every polled record, including skipped ones.
    pub offsets: BatchOffsets,
    /// Records whose topic has no configured route.
    pub unroutable: Vec<ConsumedRecord>,
}

impl Batch {
    /// Map polled records onto destination topics via `routes`.
    ///
    /// Poll order is kept, so records of one partition are produced in
    /// offset order.
    pub fn assemble(polled: Vec<ConsumedRecord>, routes: &TopicRoutes) -> Self {
        let mut batch = Batch {
            records: Vec::with_capacity(polled.len()),
            ..Default::default()
        };

        for record in polled {
            batch.offsets.track(&record.topic, record.partition, record.offset);
            match routes.produce_to(&record.topic) {
                Some(destination) => {
                    let destination = destination.to_string();
                    batch
                        .records
                        .push(ReplicationRecord::from_consumed(record, &destination));
                }
                None => batch.unroutable.push(record),
            }
        }

        batch
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Outcome of producing a batch, for logging and metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Records in the batch.
    pub total: usize,
    /// Records acknowledged by the destination.
    pub acknowledged: usize,
    /// Records that failed after the client's retries.
    pub failed: usize,
    /// Records skipped because no route exists.
    pub skipped: usize,
}

impl BatchResult {
    /// Check if every routable record was acknowledged.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Failed offsets on one partition, as a closed range for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRange {
    pub partition: TopicPartition,
    pub first_offset: i64,
    pub last_offset: i64,
    pub count: usize,
    pub error: String,
}

/// Group failed records by source partition.
pub fn failed_ranges<'a, I>(failures: I) -> Vec<FailedRange>
where
    I: IntoIterator<Item = (&'a str, i32, i64, String)>,
{
    let mut ranges: BTreeMap<TopicPartition, FailedRange> = BTreeMap::new();
    for (topic, partition, offset, error) in failures {
        let tp = TopicPartition {
            topic: topic.to_string(),
            partition,
        };
        ranges
            .entry(tp.clone())
            .and_modify(|range| {
                range.first_offset = range.first_offset.min(offset);
                range.last_offset = range.last_offset.max(offset);
                range.count += 1;
            })
            .or_insert(FailedRange {
                partition: tp,
                first_offset: offset,
                last_offset: offset,
                count: 1,
                error,
            });
    }
    ranges.into_values().collect()
}
