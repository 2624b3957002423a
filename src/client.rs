// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cluster capability traits.
//!
//! The replication loop and the provisioner never talk to a client library
//! directly. They use three capabilities that a [`ConnectionFactory`]
//! hands out per cluster:
//!
//! - [`ClusterAdmin`]: list and create topics, list brokers
//! - [`RecordConsumer`]: bounded poll, commit, rewind
//! - [`RecordProducer`]: produce one record and await its acknowledgment
//!
//! The rdkafka implementation lives in [`crate::kafka`]; tests use an
//! in-memory cluster.
//!
//! # Example
//!
//! ```rust,no_run
//! use mirror_agent::client::{ClusterAdmin, BoxFuture};
//!
//! struct StaticAdmin { topics: Vec<String> }
//!
//! impl ClusterAdmin for StaticAdmin {
//!     fn list_brokers(&self) -> BoxFuture<'_, Vec<String>> {
//!         Box::pin(async move { Ok(vec!["127.0.0.1:9092".to_string()]) })
//!     }
//!
//!     fn list_topics(&self) -> BoxFuture<'_, Vec<String>> {
//!         let topics = self.topics.clone();
//!         Box::pin(async move { Ok(topics) })
//!     }
//!
//!     fn create_topic(&self, _name: &str) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//! }
//! ```
//!
//! [`ConnectionFactory`]: crate::endpoint::ConnectionFactory

use crate::batch::BatchOffsets;
use std::future::Future;
use std::pin::Pin;

/// Result type for capability calls.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = ClientResult<T>> + Send + 'a>>;

/// Error from a capability call, carrying the client's own message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError(pub String);

impl ClientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ClientError {}

impl From<rdkafka::error::KafkaError> for ClientError {
    fn from(e: rdkafka::error::KafkaError) -> Self {
        Self(e.to_string())
    }
}

/// A record header. Keys are strings on the wire; values may be null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub key: String,
    pub value: Option<Vec<u8>>,
}

/// A record as returned by a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    /// `None` for tombstones.
    pub value: Option<Vec<u8>>,
    pub headers: Vec<RecordHeader>,
    /// Producer or broker timestamp in milliseconds, if the record carried one.
    pub timestamp_ms: Option<i64>,
}

/// A record on its way to the opposite cluster.
///
/// Key, value and headers are the consumed bytes unchanged. The outgoing
/// timestamp is left to the producer; `original_timestamp_ms` is kept for
/// logging only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationRecord {
    /// Topic to produce into.
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<RecordHeader>,
    pub original_timestamp_ms: Option<i64>,
    pub source_topic: String,
    pub source_partition: i32,
    pub source_offset: i64,
}

impl ReplicationRecord {
    /// Map a consumed record onto `destination_topic`.
    pub fn from_consumed(record: ConsumedRecord, destination_topic: &str) -> Self {
        Self {
            topic: destination_topic.to_string(),
            key: record.key,
            value: record.value,
            headers: record.headers,
            original_timestamp_ms: record.timestamp_ms,
            source_topic: record.topic,
            source_partition: record.partition,
            source_offset: record.offset,
        }
    }
}

/// Topic administration on one cluster.
pub trait ClusterAdmin: Send + Sync + 'static {
    /// List the brokers the client can see (connectivity check).
    fn list_brokers(&self) -> BoxFuture<'_, Vec<String>>;

    /// List the names of all topics on the cluster.
    fn list_topics(&self) -> BoxFuture<'_, Vec<String>>;

    /// Create a topic with the broker's default partition count and
    /// replication factor.
    fn create_topic(&self, name: &str) -> BoxFuture<'_, ()>;

    /// Release the admin client. Default: nothing to release.
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Group consumer on one cluster, subscribed to the topics its endpoint mirrors.
pub trait RecordConsumer: Send + Sync + 'static {
    /// Return up to `max_records` records. An empty batch means nothing
    /// arrived within the client's poll timeout.
    fn poll(&self, max_records: usize) -> BoxFuture<'_, Vec<ConsumedRecord>>;

    /// Synchronously commit the next offset of every partition in `offsets`.
    fn commit(&self, offsets: BatchOffsets) -> BoxFuture<'_, ()>;

    /// Move the fetch position of every partition in `offsets` back to the
    /// first offset of the batch, so the next poll re-reads it.
    fn rewind(&self, offsets: BatchOffsets) -> BoxFuture<'_, ()>;

    /// Leave the group and release the client.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Producer on one cluster.
pub trait RecordProducer: Send + Sync + 'static {
    /// Produce one record and resolve once the broker acknowledged it, or
    /// the client's own retry budget ran out.
    fn produce(&self, record: ReplicationRecord) -> BoxFuture<'_, ()>;

    /// Flush outstanding records and release the client.
    fn close(&self) -> BoxFuture<'_, ()>;
}
