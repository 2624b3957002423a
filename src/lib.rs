// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Mirror Agent
//!
//! Per-topic, per-direction record mirroring between two Kafka-compatible
//! clusters, called `source` and `destination`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              mirror-agent                                │
//! │                                                                          │
//! │  ┌──────────────────┐   push topics    ┌──────────────────────┐          │
//! │  │ Endpoint(source) │ ───────────────► │ Endpoint(destination)│          │
//! │  │ consumer (push)  │ ◄─────────────── │ consumer (pull)      │          │
//! │  │ producer, admin  │   pull topics    │ producer, admin      │          │
//! │  └──────────────────┘                  └──────────────────────┘          │
//! │          ▲                                        ▲                      │
//! │          └──────── TopicProvisioner (startup) ────┘                      │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each direction with topics runs one replication loop: poll a batch,
//! produce every record to the other cluster, wait for every acknowledgment,
//! then commit the batch's offsets. A failed produce abandons the batch so
//! it is re-read (at-least-once delivery).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mirror_agent::{AgentConfig, KafkaConnectionFactory, MirrorAgent};
//!
//! #[tokio::main]
//! async fn main() -> mirror_agent::Result<()> {
//!     let config = AgentConfig::load("mirror.yaml")?;
//!     let agent = MirrorAgent::connect(config, &KafkaConnectionFactory::new())?;
//!
//!     // Runs until Ctrl-C, then drains and closes both clusters
//!     let report = agent
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     println!("clean shutdown: {}", report.is_clean());
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod batch;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod kafka;
pub mod metrics;
pub mod provision;
pub mod rebalance;
pub mod topic;

// Re-exports for convenience
pub use backoff::{BackoffPolicy, BackoffState};
pub use client::{
    ClusterAdmin, ConsumedRecord, RecordConsumer, RecordHeader, RecordProducer, ReplicationRecord,
};
pub use config::{AgentConfig, ClusterConfig, TuningConfig};
pub use coordinator::{AgentState, MirrorAgent, ReplicationEngine, ShutdownCoordinator};
pub use endpoint::{ConnectionFactory, Endpoint, MirrorContext};
pub use error::{MirrorError, Result};
pub use kafka::KafkaConnectionFactory;
pub use provision::{TopicProvisioner, SCHEMA_REGISTRY_TOPIC};
pub use topic::{parse_topics, Direction, Role, Topic, TopicRegistry};
