//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - An in-memory cluster implementing all three client capabilities
//! - A connection factory handing out those clusters by role
//! - Redpanda testcontainer setup

#![allow(dead_code)]

pub mod containers;
pub mod mock_cluster;

pub use containers::*;
pub use mock_cluster::*;

use mirror_agent::coordinator::EngineSettings;
use mirror_agent::{AgentConfig, MirrorContext, ReplicationEngine, TopicRegistry};
use std::sync::Arc;

/// Agent id used by every test configuration.
pub const AGENT_ID: &str = "agent-1";

/// Test configuration with the given push and pull topic specs.
pub fn test_config(push: &[&str], pull: &[&str]) -> AgentConfig {
    AgentConfig::for_testing(AGENT_ID, push, pull)
}

/// Both endpoints connected through `factory`.
pub fn connect_context(config: &AgentConfig, factory: &MockFactory) -> MirrorContext {
    let registry =
        TopicRegistry::from_specs(&config.source.topics, &config.destination.topics).unwrap();
    MirrorContext::connect(factory, config, AGENT_ID, &registry).unwrap()
}

/// Engine consuming the source cluster and producing into the destination.
pub fn push_engine(config: &AgentConfig, context: &MirrorContext) -> ReplicationEngine {
    ReplicationEngine::between(
        &context.source,
        &context.destination,
        EngineSettings::from_config(config),
    )
    .expect("source has push topics")
}

/// Engine consuming the destination cluster and producing into the source.
pub fn pull_engine(config: &AgentConfig, context: &MirrorContext) -> ReplicationEngine {
    ReplicationEngine::between(
        &context.destination,
        &context.source,
        EngineSettings::from_config(config),
    )
    .expect("destination has pull topics")
}

/// Source and destination clusters holding `source_topics` and
/// `destination_topics`.
pub fn mock_pair(source_topics: &[&str], destination_topics: &[&str]) -> MockFactory {
    MockFactory::new(
        MockCluster::with_topics("source", source_topics),
        MockCluster::with_topics("destination", destination_topics),
    )
}

/// `n` values `b"record-0"`, `b"record-1"`, ...
pub fn numbered_values(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("record-{}", i).into_bytes()).collect()
}

/// Append numbered values to `topic` on `cluster`.
pub fn seed(cluster: &Arc<MockCluster>, topic: &str, n: usize) {
    let values = numbered_values(n);
    let refs: Vec<&[u8]> = values.iter().map(Vec::as_slice).collect();
    cluster.append_values(topic, &refs);
}

/// Wait (up to 5s) until `condition` holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}
