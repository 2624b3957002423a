// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the mirror agent.
//!
//! Errors fall into two groups: startup failures that must stop the process
//! before any replication loop runs, and steady-state failures that the
//! replication loop contains and logs.
//!
//! # Error Categories
//!
//! | Error Type | Fatal | Description |
//! |------------|-------|-------------|
//! | `Config` | Yes | Configuration invalid or unreadable |
//! | `TopicSpec` | Yes | Topic specification could not be parsed |
//! | `MissingTopics` | Yes | Required topics absent and not creatable |
//! | `InvalidState` | Yes | Agent lifecycle violation |
//! | `Internal` | Yes | Unexpected internal error |
//! | `Kafka` | No | Broker or client error |
//! | `Client` | No | Capability call (poll, produce, commit) failed |
//! | `TopicCreation` | No | A single topic could not be created |
//! | `Shutdown` | No | Agent is shutting down |
//!
//! # Propagation
//!
//! Use [`MirrorError::is_fatal()`] to decide whether an error should end the
//! process. Only configuration and startup problems are fatal; everything the
//! replication loop sees is recoverable by re-polling.

use crate::client::ClientError;
use thiserror::Error;

/// Result type alias for mirror agent operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that can occur while configuring or running the agent.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Kafka client error.
    ///
    /// Occurs when building a client or talking to a broker.
    #[error("Kafka error ({operation}): {message}")]
    Kafka {
        operation: String,
        message: String,
        #[source]
        source: Option<rdkafka::error::KafkaError>,
    },

    /// Invalid or missing configuration.
    ///
    /// Fix the configuration document and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A topic specification string could not be parsed.
    #[error("Invalid topic specification '{spec}': {reason}")]
    TopicSpec { spec: String, reason: String },

    /// Required topics are absent and could not be created.
    ///
    /// Raised by the provisioner when auto-create is disabled, or when
    /// creation was attempted but the topics are still missing afterwards.
    #[error("Missing required topics on cluster {cluster}: {}", .topics.join(", "))]
    MissingTopics { cluster: String, topics: Vec<String> },

    /// A single topic creation request failed.
    #[error("Failed to create topic {topic}: {message}")]
    TopicCreation { topic: String, message: String },

    /// A capability call against a cluster failed.
    #[error("Client error ({operation}): {message}")]
    Client { operation: String, message: String },

    /// Agent lifecycle violation (e.g. `start()` twice).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MirrorError {
    /// Create a Kafka error from an rdkafka error.
    pub fn kafka(operation: impl Into<String>, source: rdkafka::error::KafkaError) -> Self {
        Self::Kafka {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a Kafka error without source.
    pub fn kafka_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Kafka {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a capability error with the operation that produced it.
    pub fn client(operation: impl Into<String>, source: ClientError) -> Self {
        Self::Client {
            operation: operation.into(),
            message: source.to_string(),
        }
    }

    /// Check if this error must terminate the process.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::TopicSpec { .. } => true,
            Self::MissingTopics { .. } => true,
            Self::InvalidState { .. } => true,
            Self::Internal(_) => true,
            Self::Kafka { .. } => false, // the client reconnects on its own
            Self::Client { .. } => false,
            Self::TopicCreation { .. } => false,
            Self::Shutdown => false,
        }
    }
}

impl From<rdkafka::error::KafkaError> for MirrorError {
    fn from(e: rdkafka::error::KafkaError) -> Self {
        Self::kafka("unknown", e)
    }
}
