// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Topic provisioning.
//!
//! Before any replication loop starts, every cluster must hold each physical
//! topic name its role is responsible for. Missing topics are created when
//! `create_topics` is enabled; otherwise startup fails.
//!
//! ```text
//! required names ─► drop reserved ─► list existing ─► missing?
//!                                                       │
//!                   create_topics = false ──────────────┼──► MissingTopics (fatal)
//!                   create_topics = true  ──► create ───┴──► re-list ──► still missing? ──► MissingTopics
//! ```
//!
//! Existing topics are never modified.

use crate::endpoint::Endpoint;
use crate::error::{MirrorError, Result};
use crate::metrics;
use crate::topic::TopicRegistry;
use std::collections::HashSet;
use tracing::{info, warn};

/// Internal schema-registry topic, never required and never created.
pub const SCHEMA_REGISTRY_TOPIC: &str = "_schemas";

/// What provisioning found and did on one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub cluster: String,
    /// Names that were already present.
    pub existing: Vec<String>,
    /// Names created by this run.
    pub created: Vec<String>,
    /// Names whose creation request failed.
    pub failed: Vec<String>,
}

impl ProvisionReport {
    pub fn required(&self) -> usize {
        self.existing.len() + self.created.len() + self.failed.len()
    }
}

/// Checks and creates the topics each cluster needs.
#[derive(Debug, Clone)]
pub struct TopicProvisioner<'a> {
    create_topics: bool,
    registry: &'a TopicRegistry,
}

impl<'a> TopicProvisioner<'a> {
    pub fn new(create_topics: bool, registry: &'a TopicRegistry) -> Self {
        Self {
            create_topics,
            registry,
        }
    }

    /// Names the cluster of `endpoint` must hold, reserved name excluded.
    pub fn required_topics(&self, endpoint: &Endpoint) -> Vec<String> {
        self.registry
            .required_names(endpoint.role())
            .into_iter()
            .filter(|name| name != SCHEMA_REGISTRY_TOPIC)
            .collect()
    }

    /// Make sure every required topic exists on `endpoint`'s cluster.
    ///
    /// Returns [`MirrorError::MissingTopics`] if any required topic is absent
    /// and auto-create is disabled, or is still absent after creation.
    pub async fn ensure_topics(&self, endpoint: &Endpoint) -> Result<ProvisionReport> {
        let cluster = endpoint.name().to_string();
        let required = self.required_topics(endpoint);
        let mut report = ProvisionReport {
            cluster: cluster.clone(),
            ..Default::default()
        };

        if required.is_empty() {
            info!(cluster = %cluster, "No topics to provision");
            return Ok(report);
        }

        let existing: HashSet<String> = endpoint
            .admin()
            .list_topics()
            .await
            .map_err(|e| MirrorError::client("list topics", e))?
            .into_iter()
            .collect();

        let mut missing = Vec::new();
        for name in required {
            if existing.contains(&name) {
                info!(cluster = %cluster, topic = %name, "Topic exists");
                report.existing.push(name);
            } else {
                missing.push(name);
            }
        }

        if missing.is_empty() {
            return Ok(report);
        }

        if !self.create_topics {
            for name in &missing {
                warn!(cluster = %cluster, topic = %name, "Required topic is missing and create_topics is disabled");
            }
            return Err(MirrorError::MissingTopics {
                cluster,
                topics: missing,
            });
        }

        for name in missing {
            info!(cluster = %cluster, topic = %name, "Creating topic");
            match endpoint.admin().create_topic(&name).await {
                Ok(()) => {
                    metrics::record_topic_created(&cluster, true);
                    report.created.push(name);
                }
                Err(e) => {
                    let err = MirrorError::TopicCreation {
                        topic: name.clone(),
                        message: e.to_string(),
                    };
                    warn!(cluster = %cluster, error = %err, "Topic creation failed");
                    metrics::record_topic_created(&cluster, false);
                    report.failed.push(name);
                }
            }
        }

        if report.failed.is_empty() {
            info!(cluster = %cluster, created = report.created.len(), "Topics provisioned");
            return Ok(report);
        }

        // A failed request may still have created the topic (timeout after commit)
        let present: HashSet<String> = endpoint
            .admin()
            .list_topics()
            .await
            .map_err(|e| MirrorError::client("list topics", e))?
            .into_iter()
            .collect();

        let still_missing: Vec<String> = report
            .failed
            .iter()
            .filter(|name| !present.contains(*name))
            .cloned()
            .collect();

        if still_missing.is_empty() {
            info!(cluster = %cluster, "Topics present after failed creation requests");
            return Ok(report);
        }

        Err(MirrorError::MissingTopics {
            cluster,
            topics: still_missing,
        })
    }
}
