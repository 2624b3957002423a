// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mirror agent coordinator.
//!
//! The orchestrator that ties together:
//! - Both cluster endpoints via [`crate::endpoint::MirrorContext`]
//! - Topic provisioning via [`crate::provision::TopicProvisioner`]
//! - One [`ReplicationEngine`] per direction with topics to consume
//! - Orderly shutdown via [`ShutdownCoordinator`]
//!
//! # Startup Sequence
//!
//! 1. Resolve the agent id and parse the topic registry
//! 2. Build both endpoints (exactly once, before anything else runs)
//! 3. Check connectivity (logged only)
//! 4. Provision topics on both clusters (fatal on missing topics)
//! 5. Spawn the replication loops

mod replicator;
mod shutdown;
mod types;

pub use replicator::{EngineSettings, LoopReport, ReplicationEngine, StepOutcome};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use types::{AgentState, LoopPhase};

use crate::config::AgentConfig;
use crate::endpoint::{ConnectionFactory, MirrorContext};
use crate::error::{MirrorError, Result};
use crate::metrics;
use crate::provision::{ProvisionReport, TopicProvisioner};
use crate::topic::TopicRegistry;
use std::future::Future;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// The mirror agent.
///
/// Owns the configuration, the topic registry and both endpoints, and runs
/// one replication loop per direction.
pub struct MirrorAgent {
    config: AgentConfig,
    agent_id: String,
    registry: TopicRegistry,
    context: MirrorContext,
    state_tx: watch::Sender<AgentState>,
    state_rx: watch::Receiver<AgentState>,
    shutdown: ShutdownCoordinator,
}

impl MirrorAgent {
    /// Resolve the agent id, parse topics and build both endpoints.
    ///
    /// The agent starts in `Created` state. Call [`start()`](Self::start)
    /// to provision topics and begin replicating.
    pub fn connect(config: AgentConfig, factory: &dyn ConnectionFactory) -> Result<Self> {
        let agent_id = config.agent_id()?;
        let registry =
            TopicRegistry::from_specs(&config.source.topics, &config.destination.topics)?;

        if registry.is_empty() {
            warn!("No topics configured in either direction");
        }

        let context = MirrorContext::connect(factory, &config, &agent_id, &registry)?;
        let (state_tx, state_rx) = watch::channel(AgentState::Created);
        let drain_timeout = config.tuning.shutdown_grace() + config.tuning.metadata_timeout();

        metrics::set_agent_state("Created");
        Ok(Self {
            config,
            agent_id,
            registry,
            context,
            state_tx,
            state_rx,
            shutdown: ShutdownCoordinator::new(drain_timeout),
        })
    }

    /// Get current agent state.
    pub fn state(&self) -> AgentState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<AgentState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), AgentState::Running)
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn context(&self) -> &MirrorContext {
        &self.context
    }

    /// Number of replication loops started.
    pub fn replicator_count(&self) -> usize {
        self.shutdown.loop_count()
    }

    fn set_state(&self, state: AgentState) {
        let _ = self.state_tx.send(state);
        metrics::set_agent_state(&state.to_string());
    }

    /// Provision topics on both clusters.
    ///
    /// Returns the first [`MirrorError::MissingTopics`] encountered.
    pub async fn provision(&self) -> Result<Vec<ProvisionReport>> {
        let provisioner = TopicProvisioner::new(self.config.create_topics, &self.registry);
        let mut reports = Vec::with_capacity(2);
        for endpoint in self.context.endpoints() {
            reports.push(provisioner.ensure_topics(endpoint).await?);
        }
        Ok(reports)
    }

    /// Provision topics, then spawn the replication loops.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != AgentState::Created {
            return Err(MirrorError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        info!(
            agent_id = %self.agent_id,
            push_topics = self.context.source.topics().len(),
            pull_topics = self.context.destination.topics().len(),
            "Starting mirror agent"
        );
        self.set_state(AgentState::Provisioning);

        self.context
            .check_connectivity(self.config.tuning.metadata_timeout())
            .await;

        if let Err(e) = self.provision().await {
            error!(error = %e, "Topic provisioning failed");
            self.set_state(AgentState::Failed);
            return Err(e);
        }

        let settings = EngineSettings::from_config(&self.config);
        let directions = [
            (&self.context.source, &self.context.destination),
            (&self.context.destination, &self.context.source),
        ];
        for (from, to) in directions {
            match ReplicationEngine::between(from, to, settings) {
                Some(engine) => {
                    let direction = engine.direction().to_string();
                    let handle = tokio::spawn(engine.run(self.shutdown.subscribe()));
                    info!(direction = %direction, "Spawned replication loop");
                    self.shutdown.register(direction, handle);
                }
                None => {
                    info!(cluster = %from.name(), "No topics to consume, no replication loop");
                }
            }
        }

        metrics::set_active_replicators(self.shutdown.loop_count());
        self.set_state(AgentState::Running);
        info!(loops = self.shutdown.loop_count(), "Mirror agent running");
        Ok(())
    }

    /// Stop the loops and close both endpoints. Safe to call from any state.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        info!("Shutting down mirror agent");
        self.set_state(AgentState::ShuttingDown);

        let report = self.shutdown.shutdown(&self.context).await;
        metrics::set_active_replicators(0);

        for loop_report in &report.loops {
            info!(
                direction = %loop_report.direction,
                batches_committed = loop_report.batches_committed,
                batches_abandoned = loop_report.batches_abandoned,
                records = loop_report.records_replicated,
                "Replication totals"
            );
        }

        self.set_state(AgentState::Stopped);
        info!(clean = report.is_clean(), "Mirror agent stopped");
        report
    }

    /// Start, wait for `signal`, then shut down.
    ///
    /// A startup failure closes both endpoints before returning the error.
    pub async fn run_until<F>(mut self, signal: F) -> Result<ShutdownReport>
    where
        F: Future<Output = ()>,
    {
        if let Err(e) = self.start().await {
            if let Err(close_err) = self.context.close().await {
                warn!(error = %close_err, "Failed to close endpoints after startup failure");
            }
            return Err(e);
        }

        signal.await;
        Ok(self.shutdown().await)
    }
}
