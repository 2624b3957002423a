// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Agent and loop state types.
//!
//! # Agent State Transitions
//!
//! ```text
//!                  start()
//! Created ───────────────────→ Provisioning
//!    │                              │
//!    │ shutdown()                   │ (all topics present)
//!    ↓                              ↓
//! Stopped ←── ShuttingDown ←──── Running
//!
//! Provisioning ──(missing topics)──→ Failed
//! ```
//!
//! # Replication Loop Phases
//!
//! ```text
//!            ┌──────── empty poll ────────┐
//!            ↓                            │
//!        Polling ──── records ───→ Draining ───→ Committing ──┐
//!         │   ↑                                               │
//!  fetch  │   └───────────────────────────────────────────────┘
//!  error  ↓   ↑
//!        Backoff
//!
//!  any phase ──(shutdown)──→ ShuttingDown   (Committing finishes first)
//! ```

/// State of the mirror agent.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Endpoints built, nothing started.
    ///
    /// Call [`start()`](super::MirrorAgent::start) to provision and replicate.
    Created,

    /// Checking connectivity and required topics on both clusters.
    Provisioning,

    /// Replication loops running.
    Running,

    /// Shutdown signalled. Loops are finishing their current batch.
    ShuttingDown,

    /// Loops joined and endpoints closed.
    Stopped,

    /// Startup failed. Check logs for the cause.
    Failed,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Created => write!(f, "Created"),
            AgentState::Provisioning => write!(f, "Provisioning"),
            AgentState::Running => write!(f, "Running"),
            AgentState::ShuttingDown => write!(f, "ShuttingDown"),
            AgentState::Stopped => write!(f, "Stopped"),
            AgentState::Failed => write!(f, "Failed"),
        }
    }
}

/// Phase of one replication loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Polling,
    Draining,
    Committing,
    Backoff,
    ShuttingDown,
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoopPhase::Polling => "polling",
            LoopPhase::Draining => "draining",
            LoopPhase::Committing => "committing",
            LoopPhase::Backoff => "backoff",
            LoopPhase::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}
