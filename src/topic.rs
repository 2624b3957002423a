// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Topic registry: which topics flow in which direction.
//!
//! A topic spec is either `"name"` (identity mirror) or `"src:dst"`. The
//! textual order is always source-side first, destination-side second; the
//! direction decides which side is polled and which is produced to.
//!
//! ```text
//! Push  "a:b"   source cluster "a"  ──►  destination cluster "b"
//! Pull  "a:b"   source cluster "a"  ◄──  destination cluster "b"
//! ```

use crate::error::{MirrorError, Result};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Which way records flow for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Source → destination.
    Push,
    /// Destination → source.
    Pull,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Push => write!(f, "push"),
            Direction::Pull => write!(f, "pull"),
        }
    }
}

/// Which cluster an endpoint talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Source,
    Destination,
}

impl Role {
    /// Key prefix of this role's block in the configuration document.
    pub fn config_prefix(&self) -> &'static str {
        match self {
            Role::Source => "source",
            Role::Destination => "destination",
        }
    }

    /// The role on the other side of the mirror.
    pub fn opposite(&self) -> Role {
        match self {
            Role::Source => Role::Destination,
            Role::Destination => Role::Source,
        }
    }

    /// The direction whose topics this role consumes.
    pub fn consumed_direction(&self) -> Direction {
        match self {
            Role::Source => Direction::Push,
            Role::Destination => Direction::Pull,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_prefix())
    }
}

/// A mirrored topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub source_name: String,
    pub destination_name: String,
    pub direction: Direction,
}

impl Topic {
    /// The physical topic name polled for this mirror.
    pub fn consume_from(&self) -> &str {
        match self.direction {
            Direction::Push => &self.source_name,
            Direction::Pull => &self.destination_name,
        }
    }

    /// The physical topic name records are produced to.
    pub fn produce_to(&self) -> &str {
        match self.direction {
            Direction::Push => &self.destination_name,
            Direction::Pull => &self.source_name,
        }
    }

    /// The physical name of this topic on the cluster with `role`.
    pub fn name_for(&self, role: Role) -> &str {
        match role {
            Role::Source => &self.source_name,
            Role::Destination => &self.destination_name,
        }
    }

    /// The role whose cluster this topic is consumed from.
    pub fn consumer_role(&self) -> Role {
        match self.direction {
            Direction::Push => Role::Source,
            Direction::Pull => Role::Destination,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Push => write!(f, "{} > {}", self.source_name, self.destination_name),
            Direction::Pull => write!(f, "{} < {}", self.source_name, self.destination_name),
        }
    }
}

/// Parse topic specs for one direction.
///
/// Output order follows input order.
pub fn parse_topics<S: AsRef<str>>(specs: &[S], direction: Direction) -> Result<Vec<Topic>> {
    specs
        .iter()
        .map(|spec| parse_topic(spec.as_ref(), direction))
        .collect()
}

fn parse_topic(spec: &str, direction: Direction) -> Result<Topic> {
    let invalid = |reason: &str| MirrorError::TopicSpec {
        spec: spec.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = spec.split(':').map(str::trim).collect();
    let (source_name, destination_name) = match parts.as_slice() {
        [name] => (*name, *name),
        [src, dst] => (*src, *dst),
        _ => return Err(invalid("expected \"name\" or \"source:destination\"")),
    };

    if source_name.is_empty() || destination_name.is_empty() {
        return Err(invalid("topic names must not be empty"));
    }

    Ok(Topic {
        source_name: source_name.to_string(),
        destination_name: destination_name.to_string(),
        direction,
    })
}

/// The full set of mirrored topics, split by direction.
#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    push: Vec<Topic>,
    pull: Vec<Topic>,
}

impl TopicRegistry {
    /// Build a registry from the push (source) and pull (destination) spec lists.
    ///
    /// Rejects a topic consumed twice on the same cluster, and a topic that is
    /// both consumed from and produced to on the same cluster.
    pub fn from_specs<S: AsRef<str>>(push_specs: &[S], pull_specs: &[S]) -> Result<Self> {
        let registry = Self {
            push: parse_topics(push_specs, Direction::Push)?,
            pull: parse_topics(pull_specs, Direction::Pull)?,
        };
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<()> {
        for role in [Role::Source, Role::Destination] {
            let consumed = self.topics_for_role(role);
            let mut seen = HashSet::new();
            for topic in consumed {
                if !seen.insert(topic.consume_from()) {
                    return Err(MirrorError::TopicSpec {
                        spec: topic.to_string(),
                        reason: format!(
                            "topic {} is consumed more than once on the {} cluster",
                            topic.consume_from(),
                            role
                        ),
                    });
                }
            }

            // Topics produced into this role's cluster come from the opposite role.
            for topic in self.topics_for_role(role.opposite()) {
                if seen.contains(topic.produce_to()) {
                    return Err(MirrorError::TopicSpec {
                        spec: topic.to_string(),
                        reason: format!(
                            "topic {} is both mirrored out of and into the {} cluster",
                            topic.produce_to(),
                            role
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Push topics followed by pull topics.
    pub fn all_topics(&self) -> Vec<Topic> {
        self.push.iter().chain(self.pull.iter()).cloned().collect()
    }

    /// Topics an endpoint of `role` must open a consumer for.
    pub fn topics_for_role(&self, role: Role) -> &[Topic] {
        match role.consumed_direction() {
            Direction::Push => &self.push,
            Direction::Pull => &self.pull,
        }
    }

    /// Physical topic names the cluster with `role` must hold, deduplicated,
    /// in registry order.
    pub fn required_names(&self, role: Role) -> Vec<String> {
        let mut seen = HashSet::new();
        self.push
            .iter()
            .chain(self.pull.iter())
            .map(|t| t.name_for(role))
            .filter(|name| seen.insert(*name))
            .map(str::to_string)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.push.is_empty() && self.pull.is_empty()
    }
}

/// Lookup from a consumed topic name to the topic to produce into.
#[derive(Debug, Clone, Default)]
pub struct TopicRoutes {
    routes: HashMap<String, String>,
}

impl TopicRoutes {
    pub fn new(topics: &[Topic]) -> Self {
        let routes = topics
            .iter()
            .map(|t| (t.consume_from().to_string(), t.produce_to().to_string()))
            .collect();
        Self { routes }
    }

    /// Destination topic for records read from `consumed`.
    pub fn produce_to(&self, consumed: &str) -> Option<&str> {
        self.routes.get(consumed).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
