// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the mirror agent.
//!
//! The configuration document is YAML, loaded once at startup with
//! [`AgentConfig::load()`] and passed by reference afterwards. Every key is
//! optional; missing keys fall back to the defaults listed below.
//!
//! # Configuration Structure
//!
//! ```text
//! AgentConfig
//! ├── id: String                   # client id, defaults to the hostname
//! ├── create_topics: bool          # auto-create missing topics
//! ├── max_poll_records: usize      # records per poll (1000)
//! ├── max_backoff_secs: u64        # fetch-error backoff ceiling (600)
//! ├── source: ClusterConfig        # push topics live here
//! ├── destination: ClusterConfig   # pull topics live here
//! └── tuning: TuningConfig         # timeouts
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! id: "edge-agent-1"
//! create_topics: true
//!
//! source:
//!   name: "edge"
//!   bootstrap_servers: "127.0.0.1:19092"
//!   topics:
//!     - "telemetry"
//!     - "orders:edge-orders"
//!
//! destination:
//!   name: "central"
//!   bootstrap_servers: "central-1:9092,central-2:9092"
//!   consumer_group_id: "edge-agent-1"
//!   tls:
//!     enabled: true
//!     ca_cert: "/etc/agent/ca.pem"
//!   sasl:
//!     sasl_method: "scram_sha_256"
//!     sasl_username: "agent"
//!     sasl_password: "secret"
//!   topics:
//!     - "config"
//! ```

use crate::error::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Where the kernel reports the hostname on Linux.
const KERNEL_HOSTNAME_PATH: &str = "/proc/sys/kernel/hostname";

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent identity, used as the client id on both clusters.
    /// Defaults to the kernel hostname when absent.
    #[serde(default)]
    pub id: Option<String>,

    /// Create missing topics instead of failing at startup.
    #[serde(default)]
    pub create_topics: bool,

    /// Maximum records returned by one poll.
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,

    /// Ceiling for the fetch-error backoff, in seconds.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// The source cluster. Its `topics` are pushed to the destination.
    #[serde(default = "ClusterConfig::default_source")]
    pub source: ClusterConfig,

    /// The destination cluster. Its `topics` are pulled to the source.
    #[serde(default = "ClusterConfig::default_destination")]
    pub destination: ClusterConfig,

    /// Timeouts for the clients and the replication loop.
    #[serde(default)]
    pub tuning: TuningConfig,
}

fn default_max_poll_records() -> usize {
    1000
}

fn default_max_backoff_secs() -> u64 {
    600 // 10 minutes
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: None,
            create_topics: false,
            max_poll_records: default_max_poll_records(),
            max_backoff_secs: default_max_backoff_secs(),
            source: ClusterConfig::default_source(),
            destination: ClusterConfig::default_destination(),
            tuning: TuningConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Read, parse and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parse and validate a YAML configuration document.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        // An empty document means "all defaults"
        let mut config: AgentConfig = if text.trim().is_empty() {
            AgentConfig::default()
        } else {
            serde_yaml::from_str(text)
                .map_err(|e| MirrorError::Config(format!("invalid YAML: {}", e)))?
        };
        config.source.fill_defaults(&ClusterConfig::default_source());
        config.destination.fill_defaults(&ClusterConfig::default_destination());
        config.validate()?;
        Ok(config)
    }

    /// Create a config for testing with explicit topics, short timeouts and
    /// no hostname lookup.
    pub fn for_testing(id: &str, push: &[&str], pull: &[&str]) -> Self {
        let mut config = Self {
            id: Some(id.to_string()),
            tuning: TuningConfig::testing(),
            ..Default::default()
        };
        config.source.topics = push.iter().map(|s| s.to_string()).collect();
        config.destination.topics = pull.iter().map(|s| s.to_string()).collect();
        config
    }

    /// Check every value that would otherwise fail later at connect time.
    pub fn validate(&self) -> Result<()> {
        if self.max_poll_records == 0 {
            return Err(MirrorError::Config(
                "max_poll_records must be greater than zero".to_string(),
            ));
        }
        if self.max_backoff_secs == 0 {
            return Err(MirrorError::Config(
                "max_backoff_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(ref id) = self.id {
            if id.trim().is_empty() {
                return Err(MirrorError::Config("id must not be empty".to_string()));
            }
        }
        self.source.validate("source")?;
        self.destination.validate("destination")?;
        self.tuning.validate()?;
        Ok(())
    }

    /// The agent id, falling back to the kernel-reported hostname.
    pub fn agent_id(&self) -> Result<String> {
        match self.id {
            Some(ref id) => Ok(id.trim().to_string()),
            None => hostname(),
        }
    }

    /// The backoff ceiling as a Duration.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

fn hostname() -> Result<String> {
    let from_kernel = std::fs::read_to_string(KERNEL_HOSTNAME_PATH)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    from_kernel
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|s| !s.trim().is_empty()))
        .ok_or_else(|| {
            MirrorError::Config(
                "id is not set and the hostname could not be determined".to_string(),
            )
        })
}

// ═══════════════════════════════════════════════════════════════════════════════
// ClusterConfig: one block per role
// ═══════════════════════════════════════════════════════════════════════════════

/// Connection parameters and topics for one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Human readable cluster name (for logs and metrics).
    #[serde(default)]
    pub name: String,

    /// Comma-separated list of `host:port` seed brokers.
    #[serde(default)]
    pub bootstrap_servers: String,

    /// Consumer group used when this cluster has topics to consume.
    /// Defaults to the agent id.
    #[serde(default)]
    pub consumer_group_id: Option<String>,

    /// Highest protocol version to speak, e.g. `"2.1.0"`.
    #[serde(default)]
    pub max_version: Option<String>,

    #[serde(default)]
    pub tls: Option<TlsConfig>,

    #[serde(default)]
    pub sasl: Option<SaslConfig>,

    /// Topic specs consumed from this cluster (`"name"` or `"src:dst"`).
    #[serde(default)]
    pub topics: Vec<String>,
}

impl ClusterConfig {
    pub fn default_source() -> Self {
        Self::with_servers("source", "127.0.0.1:19092")
    }

    pub fn default_destination() -> Self {
        Self::with_servers("destination", "127.0.0.1:29092")
    }

    fn with_servers(name: &str, servers: &str) -> Self {
        Self {
            name: name.to_string(),
            bootstrap_servers: servers.to_string(),
            consumer_group_id: None,
            max_version: None,
            tls: None,
            sasl: None,
            topics: Vec::new(),
        }
    }

    /// Take name and brokers from `defaults` when the document left them out.
    fn fill_defaults(&mut self, defaults: &ClusterConfig) {
        if self.name.trim().is_empty() {
            self.name = defaults.name.clone();
        }
        if self.bootstrap_servers.is_empty() {
            self.bootstrap_servers = defaults.bootstrap_servers.clone();
        }
    }

    /// Seed brokers, trimmed, with empty entries removed.
    pub fn bootstrap_list(&self) -> Vec<String> {
        self.bootstrap_servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Consumer group id, falling back to `agent_id`.
    pub fn group_id(&self, agent_id: &str) -> String {
        self.consumer_group_id
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .unwrap_or(agent_id)
            .to_string()
    }

    /// Display name, falling back to the role prefix.
    pub fn display_name<'a>(&'a self, prefix: &'a str) -> &'a str {
        if self.name.trim().is_empty() {
            prefix
        } else {
            self.name.trim()
        }
    }

    /// Normalised protocol version ceiling (`"v2_1_0"` → `"2.1.0"`).
    pub fn protocol_ceiling(&self) -> Option<Result<String>> {
        self.max_version.as_deref().map(parse_version)
    }

    fn validate(&self, prefix: &str) -> Result<()> {
        if self.bootstrap_list().is_empty() {
            return Err(MirrorError::Config(format!(
                "{}.bootstrap_servers must list at least one broker",
                prefix
            )));
        }
        if let Some(version) = self.protocol_ceiling() {
            version.map_err(|e| MirrorError::Config(format!("{}.max_version: {}", prefix, e)))?;
        }
        if let Some(ref tls) = self.tls {
            tls.validate(prefix)?;
        }
        if let Some(ref sasl) = self.sasl {
            sasl.validate(prefix)?;
        }
        Ok(())
    }
}

fn parse_version(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_start_matches(|c| c == 'v' || c == 'V');
    let normalised = trimmed.replace('_', ".");
    let parts: Vec<&str> = normalised.split('.').collect();
    let valid = (2..=4).contains(&parts.len())
        && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if valid {
        Ok(normalised)
    } else {
        Err(MirrorError::Config(format!(
            "unrecognised protocol version '{}'",
            raw
        )))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TLS and SASL
// ═══════════════════════════════════════════════════════════════════════════════

/// TLS settings. File paths are passed to the client unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub client_key: Option<String>,
    #[serde(default)]
    pub client_cert: Option<String>,
    #[serde(default)]
    pub ca_cert: Option<String>,
}

impl TlsConfig {
    fn validate(&self, prefix: &str) -> Result<()> {
        if self.client_key.is_some() != self.client_cert.is_some() {
            return Err(MirrorError::Config(format!(
                "{}.tls.client_key and {}.tls.client_cert must be set together",
                prefix, prefix
            )));
        }
        Ok(())
    }
}

/// Supported SASL mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaslMethod {
    Plain,
    #[serde(alias = "scram")]
    ScramSha256,
    ScramSha512,
    /// IAM-style token authentication, carried over OAUTHBEARER.
    AwsMskIam,
}

impl SaslMethod {
    /// Mechanism name as understood by the client library.
    pub fn mechanism(&self) -> &'static str {
        match self {
            SaslMethod::Plain => "PLAIN",
            SaslMethod::ScramSha256 => "SCRAM-SHA-256",
            SaslMethod::ScramSha512 => "SCRAM-SHA-512",
            SaslMethod::AwsMskIam => "OAUTHBEARER",
        }
    }
}

/// SASL credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaslConfig {
    pub sasl_method: SaslMethod,
    #[serde(default)]
    pub sasl_username: String,
    #[serde(default)]
    pub sasl_password: String,
    /// Token endpoint for [`SaslMethod::AwsMskIam`].
    #[serde(default)]
    pub token_endpoint: Option<String>,
}

impl SaslConfig {
    fn validate(&self, prefix: &str) -> Result<()> {
        if self.sasl_username.is_empty() || self.sasl_password.is_empty() {
            return Err(MirrorError::Config(format!(
                "{}.sasl requires sasl_username and sasl_password",
                prefix
            )));
        }
        if self.sasl_method == SaslMethod::AwsMskIam && self.token_endpoint.is_none() {
            return Err(MirrorError::Config(format!(
                "{}.sasl.token_endpoint is required for aws_msk_iam",
                prefix
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TuningConfig: timeouts
// ═══════════════════════════════════════════════════════════════════════════════

/// Client and loop timeouts, in humantime form (`"60s"`, `"500ms"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Consumer group session timeout.
    #[serde(default = "default_session_timeout")]
    pub session_timeout: String,

    /// How long one poll waits for the first record.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: String,

    /// Producer delivery timeout (the client's own retry budget).
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout: String,

    /// How long in-flight produces may take once shutdown is requested.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: String,

    /// Timeout for metadata and admin requests.
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout: String,
}

fn default_session_timeout() -> String {
    "60s".to_string()
}

fn default_poll_timeout() -> String {
    "1s".to_string()
}

fn default_delivery_timeout() -> String {
    "30s".to_string()
}

fn default_shutdown_grace() -> String {
    "10s".to_string()
}

fn default_metadata_timeout() -> String {
    "10s".to_string()
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            session_timeout: default_session_timeout(),
            poll_timeout: default_poll_timeout(),
            delivery_timeout: default_delivery_timeout(),
            shutdown_grace: default_shutdown_grace(),
            metadata_timeout: default_metadata_timeout(),
        }
    }
}

impl TuningConfig {
    pub fn session_timeout(&self) -> Duration {
        parse_or(&self.session_timeout, Duration::from_secs(60))
    }

    pub fn poll_timeout(&self) -> Duration {
        parse_or(&self.poll_timeout, Duration::from_secs(1))
    }

    pub fn delivery_timeout(&self) -> Duration {
        parse_or(&self.delivery_timeout, Duration::from_secs(30))
    }

    pub fn shutdown_grace(&self) -> Duration {
        parse_or(&self.shutdown_grace, Duration::from_secs(10))
    }

    pub fn metadata_timeout(&self) -> Duration {
        parse_or(&self.metadata_timeout, Duration::from_secs(10))
    }

    /// Timeouts for tests: short enough to keep suites fast.
    pub fn testing() -> Self {
        Self {
            session_timeout: "6s".to_string(),
            poll_timeout: "20ms".to_string(),
            delivery_timeout: "1s".to_string(),
            shutdown_grace: "200ms".to_string(),
            metadata_timeout: "1s".to_string(),
        }
    }

    fn validate(&self) -> Result<()> {
        let fields = [
            ("session_timeout", &self.session_timeout),
            ("poll_timeout", &self.poll_timeout),
            ("delivery_timeout", &self.delivery_timeout),
            ("shutdown_grace", &self.shutdown_grace),
            ("metadata_timeout", &self.metadata_timeout),
        ];
        for (name, value) in fields {
            humantime::parse_duration(value).map_err(|e| {
                MirrorError::Config(format!("tuning.{} '{}': {}", name, value, e))
            })?;
        }
        Ok(())
    }
}

fn parse_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(fallback)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
