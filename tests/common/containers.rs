// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Kafka-compatible brokers.
//!
//! Provides helpers to spin up single-node Redpanda containers for
//! integration tests. Redpanda speaks the Kafka protocol and starts in a
//! few seconds without ZooKeeper.

use mirror_agent::AgentConfig;
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

/// Kafka listener port inside the container.
pub const KAFKA_PORT: u16 = 9092;

/// Create a single-node Redpanda container.
///
/// The advertised listener is fixed up front, so the host port is mapped
/// 1:1 and the broker tells clients to connect to `127.0.0.1:<port>`.
pub fn redpanda_container(docker: &Cli, host_port: u16) -> Container<'_, GenericImage> {
    let image = GenericImage::new("docker.redpanda.com/redpandadata/redpanda", "v24.1.7")
        .with_exposed_port(KAFKA_PORT)
        .with_wait_for(WaitFor::message_on_stderr("Successfully started Redpanda!"));

    let args: Vec<String> = vec![
        "redpanda".to_string(),
        "start".to_string(),
        "--mode".to_string(),
        "dev-container".to_string(),
        "--smp".to_string(),
        "1".to_string(),
        "--kafka-addr".to_string(),
        format!("PLAINTEXT://0.0.0.0:{}", KAFKA_PORT),
        "--advertise-kafka-addr".to_string(),
        format!("PLAINTEXT://127.0.0.1:{}", host_port),
    ];
    docker.run(
        testcontainers::RunnableImage::from((image, args))
            .with_mapped_port((host_port, KAFKA_PORT)),
    )
}

/// Bootstrap address for a container started with [`redpanda_container`].
pub fn bootstrap(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(KAFKA_PORT);
    format!("127.0.0.1:{}", port)
}

/// A free TCP port on the host.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("no free port")
}

/// A pair of brokers playing source and destination.
pub struct TestClusters<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    source: Container<'a, GenericImage>,
    #[allow(dead_code)]
    destination: Container<'a, GenericImage>,
    pub source_bootstrap: String,
    pub destination_bootstrap: String,
}

impl<'a> TestClusters<'a> {
    pub fn start(docker: &'a Cli) -> Self {
        let source = redpanda_container(docker, free_port());
        let destination = redpanda_container(docker, free_port());
        let source_bootstrap = bootstrap(&source);
        let destination_bootstrap = bootstrap(&destination);
        Self {
            source,
            destination,
            source_bootstrap,
            destination_bootstrap,
        }
    }

    /// Agent configuration pointing at both brokers, with auto-create on.
    pub fn config(&self, id: &str, push: &[&str], pull: &[&str]) -> AgentConfig {
        let mut config = AgentConfig::for_testing(id, push, pull);
        config.create_topics = true;
        config.source.bootstrap_servers = self.source_bootstrap.clone();
        config.destination.bootstrap_servers = self.destination_bootstrap.clone();
        config
    }
}
