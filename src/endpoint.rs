// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Endpoints: this process's view of one cluster.
//!
//! An [`Endpoint`] bundles a cluster's identity, the topics it must consume,
//! and the capability handles built for it by a [`ConnectionFactory`].
//! Both endpoints are constructed once, during startup, and held by a
//! [`MirrorContext`] that is passed explicitly to the provisioner, the
//! replication engines and the shutdown coordinator.
//!
//! ```text
//!                 MirrorContext
//!        ┌──────────────┴──────────────┐
//!   Endpoint(source)            Endpoint(destination)
//!   admin, producer,            admin, producer,
//!   consumer (push topics)      consumer (pull topics, if any)
//! ```
//!
//! An endpoint whose role has no topics to consume gets no consumer at all.

use crate::client::{ClusterAdmin, RecordConsumer, RecordProducer};
use crate::config::{AgentConfig, ClusterConfig, TuningConfig};
use crate::error::{MirrorError, Result};
use crate::rebalance::RebalanceGuard;
use crate::topic::{Role, Topic, TopicRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Everything a factory needs to build the clients for one cluster.
#[derive(Debug)]
pub struct ConnectRequest<'a> {
    pub role: Role,
    /// Used as the client id of every connection.
    pub agent_id: &'a str,
    pub cluster: &'a ClusterConfig,
    pub tuning: &'a TuningConfig,
    pub consumer_group_id: String,
    /// Physical topic names to subscribe to. Empty means no consumer.
    pub subscribe: Vec<String>,
    /// Consulted by the consumer's group-membership callback.
    pub rebalance_guard: RebalanceGuard,
}

/// Capability handles for one cluster.
pub struct EndpointHandles {
    pub admin: Arc<dyn ClusterAdmin>,
    pub producer: Arc<dyn RecordProducer>,
    pub consumer: Option<Arc<dyn RecordConsumer>>,
}

/// Builds authenticated client handles for a cluster.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self, request: &ConnectRequest<'_>) -> Result<EndpointHandles>;
}

/// One cluster, with its topics and client handles.
pub struct Endpoint {
    name: String,
    role: Role,
    topics: Vec<Topic>,
    consumer_group_id: String,
    bootstrap_servers: Vec<String>,
    admin: Arc<dyn ClusterAdmin>,
    producer: Arc<dyn RecordProducer>,
    consumer: Option<Arc<dyn RecordConsumer>>,
    rebalance_guard: RebalanceGuard,
    closed: AtomicBool,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("topics", &self.topics.len())
            .field("consumer_group_id", &self.consumer_group_id)
            .field("bootstrap_servers", &self.bootstrap_servers)
            .field("has_consumer", &self.consumer.is_some())
            .finish()
    }
}

impl Endpoint {
    /// Build the endpoint for `role`.
    pub fn connect(
        factory: &dyn ConnectionFactory,
        config: &AgentConfig,
        agent_id: &str,
        role: Role,
        registry: &TopicRegistry,
    ) -> Result<Self> {
        let cluster = match role {
            Role::Source => &config.source,
            Role::Destination => &config.destination,
        };
        let name = cluster.display_name(role.config_prefix()).to_string();
        let topics = registry.topics_for_role(role).to_vec();

        for topic in &topics {
            info!(
                cluster = %name,
                direction = %topic.direction,
                topic = %topic,
                "Adding topic"
            );
        }

        let rebalance_guard = RebalanceGuard::new();
        let request = ConnectRequest {
            role,
            agent_id,
            cluster,
            tuning: &config.tuning,
            consumer_group_id: cluster.group_id(agent_id),
            subscribe: topics.iter().map(|t| t.consume_from().to_string()).collect(),
            rebalance_guard: rebalance_guard.clone(),
        };

        let handles = factory.connect(&request)?;

        // No topics to consume, no consumer, whatever the factory returned
        let consumer = if topics.is_empty() {
            if handles.consumer.is_some() {
                debug!(cluster = %name, "Dropping consumer for endpoint without topics");
            }
            None
        } else {
            Some(handles.consumer.ok_or_else(|| {
                MirrorError::Internal(format!(
                    "connection factory returned no consumer for cluster {} with {} topics",
                    name,
                    topics.len()
                ))
            })?)
        };

        info!(
            cluster = %name,
            role = %role,
            bootstrap_servers = %cluster.bootstrap_servers,
            consumer_group_id = %request.consumer_group_id,
            topics = topics.len(),
            "Endpoint connected"
        );

        Ok(Self {
            name,
            role,
            topics,
            consumer_group_id: request.consumer_group_id,
            bootstrap_servers: cluster.bootstrap_list(),
            admin: handles.admin,
            producer: handles.producer,
            consumer,
            rebalance_guard,
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Topics this endpoint consumes.
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn consumer_group_id(&self) -> &str {
        &self.consumer_group_id
    }

    pub fn bootstrap_servers(&self) -> &[String] {
        &self.bootstrap_servers
    }

    pub fn admin(&self) -> &Arc<dyn ClusterAdmin> {
        &self.admin
    }

    pub fn producer(&self) -> &Arc<dyn RecordProducer> {
        &self.producer
    }

    pub fn consumer(&self) -> Option<&Arc<dyn RecordConsumer>> {
        self.consumer.as_ref()
    }

    pub fn rebalance_guard(&self) -> &RebalanceGuard {
        &self.rebalance_guard
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// List brokers as a connectivity check.
    ///
    /// Failure is logged, never returned: the clients reconnect on their own
    /// and later operations surface the problem as fetch or produce errors.
    pub async fn check_connectivity(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.admin.list_brokers()).await {
            Ok(Ok(brokers)) => {
                info!(cluster = %self.name, brokers = ?brokers, "Cluster reachable");
                true
            }
            Ok(Err(e)) => {
                error!(cluster = %self.name, error = %e, "Cluster connectivity check failed");
                false
            }
            Err(_) => {
                error!(
                    cluster = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Cluster connectivity check timed out"
                );
                false
            }
        }
    }

    /// Close every handle. Idempotent.
    ///
    /// All handles are attempted even if one fails; the first failure is
    /// returned.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!(cluster = %self.name, "Endpoint already closed");
            return Ok(());
        }

        let mut first_error: Option<MirrorError> = None;
        let mut record = |what: &str, result: crate::client::ClientResult<()>| {
            if let Err(e) = result {
                warn!(cluster = %self.name, handle = what, error = %e, "Failed to close handle");
                first_error.get_or_insert(MirrorError::client(format!("close {}", what), e));
            }
        };

        if let Some(ref consumer) = self.consumer {
            record("consumer", consumer.close().await);
        }
        record("producer", self.producer.close().await);
        record("admin", self.admin.close().await);

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(cluster = %self.name, "Endpoint closed");
                Ok(())
            }
        }
    }
}

/// The two endpoints of a mirror.
#[derive(Debug, Clone)]
pub struct MirrorContext {
    pub source: Arc<Endpoint>,
    pub destination: Arc<Endpoint>,
}

impl MirrorContext {
    /// Build both endpoints. Called once during startup.
    pub fn connect(
        factory: &dyn ConnectionFactory,
        config: &AgentConfig,
        agent_id: &str,
        registry: &TopicRegistry,
    ) -> Result<Self> {
        let source = Endpoint::connect(factory, config, agent_id, Role::Source, registry)?;
        let destination =
            Endpoint::connect(factory, config, agent_id, Role::Destination, registry)?;
        Ok(Self {
            source: Arc::new(source),
            destination: Arc::new(destination),
        })
    }

    pub fn endpoint(&self, role: Role) -> &Arc<Endpoint> {
        match role {
            Role::Source => &self.source,
            Role::Destination => &self.destination,
        }
    }

    pub fn endpoints(&self) -> [&Arc<Endpoint>; 2] {
        [&self.source, &self.destination]
    }

    /// Check both clusters. Failures are logged only.
    pub async fn check_connectivity(&self, timeout: Duration) {
        let (source_ok, destination_ok) = tokio::join!(
            self.source.check_connectivity(timeout),
            self.destination.check_connectivity(timeout)
        );
        if !(source_ok && destination_ok) {
            warn!("Continuing without confirmed connectivity; clients will keep retrying");
        }
    }

    /// Close both endpoints. Both are attempted even if one fails.
    pub async fn close(&self) -> Result<()> {
        let (source, destination) = tokio::join!(self.source.close(), self.destination.close());
        source.and(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchOffsets;
    use crate::client::{BoxFuture, ClientError, ConsumedRecord, ReplicationRecord};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Handle {
        closes: AtomicUsize,
        fail_close: bool,
        brokers_fail: bool,
    }

    impl Handle {
        fn close_result(&self) -> crate::client::ClientResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(ClientError::new("close refused"))
            } else {
                Ok(())
            }
        }
    }

    impl ClusterAdmin for Handle {
        fn list_brokers(&self) -> BoxFuture<'_, Vec<String>> {
            let fail = self.brokers_fail;
            Box::pin(async move {
                if fail {
                    Err(ClientError::new("all brokers down"))
                } else {
                    Ok(vec!["localhost:9092".to_string()])
                }
            })
        }
        fn list_topics(&self) -> BoxFuture<'_, Vec<String>> {
            Box::pin(async { Ok(Vec::new()) })
        }
        fn create_topic(&self, _name: &str) -> BoxFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
        fn close(&self) -> BoxFuture<'_, ()> {
            let result = self.close_result();
            Box::pin(async move { result })
        }
    }

    impl RecordProducer for Handle {
        fn produce(&self, _record: ReplicationRecord) -> BoxFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
        fn close(&self) -> BoxFuture<'_, ()> {
            let result = self.close_result();
            Box::pin(async move { result })
        }
    }

    impl RecordConsumer for Handle {
        fn poll(&self, _max_records: usize) -> BoxFuture<'_, Vec<ConsumedRecord>> {
            Box::pin(async { Ok(Vec::new()) })
        }
        fn commit(&self, _offsets: BatchOffsets) -> BoxFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
        fn rewind(&self, _offsets: BatchOffsets) -> BoxFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
        fn close(&self) -> BoxFuture<'_, ()> {
            let result = self.close_result();
            Box::pin(async move { result })
        }
    }

    #[derive(Default)]
    struct TestFactory {
        fail_close: bool,
        brokers_fail: bool,
        requests: Mutex<Vec<(Role, Vec<String>, String)>>,
        handles: Mutex<Vec<Arc<Handle>>>,
    }

    impl ConnectionFactory for TestFactory {
        fn connect(&self, request: &ConnectRequest<'_>) -> Result<EndpointHandles> {
            self.requests.lock().unwrap().push((
                request.role,
                request.subscribe.clone(),
                request.consumer_group_id.clone(),
            ));
            let handle = Arc::new(Handle {
                fail_close: self.fail_close,
                brokers_fail: self.brokers_fail,
                ..Default::default()
            });
            self.handles.lock().unwrap().push(Arc::clone(&handle));
            Ok(EndpointHandles {
                admin: handle.clone(),
                producer: handle.clone(),
                consumer: Some(handle),
            })
        }
    }

    fn context(factory: &TestFactory, push: &[&str], pull: &[&str]) -> MirrorContext {
        let config = AgentConfig::for_testing("agent-1", push, pull);
        let registry = TopicRegistry::from_specs(push, pull).unwrap();
        MirrorContext::connect(factory, &config, "agent-1", &registry).unwrap()
    }

    #[test]
    fn test_connect_subscribes_consumed_names() {
        let factory = TestFactory::default();
        let ctx = context(&factory, &["orders", "a:b"], &["x:y"]);

        let requests = factory.requests.lock().unwrap();
        assert_eq!(requests[0].0, Role::Source);
        assert_eq!(requests[0].1, vec!["orders", "a"]);
        assert_eq!(requests[1].0, Role::Destination);
        assert_eq!(requests[1].1, vec!["y"]);
        assert_eq!(requests[0].2, "agent-1");

        assert_eq!(ctx.source.topics().len(), 2);
        assert_eq!(ctx.destination.name(), "destination");
        assert!(ctx.destination.consumer().is_some());
    }

    #[test]
    fn test_no_consumer_without_topics() {
        let factory = TestFactory::default();
        let ctx = context(&factory, &["orders"], &[]);
        assert!(ctx.source.consumer().is_some());
        assert!(ctx.destination.consumer().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let factory = TestFactory::default();
        let ctx = context(&factory, &["orders"], &[]);

        ctx.close().await.unwrap();
        ctx.close().await.unwrap();

        assert!(ctx.source.is_closed());
        let handles = factory.handles.lock().unwrap();
        // consumer + producer + admin on source, producer + admin on destination
        assert_eq!(handles[0].closes.load(Ordering::SeqCst), 3);
        assert_eq!(handles[1].closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_attempts_all_handles_on_failure() {
        let factory = TestFactory {
            fail_close: true,
            ..Default::default()
        };
        let ctx = context(&factory, &["orders"], &["cfg"]);

        let err = ctx.close().await.unwrap_err();
        assert!(err.to_string().contains("close refused"));

        let handles = factory.handles.lock().unwrap();
        assert_eq!(handles[0].closes.load(Ordering::SeqCst), 3);
        assert_eq!(handles[1].closes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connectivity_failure_only_logged() {
        let factory = TestFactory {
            brokers_fail: true,
            ..Default::default()
        };
        let ctx = context(&factory, &["orders"], &[]);
        assert!(!ctx.source.check_connectivity(Duration::from_secs(1)).await);
        ctx.check_connectivity(Duration::from_secs(1)).await;
    }
}
