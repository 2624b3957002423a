//! In-memory cluster for testing.
//!
//! One `MockCluster` plays admin, consumer and producer for one side of the
//! mirror. Every topic has a single partition (0). Calls are recorded for
//! assertions and failures can be injected per capability.
//!
//! # Example
//! ```rust,ignore
//! let source = MockCluster::with_topics("source", &["orders"]);
//! let destination = MockCluster::with_topics("destination", &["orders"]);
//! source.append_values("orders", &[b"a", b"b"]);
//!
//! let factory = MockFactory::new(source.clone(), destination.clone());
//! // Connect a MirrorContext or MirrorAgent with the factory...
//!
//! assert_eq!(source.committed("orders"), Some(2));
//! assert_eq!(destination.values("orders").len(), 2);
//! ```

use mirror_agent::batch::BatchOffsets;
use mirror_agent::client::{
    BoxFuture, ClientError, ClusterAdmin, ConsumedRecord, RecordConsumer, RecordHeader,
    RecordProducer, ReplicationRecord,
};
use mirror_agent::endpoint::{ConnectRequest, ConnectionFactory, EndpointHandles};
use mirror_agent::rebalance::RebalanceGuard;
use mirror_agent::Role;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// How long an empty poll waits, like a consumer's poll timeout.
const EMPTY_POLL_WAIT: Duration = Duration::from_millis(10);

/// A record stored on a mock topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<RecordHeader>,
}

impl StoredRecord {
    pub fn value(value: &[u8]) -> Self {
        Self {
            key: None,
            value: Some(value.to_vec()),
            headers: Vec::new(),
        }
    }
}

/// A recorded connect request.
#[derive(Debug, Clone)]
pub struct ConnectCall {
    pub role: Role,
    pub client_id: String,
    pub consumer_group_id: String,
    pub subscribe: Vec<String>,
}

#[derive(Default)]
struct ClusterState {
    /// Partition 0 log per topic.
    topics: BTreeMap<String, Vec<StoredRecord>>,
    /// Consumer fetch position per topic.
    positions: HashMap<String, i64>,
    /// Committed next offset per topic.
    committed: HashMap<String, i64>,
    subscribed: Vec<String>,
    commits: Vec<BatchOffsets>,
    rewinds: Vec<BatchOffsets>,
    /// (topic, offset) of every record handed out by a poll, in order.
    polled: Vec<(String, i64)>,
    created: Vec<String>,
    failing_creates: HashSet<String>,
    /// Creations that report failure but still create the topic.
    landing_creates: HashSet<String>,
    rejected_values: HashSet<Vec<u8>>,
    /// Topic whose partition the next poll loses to a rebalance.
    revoke_on_poll: Option<String>,
    /// Guard of this cluster's own consumer.
    own_guard: Option<RebalanceGuard>,
    /// Guard of the consumer whose records are produced into this cluster.
    peer_guard: Option<RebalanceGuard>,
    /// `is_blocked()` of the relevant guard at each produce and commit.
    guard_observations: Vec<bool>,
    connects: Vec<ConnectCall>,
}

/// In-memory single-partition cluster.
#[derive(Default)]
pub struct MockCluster {
    name: String,
    state: Mutex<ClusterState>,
    poll_failures: AtomicUsize,
    commit_failures: AtomicUsize,
    rewind_failures: AtomicUsize,
    produce_calls: AtomicUsize,
    stall_produce: AtomicBool,
    stall_commit: AtomicBool,
    commit_calls: AtomicUsize,
    produce_delay_ms: AtomicUsize,
    unreachable: AtomicBool,
    fail_close: AtomicBool,
    consumer_closes: AtomicUsize,
    producer_closes: AtomicUsize,
    admin_closes: AtomicUsize,
}

impl MockCluster {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// A cluster that already holds `topics` (empty).
    pub fn with_topics(name: &str, topics: &[&str]) -> Arc<Self> {
        let cluster = Self::new(name);
        for topic in topics {
            cluster.add_topic(topic);
        }
        cluster
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Setup
    // ═══════════════════════════════════════════════════════════════════════

    pub fn add_topic(&self, topic: &str) {
        self.state().topics.entry(topic.to_string()).or_default();
    }

    /// Append records, creating the topic if needed. Returns the first offset.
    pub fn append(&self, topic: &str, records: Vec<StoredRecord>) -> i64 {
        let mut state = self.state();
        let log = state.topics.entry(topic.to_string()).or_default();
        let first = log.len() as i64;
        log.extend(records);
        first
    }

    pub fn append_values(&self, topic: &str, values: &[&[u8]]) -> i64 {
        self.append(topic, values.iter().map(|v| StoredRecord::value(v)).collect())
    }

    /// Deliver `topic` to the consumer even though nothing subscribed to it.
    pub fn also_deliver(&self, topic: &str) {
        self.state().subscribed.push(topic.to_string());
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Fault injection
    // ═══════════════════════════════════════════════════════════════════════

    pub fn fail_next_polls(&self, n: usize) {
        self.poll_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_commits(&self, n: usize) {
        self.commit_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_rewinds(&self, n: usize) {
        self.rewind_failures.store(n, Ordering::SeqCst);
    }

    /// Permanently reject produced records carrying `value`.
    pub fn reject_value(&self, value: &[u8]) {
        self.state().rejected_values.insert(value.to_vec());
    }

    pub fn accept_all(&self) {
        self.state().rejected_values.clear();
    }

    /// Produce calls never resolve.
    pub fn stall_produce(&self) {
        self.stall_produce.store(true, Ordering::SeqCst);
    }

    /// Commit calls never resolve.
    pub fn stall_commit(&self) {
        self.stall_commit.store(true, Ordering::SeqCst);
    }

    pub fn delay_produce(&self, delay: Duration) {
        self.produce_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn fail_create(&self, topic: &str) {
        self.state().failing_creates.insert(topic.to_string());
    }

    /// Creation of `topic` reports failure but the topic appears anyway.
    pub fn fail_create_but_land(&self, topic: &str) {
        self.state().landing_creates.insert(topic.to_string());
    }

    /// The next poll sees `topic`'s partition revoked and handed back, as a
    /// rebalance inside the consumer's poll would. Records already fetched
    /// from it are dropped and the position resets to the committed offset.
    pub fn revoke_during_next_poll(&self, topic: &str) {
        self.state().revoke_on_poll = Some(topic.to_string());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Assertions
    // ═══════════════════════════════════════════════════════════════════════

    pub fn topic_names(&self) -> Vec<String> {
        self.state().topics.keys().cloned().collect()
    }

    pub fn records(&self, topic: &str) -> Vec<StoredRecord> {
        self.state().topics.get(topic).cloned().unwrap_or_default()
    }

    pub fn values(&self, topic: &str) -> Vec<Vec<u8>> {
        self.records(topic)
            .into_iter()
            .filter_map(|r| r.value)
            .collect()
    }

    pub fn committed(&self, topic: &str) -> Option<i64> {
        self.state().committed.get(topic).copied()
    }

    pub fn position(&self, topic: &str) -> Option<i64> {
        self.state().positions.get(topic).copied()
    }

    pub fn commits(&self) -> Vec<BatchOffsets> {
        self.state().commits.clone()
    }

    pub fn rewinds(&self) -> Vec<BatchOffsets> {
        self.state().rewinds.clone()
    }

    /// Offsets handed out by polls, in order.
    pub fn polled_offsets(&self, topic: &str) -> Vec<i64> {
        self.state()
            .polled
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, offset)| *offset)
            .collect()
    }

    pub fn clear_polled(&self) {
        self.state().polled.clear();
    }

    pub fn created(&self) -> Vec<String> {
        self.state().created.clone()
    }

    pub fn produce_calls(&self) -> usize {
        self.produce_calls.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    pub fn guard_observations(&self) -> Vec<bool> {
        self.state().guard_observations.clone()
    }

    pub fn connects(&self) -> Vec<ConnectCall> {
        self.state().connects.clone()
    }

    pub fn consumer_closes(&self) -> usize {
        self.consumer_closes.load(Ordering::SeqCst)
    }

    pub fn producer_closes(&self) -> usize {
        self.producer_closes.load(Ordering::SeqCst)
    }

    pub fn admin_closes(&self) -> usize {
        self.admin_closes.load(Ordering::SeqCst)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════════

    /// Join the consumer group: subscribe and resume from committed offsets.
    fn attach(&self, request: &ConnectRequest<'_>) {
        let mut state = self.state();
        state.connects.push(ConnectCall {
            role: request.role,
            client_id: request.agent_id.to_string(),
            consumer_group_id: request.consumer_group_id.clone(),
            subscribe: request.subscribe.clone(),
        });
        state.subscribed = request.subscribe.clone();
        let committed = state.committed.clone();
        state.positions = request
            .subscribe
            .iter()
            .map(|t| (t.clone(), committed.get(t).copied().unwrap_or(0)))
            .collect();
        state.own_guard = Some(request.rebalance_guard.clone());
    }

    fn set_peer_guard(&self, guard: RebalanceGuard) {
        self.state().peer_guard = Some(guard);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn read_batch(&self, max_records: usize) -> Vec<ConsumedRecord> {
        let mut state = self.state();
        let mut out = Vec::new();
        let subscribed = state.subscribed.clone();

        for topic in subscribed {
            if out.len() >= max_records {
                break;
            }
            let position = state.positions.get(&topic).copied().unwrap_or(0);
            let log = state.topics.get(&topic).cloned().unwrap_or_default();
            let mut next = position;
            for stored in log.iter().skip(position as usize) {
                if out.len() >= max_records {
                    break;
                }
                out.push(ConsumedRecord {
                    topic: topic.clone(),
                    partition: 0,
                    offset: next,
                    key: stored.key.clone(),
                    value: stored.value.clone(),
                    headers: stored.headers.clone(),
                    timestamp_ms: Some(1_700_000_000_000 + next),
                });
                state.polled.push((topic.clone(), next));
                next += 1;
            }
            state.positions.insert(topic, next);
        }
        out
    }
}

impl ClusterAdmin for MockCluster {
    fn list_brokers(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(ClientError::new("all brokers down"));
            }
            Ok(vec![format!("{}:9092", self.name)])
        })
    }

    fn list_topics(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move { Ok(self.topic_names()) })
    }

    fn create_topic(&self, name: &str) -> BoxFuture<'_, ()> {
        let name = name.to_string();
        Box::pin(async move {
            let mut state = self.state();
            if state.failing_creates.contains(&name) {
                return Err(ClientError::new(format!("create {}: policy violation", name)));
            }
            if state.landing_creates.contains(&name) {
                state.topics.entry(name.clone()).or_default();
                return Err(ClientError::new(format!("create {}: request timed out", name)));
            }
            state.topics.entry(name.clone()).or_default();
            state.created.push(name);
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.admin_closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

impl RecordConsumer for MockCluster {
    fn poll(&self, max_records: usize) -> BoxFuture<'_, Vec<ConsumedRecord>> {
        Box::pin(async move {
            if Self::take_failure(&self.poll_failures) {
                return Err(ClientError::new("broker transport failure"));
            }
            let guard = self.state().own_guard.clone();
            if let Some(ref guard) = guard {
                guard.clear_revocations();
            }

            let mut records = self.read_batch(max_records);

            let revoke = self.state().revoke_on_poll.take();
            if let Some(topic) = revoke {
                {
                    let mut state = self.state();
                    let committed = state.committed.get(&topic).copied().unwrap_or(0);
                    state.positions.insert(topic.clone(), committed);
                }
                if let Some(ref guard) = guard {
                    guard.note_revoked([(topic, 0)]);
                    guard.discard_revoked(&mut records);
                }
            }

            if records.is_empty() {
                tokio::time::sleep(EMPTY_POLL_WAIT).await;
            }
            Ok(records)
        })
    }

    fn commit(&self, offsets: BatchOffsets) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.commit_calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut state = self.state();
                let blocked = state.own_guard.as_ref().map(RebalanceGuard::is_blocked);
                if let Some(blocked) = blocked {
                    state.guard_observations.push(blocked);
                }
            }

            if self.stall_commit.load(Ordering::SeqCst) {
                futures::future::pending::<()>().await;
            }
            if Self::take_failure(&self.commit_failures) {
                return Err(ClientError::new("coordinator not available"));
            }
            let mut state = self.state();
            for (tp, span) in offsets.iter() {
                state.committed.insert(tp.topic.clone(), span.next);
            }
            state.commits.push(offsets);
            Ok(())
        })
    }

    fn rewind(&self, offsets: BatchOffsets) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if Self::take_failure(&self.rewind_failures) {
                return Err(ClientError::new("seek failed: partition not assigned"));
            }
            let mut state = self.state();
            for (tp, span) in offsets.iter() {
                state.positions.insert(tp.topic.clone(), span.first);
            }
            state.rewinds.push(offsets);
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.consumer_closes.fetch_add(1, Ordering::SeqCst);
            self.state().subscribed.clear();
            if self.fail_close.load(Ordering::SeqCst) {
                return Err(ClientError::new("leave group failed"));
            }
            Ok(())
        })
    }
}

impl RecordProducer for MockCluster {
    fn produce(&self, record: ReplicationRecord) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.produce_calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut state = self.state();
                let blocked = state.peer_guard.as_ref().map(RebalanceGuard::is_blocked);
                if let Some(blocked) = blocked {
                    state.guard_observations.push(blocked);
                }
            }

            if self.stall_produce.load(Ordering::SeqCst) {
                futures::future::pending::<()>().await;
            }
            let delay = self.produce_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }

            let mut state = self.state();
            if let Some(ref value) = record.value {
                if state.rejected_values.contains(value) {
                    return Err(ClientError::new("record rejected: invalid record"));
                }
            }
            let Some(log) = state.topics.get_mut(&record.topic) else {
                return Err(ClientError::new(format!(
                    "unknown topic or partition: {}",
                    record.topic
                )));
            };
            log.push(StoredRecord {
                key: record.key,
                value: record.value,
                headers: record.headers,
            });
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.producer_closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Hands out the two mock clusters by role.
pub struct MockFactory {
    pub source: Arc<MockCluster>,
    pub destination: Arc<MockCluster>,
}

impl MockFactory {
    pub fn new(source: Arc<MockCluster>, destination: Arc<MockCluster>) -> Self {
        Self {
            source,
            destination,
        }
    }

    pub fn cluster(&self, role: Role) -> &Arc<MockCluster> {
        match role {
            Role::Source => &self.source,
            Role::Destination => &self.destination,
        }
    }
}

impl ConnectionFactory for MockFactory {
    fn connect(&self, request: &ConnectRequest<'_>) -> mirror_agent::Result<EndpointHandles> {
        let cluster = Arc::clone(self.cluster(request.role));
        cluster.attach(request);
        self.cluster(request.role.opposite())
            .set_peer_guard(request.rebalance_guard.clone());

        let consumer: Option<Arc<dyn RecordConsumer>> = if request.subscribe.is_empty() {
            None
        } else {
            Some(cluster.clone() as Arc<dyn RecordConsumer>)
        };
        Ok(EndpointHandles {
            admin: cluster.clone(),
            producer: cluster,
            consumer,
        })
    }
}
