// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! rdkafka-backed connection factory.
//!
//! Builds one admin client, one producer and (when the endpoint consumes
//! anything) one group consumer per cluster, all sharing the same base
//! client configuration:
//!
//! | Setting | Source |
//! |---------|--------|
//! | `bootstrap.servers` | `<role>.bootstrap_servers` |
//! | `client.id` | agent id |
//! | `security.protocol`, `ssl.*` | `<role>.tls` |
//! | `sasl.*` | `<role>.sasl` |
//! | `broker.version.fallback` | `<role>.max_version` (negotiation disabled) |
//!
//! Blocking librdkafka calls (metadata, synchronous commit, seek, flush) run
//! on the blocking pool so they never stall the runtime.
//!
//! Rebalance callbacks run inside `recv()`. A poll stops collecting at the
//! first revocation and drops records from revoked partitions, and a rewind
//! only seeks partitions that are still assigned.

use crate::batch::{BatchOffsets, PartitionSpan};
use crate::client::{
    BoxFuture, ClientError, ClientResult, ClusterAdmin, ConsumedRecord, RecordConsumer,
    RecordHeader, RecordProducer, ReplicationRecord,
};
use crate::config::{ClusterConfig, SaslMethod};
use crate::endpoint::{ConnectRequest, ConnectionFactory, EndpointHandles};
use crate::error::{MirrorError, Result};
use crate::rebalance::RebalanceGuard;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::{ClientContext, DefaultClientContext};
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Partition count and replication factor meaning "broker default".
const BROKER_DEFAULT: i32 = -1;

/// How long a poll keeps collecting once the first record arrived.
const DRAIN_LINGER: Duration = Duration::from_millis(5);

/// Build the client configuration shared by every connection to `cluster`.
pub fn client_config(agent_id: &str, cluster: &ClusterConfig) -> Result<ClientConfig> {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", cluster.bootstrap_list().join(","))
        .set("client.id", agent_id);

    let tls_enabled = cluster.tls.as_ref().map(|t| t.enabled).unwrap_or(false);
    let protocol = match (tls_enabled, cluster.sasl.is_some()) {
        (false, false) => "plaintext",
        (true, false) => "ssl",
        (false, true) => "sasl_plaintext",
        (true, true) => "sasl_ssl",
    };
    config.set("security.protocol", protocol);

    if let Some(tls) = cluster.tls.as_ref().filter(|t| t.enabled) {
        if let Some(ref ca) = tls.ca_cert {
            config.set("ssl.ca.location", ca);
        }
        if let Some(ref cert) = tls.client_cert {
            config.set("ssl.certificate.location", cert);
        }
        if let Some(ref key) = tls.client_key {
            config.set("ssl.key.location", key);
        }
    }

    if let Some(ref sasl) = cluster.sasl {
        config.set("sasl.mechanism", sasl.sasl_method.mechanism());
        match sasl.sasl_method {
            SaslMethod::AwsMskIam => {
                let endpoint = sasl.token_endpoint.as_deref().ok_or_else(|| {
                    MirrorError::Config("aws_msk_iam requires token_endpoint".to_string())
                })?;
                // IAM-style auth needs TLS on the wire regardless of the tls block
                config
                    .set("security.protocol", "sasl_ssl")
                    .set("sasl.oauthbearer.method", "oidc")
                    .set("sasl.oauthbearer.client.id", &sasl.sasl_username)
                    .set("sasl.oauthbearer.client.secret", &sasl.sasl_password)
                    .set("sasl.oauthbearer.token.endpoint.url", endpoint);
            }
            SaslMethod::Plain | SaslMethod::ScramSha256 | SaslMethod::ScramSha512 => {
                config
                    .set("sasl.username", &sasl.sasl_username)
                    .set("sasl.password", &sasl.sasl_password);
            }
        }
    }

    if let Some(version) = cluster.protocol_ceiling() {
        config
            .set("api.version.request", "false")
            .set("broker.version.fallback", version?);
    }

    Ok(config)
}

/// Builds rdkafka clients for an endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct KafkaConnectionFactory;

impl KafkaConnectionFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ConnectionFactory for KafkaConnectionFactory {
    fn connect(&self, request: &ConnectRequest<'_>) -> Result<EndpointHandles> {
        let cluster_name = request.cluster.display_name(request.role.config_prefix()).to_string();
        let base = client_config(request.agent_id, request.cluster)?;

        let admin: AdminClient<DefaultClientContext> = base
            .create()
            .map_err(|e| MirrorError::kafka("create admin client", e))?;

        let delivery_timeout = request.tuning.delivery_timeout();
        let producer: FutureProducer = base
            .clone()
            .set("compression.type", "none")
            // Retries keep per-partition order
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", delivery_timeout.as_millis().to_string())
            .create()
            .map_err(|e| MirrorError::kafka("create producer", e))?;

        let consumer: Option<Arc<dyn RecordConsumer>> = if request.subscribe.is_empty() {
            None
        } else {
            let context = MirrorConsumerContext {
                cluster: cluster_name.clone(),
                guard: request.rebalance_guard.clone(),
            };
            let consumer: StreamConsumer<MirrorConsumerContext> = base
                .clone()
                .set("group.id", &request.consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", "earliest")
                .set(
                    "session.timeout.ms",
                    request.tuning.session_timeout().as_millis().to_string(),
                )
                .set_log_level(RDKafkaLogLevel::Info)
                .create_with_context(context)
                .map_err(|e| MirrorError::kafka("create consumer", e))?;

            let topics: Vec<&str> = request.subscribe.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topics)
                .map_err(|e| MirrorError::kafka("subscribe", e))?;

            info!(
                cluster = %cluster_name,
                topics = ?topics,
                group = %request.consumer_group_id,
                "Consumer subscribed"
            );

            Some(Arc::new(KafkaConsumer {
                cluster: cluster_name.clone(),
                consumer: Arc::new(consumer),
                poll_timeout: request.tuning.poll_timeout(),
                seek_timeout: request.tuning.metadata_timeout(),
                deferred_error: DeferredError::default(),
            }))
        };

        Ok(EndpointHandles {
            admin: Arc::new(KafkaAdmin {
                admin: Arc::new(admin),
                timeout: request.tuning.metadata_timeout(),
            }),
            producer: Arc::new(KafkaProducer {
                cluster: cluster_name,
                producer,
                queue_timeout: delivery_timeout,
                flush_timeout: request.tuning.shutdown_grace(),
            }),
            consumer,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Consumer
// ═══════════════════════════════════════════════════════════════════════════════

/// Consumer context that records revocations on the rebalance guard.
pub struct MirrorConsumerContext {
    cluster: String,
    guard: RebalanceGuard,
}

impl ClientContext for MirrorConsumerContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => {
                error!(cluster = %self.cluster, facility = fac, "{}", log_message)
            }
            RDKafkaLogLevel::Warning => {
                warn!(cluster = %self.cluster, facility = fac, "{}", log_message)
            }
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => {
                info!(cluster = %self.cluster, facility = fac, "{}", log_message)
            }
            RDKafkaLogLevel::Debug => {
                debug!(cluster = %self.cluster, facility = fac, "{}", log_message)
            }
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        warn!(cluster = %self.cluster, error = %error, reason, "Consumer client error");
    }
}

impl ConsumerContext for MirrorConsumerContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                let revoked = partitions
                    .elements()
                    .iter()
                    .map(|e| (e.topic().to_string(), e.partition()))
                    .collect::<Vec<_>>();
                if self.guard.note_revoked(revoked) {
                    warn!(cluster = %self.cluster, "Partitions revoked with a batch in flight");
                }
                info!(cluster = %self.cluster, partitions = partitions.count(), "Partitions revoked");
            }
            Rebalance::Assign(partitions) => {
                info!(cluster = %self.cluster, partitions = partitions.count(), "Partitions assigned");
            }
            Rebalance::Error(e) => {
                warn!(cluster = %self.cluster, error = %e, "Rebalance error");
            }
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(e) = result {
            debug!(cluster = %self.cluster, error = %e, "Commit callback reported failure");
        }
    }
}

/// A fetch error that arrived after a poll already held records. The records
/// are returned and the error is reported by the next poll.
#[derive(Debug, Default)]
struct DeferredError(Mutex<Option<ClientError>>);

impl DeferredError {
    fn defer(&self, error: ClientError) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
    }

    fn take(&self) -> Option<ClientError> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

struct KafkaConsumer {
    cluster: String,
    consumer: Arc<StreamConsumer<MirrorConsumerContext>>,
    poll_timeout: Duration,
    seek_timeout: Duration,
    deferred_error: DeferredError,
}

fn to_consumed(message: &BorrowedMessage<'_>) -> ConsumedRecord {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| RecordHeader {
                    key: h.key.to_string(),
                    value: h.value.map(<[u8]>::to_vec),
                })
                .collect()
        })
        .unwrap_or_default();

    ConsumedRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec),
        headers,
        timestamp_ms: message.timestamp().to_millis(),
    }
}

/// Batch offsets restricted to partitions in `assignment`.
fn assigned_only(offsets: &BatchOffsets, assignment: &TopicPartitionList) -> BatchOffsets {
    let mut owned = offsets.clone();
    owned.retain(|tp| assignment.find_partition(&tp.topic, tp.partition).is_some());
    owned
}

/// Build a partition list from batch offsets, one offset per partition.
fn partition_list(
    offsets: &BatchOffsets,
    pick: impl Fn(&PartitionSpan) -> i64,
) -> ClientResult<TopicPartitionList> {
    let mut list = TopicPartitionList::with_capacity(offsets.len());
    for (tp, span) in offsets.iter() {
        list.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(pick(span)))?;
    }
    Ok(list)
}

fn join_error(operation: &str, e: tokio::task::JoinError) -> ClientError {
    ClientError::new(format!("{} task failed: {}", operation, e))
}

impl RecordConsumer for KafkaConsumer {
    fn poll(&self, max_records: usize) -> BoxFuture<'_, Vec<ConsumedRecord>> {
        Box::pin(async move {
            if let Some(e) = self.deferred_error.take() {
                return Err(e);
            }

            let guard = &self.consumer.context().guard;
            guard.clear_revocations();
            let mut records = Vec::new();

            match tokio::time::timeout(self.poll_timeout, self.consumer.recv()).await {
                Err(_) => return Ok(records),
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(message)) => records.push(to_consumed(&message)),
            }

            while records.len() < max_records && !guard.has_revocations() {
                match tokio::time::timeout(DRAIN_LINGER, self.consumer.recv()).await {
                    Ok(Ok(message)) => records.push(to_consumed(&message)),
                    Ok(Err(e)) => {
                        warn!(
                            cluster = %self.cluster,
                            error = %e,
                            records = records.len(),
                            "Fetch error after partial batch, reporting on next poll"
                        );
                        self.deferred_error.defer(e.into());
                        break;
                    }
                    Err(_) => break,
                }
            }

            let dropped = guard.discard_revoked(&mut records);
            if dropped > 0 {
                info!(cluster = %self.cluster, dropped, "Dropped records from revoked partitions");
            }
            Ok(records)
        })
    }

    fn commit(&self, offsets: BatchOffsets) -> BoxFuture<'_, ()> {
        let consumer = Arc::clone(&self.consumer);
        Box::pin(async move {
            let list = partition_list(&offsets, |span| span.next)?;
            tokio::task::spawn_blocking(move || consumer.commit(&list, CommitMode::Sync))
                .await
                .map_err(|e| join_error("commit", e))??;
            Ok(())
        })
    }

    fn rewind(&self, offsets: BatchOffsets) -> BoxFuture<'_, ()> {
        let consumer = Arc::clone(&self.consumer);
        let timeout = self.seek_timeout;
        let cluster = self.cluster.clone();
        Box::pin(async move {
            let sought = tokio::task::spawn_blocking(move || -> ClientResult<_> {
                // Revoked partitions restart from the last commit under their new owner
                let owned = assigned_only(&offsets, &consumer.assignment()?);
                if owned.len() < offsets.len() {
                    debug!(
                        cluster = %cluster,
                        skipped = offsets.len() - owned.len(),
                        "Not rewinding partitions that are no longer assigned"
                    );
                }
                if owned.is_empty() {
                    return Ok(TopicPartitionList::new());
                }
                let list = partition_list(&owned, |span| span.first)?;
                Ok(consumer.seek_partitions(list, timeout)?)
            })
            .await
            .map_err(|e| join_error("seek", e))??;

            for element in sought.elements() {
                if let Err(e) = element.error() {
                    return Err(ClientError::new(format!(
                        "seek {}/{}: {}",
                        element.topic(),
                        element.partition(),
                        e
                    )));
                }
            }
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.consumer.unsubscribe();
            debug!(cluster = %self.cluster, "Consumer unsubscribed");
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Producer
// ═══════════════════════════════════════════════════════════════════════════════

struct KafkaProducer {
    cluster: String,
    producer: FutureProducer,
    queue_timeout: Duration,
    flush_timeout: Duration,
}

fn to_owned_headers(headers: &[RecordHeader]) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, h| {
            acc.insert(Header {
                key: &h.key,
                value: h.value.as_deref(),
            })
        })
}

impl RecordProducer for KafkaProducer {
    fn produce(&self, record: ReplicationRecord) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut outgoing = FutureRecord::<[u8], [u8]>::to(&record.topic)
                .headers(to_owned_headers(&record.headers));
            if let Some(ref key) = record.key {
                outgoing = outgoing.key(key.as_slice());
            }
            if let Some(ref value) = record.value {
                outgoing = outgoing.payload(value.as_slice());
            }

            self.producer
                .send(outgoing, self.queue_timeout)
                .await
                .map(|_| ())
                .map_err(|(e, _)| ClientError::from(e))
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        let producer = self.producer.clone();
        let timeout = self.flush_timeout;
        Box::pin(async move {
            tokio::task::spawn_blocking(move || producer.flush(timeout))
                .await
                .map_err(|e| join_error("flush", e))??;
            debug!(cluster = %self.cluster, "Producer flushed");
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Admin
// ═══════════════════════════════════════════════════════════════════════════════

struct KafkaAdmin {
    admin: Arc<AdminClient<DefaultClientContext>>,
    timeout: Duration,
}

impl ClusterAdmin for KafkaAdmin {
    fn list_brokers(&self) -> BoxFuture<'_, Vec<String>> {
        let admin = Arc::clone(&self.admin);
        let timeout = self.timeout;
        Box::pin(async move {
            let brokers = tokio::task::spawn_blocking(move || {
                admin.inner().fetch_metadata(None, timeout).map(|metadata| {
                    metadata
                        .brokers()
                        .iter()
                        .map(|b| format!("{}:{}", b.host(), b.port()))
                        .collect::<Vec<_>>()
                })
            })
            .await
            .map_err(|e| join_error("metadata", e))??;
            Ok(brokers)
        })
    }

    fn list_topics(&self) -> BoxFuture<'_, Vec<String>> {
        let admin = Arc::clone(&self.admin);
        let timeout = self.timeout;
        Box::pin(async move {
            let topics = tokio::task::spawn_blocking(move || {
                admin.inner().fetch_metadata(None, timeout).map(|metadata| {
                    metadata
                        .topics()
                        .iter()
                        .map(|t| t.name().to_string())
                        .collect::<Vec<_>>()
                })
            })
            .await
            .map_err(|e| join_error("metadata", e))??;
            Ok(topics)
        })
    }

    fn create_topic(&self, name: &str) -> BoxFuture<'_, ()> {
        let name = name.to_string();
        Box::pin(async move {
            let topic = NewTopic::new(
                &name,
                BROKER_DEFAULT,
                TopicReplication::Fixed(BROKER_DEFAULT),
            );
            let options = AdminOptions::new().operation_timeout(Some(self.timeout));
            let results = self.admin.create_topics(&[topic], &options).await?;

            for result in results {
                match result {
                    Ok(_) => {}
                    Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {
                        debug!(topic = %name, "Topic created concurrently");
                    }
                    Err((topic, code)) => {
                        return Err(ClientError::new(format!("{}: {}", topic, code)));
                    }
                }
            }
            Ok(())
        })
    }
}
