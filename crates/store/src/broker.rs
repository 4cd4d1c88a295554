use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use tokio::sync::Mutex;

use crate::error::BrokerError;

/// One delivered message from a broker consumer group.
#[derive(Debug, Clone)]
pub struct BrokerDelivery {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

/// The Kafka-like log broker. `cluster` selects among the physical broker
/// clusters the deployment knows about; `topic` is always the concrete,
/// already-resolved topic name (resolution via `Manager` happens above
/// this layer).
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish synchronously, acknowledged once the local broker has the
    /// write (`WaitForLocal`). Returns `(partition, offset)`.
    async fn sync_pub(
        &self,
        cluster: &str,
        topic: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<(i32, i64), BrokerError>;

    /// Join `group` as a consumer group on `(cluster, topic)` and return a
    /// handle to pull messages from it.
    async fn consume(
        &self,
        cluster: &str,
        topic: &str,
        group: &str,
    ) -> Result<Arc<dyn BrokerConsumer>, BrokerError>;
}

/// A joined consumer-group handle. `recv` blocks until the next message;
/// `store_offset` marks an offset as safe to auto-commit, mirroring
/// `rdkafka`'s `enable.auto.offset.store = false` + manual
/// `store_offset` + periodic `auto.commit.interval.ms` pattern.
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    async fn recv(&self) -> Result<BrokerDelivery, BrokerError>;
    fn store_offset(&self, partition: i32, offset: i64) -> Result<(), BrokerError>;
}

/// Production `Broker`, backed by `rdkafka`. One `FutureProducer` per
/// cluster, created lazily and cached; bootstrap servers per cluster come
/// from `clusters`, mirroring the sync/async producer pool keyed by
/// cluster in the original broker factory, simplified here to one
/// synchronous producer per cluster since the core only ever calls
/// `sync_pub`.
pub struct RdKafkaBroker {
    clusters: HashMap<String, String>,
    message_timeout_ms: u32,
    producers: DashMap<String, FutureProducer>,
}

impl RdKafkaBroker {
    pub fn new(clusters: HashMap<String, String>, message_timeout_ms: u32) -> Self {
        Self {
            clusters,
            message_timeout_ms,
            producers: DashMap::new(),
        }
    }

    fn producer_for(&self, cluster: &str) -> Result<FutureProducer, BrokerError> {
        if let Some(existing) = self.producers.get(cluster) {
            return Ok(existing.clone());
        }
        let bootstrap = self
            .clusters
            .get(cluster)
            .ok_or_else(|| BrokerError::InvalidCluster(cluster.to_string()))?;
        if bootstrap.is_empty() {
            return Err(BrokerError::EmptyBrokers(cluster.to_string()));
        }
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap)
            .set("message.timeout.ms", self.message_timeout_ms.to_string())
            .set("compression.codec", "snappy")
            .create()?;
        self.producers.insert(cluster.to_string(), producer.clone());
        Ok(producer)
    }
}

#[async_trait]
impl Broker for RdKafkaBroker {
    async fn sync_pub(
        &self,
        cluster: &str,
        topic: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<(i32, i64), BrokerError> {
        let producer = self.producer_for(cluster)?;
        let record = FutureRecord::to(topic).key(key).payload(value);
        match producer.send(record, Duration::from_secs(10)).await {
            Ok((partition, offset)) => Ok((partition, offset)),
            Err((e, _)) => {
                if let rdkafka::error::KafkaError::MessageProduction(
                    rdkafka::types::RDKafkaErrorCode::UnknownTopicOrPartition,
                ) = e
                {
                    return Err(BrokerError::InvalidTopic(topic.to_string()));
                }
                Err(BrokerError::Kafka(e))
            }
        }
    }

    async fn consume(
        &self,
        cluster: &str,
        topic: &str,
        group: &str,
    ) -> Result<Arc<dyn BrokerConsumer>, BrokerError> {
        let bootstrap = self
            .clusters
            .get(cluster)
            .ok_or_else(|| BrokerError::InvalidCluster(cluster.to_string()))?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap)
            .set("group.id", group)
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "10000")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[topic])?;

        Ok(Arc::new(RdKafkaBrokerConsumer { consumer }))
    }
}

struct RdKafkaBrokerConsumer {
    consumer: StreamConsumer,
}

#[async_trait]
impl BrokerConsumer for RdKafkaBrokerConsumer {
    async fn recv(&self) -> Result<BrokerDelivery, BrokerError> {
        let message = self.consumer.recv().await?;
        Ok(BrokerDelivery {
            key: message.key().map(|k| k.to_vec()).unwrap_or_default(),
            value: message.payload().map(|v| v.to_vec()).unwrap_or_default(),
            partition: message.partition(),
            offset: message.offset(),
        })
    }

    fn store_offset(&self, partition: i32, offset: i64) -> Result<(), BrokerError> {
        let topics = self.consumer.subscription()?;
        let topic = topics
            .elements()
            .first()
            .map(|e| e.topic().to_string())
            .unwrap_or_default();
        self.consumer.store_offset(&topic, partition, offset)?;
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryBrokerInner {
    topics: Mutex<HashMap<(String, String), VecDeque<BrokerDelivery>>>,
    committed: Mutex<HashMap<String, i64>>,
    invalid_topics: Mutex<std::collections::HashSet<(String, String)>>,
}

/// In-memory `Broker` double for tests: an append-only log per
/// `(cluster, topic)` and a committed-offset map per consumer group, so
/// that a fresh group starts from the oldest offset and a resumed group
/// (same `(actor-short-id, topic)` tag across epochs) picks up where the
/// last one left off. Cheaply `Clone`, like the store crate's other
/// in-memory doubles — every clone shares the same underlying log.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<InMemoryBrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_invalid(&self, cluster: &str, topic: &str) {
        self.inner
            .invalid_topics
            .lock()
            .await
            .insert((cluster.to_string(), topic.to_string()));
    }

    pub async fn committed_offset(&self, group: &str) -> Option<i64> {
        self.inner.committed.lock().await.get(group).copied()
    }

    pub async fn depth(&self, cluster: &str, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .await
            .get(&(cluster.to_string(), topic.to_string()))
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn sync_pub(
        &self,
        cluster: &str,
        topic: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<(i32, i64), BrokerError> {
        if self
            .inner
            .invalid_topics
            .lock()
            .await
            .contains(&(cluster.to_string(), topic.to_string()))
        {
            return Err(BrokerError::InvalidTopic(topic.to_string()));
        }
        let mut topics = self.inner.topics.lock().await;
        let log = topics.entry((cluster.to_string(), topic.to_string())).or_default();
        let offset = log.len() as i64;
        log.push_back(BrokerDelivery {
            key: key.to_vec(),
            value: value.to_vec(),
            partition: 0,
            offset,
        });
        Ok((0, offset))
    }

    async fn consume(
        &self,
        cluster: &str,
        topic: &str,
        group: &str,
    ) -> Result<Arc<dyn BrokerConsumer>, BrokerError> {
        let start = self
            .inner
            .committed
            .lock()
            .await
            .get(group)
            .map(|offset| offset + 1)
            .unwrap_or(0);
        Ok(Arc::new(InMemoryBrokerConsumer {
            broker: self.clone(),
            cluster: cluster.to_string(),
            topic: topic.to_string(),
            group: group.to_string(),
            cursor: AtomicI64::new(start - 1),
        }))
    }
}

/// Consumer handle over an `InMemoryBroker`'s shared log: `cursor` tracks
/// the last offset handed back by `recv`, seeded from whatever offset was
/// last `store_offset`'d under this `group` so a re-created consumer
/// (simulating a new executor epoch) resumes instead of re-delivering.
struct InMemoryBrokerConsumer {
    broker: InMemoryBroker,
    cluster: String,
    topic: String,
    group: String,
    cursor: AtomicI64,
}

#[async_trait]
impl BrokerConsumer for InMemoryBrokerConsumer {
    async fn recv(&self) -> Result<BrokerDelivery, BrokerError> {
        loop {
            let next = self.cursor.load(Ordering::SeqCst) + 1;
            {
                let topics = self.broker.inner.topics.lock().await;
                if let Some(log) = topics.get(&(self.cluster.clone(), self.topic.clone())) {
                    if let Some(delivery) = log.get(next as usize) {
                        self.cursor.store(next, Ordering::SeqCst);
                        return Ok(delivery.clone());
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn store_offset(&self, _partition: i32, offset: i64) -> Result<(), BrokerError> {
        self.broker
            .inner
            .committed
            .try_lock()
            .map(|mut committed| {
                committed.insert(self.group.clone(), offset);
            })
            .map_err(|_| BrokerError::ConsumerGone)
    }
}
