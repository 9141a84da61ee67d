//! In-memory partitioned broker
//!
//! Topics are split into a fixed number of partitions. Keyed messages are
//! hashed onto a partition so a key always lands on the same one; keyless
//! messages are spread round-robin. A background task appends queued
//! messages in order and answers each with a [`DeliveryReport`], optionally
//! after an artificial acknowledgment latency.
//!
//! Each consumer group keeps its own committed offsets. A group is served by
//! a single consumer, which owns every partition of its subscribed topics.

use crate::broker::{BrokerConsumer, BrokerProducer, DeliveryFuture, OffsetReset};
use crate::consumer::ConsumerConfig;
use crate::error::TransportError;
use crate::message::{BrokerRecord, DeliveryReport, OutboundRecord};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

type Delivery = (OutboundRecord, oneshot::Sender<Result<DeliveryReport, TransportError>>);

/// Broker tuning
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Partitions created per topic
    pub partitions: u32,
    /// Delay before each message is appended and acknowledged
    pub ack_latency: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            partitions: 3,
            ack_latency: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct LogState {
    topics: HashMap<String, Vec<Vec<BrokerRecord>>>,
    /// (group, topic, partition) -> next offset to read
    committed: HashMap<(String, String, u32), u64>,
    round_robin: u32,
}

impl LogState {
    fn ensure_topic(&mut self, topic: &str, partitions: u32) -> &mut Vec<Vec<BrokerRecord>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions as usize])
    }
}

struct Log {
    state: Mutex<LogState>,
    partitions: u32,
    appended: watch::Sender<u64>,
    in_flight: AtomicUsize,
    drained: Notify,
    offline: AtomicBool,
}

impl Log {
    fn partition_for(&self, state: &mut LogState, key: Option<&str>) -> u32 {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % u64::from(self.partitions)) as u32
            }
            None => {
                let partition = state.round_robin % self.partitions;
                state.round_robin = state.round_robin.wrapping_add(1);
                partition
            }
        }
    }

    fn append(&self, record: OutboundRecord) -> DeliveryReport {
        let timestamp = Utc::now();
        let report = {
            let mut state = self.state.lock();
            let partition = self.partition_for(&mut state, record.key.as_deref());
            let log = &mut state.ensure_topic(&record.topic, self.partitions)[partition as usize];
            let offset = log.len() as u64;
            log.push(BrokerRecord {
                topic: record.topic.clone(),
                partition,
                offset,
                key: record.key,
                payload: record.payload,
                headers: record.headers,
                timestamp,
            });
            DeliveryReport {
                topic: record.topic,
                partition,
                offset,
                timestamp,
            }
        };
        self.appended.send_modify(|count| *count += 1);
        report
    }
}

/// Cloneable handle to an in-memory broker
#[derive(Clone)]
pub struct InMemoryBroker {
    log: Arc<Log>,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

impl InMemoryBroker {
    /// Create a broker and spawn its delivery task. Must be called inside a
    /// Tokio runtime.
    pub fn new(config: BrokerConfig) -> Self {
        let (appended, _) = watch::channel(0);
        let log = Arc::new(Log {
            state: Mutex::new(LogState::default()),
            partitions: config.partitions.max(1),
            appended,
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            offline: AtomicBool::new(false),
        });

        let (deliveries, queue) = mpsc::unbounded_channel();
        tokio::spawn(deliver(Arc::clone(&log), queue, config.ack_latency));

        Self { log, deliveries }
    }

    /// A consumer for `config.group_id`
    pub fn consumer(&self, config: &ConsumerConfig) -> InMemoryConsumer {
        InMemoryConsumer {
            log: Arc::clone(&self.log),
            group: config.group_id.clone(),
            reset: config.auto_offset_reset,
            auto_commit: config.enable_auto_commit,
            assignment: Vec::new(),
            positions: HashMap::new(),
            cursor: 0,
            changes: self.log.appended.subscribe(),
            closed: false,
        }
    }

    /// While offline every send is refused
    pub fn set_offline(&self, offline: bool) {
        self.log.offline.store(offline, Ordering::SeqCst);
    }

    pub fn partitions(&self) -> u32 {
        self.log.partitions
    }

    /// Every record of `topic`, partition by partition
    pub fn records(&self, topic: &str) -> Vec<BrokerRecord> {
        self.log
            .state
            .lock()
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of records stored for `topic`
    pub fn topic_len(&self, topic: &str) -> usize {
        self.log
            .state
            .lock()
            .topics
            .get(topic)
            .map_or(0, |partitions| partitions.iter().map(Vec::len).sum())
    }

    /// Next offset `group` will read from `topic`/`partition`, if committed
    pub fn committed(&self, group: &str, topic: &str, partition: u32) -> Option<u64> {
        self.log
            .state
            .lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }
}

async fn deliver(log: Arc<Log>, mut queue: mpsc::UnboundedReceiver<Delivery>, latency: Duration) {
    while let Some((record, ack)) = queue.recv().await {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let report = log.append(record);
        trace!(topic = %report.topic, partition = report.partition, offset = report.offset, "appended");

        if log.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            log.drained.notify_waiters();
        }
        // The sender may have stopped waiting (timeout or cancellation)
        let _ = ack.send(Ok(report));
    }
    debug!("broker delivery task stopped");
}

#[async_trait]
impl BrokerProducer for InMemoryBroker {
    fn send(&self, record: OutboundRecord) -> Result<DeliveryFuture, TransportError> {
        if self.log.offline.load(Ordering::SeqCst) {
            return Err(TransportError::BrokerUnavailable(
                "in-memory broker is offline".to_string(),
            ));
        }

        let (ack, delivery) = oneshot::channel();
        self.log.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.deliveries.send((record, ack)).is_err() {
            self.log.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::BrokerUnavailable(
                "delivery task stopped".to_string(),
            ));
        }
        Ok(delivery)
    }

    fn in_flight(&self) -> usize {
        self.log.in_flight.load(Ordering::SeqCst)
    }

    async fn flush(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let drained = self.log.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            let pending = self.in_flight();
            if pending == 0 {
                return 0;
            }
            if timeout_at(deadline, drained).await.is_err() {
                return self.in_flight();
            }
        }
    }
}

/// Consumer attached to an [`InMemoryBroker`]
pub struct InMemoryConsumer {
    log: Arc<Log>,
    group: String,
    reset: OffsetReset,
    auto_commit: bool,
    /// (topic, partition) pairs owned by this consumer
    assignment: Vec<(String, u32)>,
    positions: HashMap<(String, u32), u64>,
    cursor: usize,
    changes: watch::Receiver<u64>,
    closed: bool,
}

impl InMemoryConsumer {
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Hand out the next unread record, rotating across partitions
    fn next_record(&mut self) -> Option<BrokerRecord> {
        let mut state = self.log.state.lock();
        let count = self.assignment.len();

        for step in 0..count {
            let index = (self.cursor + step) % count;
            let (topic, partition) = &self.assignment[index];
            let key = (topic.clone(), *partition);
            let position = self.positions.get(&key).copied().unwrap_or(0);

            let Some(record) = state
                .topics
                .get(topic)
                .and_then(|partitions| partitions.get(*partition as usize))
                .and_then(|log| log.get(position as usize))
                .cloned()
            else {
                continue;
            };

            self.positions.insert(key, position + 1);
            if self.auto_commit {
                state
                    .committed
                    .insert((self.group.clone(), topic.clone(), *partition), position + 1);
            }
            self.cursor = (index + 1) % count;
            return Some(record);
        }
        None
    }
}

#[async_trait]
impl BrokerConsumer for InMemoryConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let mut state = self.log.state.lock();
        self.assignment.clear();
        self.positions.clear();
        self.cursor = 0;

        for topic in topics {
            let lengths: Vec<u64> = state
                .ensure_topic(topic, self.log.partitions)
                .iter()
                .map(|log| log.len() as u64)
                .collect();

            for (partition, len) in lengths.into_iter().enumerate() {
                let partition = partition as u32;
                let committed = state
                    .committed
                    .get(&(self.group.clone(), topic.clone(), partition))
                    .copied();
                let start = match (committed, self.reset) {
                    (Some(offset), _) => offset,
                    (None, OffsetReset::Earliest) => 0,
                    (None, OffsetReset::Latest) => len,
                };
                self.assignment.push((topic.clone(), partition));
                self.positions.insert((topic.clone(), partition), start);
            }
        }

        debug!(group = %self.group, topics = ?topics, partitions = self.assignment.len(), "subscribed");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerRecord>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.assignment.is_empty() {
            return Err(TransportError::NotSubscribed);
        }

        let deadline = Instant::now() + timeout;
        loop {
            // Mark the current append count as seen before looking, so an
            // append racing with the scan still wakes the wait below
            self.changes.borrow_and_update();
            if let Some(record) = self.next_record() {
                return Ok(Some(record));
            }

            match timeout_at(deadline, self.changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(TransportError::Closed),
                Err(_) => return Ok(None),
            }
        }
    }

    async fn commit_record(&mut self, record: &BrokerRecord) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.log.state.lock().committed.insert(
            (self.group.clone(), record.topic.clone(), record.partition),
            record.offset + 1,
        );
        Ok(())
    }

    async fn commit_positions(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut state = self.log.state.lock();
        for ((topic, partition), position) in &self.positions {
            state
                .committed
                .insert((self.group.clone(), topic.clone(), *partition), *position);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        if self.auto_commit {
            self.commit_positions().await?;
        }
        self.closed = true;
        debug!(group = %self.group, "consumer closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Headers;

    fn record(topic: &str, key: Option<&str>, payload: &[u8]) -> OutboundRecord {
        OutboundRecord {
            topic: topic.to_string(),
            key: key.map(str::to_string),
            payload: payload.to_vec(),
            headers: Headers::new(),
        }
    }

    fn group(name: &str, reset: OffsetReset, auto_commit: bool) -> ConsumerConfig {
        ConsumerConfig {
            group_id: name.to_string(),
            auto_offset_reset: reset,
            enable_auto_commit: auto_commit,
            ..ConsumerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_same_key_same_partition_in_order() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let mut reports = Vec::new();
        for i in 0..5u8 {
            let ack = broker.send(record("t", Some("ACC-1"), &[i])).unwrap();
            reports.push(ack.await.unwrap().unwrap());
        }

        let partition = reports[0].partition;
        assert!(reports.iter().all(|r| r.partition == partition));
        let offsets: Vec<u64> = reports.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_keyless_round_robin() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let mut partitions = Vec::new();
        for _ in 0..3 {
            let ack = broker.send(record("t", None, b"x")).unwrap();
            partitions.push(ack.await.unwrap().unwrap().partition);
        }
        partitions.sort();
        assert_eq!(partitions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_poll_times_out_empty() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let mut consumer = broker.consumer(&ConsumerConfig::default());
        assert_eq!(
            consumer.poll(Duration::from_millis(10)).await,
            Err(TransportError::NotSubscribed)
        );

        consumer.subscribe(&["t".to_string()]).await.unwrap();
        assert_eq!(consumer.poll(Duration::from_millis(20)).await, Ok(None));
    }

    #[tokio::test]
    async fn test_poll_wakes_on_append() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let mut consumer = broker.consumer(&ConsumerConfig::default());
        consumer.subscribe(&["t".to_string()]).await.unwrap();

        let producer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = producer.send(record("t", Some("k"), b"late"));
        });

        let polled = consumer.poll(Duration::from_secs(5)).await.unwrap();
        assert_eq!(polled.unwrap().payload, b"late".to_vec());
    }

    #[tokio::test]
    async fn test_committed_offsets_resume_group() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        for i in 0..4u8 {
            broker.send(record("t", Some("k"), &[i])).unwrap().await.unwrap().unwrap();
        }

        let mut first = broker.consumer(&group("g", OffsetReset::Earliest, false));
        first.subscribe(&["t".to_string()]).await.unwrap();
        let a = first.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        let b = first.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        first.commit_record(&a).await.unwrap();
        assert_eq!(broker.committed("g", "t", a.partition), Some(1));
        drop(b);
        first.close().await.unwrap();

        // Uncommitted record `b` is delivered again
        let mut second = broker.consumer(&group("g", OffsetReset::Earliest, false));
        second.subscribe(&["t".to_string()]).await.unwrap();
        let again = second.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(again.offset, 1);
    }

    #[tokio::test]
    async fn test_auto_commit_on_hand_out() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let report = broker.send(record("t", Some("k"), b"x")).unwrap().await.unwrap().unwrap();

        let mut consumer = broker.consumer(&group("auto", OffsetReset::Earliest, true));
        consumer.subscribe(&["t".to_string()]).await.unwrap();
        consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(broker.committed("auto", "t", report.partition), Some(1));
    }

    #[tokio::test]
    async fn test_latest_skips_existing() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        broker.send(record("t", Some("k"), b"old")).unwrap().await.unwrap().unwrap();

        let mut consumer = broker.consumer(&group("late", OffsetReset::Latest, true));
        consumer.subscribe(&["t".to_string()]).await.unwrap();
        broker.send(record("t", Some("k"), b"new")).unwrap().await.unwrap().unwrap();

        let polled = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(polled.payload, b"new".to_vec());
    }

    #[tokio::test]
    async fn test_flush_and_offline() {
        let broker = InMemoryBroker::new(BrokerConfig {
            partitions: 1,
            ack_latency: Duration::from_millis(5),
        });
        for _ in 0..3 {
            broker.send(record("t", None, b"x")).unwrap();
        }
        assert_eq!(broker.flush(Duration::from_secs(2)).await, 0);
        assert_eq!(broker.topic_len("t"), 3);

        broker.set_offline(true);
        assert!(matches!(
            broker.send(record("t", None, b"x")),
            Err(TransportError::BrokerUnavailable(_))
        ));
        assert_eq!(broker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_closed_consumer_refuses_poll() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let mut consumer = broker.consumer(&ConsumerConfig::default());
        consumer.subscribe(&["t".to_string()]).await.unwrap();
        consumer.close().await.unwrap();
        assert_eq!(
            consumer.poll(Duration::from_millis(10)).await,
            Err(TransportError::Closed)
        );
    }
}
