//! Event consumer and the handler seam

use crate::broker::{BrokerConsumer, BrokerProducer, OffsetReset};
use crate::error::TransportError;
use crate::message::{BrokerRecord, ConsumedEvent, OutboundRecord};
use async_trait::async_trait;
use edalab_codec::{CodecError, SchemaCodec};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest broker poll; keeps the loop responsive to cancellation
pub const MAX_POLL_TIMEOUT: Duration = Duration::from_millis(900);

/// Pause after a failed poll before trying again
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// How long a dead-letter publish may take before the message is left uncommitted
const DEAD_LETTER_TIMEOUT: Duration = Duration::from_secs(5);

/// Result returned by message handlers
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives every successfully decoded message.
///
/// Handlers should be idempotent: with manual commits a message whose
/// handler failed is seen again after a restart.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handler name (for logging)
    fn name(&self) -> &str;

    async fn handle(&self, message: &ConsumedEvent) -> HandlerResult;
}

/// Consumer settings
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub group_id: String,
    pub auto_offset_reset: OffsetReset,
    /// When off, an offset is committed only after its handler succeeded
    pub enable_auto_commit: bool,
    pub poll_timeout: Duration,
    /// Undecodable messages are republished here before being skipped
    pub dead_letter_topic: Option<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: "edalab".to_string(),
            auto_offset_reset: OffsetReset::Earliest,
            enable_auto_commit: true,
            poll_timeout: Duration::from_secs(1),
            dead_letter_topic: None,
        }
    }
}

impl ConsumerConfig {
    /// Poll timeout actually used, always sub-second
    pub fn effective_poll_timeout(&self) -> Duration {
        self.poll_timeout.min(MAX_POLL_TIMEOUT)
    }
}

/// Running counters of a consumer loop
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    handled: AtomicU64,
    handler_errors: AtomicU64,
    decode_errors: AtomicU64,
    dead_lettered: AtomicU64,
    poll_errors: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStatsSnapshot {
    pub received: u64,
    pub handled: u64,
    pub handler_errors: u64,
    pub decode_errors: u64,
    pub dead_lettered: u64,
    pub poll_errors: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Polls a broker, decodes each message and hands it to a handler.
///
/// One consumer runs one synchronous poll-decode-handle loop, so messages of
/// a partition reach the handler in order. Neither a decode failure nor a
/// handler failure stops the loop.
pub struct Consumer {
    client: Box<dyn BrokerConsumer>,
    codec: Arc<SchemaCodec>,
    config: ConsumerConfig,
    dead_letter: Option<Arc<dyn BrokerProducer>>,
    stats: Arc<ConsumerStats>,
    topics: Vec<String>,
}

impl Consumer {
    pub fn new(
        client: Box<dyn BrokerConsumer>,
        codec: Arc<SchemaCodec>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            client,
            codec,
            config,
            dead_letter: None,
            stats: Arc::new(ConsumerStats::default()),
            topics: Vec::new(),
        }
    }

    /// Broker client used to republish undecodable messages to
    /// `dead_letter_topic`
    pub fn with_dead_letter(mut self, producer: Arc<dyn BrokerProducer>) -> Self {
        self.dead_letter = Some(producer);
        self
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub async fn subscribe<S: AsRef<str>>(&mut self, topics: &[S]) -> Result<(), TransportError> {
        let topics: Vec<String> = topics.iter().map(|t| t.as_ref().to_string()).collect();
        self.client.subscribe(&topics).await?;
        info!(group = %self.config.group_id, topics = ?topics, "consumer subscribed");
        self.topics = topics;
        Ok(())
    }

    /// Consume until `cancel` fires.
    ///
    /// Always ends with an error: [`TransportError::Cancelled`] on
    /// cancellation, or the client error that made polling impossible
    /// (not subscribed, closed).
    pub async fn run(
        &mut self,
        cancel: &CancellationToken,
        handler: &dyn MessageHandler,
    ) -> Result<(), TransportError> {
        if self.topics.is_empty() {
            return Err(TransportError::NotSubscribed);
        }
        let poll_timeout = self.config.effective_poll_timeout();
        info!(group = %self.config.group_id, handler = handler.name(), "consumer loop started");

        loop {
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(group = %self.config.group_id, "consumer loop cancelled");
                    return Err(TransportError::Cancelled);
                }
                polled = self.client.poll(poll_timeout) => polled,
            };

            match polled {
                Ok(None) => continue,
                Ok(Some(record)) => self.process(record, handler).await,
                Err(err @ (TransportError::Closed | TransportError::NotSubscribed)) => {
                    return Err(err);
                }
                Err(err) => {
                    ConsumerStats::bump(&self.stats.poll_errors);
                    error!(group = %self.config.group_id, error = %err, "poll failed");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
    }

    async fn process(&mut self, record: BrokerRecord, handler: &dyn MessageHandler) {
        ConsumerStats::bump(&self.stats.received);

        let message = match self.decode(&record).await {
            Ok(message) => message,
            Err(err) => {
                // Skip without stalling the partition; commit only if the
                // message was preserved on the dead-letter topic
                if self.dead_letter(&record, &err).await && !self.config.enable_auto_commit {
                    self.commit_record(&record).await;
                }
                return;
            }
        };

        match handler.handle(&message).await {
            Ok(()) => {
                ConsumerStats::bump(&self.stats.handled);
                debug!(
                    handler = handler.name(),
                    event_id = %message.event.event_id(),
                    topic = %message.topic,
                    offset = message.offset,
                    "message handled"
                );
                if !self.config.enable_auto_commit {
                    self.commit_record(&record).await;
                }
            }
            Err(err) => {
                ConsumerStats::bump(&self.stats.handler_errors);
                error!(
                    handler = handler.name(),
                    event_id = %message.event.event_id(),
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    "handler failed, message left uncommitted"
                );
            }
        }
    }

    async fn decode(&self, record: &BrokerRecord) -> Result<ConsumedEvent, CodecError> {
        match self.codec.decode(&record.payload).await {
            Ok((schema_id, event)) => Ok(ConsumedEvent {
                event,
                schema_id,
                topic: record.topic.clone(),
                partition: record.partition,
                offset: record.offset,
                key: record.key.clone(),
                headers: record.headers.clone(),
                timestamp: record.timestamp,
            }),
            Err(err) => {
                ConsumerStats::bump(&self.stats.decode_errors);
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %err,
                    "skipping undecodable message"
                );
                Err(err)
            }
        }
    }

    /// Returns true when the message was stored on the dead-letter topic
    async fn dead_letter(&self, record: &BrokerRecord, err: &CodecError) -> bool {
        let (Some(topic), Some(producer)) = (&self.config.dead_letter_topic, &self.dead_letter)
        else {
            return false;
        };

        let mut headers = record.headers.clone();
        headers.insert("x-original-topic".to_string(), record.topic.clone());
        headers.insert("x-original-partition".to_string(), record.partition.to_string());
        headers.insert("x-original-offset".to_string(), record.offset.to_string());
        headers.insert("x-error".to_string(), err.to_string());

        let outbound = OutboundRecord {
            topic: topic.clone(),
            key: record.key.clone(),
            payload: record.payload.clone(),
            headers,
        };

        let acked = match producer.send(outbound) {
            Ok(ack) => matches!(
                tokio::time::timeout(DEAD_LETTER_TIMEOUT, ack).await,
                Ok(Ok(Ok(_)))
            ),
            Err(_) => false,
        };

        if acked {
            ConsumerStats::bump(&self.stats.dead_lettered);
            info!(topic = %record.topic, offset = record.offset, dead_letter_topic = %topic, "message dead-lettered");
        } else {
            error!(topic = %record.topic, offset = record.offset, "dead-letter publish failed");
        }
        acked
    }

    async fn commit_record(&mut self, record: &BrokerRecord) {
        if let Err(err) = self.client.commit_record(record).await {
            error!(topic = %record.topic, offset = record.offset, error = %err, "commit failed");
        }
    }

    /// Poll once and decode, without any handler.
    ///
    /// Returns `Ok(None)` when nothing arrived within `timeout`. An
    /// undecodable message is dead-lettered (if configured) and returned as
    /// an error.
    pub async fn consume_once(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ConsumedEvent>, TransportError> {
        let Some(record) = self.client.poll(timeout).await? else {
            return Ok(None);
        };
        ConsumerStats::bump(&self.stats.received);

        match self.decode(&record).await {
            Ok(message) => Ok(Some(message)),
            Err(err) => {
                self.dead_letter(&record, &err).await;
                Err(TransportError::Codec(err))
            }
        }
    }

    /// Commit the current position of every assigned partition
    pub async fn commit(&mut self) -> Result<(), TransportError> {
        self.client
            .commit_positions()
            .await
            .map_err(|err| match err {
                TransportError::Closed => TransportError::Closed,
                other => TransportError::CommitFailed(other.to_string()),
            })
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.client.close().await?;
        info!(group = %self.config.group_id, "consumer closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BrokerConfig, InMemoryBroker};
    use crate::message::Headers;
    use edalab_codec::{register_builtin_schemas, InMemorySchemaRegistry};
    use edalab_core::Amount;
    use edalab_events::{topics, Channel, Deposited, Event};
    use parking_lot::Mutex;

    #[test]
    fn test_poll_timeout_is_sub_second() {
        let config = ConsumerConfig::default();
        assert_eq!(config.effective_poll_timeout(), MAX_POLL_TIMEOUT);

        let fast = ConsumerConfig {
            poll_timeout: Duration::from_millis(100),
            ..ConsumerConfig::default()
        };
        assert_eq!(fast.effective_poll_timeout(), Duration::from_millis(100));
    }

    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn handle(&self, message: &ConsumedEvent) -> HandlerResult {
            let id = message.event.event_id().to_string();
            if self.fail_on.as_deref() == Some(id.as_str()) {
                return Err("refused".into());
            }
            self.seen.lock().push(id);
            Ok(())
        }
    }

    async fn codec() -> Arc<SchemaCodec> {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        register_builtin_schemas(registry.as_ref()).await.unwrap();
        Arc::new(SchemaCodec::new(registry))
    }

    fn deposit(reference: &str) -> Event {
        Deposited::new("ACC-1", Amount::from_units(10), Channel::Card, reference).into()
    }

    async fn publish(broker: &InMemoryBroker, codec: &SchemaCodec, event: &Event) -> u64 {
        let bytes = codec
            .encode_to_bytes(&event.kind().subject(), event)
            .await
            .unwrap();
        let record = OutboundRecord {
            topic: event.topic().to_string(),
            key: Some(event.partition_key().to_string()),
            payload: bytes,
            headers: Headers::new(),
        };
        broker.send(record).unwrap().await.unwrap().unwrap().offset
    }

    #[tokio::test]
    async fn test_run_requires_subscription() {
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let mut consumer = Consumer::new(
            Box::new(broker.consumer(&ConsumerConfig::default())),
            codec().await,
            ConsumerConfig::default(),
        );
        let handler = Recorder {
            seen: Mutex::new(Vec::new()),
            fail_on: None,
        };
        let result = consumer.run(&CancellationToken::new(), &handler).await;
        assert_eq!(result, Err(TransportError::NotSubscribed));
    }

    #[tokio::test]
    async fn test_manual_commit_only_after_success() {
        let codec = codec().await;
        let broker = InMemoryBroker::new(BrokerConfig {
            partitions: 1,
            ..BrokerConfig::default()
        });
        let config = ConsumerConfig {
            group_id: "manual".to_string(),
            enable_auto_commit: false,
            poll_timeout: Duration::from_millis(20),
            ..ConsumerConfig::default()
        };

        let good = deposit("REF-1");
        let bad = deposit("REF-2");
        publish(&broker, &codec, &good).await;
        publish(&broker, &codec, &bad).await;

        let mut consumer =
            Consumer::new(Box::new(broker.consumer(&config)), codec.clone(), config);
        consumer.subscribe(&[topics::DEPOSIT_COMPLETED]).await.unwrap();

        let handler = Recorder {
            seen: Mutex::new(Vec::new()),
            fail_on: Some(bad.event_id().to_string()),
        };
        let cancel = CancellationToken::new();
        let stats = consumer.stats();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let result = consumer.run(&cancel, &handler).await;
        assert_eq!(result, Err(TransportError::Cancelled));

        assert_eq!(*handler.seen.lock(), vec![good.event_id().to_string()]);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.handled, 1);
        assert_eq!(snapshot.handler_errors, 1);
        // Only the first offset was committed
        assert_eq!(
            broker.committed("manual", topics::DEPOSIT_COMPLETED, 0),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_consume_once() {
        let codec = codec().await;
        let broker = InMemoryBroker::new(BrokerConfig::default());
        let event = deposit("REF-ONCE");
        publish(&broker, &codec, &event).await;

        let config = ConsumerConfig::default();
        let mut consumer = Consumer::new(Box::new(broker.consumer(&config)), codec, config);
        consumer.subscribe(&[topics::DEPOSIT_COMPLETED]).await.unwrap();

        let message = consumer
            .consume_once(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.event, event);
        assert_eq!(message.key.as_deref(), Some("ACC-1"));

        assert!(consumer
            .consume_once(Duration::from_millis(20))
            .await
            .unwrap()
            .is_none());
        consumer.close().await.unwrap();
    }
}
