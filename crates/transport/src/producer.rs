//! Event producer

use crate::broker::BrokerProducer;
use crate::error::TransportError;
use crate::message::{DeliveryReport, Headers, OutboundRecord, EVENT_TYPE_HEADER};
use edalab_codec::SchemaCodec;
use edalab_events::{value_subject, Event};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Producer settings
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Upper bound on the wait for a delivery acknowledgment
    pub delivery_timeout: Duration,
    /// Headers added to every message (per-call headers win)
    pub default_headers: Headers,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(30),
            default_headers: Headers::new(),
        }
    }
}

/// Publishes schema-encoded events and waits for their acknowledgment.
///
/// Cheap to clone; callers may publish concurrently, the broker client
/// serialises its own I/O.
#[derive(Clone)]
pub struct Producer {
    client: Arc<dyn BrokerProducer>,
    codec: Arc<SchemaCodec>,
    config: ProducerConfig,
}

impl Producer {
    pub fn new(
        client: Arc<dyn BrokerProducer>,
        codec: Arc<SchemaCodec>,
        config: ProducerConfig,
    ) -> Self {
        Self {
            client,
            codec,
            config,
        }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Encode `event` against the latest schema of `topic` and publish it
    /// under `key`.
    ///
    /// Returns once the broker acknowledged the message, `cancel` fired, or
    /// the delivery timeout elapsed. A timed out message is not resent here.
    pub async fn publish(
        &self,
        cancel: &CancellationToken,
        topic: &str,
        key: &str,
        event: &Event,
    ) -> Result<DeliveryReport, TransportError> {
        self.publish_with_headers(cancel, topic, key, event, Headers::new())
            .await
    }

    pub async fn publish_with_headers(
        &self,
        cancel: &CancellationToken,
        topic: &str,
        key: &str,
        event: &Event,
        headers: Headers,
    ) -> Result<DeliveryReport, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let wire = self.codec.encode(&value_subject(topic), event).await?;

        let mut all_headers = self.config.default_headers.clone();
        all_headers.insert(EVENT_TYPE_HEADER.to_string(), event.kind().to_string());
        all_headers.extend(headers);

        let record = OutboundRecord {
            topic: topic.to_string(),
            key: (!key.is_empty()).then(|| key.to_string()),
            payload: wire.to_bytes(),
            headers: all_headers,
        };

        let report = self.deliver(cancel, record).await?;
        debug!(
            event_id = %event.event_id(),
            topic,
            partition = report.partition,
            offset = report.offset,
            "event published"
        );
        Ok(report)
    }

    /// Publish on the event's own topic, keyed by its partition key
    pub async fn publish_event(
        &self,
        cancel: &CancellationToken,
        event: &Event,
    ) -> Result<DeliveryReport, TransportError> {
        self.publish(cancel, event.topic(), event.partition_key(), event)
            .await
    }

    /// Publish bytes that are already framed, such as a dead-lettered message
    pub async fn publish_raw(
        &self,
        cancel: &CancellationToken,
        topic: &str,
        key: Option<&str>,
        payload: Vec<u8>,
        headers: Headers,
    ) -> Result<DeliveryReport, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let mut all_headers = self.config.default_headers.clone();
        all_headers.extend(headers);

        let record = OutboundRecord {
            topic: topic.to_string(),
            key: key.map(str::to_string),
            payload,
            headers: all_headers,
        };
        self.deliver(cancel, record).await
    }

    async fn deliver(
        &self,
        cancel: &CancellationToken,
        record: OutboundRecord,
    ) -> Result<DeliveryReport, TransportError> {
        let topic = record.topic.clone();
        let ack = self.client.send(record)?;
        let timeout = self.config.delivery_timeout;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            acked = tokio::time::timeout(timeout, ack) => match acked {
                Ok(Ok(report)) => report,
                Ok(Err(_)) => Err(TransportError::DeliveryFailed {
                    topic,
                    reason: "delivery report channel closed".to_string(),
                }),
                Err(_) => {
                    warn!(topic = %topic, timeout_ms = timeout.as_millis() as u64, "delivery timed out");
                    Err(TransportError::DeliveryTimeout {
                        topic,
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
            },
        }
    }

    /// Wait for in-flight messages; returns how many are still pending
    pub async fn flush(&self, timeout_ms: u64) -> usize {
        self.client.flush(Duration::from_millis(timeout_ms)).await
    }

    pub fn in_flight(&self) -> usize {
        self.client.in_flight()
    }

    /// Flush with the delivery timeout before shutdown
    pub async fn close(&self) -> usize {
        let pending = self.client.flush(self.config.delivery_timeout).await;
        if pending > 0 {
            warn!(pending, "producer closed with undelivered messages");
        }
        pending
    }
}
