//! Broker client ports

use crate::error::TransportError;
use crate::message::{BrokerRecord, DeliveryReport, OutboundRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::oneshot;

/// Resolves once the broker has acknowledged (or rejected) a message
pub type DeliveryFuture = oneshot::Receiver<Result<DeliveryReport, TransportError>>;

/// Where a consumer group without a committed offset starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

/// Sending half of a broker client.
///
/// Retries, batching and acknowledgment levels are the client's own,
/// configured when it is built.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Queue a record without waiting for delivery
    fn send(&self, record: OutboundRecord) -> Result<DeliveryFuture, TransportError>;

    /// Records queued but not yet acknowledged
    fn in_flight(&self) -> usize;

    /// Wait up to `timeout` for in-flight records; returns how many remain
    async fn flush(&self, timeout: Duration) -> usize;
}

/// Receiving half of a broker client, owned by a single consumer loop
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Replace the current subscription
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError>;

    /// Next record, or `None` when nothing arrived within `timeout`
    async fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerRecord>, TransportError>;

    /// Commit `record` (and everything before it on its partition)
    async fn commit_record(&mut self, record: &BrokerRecord) -> Result<(), TransportError>;

    /// Commit the current read position of every assigned partition
    async fn commit_positions(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}
