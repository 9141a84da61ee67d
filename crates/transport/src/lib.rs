//! EDA-Lab Transport - topic-based event delivery
//!
//! - [`Producer`]: encodes events with the schema codec and waits for the
//!   broker's delivery acknowledgment (bounded by a delivery timeout)
//! - [`Consumer`]: polls, decodes and hands events to a [`MessageHandler`],
//!   skipping anything that fails without stalling the partition
//! - [`InMemoryBroker`]: partitioned, offset-tracking broker used by the
//!   in-process pipeline and the tests
//!
//! The broker client sits behind the [`BrokerProducer`] / [`BrokerConsumer`]
//! ports so another client can be plugged in without touching the
//! producer/consumer logic.

pub mod broker;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod message;
pub mod producer;

pub use broker::{BrokerConsumer, BrokerProducer, DeliveryFuture, OffsetReset};
pub use consumer::{
    Consumer, ConsumerConfig, ConsumerStats, ConsumerStatsSnapshot, HandlerResult, MessageHandler,
    MAX_POLL_TIMEOUT,
};
pub use error::TransportError;
pub use memory::{BrokerConfig, InMemoryBroker, InMemoryConsumer};
pub use message::{
    BrokerRecord, ConsumedEvent, DeliveryReport, Headers, OutboundRecord, EVENT_TYPE_HEADER,
};
pub use producer::{Producer, ProducerConfig};
