//! Producer -> in-memory broker -> consumer, end to end

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edalab_codec::{register_builtin_schemas, InMemorySchemaRegistry, SchemaCodec};
use edalab_core::Amount;
use edalab_events::{
    banking_topics, topics, AccountOpened, AccountType, Channel, Deposited, Event, Withdrawn,
};
use edalab_transport::{
    BrokerConfig, BrokerProducer, ConsumedEvent, Consumer, ConsumerConfig, HandlerResult,
    Headers, InMemoryBroker, MessageHandler, OutboundRecord, Producer, ProducerConfig,
    TransportError,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Collect {
    events: Mutex<Vec<(String, Event)>>,
}

#[async_trait]
impl MessageHandler for Collect {
    fn name(&self) -> &str {
        "collect"
    }

    async fn handle(&self, message: &ConsumedEvent) -> HandlerResult {
        self.events
            .lock()
            .push((message.topic.clone(), message.event.clone()));
        Ok(())
    }
}

async fn codec() -> Arc<SchemaCodec> {
    let registry = Arc::new(InMemorySchemaRegistry::new());
    register_builtin_schemas(registry.as_ref()).await.unwrap();
    Arc::new(SchemaCodec::new(registry))
}

fn fast_consumer(group: &str) -> ConsumerConfig {
    ConsumerConfig {
        group_id: group.to_string(),
        poll_timeout: Duration::from_millis(20),
        dead_letter_topic: Some(topics::DEAD_LETTER.to_string()),
        ..ConsumerConfig::default()
    }
}

#[tokio::test]
async fn test_events_flow_in_order_per_account() {
    let codec = codec().await;
    let broker = InMemoryBroker::new(BrokerConfig::default());
    let producer = Producer::new(
        Arc::new(broker.clone()),
        codec.clone(),
        ProducerConfig::default(),
    );
    let cancel = CancellationToken::new();

    let mut published = Vec::new();
    let opened: Event =
        AccountOpened::new("ACC-A", "CLI-1", AccountType::Checking, Amount::from_units(100)).into();
    published.push(opened);
    for i in 0..10 {
        let event: Event = if i % 2 == 0 {
            Deposited::new("ACC-A", Amount::from_units(5), Channel::Wire, format!("D{i}")).into()
        } else {
            Withdrawn::new("ACC-A", Amount::from_units(1), Channel::Card, format!("W{i}")).into()
        };
        published.push(event);
    }
    for event in &published {
        producer.publish_event(&cancel, event).await.unwrap();
    }
    assert_eq!(producer.close().await, 0);

    let config = fast_consumer("ordering");
    let mut consumer = Consumer::new(Box::new(broker.consumer(&config)), codec, config);
    consumer.subscribe(&banking_topics()).await.unwrap();

    let handler = Collect::default();
    let stop = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        stop.cancel();
    });
    assert_eq!(
        consumer.run(&cancel, &handler).await,
        Err(TransportError::Cancelled)
    );

    let seen = handler.events.lock();
    assert_eq!(seen.len(), published.len());

    // Same key and topic keeps publish order
    let deposits: Vec<&str> = seen
        .iter()
        .filter(|(topic, _)| topic == topics::DEPOSIT_COMPLETED)
        .map(|(_, event)| event.event_id())
        .collect();
    let expected: Vec<&str> = published
        .iter()
        .filter(|event| event.topic() == topics::DEPOSIT_COMPLETED)
        .map(Event::event_id)
        .collect();
    assert_eq!(deposits, expected);
}

#[tokio::test]
async fn test_malformed_message_is_dead_lettered_and_skipped() {
    let codec = codec().await;
    let broker = InMemoryBroker::new(BrokerConfig {
        partitions: 1,
        ..BrokerConfig::default()
    });
    let producer = Producer::new(
        Arc::new(broker.clone()),
        codec.clone(),
        ProducerConfig::default(),
    );
    let cancel = CancellationToken::new();

    // A plain JSON message without the wire header, then a valid one
    broker
        .send(OutboundRecord {
            topic: topics::DEPOSIT_COMPLETED.to_string(),
            key: Some("ACC-A".to_string()),
            payload: br#"{"amount":"10"}"#.to_vec(),
            headers: Headers::new(),
        })
        .unwrap()
        .await
        .unwrap()
        .unwrap();
    let valid: Event =
        Deposited::new("ACC-A", Amount::from_units(10), Channel::Counter, "REF").into();
    producer.publish_event(&cancel, &valid).await.unwrap();

    let config = ConsumerConfig {
        enable_auto_commit: false,
        ..fast_consumer("dlq")
    };
    let mut consumer = Consumer::new(Box::new(broker.consumer(&config)), codec, config)
        .with_dead_letter(Arc::new(broker.clone()));
    consumer.subscribe(&[topics::DEPOSIT_COMPLETED]).await.unwrap();

    let handler = Collect::default();
    let stop = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.cancel();
    });
    let _ = consumer.run(&cancel, &handler).await;

    // The valid message behind the bad one still got through
    assert_eq!(handler.events.lock().len(), 1);
    let stats = consumer.stats().snapshot();
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(stats.dead_lettered, 1);

    let dead = broker.records(topics::DEAD_LETTER);
    assert_eq!(dead.len(), 1);
    assert_eq!(
        dead[0].headers.get("x-original-topic").map(String::as_str),
        Some(topics::DEPOSIT_COMPLETED)
    );
    assert_eq!(
        dead[0].headers.get("x-original-offset").map(String::as_str),
        Some("0")
    );
    assert!(dead[0].headers.contains_key("x-error"));
    assert_eq!(broker.committed("dlq", topics::DEPOSIT_COMPLETED, 0), Some(2));
}
