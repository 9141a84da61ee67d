//! Codec behaviour against a registry holding the bundled schemas

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use edalab_codec::{
    register_builtin_schemas, CodecError, InMemorySchemaRegistry, SchemaCodec, WireMessage,
};
use edalab_core::{Amount, Currency};
use edalab_events::{
    AccountClosed, AccountOpened, AccountType, Channel, Deposited, Event, EventKind,
    TransferInitiated, Withdrawn,
};

async fn registry_with_builtins() -> Arc<InMemorySchemaRegistry> {
    let registry = Arc::new(InMemorySchemaRegistry::new());
    register_builtin_schemas(registry.as_ref()).await.unwrap();
    registry
}

fn sample_events() -> Vec<Event> {
    let mut opened =
        AccountOpened::new("ACC-A", "CLI-1", AccountType::Savings, Amount::from_units(1000))
            .with_currency(Currency::Chf);
    opened
        .metadata
        .insert("branch".to_string(), "Lyon".to_string());

    vec![
        opened.into(),
        AccountClosed::new("ACC-A", "CLI-1", Amount::ZERO, "client request").into(),
        Deposited::new("ACC-A", Amount::from_minor(50075, 2), Channel::Cheque, "REF-D").into(),
        Withdrawn::new("ACC-A", Amount::from_units(200), Channel::Card, "REF-W").into(),
        TransferInitiated::new("ACC-A", "ACC-B", Amount::from_units(300), "rent", "REF-T").into(),
    ]
}

#[tokio::test]
async fn test_round_trip_every_variant() {
    let registry = registry_with_builtins().await;
    let producer_side = SchemaCodec::new(registry.clone());
    let consumer_side = SchemaCodec::new(registry.clone());

    for event in sample_events() {
        let subject = event.kind().subject();
        let wire = producer_side.encode(&subject, &event).await.unwrap();
        let (schema_id, decoded) = consumer_side.decode(&wire.to_bytes()).await.unwrap();

        assert_eq!(schema_id, wire.schema_id);
        assert_eq!(decoded, event);
    }
}

#[tokio::test]
async fn test_concurrent_first_use_hits_registry_once() {
    let registry = Arc::new(
        InMemorySchemaRegistry::new().with_latency(Duration::from_millis(50)),
    );
    register_builtin_schemas(registry.as_ref()).await.unwrap();

    let event: Event =
        Deposited::new("ACC-A", Amount::from_units(10), Channel::Wire, "REF").into();
    let bytes = SchemaCodec::new(registry.clone())
        .encode_to_bytes(&EventKind::Deposited.subject(), &event)
        .await
        .unwrap();
    let lookups_before = registry.lookup_count();

    let codec = Arc::new(SchemaCodec::new(registry.clone()));
    let mut tasks = Vec::new();
    for _ in 0..16 {
        let codec = codec.clone();
        let bytes = bytes.clone();
        tasks.push(tokio::spawn(async move { codec.decode(&bytes).await }));
    }
    for task in tasks {
        let (_, decoded) = task.await.unwrap().unwrap();
        assert_eq!(decoded.event_id(), event.event_id());
    }

    assert_eq!(registry.lookup_count() - lookups_before, 1);
    assert_eq!(codec.cached_schemas().await, 1);
}

#[tokio::test]
async fn test_cached_schema_served_while_another_resolves() {
    let registry = Arc::new(
        InMemorySchemaRegistry::new().with_latency(Duration::from_millis(500)),
    );
    register_builtin_schemas(registry.as_ref()).await.unwrap();

    let event: Event =
        Deposited::new("ACC-A", Amount::from_units(10), Channel::Wire, "REF").into();
    let bytes = SchemaCodec::new(registry.clone())
        .encode_to_bytes(&EventKind::Deposited.subject(), &event)
        .await
        .unwrap();

    let codec = Arc::new(SchemaCodec::new(registry.clone()));
    codec.decode(&bytes).await.unwrap();

    let unknown = WireMessage::new(9999, b"{}".to_vec()).to_bytes();
    let slow = {
        let codec = codec.clone();
        tokio::spawn(async move { codec.decode(&unknown).await })
    };
    // Let the miss reach the registry
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let (_, decoded) = codec.decode(&bytes).await.unwrap();
    assert_eq!(decoded, event);
    assert!(
        started.elapsed() < Duration::from_millis(250),
        "cached decode waited {:?}",
        started.elapsed()
    );

    assert!(matches!(
        slow.await.unwrap(),
        Err(CodecError::SchemaUnavailable(_))
    ));
    assert_eq!(codec.cached_schemas().await, 1);
}

#[tokio::test]
async fn test_registry_failure_is_not_cached() {
    let registry = registry_with_builtins().await;
    let event: Event =
        Withdrawn::new("ACC-A", Amount::from_units(10), Channel::Counter, "REF").into();
    let bytes = SchemaCodec::new(registry.clone())
        .encode_to_bytes(&EventKind::Withdrawn.subject(), &event)
        .await
        .unwrap();

    let codec = SchemaCodec::new(registry.clone());
    registry.set_offline(true);
    let err = codec.decode(&bytes).await.unwrap_err();
    assert!(matches!(err, CodecError::SchemaUnavailable(_)));
    assert!(err.is_transient());
    assert_eq!(codec.cached_schemas().await, 0);

    registry.set_offline(false);
    let (_, decoded) = codec.decode(&bytes).await.unwrap();
    assert_eq!(decoded, event);
}

#[tokio::test]
async fn test_framing_errors() {
    let codec = SchemaCodec::new(registry_with_builtins().await);

    assert_eq!(
        codec.decode(&[0x00, 0x00]).await.unwrap_err(),
        CodecError::ShortPayload { len: 2 }
    );
    assert_eq!(
        codec.decode(b"{\"plain\":\"json\"}").await.unwrap_err(),
        CodecError::BadMagic(b'{')
    );

    let unknown_id = WireMessage::new(9999, b"{}".to_vec()).to_bytes();
    assert!(matches!(
        codec.decode(&unknown_id).await,
        Err(CodecError::SchemaUnavailable(_))
    ));
}
