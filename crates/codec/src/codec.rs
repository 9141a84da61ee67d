//! Schema-aware encoder/decoder with a process-wide schema cache

use crate::error::CodecError;
use crate::registry::{RegisteredSchema, SchemaRegistry};
use crate::schema::RecordSchema;
use crate::wire::WireMessage;
use edalab_events::{Event, EventKind};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, trace};

/// A resolved schema, shared read-only by every caller once cached
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub id: u32,
    pub subject: String,
    pub schema: RecordSchema,
    pub raw: String,
}

impl SchemaEntry {
    fn from_registered(registered: RegisteredSchema) -> Result<Self, CodecError> {
        let schema =
            RecordSchema::parse(&registered.definition).map_err(|reason| {
                CodecError::InvalidSchema {
                    id: registered.id,
                    reason,
                }
            })?;
        Ok(Self {
            id: registered.id,
            subject: registered.subject,
            schema,
            raw: registered.definition,
        })
    }

    /// Event kind this schema describes
    pub fn kind(&self) -> Result<EventKind, CodecError> {
        EventKind::from_record_name(&self.schema.name)
            .map_err(|e| CodecError::Deserialize(e.to_string()))
    }
}

type Slot = Arc<OnceCell<Arc<SchemaEntry>>>;

/// Schemas resolved so far under one kind of key.
///
/// Hits only take the read lock. A miss joins (or opens) the in-flight slot
/// of its key and resolves through it, so concurrent first use of a key
/// costs one registry round trip while hits on other keys carry on. A failed
/// resolution leaves nothing behind.
struct SchemaCache<K> {
    entries: RwLock<HashMap<K, Arc<SchemaEntry>>>,
    in_flight: Mutex<HashMap<K, Slot>>,
}

impl<K: Eq + Hash + Clone> SchemaCache<K> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    async fn get(&self, key: &K) -> Option<Arc<SchemaEntry>> {
        self.entries.read().await.get(key).cloned()
    }

    async fn get_or_resolve<F, Fut>(&self, key: &K, resolve: F) -> Result<Arc<SchemaEntry>, CodecError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<SchemaEntry>, CodecError>>,
    {
        if let Some(entry) = self.get(key).await {
            return Ok(entry);
        }

        let slot = self.slot(key);
        // Entries are stored before a slot is released, so a slot opened
        // after a finished resolution finds the entry here
        if let Some(entry) = self.get(key).await {
            self.release(key, &slot);
            return Ok(entry);
        }

        let resolved = slot.get_or_try_init(resolve).await.map(Arc::clone);
        if let Ok(entry) = &resolved {
            self.insert(key.clone(), Arc::clone(entry)).await;
        }
        self.release(key, &slot);
        resolved
    }

    async fn insert(&self, key: K, entry: Arc<SchemaEntry>) {
        self.entries.write().await.entry(key).or_insert(entry);
    }

    fn slot(&self, key: &K) -> Slot {
        Arc::clone(self.in_flight.lock().entry(key.clone()).or_default())
    }

    fn release(&self, key: &K, slot: &Slot) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(key).is_some_and(|open| Arc::ptr_eq(open, slot)) {
            in_flight.remove(key);
        }
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Encodes events into the schema-tagged wire format and back.
///
/// Schemas are fetched lazily from the registry and cached forever, by id
/// and by subject. Registry failures are returned and never cached.
pub struct SchemaCodec {
    registry: Arc<dyn SchemaRegistry>,
    by_id: SchemaCache<u32>,
    by_subject: SchemaCache<String>,
}

impl SchemaCodec {
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self {
            registry,
            by_id: SchemaCache::new(),
            by_subject: SchemaCache::new(),
        }
    }

    /// Resolve a schema by id, consulting the registry only on a cache miss
    pub async fn schema_by_id(&self, id: u32) -> Result<Arc<SchemaEntry>, CodecError> {
        self.by_id
            .get_or_resolve(&id, || async move {
                let registered = self.registry.lookup(id).await?;
                let entry = Arc::new(SchemaEntry::from_registered(registered)?);
                debug!(schema_id = id, record = %entry.schema.full_name(), "schema cached by id");
                Ok::<_, CodecError>(entry)
            })
            .await
    }

    /// Resolve the latest schema of a subject, consulting the registry only on a cache miss
    pub async fn latest_schema(&self, subject: &str) -> Result<Arc<SchemaEntry>, CodecError> {
        let key = subject.to_string();
        let entry = self
            .by_subject
            .get_or_resolve(&key, || async move {
                let mut registered = self.registry.lookup_latest(subject).await?;
                if registered.subject.is_empty() {
                    registered.subject = subject.to_string();
                }
                let entry = Arc::new(SchemaEntry::from_registered(registered)?);
                debug!(subject, schema_id = entry.id, "schema cached by subject");
                Ok::<_, CodecError>(entry)
            })
            .await?;

        if self.by_id.get(&entry.id).await.is_none() {
            self.by_id.insert(entry.id, Arc::clone(&entry)).await;
        }
        Ok(entry)
    }

    /// Encode `event` against the latest schema registered under `subject`.
    pub async fn encode(&self, subject: &str, event: &Event) -> Result<WireMessage, CodecError> {
        let entry = self.latest_schema(subject).await?;

        let kind = event.kind();
        if entry.kind().ok() != Some(kind) {
            return Err(CodecError::Serialize(format!(
                "subject {} carries {}, not {}",
                subject, entry.schema.name, kind
            )));
        }

        let value = event
            .payload_json()
            .map_err(|e| CodecError::Serialize(e.to_string()))?;
        entry
            .schema
            .validate(&value)
            .map_err(CodecError::Serialize)?;
        let payload =
            serde_json::to_vec(&value).map_err(|e| CodecError::Serialize(e.to_string()))?;

        trace!(subject, schema_id = entry.id, bytes = payload.len(), "event encoded");
        Ok(WireMessage::new(entry.id, payload))
    }

    /// Encode straight to framed bytes
    pub async fn encode_to_bytes(&self, subject: &str, event: &Event) -> Result<Vec<u8>, CodecError> {
        Ok(self.encode(subject, event).await?.to_bytes())
    }

    /// Decode framed bytes into `(schema id, event)`.
    pub async fn decode(&self, bytes: &[u8]) -> Result<(u32, Event), CodecError> {
        let (schema_id, body) = WireMessage::parse(bytes)?;
        let entry = self.schema_by_id(schema_id).await?;

        let value: Value =
            serde_json::from_slice(body).map_err(|e| CodecError::Deserialize(e.to_string()))?;
        entry
            .schema
            .validate(&value)
            .map_err(CodecError::Deserialize)?;

        let kind = entry.kind()?;
        let event =
            Event::from_payload(kind, value).map_err(|e| CodecError::Deserialize(e.to_string()))?;
        Ok((schema_id, event))
    }

    /// Number of schemas cached by id
    pub async fn cached_schemas(&self) -> usize {
        self.by_id.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{InMemorySchemaRegistry, SchemaRegistrar};
    use edalab_core::Amount;
    use edalab_events::{schema_definition, AccountType, Channel, Deposited, AccountOpened};

    async fn setup() -> (Arc<InMemorySchemaRegistry>, SchemaCodec, u32) {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let id = registry
            .register(
                &EventKind::Deposited.subject(),
                &schema_definition(EventKind::Deposited),
            )
            .await
            .unwrap();
        let codec = SchemaCodec::new(registry.clone());
        (registry, codec, id)
    }

    fn deposit() -> Event {
        Deposited::new("ACC-1", Amount::from_units(500), Channel::Counter, "REF-1").into()
    }

    #[tokio::test]
    async fn test_encode_writes_header() {
        let (_, codec, id) = setup().await;
        let bytes = codec
            .encode_to_bytes(&EventKind::Deposited.subject(), &deposit())
            .await
            .unwrap();
        assert_eq!(bytes[0], 0x00);
        assert_eq!(u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]), id);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_registry() {
        let (registry, codec, _) = setup().await;
        let subject = EventKind::Deposited.subject();
        codec.encode(&subject, &deposit()).await.unwrap();
        codec.encode(&subject, &deposit()).await.unwrap();
        assert_eq!(registry.lookup_count(), 1);

        // The subject lookup also primed the id cache
        let bytes = codec.encode_to_bytes(&subject, &deposit()).await.unwrap();
        codec.decode(&bytes).await.unwrap();
        assert_eq!(registry.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_encode_rejects_wrong_subject() {
        let (_, codec, _) = setup().await;
        let opened: Event =
            AccountOpened::new("A", "C", AccountType::Joint, Amount::ZERO).into();
        let result = codec.encode(&EventKind::Deposited.subject(), &opened).await;
        assert!(matches!(result, Err(CodecError::Serialize(_))));
    }

    #[tokio::test]
    async fn test_unknown_subject_is_unavailable() {
        let (_, codec, _) = setup().await;
        let result = codec.encode("missing-value", &deposit()).await;
        assert!(matches!(result, Err(CodecError::SchemaUnavailable(_))));
    }

    #[tokio::test]
    async fn test_decode_rejects_non_conforming_body() {
        let (_, codec, id) = setup().await;
        let bytes = WireMessage::new(id, br#"{"event_id":"x"}"#.to_vec()).to_bytes();
        assert!(matches!(
            codec.decode(&bytes).await,
            Err(CodecError::Deserialize(_))
        ));

        let garbage = WireMessage::new(id, b"\xff\xfe".to_vec()).to_bytes();
        assert!(matches!(
            codec.decode(&garbage).await,
            Err(CodecError::Deserialize(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_schema_is_reported() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let id = registry.register("bad-value", "{\"type\":\"string\"}").await.unwrap();
        let codec = SchemaCodec::new(registry);
        let bytes = WireMessage::new(id, b"{}".to_vec()).to_bytes();
        assert!(matches!(
            codec.decode(&bytes).await,
            Err(CodecError::InvalidSchema { .. })
        ));
        assert_eq!(codec.cached_schemas().await, 0);
    }
}
