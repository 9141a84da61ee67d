//! In-process schema registry
//!
//! Used by the CLI pipeline and by tests. Counts lookups and can be switched
//! offline to exercise registry outages.

use super::{RegisteredSchema, SchemaRegistrar, SchemaRegistry};
use crate::error::RegistryError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct State {
    by_id: HashMap<u32, RegisteredSchema>,
    /// Ids per subject, oldest version first
    subjects: HashMap<String, Vec<u32>>,
    next_id: u32,
}

/// Schema registry held in memory
pub struct InMemorySchemaRegistry {
    state: RwLock<State>,
    lookups: AtomicUsize,
    offline: AtomicBool,
    latency: Duration,
}

impl Default for InMemorySchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                next_id: 1,
                ..State::default()
            }),
            lookups: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
            latency: Duration::ZERO,
        }
    }

    /// Delay every lookup, like a remote call would
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of lookups served (successful or not)
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// While offline every lookup fails with a request error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.state.read().subjects.keys().cloned().collect();
        subjects.sort();
        subjects
    }

    async fn begin_lookup(&self) -> Result<(), RegistryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(RegistryError::Request("registry offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn lookup(&self, id: u32) -> Result<RegisteredSchema, RegistryError> {
        self.begin_lookup().await?;
        self.state
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(RegistryError::IdNotFound(id))
    }

    async fn lookup_latest(&self, subject: &str) -> Result<RegisteredSchema, RegistryError> {
        self.begin_lookup().await?;
        let state = self.state.read();
        state
            .subjects
            .get(subject)
            .and_then(|ids| ids.last())
            .and_then(|id| state.by_id.get(id))
            .cloned()
            .ok_or_else(|| RegistryError::SubjectNotFound(subject.to_string()))
    }
}

#[async_trait]
impl SchemaRegistrar for InMemorySchemaRegistry {
    async fn register(&self, subject: &str, definition: &str) -> Result<u32, RegistryError> {
        let mut state = self.state.write();

        // Identical definition under the same subject keeps its id
        if let Some(ids) = state.subjects.get(subject) {
            if let Some(existing) = ids
                .iter()
                .filter_map(|id| state.by_id.get(id))
                .find(|s| s.definition == definition)
            {
                return Ok(existing.id);
            }
        }

        let id = state.next_id;
        state.next_id += 1;
        let version = state.subjects.get(subject).map_or(1, |ids| ids.len() as u32 + 1);

        state.by_id.insert(
            id,
            RegisteredSchema {
                id,
                subject: subject.to_string(),
                version,
                definition: definition.to_string(),
            },
        );
        state
            .subjects
            .entry(subject.to_string())
            .or_default()
            .push(id);

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::register_builtin_schemas;

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = InMemorySchemaRegistry::new();
        let id = registry.register("t-value", "{\"a\":1}").await.unwrap();

        let by_id = registry.lookup(id).await.unwrap();
        assert_eq!(by_id.subject, "t-value");
        assert_eq!(by_id.version, 1);

        let latest = registry.lookup_latest("t-value").await.unwrap();
        assert_eq!(latest, by_id);
        assert_eq!(registry.lookup_count(), 2);
    }

    #[tokio::test]
    async fn test_new_version_becomes_latest() {
        let registry = InMemorySchemaRegistry::new();
        let v1 = registry.register("t-value", "one").await.unwrap();
        let v2 = registry.register("t-value", "two").await.unwrap();
        assert_ne!(v1, v2);

        let latest = registry.lookup_latest("t-value").await.unwrap();
        assert_eq!(latest.id, v2);
        assert_eq!(latest.version, 2);
        // Old ids stay resolvable
        assert_eq!(registry.lookup(v1).await.unwrap().definition, "one");
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = InMemorySchemaRegistry::new();
        let a = registry.register("t-value", "same").await.unwrap();
        let b = registry.register("t-value", "same").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_unknown_lookups() {
        let registry = InMemorySchemaRegistry::new();
        assert_eq!(
            registry.lookup(42).await,
            Err(RegistryError::IdNotFound(42))
        );
        assert!(matches!(
            registry.lookup_latest("nope").await,
            Err(RegistryError::SubjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_offline() {
        let registry = InMemorySchemaRegistry::new();
        let id = registry.register("t-value", "x").await.unwrap();
        registry.set_offline(true);
        assert!(matches!(
            registry.lookup(id).await,
            Err(RegistryError::Request(_))
        ));
        registry.set_offline(false);
        assert!(registry.lookup(id).await.is_ok());
    }

    #[tokio::test]
    async fn test_builtin_schemas() {
        let registry = InMemorySchemaRegistry::new();
        let ids = register_builtin_schemas(&registry).await.unwrap();
        assert_eq!(ids.len(), 5);
        assert!(registry
            .subjects()
            .contains(&"banking.deposit.completed-value".to_string()));
    }
}
