//! Schema registry port and adapters

mod http;
mod memory;

pub use http::HttpSchemaRegistry;
pub use memory::InMemorySchemaRegistry;

use crate::error::RegistryError;
use async_trait::async_trait;
use edalab_events::{schema_definition, EventKind};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

/// A schema as stored by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredSchema {
    pub id: u32,
    /// Empty when resolved by id from a registry that does not report it
    pub subject: String,
    pub version: u32,
    pub definition: String,
}

/// The two lookups the codec needs from a schema registry
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Resolve a schema by its global id
    async fn lookup(&self, id: u32) -> Result<RegisteredSchema, RegistryError>;

    /// Resolve the latest version registered under `subject`
    async fn lookup_latest(&self, subject: &str) -> Result<RegisteredSchema, RegistryError>;
}

/// Registry adapters that can also accept new schemas
#[async_trait]
pub trait SchemaRegistrar: Send + Sync {
    /// Register `definition` under `subject`, returning its global id.
    ///
    /// Registering an identical definition again returns the existing id.
    async fn register(&self, subject: &str, definition: &str) -> Result<u32, RegistryError>;
}

/// Register the bundled schema of every event kind under its subject.
///
/// Returns `(subject, id)` pairs in registration order.
pub async fn register_builtin_schemas(
    registrar: &dyn SchemaRegistrar,
) -> Result<Vec<(String, u32)>, RegistryError> {
    let mut ids = Vec::new();
    for kind in EventKind::iter() {
        let subject = kind.subject();
        let id = registrar
            .register(&subject, &schema_definition(kind))
            .await?;
        tracing::debug!(subject = %subject, schema_id = id, "schema registered");
        ids.push((subject, id));
    }
    Ok(ids)
}
