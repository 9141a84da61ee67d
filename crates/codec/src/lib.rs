//! EDA-Lab Codec - schema-tagged wire format
//!
//! Every transported payload is framed as:
//!
//! ```text
//! +------+-----------------------+----------------------+
//! | 0x00 | schema id (u32, BE)   | JSON record body     |
//! +------+-----------------------+----------------------+
//!   1 B          4 B                   N B
//! ```
//!
//! The schema id is resolved through a [`SchemaRegistry`] and cached for the
//! life of the process. Schemas are immutable once registered, so the cache
//! never evicts.

pub mod codec;
pub mod error;
pub mod registry;
pub mod schema;
pub mod wire;

pub use codec::{SchemaCodec, SchemaEntry};
pub use error::{CodecError, RegistryError};
pub use registry::{
    register_builtin_schemas, HttpSchemaRegistry, InMemorySchemaRegistry, RegisteredSchema,
    SchemaRegistrar, SchemaRegistry,
};
pub use schema::{FieldType, RecordField, RecordSchema};
pub use wire::{WireMessage, HEADER_LEN, MAGIC_BYTE};
