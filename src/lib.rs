//! shardcsv - An embedded entity store persisted as sharded CSV files
//!
//! Each entity type is a directory of shard files. A shard is a header
//! line naming the typed columns followed by one row per entity, sorted
//! by identity. The shard an entity lives in is a pure function of its
//! identity values and the shard count.

pub mod entity_set;
pub mod format;
pub mod observability;
pub mod schema;
pub mod storage;

pub use entity_set::{EntitySet, StoreConfig};
pub use format::{FormatRegistry, ValueFormat};
pub use schema::{Entity, EntitySchema, FieldDef, FieldType, Value};
pub use storage::{Cursor, StoreError, StoreErrorCode, StoreResult};
