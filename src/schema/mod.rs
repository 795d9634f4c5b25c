//! Entity type schemas
//!
//! - `FieldType` / `FieldDef`: declared field types and their header spelling
//! - `Value` / `Entity` / `IdentityKey`: in-memory values and identity ordering
//! - `EntitySchema`: one type's fields, identity prefix and formats
//!
//! Identity fields always occupy the first columns, and every type has at
//! least one of them.

mod descriptor;
mod errors;
mod types;
mod value;

pub use descriptor::{EntitySchema, SchemaChange, IDENTITY_MARKER};
pub use errors::{SchemaError, SchemaErrorCode, SchemaResult, Severity};
pub use types::{validate_name, FieldDef, FieldType};
pub use value::{compare_identity_values, Entity, IdentityKey, Value};
