//! Entity sets: typed records kept as sorted, sharded CSV files
//!
//! `EntitySet` is the entry point. It maps each entity type to a directory
//! of shards and composes every operation from cursors, placement and
//! redistribution:
//!
//! - CRUD by identity (`get`, `update`, `delete`) and full scans
//! - Shard count kept near `target_shard_size_bytes` per shard
//! - Schema evolution that rewrites every row of a type

mod config;
mod migration;
mod set;

pub use config::{StoreConfig, MIN_TARGET_SHARD_SIZE};
pub use set::EntitySet;
