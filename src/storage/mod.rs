//! Shard storage for entity types
//!
//! Every entity type lives in its own directory as one or more CSV shard
//! files. Each shard starts with a header line and holds rows sorted by
//! identity, one entity per line.
//!
//! # Design Principles
//!
//! - The cursor is the only owner of file handles
//! - Pure scans never write (copy-on-write rewrite)
//! - Placement depends only on identity values and the shard count
//! - Shard count changes only through an explicit redistribution
//!
//! Crash atomicity is not provided: a failure in the middle of a rewrite
//! or redistribution can leave a type partially migrated.

mod codec;
mod cursor;
mod errors;
mod layout;
mod placement;
mod redistribute;
mod stream;

pub use codec::{decode_line, encode_line, LineError};
pub use cursor::{Cursor, CursorOptions, CursorState};
pub use errors::{ParsePosition, Severity, StoreError, StoreErrorCode, StoreResult};
pub use layout::{
    discover_shards, list_type_dirs, next_shard_number, shard_file_name, total_size, type_dir,
    ShardFile, SHARD_EXTENSION,
};
pub use placement::{ideal_shard_count, identity_hash, shard_index};
pub use redistribute::{redistribute, sort_shard, RedistributionReport};
