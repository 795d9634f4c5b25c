//! Observable events emitted by the entity store

use std::fmt;

/// Lifecycle events of the store.
///
/// Row-level traffic is never logged at INFO; only structural changes
/// and anomalies found while scanning are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Store directory scanned and types discovered
    StoreOpened,
    /// Entity type created
    TypeAdded,
    /// Entity type and all of its shards deleted
    TypeRemoved,
    /// Entity type directory and shards renamed
    TypeRenamed,
    /// Shard file created
    ShardAdded,
    /// Shard file deleted
    ShardRemoved,
    /// A shard or type header did not match its schema
    HeaderRejected,
    /// Tolerant scan stepped over an unparsable row
    RowSkipped,
    /// Column added to every row of a type
    FieldAdded,
    /// Column removed from every row of a type
    FieldRemoved,
    /// Column renamed in every shard header of a type
    FieldRenamed,
    /// Identity field set of a type changed
    IdentityChanged,
    /// Field format replaced before first use
    FormatOverridden,
}

impl Event {
    /// Stable event name used in log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::StoreOpened => "STORE_OPENED",
            Event::TypeAdded => "TYPE_ADDED",
            Event::TypeRemoved => "TYPE_REMOVED",
            Event::TypeRenamed => "TYPE_RENAMED",
            Event::ShardAdded => "SHARD_ADDED",
            Event::ShardRemoved => "SHARD_REMOVED",
            Event::HeaderRejected => "HEADER_REJECTED",
            Event::RowSkipped => "ROW_SKIPPED",
            Event::FieldAdded => "FIELD_ADDED",
            Event::FieldRemoved => "FIELD_REMOVED",
            Event::FieldRenamed => "FIELD_RENAMED",
            Event::IdentityChanged => "IDENTITY_CHANGED",
            Event::FormatOverridden => "FORMAT_OVERRIDDEN",
        }
    }

    /// Anomalies are logged at WARN, everything else at INFO.
    pub fn is_anomaly(&self) -> bool {
        matches!(self, Event::HeaderRejected | Event::RowSkipped)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
