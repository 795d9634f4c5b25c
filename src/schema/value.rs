//! Field values, entities and identity keys
//!
//! Entities are plain value vectors addressed by column position; the
//! owning `EntitySchema` fixes what each position means.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crc32fast::Hasher;

/// A single field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing value; sorts before every present value
    Null,
    /// UTF-8 string
    String(String),
    /// Boolean
    Bool(bool),
    /// 8-bit signed integer
    I8(i8),
    /// 16-bit signed integer
    I16(i16),
    /// 32-bit signed integer
    I32(i32),
    /// 64-bit signed integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// Span of time
    Duration(Duration),
    /// Point in time
    Instant(DateTime<Utc>),
    /// Enum variant name
    Enum(String),
    /// List of non-null scalar values
    List(Vec<Value>),
}

impl Value {
    /// Returns whether this is `Value::Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short kind name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Duration(_) => "duration",
            Value::Instant(_) => "instant",
            Value::Enum(_) => "enum",
            Value::List(_) => "list",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::I8(_) => 2,
            Value::I16(_) => 3,
            Value::I32(_) => 4,
            Value::I64(_) => 5,
            Value::F32(_) => 6,
            Value::F64(_) => 7,
            Value::Duration(_) => 8,
            Value::Instant(_) => 9,
            Value::Enum(_) => 10,
            Value::String(_) => 11,
            Value::List(_) => 12,
        }
    }

    /// Total order over values.
    ///
    /// Null sorts first, floats use IEEE total ordering, enums compare by
    /// variant name and lists lexicographically. Values of different kinds
    /// (only possible with mis-typed input) order by kind.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::I8(a), Value::I8(b)) => a.cmp(b),
            (Value::I16(a), Value::I16(b)) => a.cmp(b),
            (Value::I32(a), Value::I32(b)) => a.cmp(b),
            (Value::I64(a), Value::I64(b)) => a.cmp(b),
            (Value::F32(a), Value::F32(b)) => a.total_cmp(b),
            (Value::F64(a), Value::F64(b)) => a.total_cmp(b),
            (Value::Duration(a), Value::Duration(b)) => a.cmp(b),
            (Value::Instant(a), Value::Instant(b)) => a.cmp(b),
            (Value::Enum(a), Value::Enum(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Stable hash of the value, independent of process and platform.
    pub fn stable_hash(&self) -> u32 {
        if self.is_null() {
            return 0;
        }
        let mut hasher = Hasher::new();
        self.feed(&mut hasher);
        hasher.finalize()
    }

    fn feed(&self, hasher: &mut Hasher) {
        hasher.update(&[self.rank()]);
        match self {
            Value::Null => {}
            Value::String(s) | Value::Enum(s) => hasher.update(s.as_bytes()),
            Value::Bool(b) => hasher.update(&[u8::from(*b)]),
            Value::I8(v) => hasher.update(&v.to_be_bytes()),
            Value::I16(v) => hasher.update(&v.to_be_bytes()),
            Value::I32(v) => hasher.update(&v.to_be_bytes()),
            Value::I64(v) => hasher.update(&v.to_be_bytes()),
            Value::F32(v) => hasher.update(&v.to_bits().to_be_bytes()),
            Value::F64(v) => hasher.update(&v.to_bits().to_be_bytes()),
            Value::Duration(d) => {
                hasher.update(&d.as_secs().to_be_bytes());
                hasher.update(&d.subsec_nanos().to_be_bytes());
            }
            Value::Instant(t) => {
                hasher.update(&t.timestamp().to_be_bytes());
                hasher.update(&t.timestamp_subsec_nanos().to_be_bytes());
            }
            Value::List(items) => {
                hasher.update(&(items.len() as u64).to_be_bytes());
                for item in items {
                    item.feed(hasher);
                }
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

/// One entity: a value per column, in the schema's column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    values: Vec<Value>,
}

impl Entity {
    /// Create an entity from column-ordered values
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Create an entity of `columns` nulls
    pub fn empty(columns: usize) -> Self {
        Self {
            values: vec![Value::Null; columns],
        }
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns whether the entity has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `column`
    pub fn get(&self, column: usize) -> Option<&Value> {
        self.values.get(column)
    }

    /// Replace the value at `column`. Out-of-range columns are ignored.
    pub fn set(&mut self, column: usize, value: Value) {
        if let Some(slot) = self.values.get_mut(column) {
            *slot = value;
        }
    }

    /// Builder form of [`Entity::set`]
    pub fn with(mut self, column: usize, value: Value) -> Self {
        self.set(column, value);
        self
    }

    /// All values in column order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the entity into its values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// The first `identity_count` values
    pub fn identity(&self, identity_count: usize) -> &[Value] {
        &self.values[..identity_count.min(self.values.len())]
    }
}

/// Owned identity values with the canonical identity ordering.
///
/// Ordering is lexicographic over the identity columns using
/// [`Value::total_cmp`]; this one comparator drives on-disk row order,
/// seeks and the redistribution merge.
#[derive(Debug, Clone)]
pub struct IdentityKey(Vec<Value>);

impl IdentityKey {
    /// Wrap identity values
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// The identity values
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Consumes the key into its values
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

/// Compares two identity value slices column by column.
pub fn compare_identity_values(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = x.total_cmp(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

impl PartialEq for IdentityKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IdentityKey {}

impl PartialOrd for IdentityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IdentityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_identity_values(&self.0, &other.0)
    }
}
