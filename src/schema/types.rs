//! Field type definitions
//!
//! Supported types and their header spelling:
//! - `string`, `bool`
//! - `i8`, `i16`, `i32`, `i64`
//! - `f32`, `f64`
//! - `duration`, `instant`
//! - `enum<A|B|C>`: one of a declared list of variant names
//! - `list<T>`: homogeneous list of a non-list type

use std::fmt;

use super::errors::{SchemaError, SchemaResult};
use super::value::Value;

/// Declared type of a field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// Boolean
    Bool,
    /// 8-bit signed integer
    I8,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
    /// Non-negative span of time
    Duration,
    /// Point in time (UTC)
    Instant,
    /// One of the declared variant names
    Enum(Vec<String>),
    /// List of a non-list element type
    List(Box<FieldType>),
}

impl FieldType {
    /// Shorthand for `FieldType::List(Box::new(element))`
    pub fn list(element: FieldType) -> Self {
        FieldType::List(Box::new(element))
    }

    /// Shorthand for an enum type from variant names
    pub fn enumeration<S: Into<String>>(variants: impl IntoIterator<Item = S>) -> Self {
        FieldType::Enum(variants.into_iter().map(Into::into).collect())
    }

    /// Returns whether this type is a scalar (not a list)
    pub fn is_scalar(&self) -> bool {
        !matches!(self, FieldType::List(_))
    }

    /// Returns whether `value` is an instance of this type. Null fits any type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::String, Value::String(_))
            | (FieldType::Bool, Value::Bool(_))
            | (FieldType::I8, Value::I8(_))
            | (FieldType::I16, Value::I16(_))
            | (FieldType::I32, Value::I32(_))
            | (FieldType::I64, Value::I64(_))
            | (FieldType::F32, Value::F32(_))
            | (FieldType::F64, Value::F64(_))
            | (FieldType::Duration, Value::Duration(_))
            | (FieldType::Instant, Value::Instant(_)) => true,
            (FieldType::Enum(variants), Value::Enum(name)) => variants.contains(name),
            (FieldType::List(element), Value::List(items)) => items
                .iter()
                .all(|item| !matches!(item, Value::Null) && element.accepts(item)),
            _ => false,
        }
    }

    /// Parses a header type token such as `i64` or `list<i32>`.
    pub fn parse(text: &str) -> SchemaResult<Self> {
        let text = text.trim();
        let lower = text.to_ascii_lowercase();
        let scalar = match lower.as_str() {
            "string" => Some(FieldType::String),
            "bool" => Some(FieldType::Bool),
            "i8" => Some(FieldType::I8),
            "i16" => Some(FieldType::I16),
            "i32" => Some(FieldType::I32),
            "i64" => Some(FieldType::I64),
            "f32" => Some(FieldType::F32),
            "f64" => Some(FieldType::F64),
            "duration" => Some(FieldType::Duration),
            "instant" => Some(FieldType::Instant),
            _ => None,
        };
        if let Some(scalar) = scalar {
            return Ok(scalar);
        }

        if let Some(inner) = strip_generic(text, "list") {
            let element = FieldType::parse(inner)?;
            if !element.is_scalar() {
                return Err(SchemaError::invalid_name(text, "lists cannot be nested"));
            }
            return Ok(FieldType::list(element));
        }

        if let Some(inner) = strip_generic(text, "enum") {
            let variants: Vec<String> = inner.split('|').map(|v| v.trim().to_string()).collect();
            let ty = FieldType::Enum(variants);
            ty.validate()?;
            return Ok(ty);
        }

        Err(SchemaError::invalid_name(text, "unknown field type"))
    }

    /// Checks enum variant lists and list element types.
    pub fn validate(&self) -> SchemaResult<()> {
        match self {
            FieldType::Enum(variants) => {
                if variants.is_empty() {
                    return Err(SchemaError::invalid_name("enum<>", "enum needs variants"));
                }
                for (i, variant) in variants.iter().enumerate() {
                    if variant.is_empty()
                        || variant
                            .chars()
                            .any(|c| matches!(c, '|' | '<' | '>' | ',' | ':' | '"') || c.is_control())
                    {
                        return Err(SchemaError::invalid_name(variant, "bad enum variant"));
                    }
                    if variants[..i].contains(variant) {
                        return Err(SchemaError::invalid_name(variant, "duplicate enum variant"));
                    }
                }
                Ok(())
            }
            FieldType::List(element) => {
                if !element.is_scalar() {
                    return Err(SchemaError::invalid_name(
                        &self.to_string(),
                        "lists cannot be nested",
                    ));
                }
                element.validate()
            }
            _ => Ok(()),
        }
    }
}

fn strip_generic<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let open = text.find('<')?;
    if !text[..open].trim().eq_ignore_ascii_case(name) || !text.ends_with('>') {
        return None;
    }
    Some(&text[open + 1..text.len() - 1])
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Bool => write!(f, "bool"),
            FieldType::I8 => write!(f, "i8"),
            FieldType::I16 => write!(f, "i16"),
            FieldType::I32 => write!(f, "i32"),
            FieldType::I64 => write!(f, "i64"),
            FieldType::F32 => write!(f, "f32"),
            FieldType::F64 => write!(f, "f64"),
            FieldType::Duration => write!(f, "duration"),
            FieldType::Instant => write!(f, "instant"),
            FieldType::Enum(variants) => write!(f, "enum<{}>", variants.join("|")),
            FieldType::List(element) => write!(f, "list<{}>", element),
        }
    }
}

/// A named, typed field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name, unique within its type
    pub name: String,
    /// Declared value type
    pub field_type: FieldType,
}

impl FieldDef {
    /// Create a field definition
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    /// Create a string field
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    /// Create a 64-bit integer field
    pub fn i64(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::I64)
    }

    /// Create a 32-bit integer field
    pub fn i32(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::I32)
    }

    /// Create a boolean field
    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Bool)
    }
}

/// Validates a field or type name.
///
/// Names end up in header tokens (`*name:type`) and in file names, so the
/// delimiter, the identity marker, the type separator, quotes, path
/// separators and control characters are reserved. A name must also be a
/// plain directory name, so `.` and `..` are rejected.
pub fn validate_name(name: &str) -> SchemaResult<()> {
    if name.trim().is_empty() {
        return Err(SchemaError::invalid_name(name, "name is empty"));
    }
    if name == "." || name == ".." {
        return Err(SchemaError::invalid_name(name, "not a plain file name"));
    }
    if name != name.trim() {
        return Err(SchemaError::invalid_name(
            name,
            "leading or trailing whitespace",
        ));
    }
    if let Some(c) = name
        .chars()
        .find(|c| matches!(c, ',' | ':' | '*' | '"' | '/' | '\\') || c.is_control())
    {
        return Err(SchemaError::invalid_name(
            name,
            &format!("reserved character {:?}", c),
        ));
    }
    Ok(())
}
