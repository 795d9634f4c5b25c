//! Schema misuse errors
//!
//! Raised synchronously at the point of the invalid operation. Descriptors
//! are immutable, so a failed change never leaves a half-applied schema.

use std::fmt;

/// Severity of schema errors. Misuse is always rejected, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The requested change is refused
    Reject,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Reject => write!(f, "REJECT"),
        }
    }
}

/// Schema error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorCode {
    /// Field name already exists in the type
    DuplicateField,
    /// Field name not found in the type
    UnknownField,
    /// Operation would leave the type without identity fields
    SoleIdentity,
    /// Type declared with no identity fields
    NoIdentity,
    /// Field or type name contains reserved characters
    InvalidName,
    /// Field format changed after the formats were first used
    FormatLocked,
    /// Entity type not found
    UnknownType,
    /// Entity type already exists
    DuplicateType,
    /// Shard header does not describe a valid schema
    BadHeader,
    /// Entity values do not fit the schema
    BadEntity,
}

impl SchemaErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            SchemaErrorCode::DuplicateField => "SHARDCSV_DUPLICATE_FIELD",
            SchemaErrorCode::UnknownField => "SHARDCSV_UNKNOWN_FIELD",
            SchemaErrorCode::SoleIdentity => "SHARDCSV_SOLE_IDENTITY",
            SchemaErrorCode::NoIdentity => "SHARDCSV_NO_IDENTITY",
            SchemaErrorCode::InvalidName => "SHARDCSV_INVALID_NAME",
            SchemaErrorCode::FormatLocked => "SHARDCSV_FORMAT_LOCKED",
            SchemaErrorCode::UnknownType => "SHARDCSV_UNKNOWN_TYPE",
            SchemaErrorCode::DuplicateType => "SHARDCSV_DUPLICATE_TYPE",
            SchemaErrorCode::BadHeader => "SHARDCSV_BAD_HEADER",
            SchemaErrorCode::BadEntity => "SHARDCSV_BAD_ENTITY",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        Severity::Reject
    }
}

impl fmt::Display for SchemaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Schema error with the type and field it concerns
#[derive(Debug, Clone)]
pub struct SchemaError {
    code: SchemaErrorCode,
    message: String,
    type_name: Option<String>,
    field: Option<String>,
}

impl SchemaError {
    fn new(code: SchemaErrorCode, message: String) -> Self {
        Self {
            code,
            message,
            type_name: None,
            field: None,
        }
    }

    fn in_field(mut self, type_name: &str, field: &str) -> Self {
        self.type_name = Some(type_name.to_string());
        self.field = Some(field.to_string());
        self
    }

    /// A field named `field` already exists
    pub fn duplicate_field(type_name: &str, field: &str) -> Self {
        Self::new(
            SchemaErrorCode::DuplicateField,
            format!("A field named {}.{} already exists", type_name, field),
        )
        .in_field(type_name, field)
    }

    /// No field named `field`
    pub fn unknown_field(type_name: &str, field: &str) -> Self {
        Self::new(
            SchemaErrorCode::UnknownField,
            format!("No such field: {}.{}", type_name, field),
        )
        .in_field(type_name, field)
    }

    /// `field` is the only identity field and cannot be removed or demoted
    pub fn sole_identity(type_name: &str, field: &str) -> Self {
        Self::new(
            SchemaErrorCode::SoleIdentity,
            format!("{}.{} is the sole identity field", type_name, field),
        )
        .in_field(type_name, field)
    }

    /// Type declared without identity fields
    pub fn no_identity(type_name: &str) -> Self {
        let mut err = Self::new(
            SchemaErrorCode::NoIdentity,
            format!("Entity type {} must have at least 1 identity field", type_name),
        );
        err.type_name = Some(type_name.to_string());
        err
    }

    /// Name contains reserved characters or is empty
    pub fn invalid_name(name: &str, reason: &str) -> Self {
        Self::new(
            SchemaErrorCode::InvalidName,
            format!("Invalid name '{}': {}", name, reason),
        )
    }

    /// Format override attempted after the formats were resolved
    pub fn format_locked(type_name: &str, field: &str) -> Self {
        Self::new(
            SchemaErrorCode::FormatLocked,
            format!(
                "Formats of {} are already in use; {} cannot be changed",
                type_name, field
            ),
        )
        .in_field(type_name, field)
    }

    /// No such entity type
    pub fn unknown_type(type_name: &str) -> Self {
        let mut err = Self::new(
            SchemaErrorCode::UnknownType,
            format!("No such entity type: {}", type_name),
        );
        err.type_name = Some(type_name.to_string());
        err
    }

    /// Entity type already exists
    pub fn duplicate_type(type_name: &str) -> Self {
        let mut err = Self::new(
            SchemaErrorCode::DuplicateType,
            format!("Entity type already exists: {}", type_name),
        );
        err.type_name = Some(type_name.to_string());
        err
    }

    /// Header column is malformed
    pub fn bad_header(type_name: &str, column: usize, reason: impl Into<String>) -> Self {
        let mut err = Self::new(
            SchemaErrorCode::BadHeader,
            format!(
                "Bad {} header at column {}: {}",
                type_name,
                column,
                reason.into()
            ),
        );
        err.type_name = Some(type_name.to_string());
        err
    }

    /// Entity does not fit the schema
    pub fn bad_entity(type_name: &str, reason: impl Into<String>) -> Self {
        let mut err = Self::new(SchemaErrorCode::BadEntity, reason.into());
        err.type_name = Some(type_name.to_string());
        err
    }

    /// Returns the error code
    pub fn code(&self) -> SchemaErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the entity type this error concerns, if any
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// Returns the field this error concerns, if any
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for SchemaError {}

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SchemaErrorCode::DuplicateField.code(),
            "SHARDCSV_DUPLICATE_FIELD"
        );
        assert_eq!(SchemaErrorCode::SoleIdentity.code(), "SHARDCSV_SOLE_IDENTITY");
        assert_eq!(SchemaErrorCode::FormatLocked.code(), "SHARDCSV_FORMAT_LOCKED");
    }

    #[test]
    fn test_display_carries_code_and_context() {
        let err = SchemaError::sole_identity("users", "id");
        let display = err.to_string();
        assert!(display.contains("REJECT"));
        assert!(display.contains("SHARDCSV_SOLE_IDENTITY"));
        assert!(display.contains("users.id"));
        assert_eq!(err.type_name(), Some("users"));
        assert_eq!(err.field(), Some("id"));
    }
}
