//! Store error types
//!
//! Error codes:
//! - SHARDCSV_IO_ERROR (ERROR severity)
//! - SHARDCSV_PARSE_ERROR (FATAL severity)
//! - SHARDCSV_CURSOR_STATE (REJECT severity)
//! - SHARDCSV_SCHEMA_MISUSE (REJECT severity)
//! - SHARDCSV_CONFIG_INVALID (REJECT severity)

use std::fmt;
use std::io;
use std::path::Path;

use crate::format::FormatError;
use crate::schema::SchemaError;

/// Severity levels for store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Caller misuse; nothing was changed
    Reject,
    /// Operation failed; the store stays usable
    Error,
    /// Stored data cannot be read as written
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Reject => write!(f, "REJECT"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Store error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    /// File system failure
    IoError,
    /// Unparsable header or cell
    ParseError,
    /// Cursor operation not valid in its current state
    CursorState,
    /// Invalid schema operation
    SchemaMisuse,
    /// Configuration rejected
    ConfigInvalid,
}

impl StoreErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            StoreErrorCode::IoError => "SHARDCSV_IO_ERROR",
            StoreErrorCode::ParseError => "SHARDCSV_PARSE_ERROR",
            StoreErrorCode::CursorState => "SHARDCSV_CURSOR_STATE",
            StoreErrorCode::SchemaMisuse => "SHARDCSV_SCHEMA_MISUSE",
            StoreErrorCode::ConfigInvalid => "SHARDCSV_CONFIG_INVALID",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            StoreErrorCode::IoError => Severity::Error,
            StoreErrorCode::ParseError => Severity::Fatal,
            StoreErrorCode::CursorState
            | StoreErrorCode::SchemaMisuse
            | StoreErrorCode::ConfigInvalid => Severity::Reject,
        }
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Position of a parse failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePosition {
    /// Shard file
    pub file: String,
    /// 1-based line number
    pub line: usize,
    /// 0-based column index
    pub column: usize,
}

/// Store error with code, context and underlying cause
#[derive(Debug)]
pub struct StoreError {
    code: StoreErrorCode,
    message: String,
    details: Option<String>,
    position: Option<ParsePosition>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StoreError {
    fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            position: None,
            source: None,
        }
    }

    /// I/O failure on `path`
    pub fn io(path: &Path, action: &str, source: io::Error) -> Self {
        let mut err = Self::new(
            StoreErrorCode::IoError,
            format!("Failed to {} {}", action, path.display()),
        );
        err.details = Some(format!("file: {}", path.display()));
        err.source = Some(Box::new(source));
        err
    }

    /// Unparsable row or header cell
    pub fn parse(
        file: &Path,
        line: usize,
        column: usize,
        reason: impl Into<String>,
    ) -> Self {
        let file = file.display().to_string();
        let mut err = Self::new(StoreErrorCode::ParseError, reason);
        err.details = Some(format!("file: {}, line: {}, column: {}", file, line, column));
        err.position = Some(ParsePosition { file, line, column });
        err
    }

    /// Cell value failed to decode
    pub fn format(file: &Path, line: usize, column: usize, source: FormatError) -> Self {
        let mut err = Self::parse(file, line, column, source.to_string());
        err.source = Some(Box::new(source));
        err
    }

    /// Cursor used in the wrong state
    pub fn cursor_state(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::CursorState, message)
    }

    /// Configuration value rejected
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::ConfigInvalid, message)
    }

    /// Configuration file could not be read or parsed
    pub fn config_file(path: &Path, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        let mut err = Self::new(
            StoreErrorCode::ConfigInvalid,
            format!("Failed to load config from {}", path.display()),
        );
        err.details = Some(source.to_string());
        err.source = Some(Box::new(source));
        err
    }

    /// Attaches extra context
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Returns the error code
    pub fn code(&self) -> StoreErrorCode {
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

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// File, line and column of a parse error
    pub fn position(&self) -> Option<&ParsePosition> {
        self.position.as_ref()
    }

    /// Returns the schema error this wraps, if any
    pub fn schema_error(&self) -> Option<&SchemaError> {
        self.source
            .as_ref()
            .and_then(|e| (**e).downcast_ref::<SchemaError>())
    }

    /// Returns whether this error is fatal
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl From<SchemaError> for StoreError {
    fn from(err: SchemaError) -> Self {
        let mut wrapped = Self::new(StoreErrorCode::SchemaMisuse, err.message().to_string());
        wrapped.details = Some(err.code().code().to_string());
        wrapped.source = Some(Box::new(err));
        wrapped
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
