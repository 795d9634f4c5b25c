//! Value format errors

use thiserror::Error;

/// Failure to encode or decode a single cell value
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    /// Cell text is not a valid rendering of the field type
    #[error("cannot parse {text:?} as {type_name} at offset {offset}: {reason}")]
    Parse {
        type_name: String,
        text: String,
        offset: usize,
        reason: String,
    },

    /// Value handed to a format does not match its type
    #[error("expected a {expected} value, found {found}")]
    TypeMismatch { expected: String, found: String },
}

impl FormatError {
    pub(crate) fn parse(
        type_name: impl Into<String>,
        text: &str,
        offset: usize,
        reason: impl Into<String>,
    ) -> Self {
        FormatError::Parse {
            type_name: type_name.into(),
            text: text.to_string(),
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(expected: impl Into<String>, found: &str) -> Self {
        FormatError::TypeMismatch {
            expected: expected.into(),
            found: found.to_string(),
        }
    }

    /// Character offset within the cell text where parsing failed
    pub fn offset(&self) -> usize {
        match self {
            FormatError::Parse { offset, .. } => *offset,
            FormatError::TypeMismatch { .. } => 0,
        }
    }
}

/// Result type for format operations
pub type FormatResult<T> = Result<T, FormatError>;
