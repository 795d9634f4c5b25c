//! Cell value formats
//!
//! Each field type has a format that turns values into cell text and
//! back. Defaults cover every `FieldType`; callers can replace the format
//! of a whole type through the registry or of one field through its
//! schema, before that schema is first used.

mod errors;
mod formats;
mod registry;

pub use errors::{FormatError, FormatResult};
pub use formats::{
    BoolFormat, DurationFormat, EnumFormat, FloatFormat, InstantFormat, IntFormat, ListFormat,
    StringFormat, ValueFormat,
};
pub use registry::FormatRegistry;
