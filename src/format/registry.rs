//! Type-to-format registry

use std::collections::HashMap;
use std::sync::Arc;

use super::formats::{
    BoolFormat, DurationFormat, EnumFormat, FloatFormat, InstantFormat, IntFormat, ListFormat,
    StringFormat, ValueFormat,
};
use crate::schema::FieldType;

/// Maps field types to formats.
///
/// Overrides are keyed by the type's header spelling (`i64`, `list<i32>`,
/// `enum<A|B>`); every other type gets its default format, so lookup never
/// fails.
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    overrides: HashMap<String, Arc<dyn ValueFormat>>,
}

impl FormatRegistry {
    /// Create a registry with only the default formats
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `format` for every field of `field_type` resolved from now on.
    pub fn register(&mut self, field_type: &FieldType, format: Arc<dyn ValueFormat>) {
        self.overrides.insert(field_type.to_string(), format);
    }

    /// Returns whether an override is registered for `field_type`
    pub fn has_override(&self, field_type: &FieldType) -> bool {
        self.overrides.contains_key(&field_type.to_string())
    }

    /// Format for values of `field_type`
    pub fn format_for(&self, field_type: &FieldType) -> Arc<dyn ValueFormat> {
        if let Some(format) = self.overrides.get(&field_type.to_string()) {
            return Arc::clone(format);
        }
        match field_type {
            FieldType::String => Arc::new(StringFormat),
            FieldType::Bool => Arc::new(BoolFormat),
            FieldType::I8 => Arc::new(IntFormat::new(8)),
            FieldType::I16 => Arc::new(IntFormat::new(16)),
            FieldType::I32 => Arc::new(IntFormat::new(32)),
            FieldType::I64 => Arc::new(IntFormat::new(64)),
            FieldType::F32 => Arc::new(FloatFormat::single()),
            FieldType::F64 => Arc::new(FloatFormat::double()),
            FieldType::Duration => Arc::new(DurationFormat),
            FieldType::Instant => Arc::new(InstantFormat),
            FieldType::Enum(variants) => Arc::new(EnumFormat::new(variants.clone())),
            FieldType::List(element) => Arc::new(ListFormat::new(self.format_for(element))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatResult;
    use crate::schema::Value;

    #[derive(Debug)]
    struct HexFormat;

    impl ValueFormat for HexFormat {
        fn encode(&self, value: &Value) -> FormatResult<String> {
            match value {
                Value::I32(v) => Ok(format!("{:x}", v)),
                _ => Ok(String::new()),
            }
        }

        fn decode(&self, text: &str) -> FormatResult<Value> {
            i32::from_str_radix(text, 16)
                .map(Value::I32)
                .map_err(|e| crate::format::FormatError::parse("hex", text, 0, e.to_string()))
        }
    }

    #[test]
    fn test_defaults() {
        let registry = FormatRegistry::new();
        let f = registry.format_for(&FieldType::I64);
        assert_eq!(f.encode(&Value::I64(12)).unwrap(), "12");
        assert!(!registry.has_override(&FieldType::I64));
    }

    #[test]
    fn test_override_applies_to_list_elements() {
        let mut registry = FormatRegistry::new();
        registry.register(&FieldType::I32, Arc::new(HexFormat));
        let list = registry.format_for(&FieldType::list(FieldType::I32));
        let text = list
            .encode(&Value::List(vec![Value::I32(255), Value::I32(16)]))
            .unwrap();
        assert_eq!(text, "ff,10");
        assert!(registry.has_override(&FieldType::I32));
    }
}
