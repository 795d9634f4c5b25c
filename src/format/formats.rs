//! Default value formats
//!
//! Text renderings used for cells when no override is registered:
//! - integers and floats: Rust's shortest round-trip rendering
//! - bool: `true` / `false` (decoding ignores case)
//! - enum: the variant name
//! - duration: `<secs>[.<frac>]s`
//! - instant: RFC 3339 in UTC
//! - list: element renderings joined by `,`, with `\` and `,` inside an
//!   element escaped by a backslash

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use super::errors::{FormatError, FormatResult};
use crate::schema::Value;

/// Encoder/decoder pair for the values of one field type.
///
/// Null never reaches a format; the line codec writes it as an empty cell.
pub trait ValueFormat: Debug + Send + Sync {
    /// Render a value as cell text
    fn encode(&self, value: &Value) -> FormatResult<String>;

    /// Parse cell text back into a value
    fn decode(&self, text: &str) -> FormatResult<Value>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StringFormat;

impl ValueFormat for StringFormat {
    fn encode(&self, value: &Value) -> FormatResult<String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(FormatError::mismatch("string", other.kind())),
        }
    }

    fn decode(&self, text: &str) -> FormatResult<Value> {
        Ok(Value::String(text.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BoolFormat;

impl ValueFormat for BoolFormat {
    fn encode(&self, value: &Value) -> FormatResult<String> {
        match value {
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(FormatError::mismatch("bool", other.kind())),
        }
    }

    fn decode(&self, text: &str) -> FormatResult<Value> {
        if text.eq_ignore_ascii_case("true") {
            Ok(Value::Bool(true))
        } else if text.eq_ignore_ascii_case("false") {
            Ok(Value::Bool(false))
        } else {
            Err(FormatError::parse("bool", text, 0, "expected true or false"))
        }
    }
}

/// Signed integer of a fixed bit width (8, 16, 32 or 64)
#[derive(Debug, Clone, Copy)]
pub struct IntFormat {
    bits: u8,
}

impl IntFormat {
    pub fn new(bits: u8) -> Self {
        Self { bits }
    }

    fn type_name(&self) -> &'static str {
        match self.bits {
            8 => "i8",
            16 => "i16",
            32 => "i32",
            _ => "i64",
        }
    }
}

impl ValueFormat for IntFormat {
    fn encode(&self, value: &Value) -> FormatResult<String> {
        match (self.bits, value) {
            (8, Value::I8(v)) => Ok(v.to_string()),
            (16, Value::I16(v)) => Ok(v.to_string()),
            (32, Value::I32(v)) => Ok(v.to_string()),
            (64, Value::I64(v)) => Ok(v.to_string()),
            (_, other) => Err(FormatError::mismatch(self.type_name(), other.kind())),
        }
    }

    fn decode(&self, text: &str) -> FormatResult<Value> {
        let err = |e: std::num::ParseIntError| {
            FormatError::parse(self.type_name(), text, 0, e.to_string())
        };
        match self.bits {
            8 => text.parse::<i8>().map(Value::I8).map_err(err),
            16 => text.parse::<i16>().map(Value::I16).map_err(err),
            32 => text.parse::<i32>().map(Value::I32).map_err(err),
            _ => text.parse::<i64>().map(Value::I64).map_err(err),
        }
    }
}

/// Floating point, single (`f32`) or double (`f64`) precision
#[derive(Debug, Clone, Copy)]
pub struct FloatFormat {
    double: bool,
}

impl FloatFormat {
    pub fn single() -> Self {
        Self { double: false }
    }

    pub fn double() -> Self {
        Self { double: true }
    }
}

impl ValueFormat for FloatFormat {
    fn encode(&self, value: &Value) -> FormatResult<String> {
        match (self.double, value) {
            (false, Value::F32(v)) => Ok(v.to_string()),
            (true, Value::F64(v)) => Ok(v.to_string()),
            (double, other) => Err(FormatError::mismatch(
                if double { "f64" } else { "f32" },
                other.kind(),
            )),
        }
    }

    fn decode(&self, text: &str) -> FormatResult<Value> {
        if self.double {
            text.parse::<f64>()
                .map(Value::F64)
                .map_err(|e| FormatError::parse("f64", text, 0, e.to_string()))
        } else {
            text.parse::<f32>()
                .map(Value::F32)
                .map_err(|e| FormatError::parse("f32", text, 0, e.to_string()))
        }
    }
}

/// Enum values rendered by variant name
#[derive(Debug, Clone)]
pub struct EnumFormat {
    variants: Vec<String>,
}

impl EnumFormat {
    pub fn new(variants: Vec<String>) -> Self {
        Self { variants }
    }
}

impl ValueFormat for EnumFormat {
    fn encode(&self, value: &Value) -> FormatResult<String> {
        match value {
            Value::Enum(name) if self.variants.contains(name) => Ok(name.clone()),
            Value::Enum(name) => Err(FormatError::mismatch(
                format!("enum<{}>", self.variants.join("|")),
                name,
            )),
            other => Err(FormatError::mismatch("enum", other.kind())),
        }
    }

    fn decode(&self, text: &str) -> FormatResult<Value> {
        self.variants
            .iter()
            .find(|v| v.as_str() == text)
            .map(|v| Value::Enum(v.clone()))
            .ok_or_else(|| FormatError::parse("enum", text, 0, "unknown variant"))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DurationFormat;

impl ValueFormat for DurationFormat {
    fn encode(&self, value: &Value) -> FormatResult<String> {
        let d = match value {
            Value::Duration(d) => d,
            other => return Err(FormatError::mismatch("duration", other.kind())),
        };
        let nanos = d.subsec_nanos();
        if nanos == 0 {
            return Ok(format!("{}s", d.as_secs()));
        }
        let frac = format!("{:09}", nanos);
        Ok(format!("{}.{}s", d.as_secs(), frac.trim_end_matches('0')))
    }

    fn decode(&self, text: &str) -> FormatResult<Value> {
        let body = text
            .strip_suffix('s')
            .ok_or_else(|| FormatError::parse("duration", text, text.len(), "missing 's' suffix"))?;
        let (secs, frac) = match body.split_once('.') {
            Some((secs, frac)) => (secs, frac),
            None => (body, ""),
        };
        if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FormatError::parse("duration", text, 0, "bad seconds"));
        }
        let secs: u64 = secs
            .parse()
            .map_err(|e: std::num::ParseIntError| FormatError::parse("duration", text, 0, e.to_string()))?;
        if frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            let offset = body.len() - frac.len();
            return Err(FormatError::parse("duration", text, offset, "bad fraction"));
        }
        let mut nanos: u32 = 0;
        for b in frac.bytes().chain(std::iter::repeat(b'0')).take(9) {
            nanos = nanos * 10 + u32::from(b - b'0');
        }
        Ok(Value::Duration(Duration::new(secs, nanos)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InstantFormat;

impl ValueFormat for InstantFormat {
    fn encode(&self, value: &Value) -> FormatResult<String> {
        match value {
            Value::Instant(t) => Ok(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            other => Err(FormatError::mismatch("instant", other.kind())),
        }
    }

    fn decode(&self, text: &str) -> FormatResult<Value> {
        DateTime::parse_from_rfc3339(text)
            .map(|t| Value::Instant(t.with_timezone(&Utc)))
            .map_err(|e| FormatError::parse("instant", text, 0, e.to_string()))
    }
}

/// Lists of a primitive element type
#[derive(Debug, Clone)]
pub struct ListFormat {
    element: Arc<dyn ValueFormat>,
}

impl ListFormat {
    pub fn new(element: Arc<dyn ValueFormat>) -> Self {
        Self { element }
    }
}

impl ValueFormat for ListFormat {
    fn encode(&self, value: &Value) -> FormatResult<String> {
        let items = match value {
            Value::List(items) => items,
            other => return Err(FormatError::mismatch("list", other.kind())),
        };
        let mut out = String::new();
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            for c in self.element.encode(item)?.chars() {
                if c == ',' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
        }
        // A lone escape marks one empty element, which would otherwise
        // read back as the empty list.
        if out.is_empty() && !items.is_empty() {
            out.push('\\');
        }
        Ok(out)
    }

    fn decode(&self, text: &str) -> FormatResult<Value> {
        if text.is_empty() {
            return Ok(Value::List(Vec::new()));
        }
        if text == "\\" {
            return Ok(Value::List(vec![self.decode_element(text, 0, "")?]));
        }
        let mut items = Vec::new();
        let mut current = String::new();
        let mut start = 0;
        let mut chars = text.char_indices();
        while let Some((offset, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => current.push(escaped),
                    None => return Err(FormatError::parse("list", text, offset, "dangling escape")),
                },
                ',' => {
                    items.push(self.decode_element(text, start, &current)?);
                    current.clear();
                    start = offset + 1;
                }
                c => current.push(c),
            }
        }
        items.push(self.decode_element(text, start, &current)?);
        Ok(Value::List(items))
    }
}

impl ListFormat {
    fn decode_element(&self, text: &str, start: usize, element: &str) -> FormatResult<Value> {
        self.element.decode(element).map_err(|e| match e {
            FormatError::Parse {
                type_name,
                offset,
                reason,
                ..
            } => FormatError::Parse {
                type_name: format!("list<{}>", type_name),
                text: text.to_string(),
                offset: start + offset,
                reason,
            },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_int_widths() {
        let i8f = IntFormat::new(8);
        assert_eq!(i8f.decode("-128").unwrap(), Value::I8(-128));
        assert!(i8f.decode("128").is_err());
        assert_eq!(IntFormat::new(64).encode(&Value::I64(-5)).unwrap(), "-5");
        assert!(IntFormat::new(64).encode(&Value::I32(5)).is_err());
    }

    #[test]
    fn test_floats_round_trip_text() {
        let f = FloatFormat::double();
        assert_eq!(f.encode(&Value::F64(0.1)).unwrap(), "0.1");
        assert_eq!(f.decode("0.1").unwrap(), Value::F64(0.1));
        assert_eq!(FloatFormat::single().decode("1.5").unwrap(), Value::F32(1.5));
    }

    #[test]
    fn test_bool_ignores_case() {
        assert_eq!(BoolFormat.decode("TRUE").unwrap(), Value::Bool(true));
        assert!(BoolFormat.decode("yes").is_err());
    }

    #[test]
    fn test_duration() {
        let d = Value::Duration(Duration::new(90, 500_000_000));
        assert_eq!(DurationFormat.encode(&d).unwrap(), "90.5s");
        assert_eq!(DurationFormat.decode("90.5s").unwrap(), d);
        assert_eq!(
            DurationFormat.decode("3s").unwrap(),
            Value::Duration(Duration::from_secs(3))
        );
        assert!(DurationFormat.decode("3").is_err());
        assert!(DurationFormat.decode("x.1s").is_err());
    }

    #[test]
    fn test_instant_is_utc_rfc3339() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let text = InstantFormat.encode(&Value::Instant(t)).unwrap();
        assert_eq!(text, "2024-03-01T12:30:00Z");
        assert_eq!(InstantFormat.decode(&text).unwrap(), Value::Instant(t));
    }

    #[test]
    fn test_enum() {
        let f = EnumFormat::new(vec!["Red".into(), "Green".into()]);
        assert_eq!(f.decode("Green").unwrap(), Value::Enum("Green".into()));
        assert!(f.decode("green").is_err());
        assert!(f.encode(&Value::Enum("Blue".into())).is_err());
    }

    #[test]
    fn test_list_escapes_commas_in_elements() {
        let f = ListFormat::new(Arc::new(StringFormat));
        let value = Value::List(vec![Value::from("a,b"), Value::from("c\\")]);
        let text = f.encode(&value).unwrap();
        assert_eq!(text, "a\\,b,c\\\\");
        assert_eq!(f.decode(&text).unwrap(), value);
    }

    #[test]
    fn test_list_error_offset_points_at_element() {
        let f = ListFormat::new(Arc::new(IntFormat::new(32)));
        let err = f.decode("1,2,x").unwrap_err();
        assert_eq!(err.offset(), 4);
        assert_eq!(f.decode("").unwrap(), Value::List(vec![]));
    }

    #[test]
    fn test_list_of_one_empty_element() {
        let f = ListFormat::new(Arc::new(StringFormat));
        let one = Value::List(vec![Value::from("")]);
        assert_eq!(f.encode(&one).unwrap(), "\\");
        assert_eq!(f.decode("\\").unwrap(), one);
        assert_eq!(f.encode(&Value::List(vec![])).unwrap(), "");

        let two = Value::List(vec![Value::from(""), Value::from("")]);
        assert_eq!(f.decode(&f.encode(&two).unwrap()).unwrap(), two);
        let backslash = Value::List(vec![Value::from("\\")]);
        assert_eq!(f.decode(&f.encode(&backslash).unwrap()).unwrap(), backslash);
    }
}
