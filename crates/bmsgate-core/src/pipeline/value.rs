// ── Raw and trait-facing values ──

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value as delivered by a protocol client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum RawValue {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
}

impl RawValue {
    /// Short type name used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::I8(_) => "int8",
            Self::I16(_) => "int16",
            Self::I32(_) => "int32",
            Self::I64(_) => "int64",
            Self::U8(_) => "uint8",
            Self::U16(_) => "uint16",
            Self::U32(_) => "uint32",
            Self::U64(_) => "uint64",
            Self::F32(_) => "float32",
            Self::F64(_) => "float64",
            Self::String(_) => "string",
        }
    }

    /// Integer payload for the 8 to 32 bit types, which widen losslessly.
    pub(crate) fn as_small_int(&self) -> Option<i64> {
        match *self {
            Self::I8(v) => Some(i64::from(v)),
            Self::I16(v) => Some(i64::from(v)),
            Self::I32(v) => Some(i64::from(v)),
            Self::U8(v) => Some(i64::from(v)),
            Self::U16(v) => Some(i64::from(v)),
            Self::U32(v) => Some(i64::from(v)),
            _ => None,
        }
    }

    pub(crate) fn as_float(&self) -> Option<f64> {
        match *self {
            Self::F32(v) => Some(f64::from(v)),
            Self::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Key used for device enum tables: integers in decimal, integral floats
    /// without a fractional part, strings verbatim.
    #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
    pub(crate) fn enum_key(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::F32(_) | Self::F64(_) => {
                let v = self.as_float().unwrap_or_default();
                if v.fract() == 0.0 && v.abs() < 9.0e15 {
                    (v as i64).to_string()
                } else {
                    v.to_string()
                }
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

/// A converted value in the trait's native type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Int64(i64),
    Float32(f32),
    String(String),
    /// Trait enum number.
    Enum(i32),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int64(_) => "int64",
            Self::Float32(_) => "float32",
            Self::String(_) => "string",
            Self::Enum(_) => "enum",
        }
    }

    /// JSON form merged into a model's serde representation.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Int64(v) => Value::from(*v),
            Self::Float32(v) => Value::from(f64::from(*v)),
            Self::String(v) => Value::from(v.as_str()),
            Self::Enum(v) => Value::from(*v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enum_keys_are_decimal() {
        assert_eq!(RawValue::U8(1).enum_key(), "1");
        assert_eq!(RawValue::F64(2.0).enum_key(), "2");
        assert_eq!(RawValue::F32(2.5).enum_key(), "2.5");
        assert_eq!(RawValue::String("OPEN".into()).enum_key(), "OPEN");
        assert_eq!(RawValue::Bool(true).enum_key(), "true");
    }

    #[test]
    fn field_values_become_json() {
        assert_eq!(FieldValue::Float32(2500.0).to_json(), json!(2500.0));
        assert_eq!(FieldValue::Enum(2).to_json(), json!(2));
        assert_eq!(FieldValue::Int64(-4).to_json(), json!(-4));
    }

    #[test]
    fn raw_values_deserialize_tagged() {
        let raw: RawValue = serde_json::from_value(json!({ "type": "u16", "value": 7 }))
            .unwrap_or(RawValue::Bool(false));
        assert_eq!(raw, RawValue::U16(7));
    }
}
