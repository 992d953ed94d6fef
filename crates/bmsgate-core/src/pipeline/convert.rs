// ── Point conversion ──
//
// One converter per point kind, selected by the `PointKind` tag. Reads
// multiply by the scale; writes divide by it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::value::{FieldValue, RawValue};
use crate::error::CoreError;

/// Converts between a protocol's raw values and a trait field.
pub trait Converter {
    fn convert(&self, raw: &RawValue) -> Result<FieldValue, CoreError>;

    /// Reverse mapping for writes to the device.
    fn encode(&self, value: &FieldValue) -> Result<RawValue, CoreError>;
}

/// Numeric target settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericPoint {
    pub scale: Option<f64>,
}

impl NumericPoint {
    pub fn scaled(scale: f64) -> Self {
        Self { scale: Some(scale) }
    }

    /// The scale if it changes anything: zero and one are ignored.
    #[allow(clippy::float_cmp)]
    fn factor(&self) -> Option<f64> {
        self.scale.filter(|s| *s != 0.0 && *s != 1.0)
    }
}

/// Two-step enum lookup: device value to symbolic name, name to trait number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumPoint {
    /// Device raw value (as a string) to symbolic name. Empty means the device
    /// already speaks trait names or numbers.
    pub device_map: HashMap<String, String>,
    /// Trait enum name to number.
    pub trait_values: HashMap<String, i32>,
}

/// Tagged point configuration; the tag picks the converter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PointKind {
    Int64(NumericPoint),
    Float32(NumericPoint),
    String,
    Enum(EnumPoint),
}

impl PointKind {
    pub fn target_name(&self) -> &'static str {
        match self {
            Self::Int64(_) => "int64",
            Self::Float32(_) => "float32",
            Self::String => "string",
            Self::Enum(_) => "enum",
        }
    }
}

/// Binds one raw point to one trait field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointConfig {
    pub point_id: String,
    /// Dotted path of the trait field written by this point.
    pub field: String,
    pub kind: PointKind,
}

impl Converter for PointKind {
    fn convert(&self, raw: &RawValue) -> Result<FieldValue, CoreError> {
        match self {
            Self::Int64(point) => to_int64(raw, point.factor()).map(FieldValue::Int64),
            Self::Float32(point) => to_float32(raw, point.factor()).map(FieldValue::Float32),
            Self::String => Ok(FieldValue::String(raw.to_string())),
            Self::Enum(point) => point.convert(raw),
        }
    }

    fn encode(&self, value: &FieldValue) -> Result<RawValue, CoreError> {
        match (self, value) {
            (Self::Int64(point), FieldValue::Int64(v)) => Ok(match point.factor() {
                #[allow(clippy::cast_precision_loss)]
                Some(scale) => RawValue::F64(*v as f64 / scale),
                None => RawValue::I64(*v),
            }),
            (Self::Float32(point), FieldValue::Float32(v)) => Ok(match point.factor() {
                Some(scale) => RawValue::F64(f64::from(*v) / scale),
                None => RawValue::F32(*v),
            }),
            (Self::String, FieldValue::String(v)) => Ok(RawValue::String(v.clone())),
            (Self::Enum(point), value) => point.encode(value),
            (kind, value) => Err(CoreError::UnsupportedConversion {
                from: value.type_name(),
                to: kind.target_name(),
            }),
        }
    }
}

impl Converter for EnumPoint {
    fn convert(&self, raw: &RawValue) -> Result<FieldValue, CoreError> {
        if self.device_map.is_empty() {
            return self.convert_direct(raw);
        }
        let key = raw.enum_key();
        let name = self
            .device_map
            .get(&key)
            .ok_or(CoreError::UnknownEnumValue { value: key })?;
        self.trait_number(name).map(FieldValue::Enum)
    }

    fn encode(&self, value: &FieldValue) -> Result<RawValue, CoreError> {
        let number = match value {
            FieldValue::Enum(n) => *n,
            other => {
                return Err(CoreError::UnsupportedConversion {
                    from: other.type_name(),
                    to: "enum",
                });
            }
        };
        if self.device_map.is_empty() {
            return Ok(RawValue::I32(number));
        }
        let name = self
            .trait_values
            .iter()
            .find(|(_, n)| **n == number)
            .map(|(name, _)| name)
            .ok_or_else(|| CoreError::UnknownEnumValue {
                value: number.to_string(),
            })?;
        let key = self
            .device_map
            .iter()
            .filter(|(_, device_name)| *device_name == name)
            .map(|(key, _)| key)
            .min()
            .ok_or_else(|| CoreError::UnknownEnumValue {
                value: name.clone(),
            })?;
        Ok(key
            .parse::<i64>()
            .map_or_else(|_| RawValue::String(key.clone()), RawValue::I64))
    }
}

impl EnumPoint {
    fn trait_number(&self, name: &str) -> Result<i32, CoreError> {
        self.trait_values
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::UnknownEnumValue {
                value: name.to_owned(),
            })
    }

    /// No device table: strings are trait names, integers trait numbers.
    fn convert_direct(&self, raw: &RawValue) -> Result<FieldValue, CoreError> {
        if let RawValue::String(name) = raw {
            return self.trait_number(name).map(FieldValue::Enum);
        }
        let number = to_int64(raw, None)?;
        i32::try_from(number)
            .ok()
            .filter(|n| self.trait_values.values().any(|v| v == n))
            .map(FieldValue::Enum)
            .ok_or_else(|| CoreError::UnknownEnumValue {
                value: number.to_string(),
            })
    }
}

// ── Numeric conversion ───────────────────────────────────────────────

fn unsupported(raw: &RawValue, to: &'static str) -> CoreError {
    CoreError::UnsupportedConversion {
        from: raw.type_name(),
        to,
    }
}

fn out_of_range(value: impl ToString, target: &'static str) -> CoreError {
    CoreError::ValueOutOfRange {
        value: value.to_string(),
        target,
    }
}

/// Any numeric raw value as f64; bool and string never convert.
#[allow(clippy::cast_precision_loss)]
fn numeric(raw: &RawValue, to: &'static str) -> Result<f64, CoreError> {
    if let Some(v) = raw.as_small_int() {
        return Ok(v as f64);
    }
    match raw {
        RawValue::I64(v) => Ok(*v as f64),
        RawValue::U64(v) => Ok(*v as f64),
        RawValue::F32(_) | RawValue::F64(_) => Ok(raw.as_float().unwrap_or_default()),
        _ => Err(unsupported(raw, to)),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_int64(v: f64) -> Result<i64, CoreError> {
    if !v.is_finite() {
        return Err(out_of_range(v, "int64"));
    }
    let rounded = v.round();
    if rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
        return Err(out_of_range(v, "int64"));
    }
    Ok(rounded as i64)
}

fn to_int64(raw: &RawValue, scale: Option<f64>) -> Result<i64, CoreError> {
    if let Some(scale) = scale {
        return float_to_int64(numeric(raw, "int64")? * scale);
    }
    if let Some(v) = raw.as_small_int() {
        return Ok(v);
    }
    match raw {
        RawValue::I64(v) => Ok(*v),
        RawValue::U64(v) => i64::try_from(*v).map_err(|_| out_of_range(v, "int64")),
        RawValue::F32(_) | RawValue::F64(_) => float_to_int64(raw.as_float().unwrap_or_default()),
        _ => Err(unsupported(raw, "int64")),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_float32(raw: &RawValue, scale: Option<f64>) -> Result<f32, CoreError> {
    let mut v = numeric(raw, "float32")?;
    if let Some(scale) = scale {
        v *= scale;
    }
    if !v.is_finite() || v.abs() > f64::from(f32::MAX) {
        return Err(out_of_range(v, "float32"));
    }
    Ok(v as f32)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn float(scale: Option<f64>) -> PointKind {
        PointKind::Float32(NumericPoint { scale })
    }

    fn door_enum() -> EnumPoint {
        EnumPoint {
            device_map: HashMap::from([
                ("0".to_owned(), "CLOSED".to_owned()),
                ("1".to_owned(), "OPEN".to_owned()),
                ("7".to_owned(), "JAMMED".to_owned()),
            ]),
            trait_values: HashMap::from([("CLOSED".to_owned(), 1), ("OPEN".to_owned(), 2)]),
        }
    }

    #[test]
    fn scale_multiplies_on_read() {
        let got = float(Some(1000.0)).convert(&RawValue::F64(2.5)).unwrap();
        assert_eq!(got, FieldValue::Float32(2500.0));
    }

    #[test]
    fn scale_of_zero_or_one_is_ignored() {
        for scale in [Some(0.0), Some(1.0), None] {
            let got = float(scale).convert(&RawValue::F32(2.5)).unwrap();
            assert_eq!(got, FieldValue::Float32(2.5));
        }
    }

    #[test]
    fn scale_divides_on_write() {
        let raw = float(Some(1000.0)).encode(&FieldValue::Float32(2500.0)).unwrap();
        assert_eq!(raw, RawValue::F64(2.5));
    }

    #[test]
    fn small_ints_widen_to_both_numeric_targets() {
        let int = PointKind::Int64(NumericPoint::default());
        assert_eq!(int.convert(&RawValue::U32(u32::MAX)).unwrap(), FieldValue::Int64(4_294_967_295));
        assert_eq!(int.convert(&RawValue::I8(-3)).unwrap(), FieldValue::Int64(-3));
        assert_eq!(float(None).convert(&RawValue::I16(-40)).unwrap(), FieldValue::Float32(-40.0));
    }

    #[test]
    fn bool_and_string_never_become_numbers() {
        let int = PointKind::Int64(NumericPoint::default());
        for raw in [RawValue::Bool(true), RawValue::String("12".into())] {
            assert!(matches!(
                int.convert(&raw),
                Err(CoreError::UnsupportedConversion { to: "int64", .. })
            ));
            assert!(matches!(
                float(None).convert(&raw),
                Err(CoreError::UnsupportedConversion { to: "float32", .. })
            ));
        }
    }

    #[test]
    fn wide_and_float_values_check_range() {
        let int = PointKind::Int64(NumericPoint::default());
        assert!(matches!(
            int.convert(&RawValue::U64(u64::MAX)),
            Err(CoreError::ValueOutOfRange { .. })
        ));
        assert_eq!(int.convert(&RawValue::F64(2.6)).unwrap(), FieldValue::Int64(3));
        assert!(matches!(
            int.convert(&RawValue::F64(f64::NAN)),
            Err(CoreError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            float(None).convert(&RawValue::F64(1e300)),
            Err(CoreError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn enum_maps_through_device_and_trait_tables() {
        let point = door_enum();
        assert_eq!(point.convert(&RawValue::U8(1)).unwrap(), FieldValue::Enum(2));
        assert_eq!(point.convert(&RawValue::F32(0.0)).unwrap(), FieldValue::Enum(1));
    }

    #[test]
    fn enum_misses_are_unknown_values() {
        let point = door_enum();
        assert!(matches!(
            point.convert(&RawValue::I32(9)),
            Err(CoreError::UnknownEnumValue { value }) if value == "9"
        ));
        assert!(matches!(
            point.convert(&RawValue::I32(7)),
            Err(CoreError::UnknownEnumValue { value }) if value == "JAMMED"
        ));
    }

    #[test]
    fn enum_without_device_table_accepts_names_and_numbers() {
        let point = EnumPoint {
            device_map: HashMap::new(),
            ..door_enum()
        };
        assert_eq!(
            point.convert(&RawValue::String("OPEN".into())).unwrap(),
            FieldValue::Enum(2)
        );
        assert_eq!(point.convert(&RawValue::I64(1)).unwrap(), FieldValue::Enum(1));
        assert!(point.convert(&RawValue::I64(5)).is_err());
    }

    #[test]
    fn enum_encode_reverses_lookup() {
        let point = door_enum();
        assert_eq!(point.encode(&FieldValue::Enum(2)).unwrap(), RawValue::I64(1));
        assert!(point.encode(&FieldValue::Enum(42)).is_err());
        assert!(point.encode(&FieldValue::Float32(1.0)).is_err());
    }

    #[test]
    fn mismatched_encode_is_unsupported() {
        let err = PointKind::String.encode(&FieldValue::Int64(1)).unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedConversion { .. }));
    }
}
