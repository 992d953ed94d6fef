use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, FromRepr};

use super::{FieldType, TraitKind, TraitModel, enum_table, int_enum};

/// HVAC operating mode.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumIter, FromRepr,
)]
#[serde(into = "i32", try_from = "i32")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum AirTemperatureMode {
    #[default]
    ModeUnspecified = 0,
    On = 1,
    Off = 2,
    Heat = 3,
    Cool = 4,
    HeatCool = 5,
    Auto = 6,
    FanOnly = 7,
    Eco = 8,
    Purge = 9,
    Dry = 10,
}

int_enum!(AirTemperatureMode);

/// Zone air temperature, set point and mode. Temperatures in degrees Celsius.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AirTemperature {
    pub ambient_temperature: f32,
    pub temperature_set_point: f32,
    pub ambient_humidity: f32,
    pub mode: AirTemperatureMode,
}

impl TraitModel for AirTemperature {
    const KIND: TraitKind = TraitKind::AirTemperature;

    const FIELDS: &'static [(&'static str, FieldType)] = &[
        ("ambient_temperature", FieldType::Float32),
        ("temperature_set_point", FieldType::Float32),
        ("ambient_humidity", FieldType::Float32),
        ("mode", FieldType::Enum),
    ];

    fn enum_values(field: &str) -> Option<HashMap<String, i32>> {
        (field == "mode").then(enum_table::<AirTemperatureMode>)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mode_serializes_as_integer() {
        let value = AirTemperature {
            mode: AirTemperatureMode::Cool,
            ..AirTemperature::default()
        };
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["mode"], json!(4));

        let back: AirTemperature = serde_json::from_value(json).unwrap();
        assert_eq!(back.mode, AirTemperatureMode::Cool);
    }

    #[test]
    fn unknown_mode_number_is_rejected() {
        let result: Result<AirTemperature, _> = serde_json::from_value(json!({ "mode": 99 }));
        assert!(result.is_err());
    }
}
