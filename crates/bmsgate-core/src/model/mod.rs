// ── Trait models ──
//
// The normalized values drivers publish. Every model is a `Message` so it
// can live in a cell; enum fields serialize as their integer value.

mod air_temperature;
mod meter;
mod open_close;

pub use air_temperature::{AirTemperature, AirTemperatureMode};
pub use meter::{MeterReading, stamp_end_time};
pub use open_close::{OpenClosePosition, OpenCloseState};

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::Message;
use crate::clock::Clock;
use crate::store::CellOptions;

/// Trait-facing type of one model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int64,
    Float32,
    String,
    Enum,
    Timestamp,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int64 | Self::Float32)
    }
}

/// A model type with field introspection, served under one [`TraitKind`].
pub trait TraitModel: Message {
    const KIND: TraitKind;

    /// Top-level fields and their types, in declaration order.
    const FIELDS: &'static [(&'static str, FieldType)];

    /// Name to number table for an enum field.
    fn enum_values(field: &str) -> Option<HashMap<String, i32>>;

    /// Options for cells holding this model.
    fn cell_options(clock: Arc<dyn Clock>) -> CellOptions<Self> {
        CellOptions::new().with_clock(clock)
    }
}

/// The trait kinds this gateway can serve.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TraitKind {
    AirTemperature,
    Meter,
    OpenClose,
}

impl TraitKind {
    pub fn field_names(self) -> Vec<&'static str> {
        self.fields().iter().map(|(name, _)| *name).collect()
    }

    pub fn field_type(self, field: &str) -> Option<FieldType> {
        self.fields()
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, ty)| *ty)
    }

    pub fn enum_values(self, field: &str) -> Option<HashMap<String, i32>> {
        match self {
            Self::AirTemperature => AirTemperature::enum_values(field),
            Self::Meter => MeterReading::enum_values(field),
            Self::OpenClose => OpenClosePosition::enum_values(field),
        }
    }

    fn fields(self) -> &'static [(&'static str, FieldType)] {
        match self {
            Self::AirTemperature => AirTemperature::FIELDS,
            Self::Meter => MeterReading::FIELDS,
            Self::OpenClose => OpenClosePosition::FIELDS,
        }
    }
}

/// Name to number table for a strum-iterable `i32` enum.
pub(crate) fn enum_table<E>() -> HashMap<String, i32>
where
    E: strum::IntoEnumIterator + AsRef<str> + Into<i32>,
{
    E::iter()
        .map(|value| (value.as_ref().to_owned(), value.into()))
        .collect()
}

/// Implements the `i32` conversions behind `#[serde(into, try_from)]`.
macro_rules! int_enum {
    ($name:ident) => {
        impl From<$name> for i32 {
            fn from(value: $name) -> Self {
                value as i32
            }
        }

        impl TryFrom<i32> for $name {
            type Error = String;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                Self::from_repr(value)
                    .ok_or_else(|| format!("{value} is not a valid {}", stringify!($name)))
            }
        }
    };
}
pub(crate) use int_enum;
