use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, FromRepr};

use super::{FieldType, TraitKind, TraitModel, enum_table, int_enum};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumIter, FromRepr,
)]
#[serde(into = "i32", try_from = "i32")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum OpenCloseState {
    #[default]
    DirectionUnspecified = 0,
    Closed = 1,
    Open = 2,
    Opening = 3,
    Closing = 4,
    Stuck = 5,
}

int_enum!(OpenCloseState);

/// Position of a door, damper or valve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenClosePosition {
    /// 0 is fully closed, 100 fully open.
    pub open_percent: f32,
    pub state: OpenCloseState,
    pub label: String,
}

impl TraitModel for OpenClosePosition {
    const KIND: TraitKind = TraitKind::OpenClose;

    const FIELDS: &'static [(&'static str, FieldType)] = &[
        ("open_percent", FieldType::Float32),
        ("state", FieldType::Enum),
        ("label", FieldType::String),
    ];

    fn enum_values(field: &str) -> Option<HashMap<String, i32>> {
        (field == "state").then(enum_table::<OpenCloseState>)
    }
}
