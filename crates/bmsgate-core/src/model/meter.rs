use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FieldType, TraitKind, TraitModel};
use crate::clock::Clock;
use crate::equivalence::Equivalence;
use crate::store::CellOptions;

/// Accumulated energy or resource usage over a reading window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterReading {
    pub usage: f32,
    pub produced: f32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl MeterReading {
    /// Ignoring the reading window, do both readings carry the same values?
    pub fn same_reading(&self, other: &Self, eps: f64) -> bool {
        (f64::from(self.usage) - f64::from(other.usage)).abs() <= eps
            && (f64::from(self.produced) - f64::from(other.produced)).abs() <= eps
    }
}

impl TraitModel for MeterReading {
    const KIND: TraitKind = TraitKind::Meter;

    const FIELDS: &'static [(&'static str, FieldType)] = &[
        ("usage", FieldType::Float32),
        ("produced", FieldType::Float32),
        ("start_time", FieldType::Timestamp),
        ("end_time", FieldType::Timestamp),
    ];

    fn enum_values(_field: &str) -> Option<HashMap<String, i32>> {
        None
    }

    /// Float-tolerant cells that stamp the reading window on every real change.
    fn cell_options(clock: Arc<dyn Clock>) -> CellOptions<Self> {
        CellOptions::new()
            .with_equivalence(Equivalence::tolerant())
            .with_interceptor(stamp_end_time(Arc::clone(&clock)))
            .with_clock(clock)
    }
}

/// Write hook keeping `start_time` from the first reading and moving
/// `end_time` to now whenever usage or production actually changed.
pub fn stamp_end_time(
    clock: Arc<dyn Clock>,
) -> impl Fn(&MeterReading, &mut MeterReading) -> Result<(), crate::CoreError> + Send + Sync + 'static
{
    move |old, merged| {
        if old.same_reading(merged, crate::DEFAULT_FLOAT_TOLERANCE) {
            merged.start_time = old.start_time;
            merged.end_time = old.end_time;
            return Ok(());
        }
        let now = clock.now();
        merged.start_time = old.start_time.or(merged.start_time).or(Some(now));
        merged.end_time = Some(now);
        Ok(())
    }
}
