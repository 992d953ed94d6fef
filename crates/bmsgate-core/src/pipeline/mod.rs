// ── Value pipeline ──
//
// Raw protocol events in, trait field updates out. Conversion and read
// failures are recorded as faults on the owning check and never propagate
// past the point that produced them.

mod convert;
mod value;

pub use convert::{Converter, EnumPoint, NumericPoint, PointConfig, PointKind};
pub use value::{FieldValue, RawValue};

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CoreError;
use crate::health::{Fault, FaultCheck, FaultSeverity, Reliability, ReliabilityState};
use crate::store::ErasedCell;

const READ_ERROR: &str = "read-error";
const CONVERSION_ERROR: &str = "conversion-error";

/// What happened to one raw event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleOutcome {
    /// Bindings whose point id matched.
    pub matched: usize,
    /// Bindings whose field was written.
    pub applied: usize,
    /// Bindings that failed to convert or write.
    pub failed: usize,
}

struct Binding {
    config: PointConfig,
    cell: Arc<dyn ErasedCell>,
    check: Option<FaultCheck>,
}

/// Routes raw point values to trait fields.
///
/// One pipeline may feed cells of several trait types; bindings address
/// cells through [`ErasedCell`].
#[derive(Default)]
pub struct ValuePipeline {
    bindings: Vec<Binding>,
}

impl ValuePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a point to a field of `cell`. Failures for this point are
    /// recorded on `check` when one is given.
    pub fn add_binding(
        &mut self,
        config: PointConfig,
        cell: Arc<dyn ErasedCell>,
        check: Option<FaultCheck>,
    ) -> Result<(), CoreError> {
        if config.point_id.is_empty() {
            return Err(CoreError::invalid("point id must not be empty"));
        }
        if config.field.is_empty() {
            return Err(CoreError::invalid(format!(
                "point '{}' has no target field",
                config.point_id
            )));
        }
        self.bindings.push(Binding {
            config,
            cell,
            check,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Distinct point ids, in binding order.
    pub fn point_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for binding in &self.bindings {
            if !ids.contains(&binding.config.point_id.as_str()) {
                ids.push(&binding.config.point_id);
            }
        }
        ids
    }

    fn matching<'a>(&'a self, point_id: &'a str) -> impl Iterator<Item = &'a Binding> + 'a {
        self.bindings
            .iter()
            .filter(move |binding| binding.config.point_id == point_id)
    }

    /// Convert `raw` for every binding of `point_id` and merge the result
    /// into the bound field. A point with no binding is ignored.
    pub fn handle_event(&self, point_id: &str, raw: &RawValue) -> HandleOutcome {
        let mut outcome = HandleOutcome::default();
        for binding in self.matching(point_id) {
            outcome.matched += 1;
            let field = &binding.config.field;

            let value = match binding.config.kind.convert(raw) {
                Ok(value) => value,
                Err(error) => {
                    outcome.failed += 1;
                    debug!(point = point_id, field = %field, %error, "dropping unconvertible value");
                    record_failure(binding, CONVERSION_ERROR, "Point value could not be converted", &error);
                    continue;
                }
            };

            match binding.cell.write_field(field, value.to_json()) {
                Ok(_) => {
                    outcome.applied += 1;
                    if let Some(check) = &binding.check {
                        check.remove_fault(fault_code(READ_ERROR, point_id));
                        check.remove_fault(fault_code(CONVERSION_ERROR, point_id));
                        refresh_reliability(check);
                    }
                }
                Err(error) => {
                    outcome.failed += 1;
                    warn!(point = point_id, field = %field, %error, "failed to apply point value");
                    record_failure(binding, CONVERSION_ERROR, "Point value could not be applied", &error);
                }
            }
        }
        outcome
    }

    /// Record a failed read of `point_id`. The bound fields keep their last
    /// known good value. Returns how many bindings were affected.
    pub fn handle_read_error(&self, point_id: &str, error: &dyn fmt::Display) -> usize {
        let mut affected = 0;
        for binding in self.matching(point_id) {
            affected += 1;
            record_failure(binding, READ_ERROR, "Point could not be read", error);
            if let Some(check) = &binding.check {
                check.update_reliability(
                    Reliability::new(ReliabilityState::BadResponse).with_error(error.to_string()),
                );
            }
        }
        if affected > 0 {
            debug!(point = point_id, %error, "point read failed");
        }
        affected
    }

    /// Map a trait value back to the raw value to write to `point_id`.
    pub fn encode_write(&self, point_id: &str, value: &FieldValue) -> Result<RawValue, CoreError> {
        let binding = self
            .matching(point_id)
            .next()
            .ok_or_else(|| CoreError::not_found("point", point_id))?;
        binding.config.kind.encode(value)
    }
}

impl fmt::Debug for ValuePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValuePipeline")
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

fn fault_code(kind: &str, point_id: &str) -> String {
    format!("{kind}:{point_id}")
}

/// Report the check as reachable once no point on it has an outstanding
/// read error.
fn refresh_reliability(check: &FaultCheck) {
    let prefix = format!("{READ_ERROR}:");
    if !check.faults().iter().any(|fault| fault.code.starts_with(&prefix)) {
        check.update_reliability(Reliability::ok());
    }
}

fn record_failure(binding: &Binding, kind: &str, summary: &str, error: &dyn fmt::Display) {
    if let Some(check) = &binding.check {
        check.add_or_update_fault(
            Fault::new(fault_code(kind, &binding.config.point_id), summary)
                .with_details(error.to_string())
                .with_severity(FaultSeverity::Warning),
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::health::{CheckDefinition, FaultRegistry, Normality};
    use crate::model::{OpenClosePosition, OpenCloseState};
    use crate::store::{TypedCell, WriteOptions};
    use std::collections::HashMap;

    fn door_point() -> PointConfig {
        PointConfig {
            point_id: "bv-1".into(),
            field: "state".into(),
            kind: PointKind::Enum(EnumPoint {
                device_map: HashMap::from([("1".to_owned(), "OPEN".to_owned())]),
                trait_values: HashMap::from([("OPEN".to_owned(), 2)]),
            }),
        }
    }

    fn setup() -> (ValuePipeline, Arc<TypedCell<OpenClosePosition>>, FaultCheck) {
        let registry = FaultRegistry::new();
        let check = registry
            .new_fault_check("door-1", CheckDefinition::new("points"))
            .unwrap();
        let cell = Arc::new(TypedCell::new(OpenClosePosition::default()));
        let mut pipeline = ValuePipeline::new();
        pipeline
            .add_binding(door_point(), cell.clone(), Some(check.clone()))
            .unwrap();
        pipeline
            .add_binding(
                PointConfig {
                    point_id: "av-2".into(),
                    field: "open_percent".into(),
                    kind: PointKind::Float32(NumericPoint::default()),
                },
                cell.clone(),
                Some(check.clone()),
            )
            .unwrap();
        (pipeline, cell, check)
    }

    #[test]
    fn enum_event_updates_only_its_field() {
        let (pipeline, cell, _) = setup();
        cell.set(
            OpenClosePosition {
                open_percent: 40.0,
                ..OpenClosePosition::default()
            },
            &WriteOptions::new(),
        )
        .unwrap();

        let outcome = pipeline.handle_event("bv-1", &RawValue::U8(1));
        assert_eq!(outcome, HandleOutcome { matched: 1, applied: 1, failed: 0 });

        let value = cell.get();
        assert_eq!(value.state, OpenCloseState::Open);
        assert!((value.open_percent - 40.0).abs() < f32::EPSILON);
    }

    #[test]
    fn unknown_enum_raises_fault_and_keeps_value() {
        let (pipeline, cell, check) = setup();
        let before = cell.get();

        let outcome = pipeline.handle_event("bv-1", &RawValue::U8(9));
        assert_eq!(outcome.failed, 1);
        assert_eq!(cell.get(), before);

        let faults = check.faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].code, "conversion-error:bv-1");
        assert_eq!(check.normality(), Normality::Abnormal);
    }

    #[test]
    fn success_clears_point_faults() {
        let (pipeline, _, check) = setup();
        pipeline.handle_read_error("bv-1", &"timeout");
        assert_eq!(check.reliability().state, ReliabilityState::BadResponse);
        pipeline.handle_event("bv-1", &RawValue::U8(9));
        assert_eq!(check.faults().len(), 2);

        pipeline.handle_event("bv-1", &RawValue::U8(1));
        assert!(check.faults().is_empty());
        assert_eq!(check.reliability().state, ReliabilityState::Ok);
    }

    #[test]
    fn reliability_waits_for_every_point_to_recover() {
        let (pipeline, _, check) = setup();
        pipeline.handle_read_error("bv-1", &"timeout");

        pipeline.handle_event("av-2", &RawValue::F32(55.0));
        assert_eq!(check.reliability().state, ReliabilityState::BadResponse);
        assert_eq!(check.faults()[0].code, "read-error:bv-1");

        pipeline.handle_event("bv-1", &RawValue::U8(1));
        assert_eq!(check.reliability().state, ReliabilityState::Ok);
        assert!(check.faults().is_empty());
    }

    #[test]
    fn unbound_points_are_ignored() {
        let (pipeline, _, check) = setup();
        assert_eq!(pipeline.handle_event("nope", &RawValue::U8(1)), HandleOutcome::default());
        assert_eq!(pipeline.handle_read_error("nope", &"x"), 0);
        assert!(check.faults().is_empty());
    }

    #[test]
    fn encode_write_uses_point_converter() {
        let (pipeline, _, _) = setup();
        assert_eq!(
            pipeline.encode_write("bv-1", &FieldValue::Enum(2)).unwrap(),
            RawValue::I64(1)
        );
        assert!(matches!(
            pipeline.encode_write("zz", &FieldValue::Enum(2)),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn rejects_empty_bindings() {
        let mut pipeline = ValuePipeline::new();
        let cell = Arc::new(TypedCell::new(OpenClosePosition::default()));
        let mut point = door_point();
        point.point_id.clear();
        assert!(pipeline.add_binding(point, cell, None).is_err());
        assert_eq!(pipeline.point_ids(), Vec::<&str>::new());
    }
}
