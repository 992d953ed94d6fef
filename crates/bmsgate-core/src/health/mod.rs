// ── Health and fault tracking ──
//
// A registry of named checks. Each check holds code-keyed faults (one per
// code, first-seen time preserved across updates), a derived normality and
// the last reported reliability.

mod check;
mod registry;
mod types;

pub use check::FaultCheck;
pub use registry::FaultRegistry;
pub use types::{
    CheckDefinition, EquipmentImpact, Fault, FaultSeverity, HealthCheck, Normality,
    OccupantImpact, RecordTimePolicy, Reliability, ReliabilityState,
};
