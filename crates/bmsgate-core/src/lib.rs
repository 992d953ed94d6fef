//! Reactive state and health core shared by every bmsgate protocol driver.
//!
//! Drivers (BACnet, OPC UA, MQTT sensors, cloud device APIs) all build on
//! the same handful of primitives:
//!
//! - **[`TypedCell`]** — one typed value with get/set/pull semantics,
//!   field-mask aware partial reads and writes, and duplicate suppression
//!   governed by a per-cell [`Equivalence`].
//!
//! - **[`KeyedCellTable`]** — a registry of cells keyed by string, with
//!   create-on-demand updates and a merged, key-aware change stream.
//!
//! - **[`ChangeBroadcaster`]** — bounded per-subscriber mailboxes that fan
//!   one producer out to N consumers without gaps or cross-subscriber
//!   blocking; a subscriber that falls too far behind is disconnected.
//!
//! - **[`FaultRegistry`] / [`FaultCheck`]** — named health checks holding
//!   code-keyed faults plus a reliability classification.
//!
//! - **[`PollSupervisor`]** — runs a driver's poll/subscribe function only
//!   while consumers are attached, restarting with exponential backoff.
//!
//! - **[`ValuePipeline`]** — converts raw protocol values into trait fields
//!   (scale, enum maps) and records conversion/read failures as faults.

pub mod clock;
pub mod equivalence;
pub mod error;
pub mod health;
pub mod mask;
pub mod model;
pub mod pipeline;
pub mod poll;
pub mod service;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use clock::{Clock, ManualClock, SystemClock};
pub use equivalence::{DEFAULT_FLOAT_TOLERANCE, Equivalence};
pub use error::CoreError;
pub use health::{
    CheckDefinition, EquipmentImpact, Fault, FaultCheck, FaultRegistry, FaultSeverity,
    HealthCheck, Normality, OccupantImpact, RecordTimePolicy, Reliability, ReliabilityState,
};
pub use mask::FieldMask;
pub use model::{FieldType, TraitKind, TraitModel};
pub use pipeline::{
    Converter, EnumPoint, FieldValue, HandleOutcome, NumericPoint, PointConfig, PointKind,
    RawValue, ValuePipeline,
};
pub use poll::{BackoffConfig, BoxError, PollConfig, PollSupervisor, SupervisorState};
pub use service::{ModelServer, Register, TraitRouter, Unwrap};
pub use store::{
    CellOptions, Change, ChangeBroadcaster, ChangeStream, ChangeType, ErasedCell,
    KeyedCellTable, PullOptions, Subscription, TypedCell, WriteOptions,
};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Bound satisfied by every value a [`TypedCell`] can hold.
///
/// Field masks operate on the serde representation, so a message must
/// round-trip through `serde_json` and provide a `Default` to fill fields
/// a read mask leaves out.
pub trait Message:
    Clone + PartialEq + std::fmt::Debug + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Message for T where
    T: Clone
        + PartialEq
        + std::fmt::Debug
        + Default
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}
