// ── Fault check ──

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::registry::RegistryInner;
use super::types::{
    CheckDefinition, Fault, HealthCheck, Normality, RecordTimePolicy, Reliability,
};
use crate::clock::Clock;
use crate::store::{CellOptions, ChangeStream, PullOptions, TypedCell};

/// A registered health check: a code-keyed fault set plus reliability.
///
/// Cheap to clone; all clones refer to the same check. Once disposed, every
/// mutation is ignored.
#[derive(Clone)]
pub struct FaultCheck {
    pub(crate) inner: Arc<CheckInner>,
}

pub(crate) struct CheckInner {
    id: String,
    owner: String,
    definition: CheckDefinition,
    clock: Arc<dyn Clock>,
    status: TypedCell<HealthCheck>,
    registry: Weak<RegistryInner>,
    disposed: AtomicBool,
}

impl FaultCheck {
    pub(crate) fn new(
        id: String,
        owner: String,
        definition: CheckDefinition,
        clock: Arc<dyn Clock>,
        registry: Weak<RegistryInner>,
    ) -> Self {
        let initial = HealthCheck {
            id: id.clone(),
            owner: owner.clone(),
            display_name: definition.display_name.clone(),
            description: definition.description.clone(),
            occupant_impact: definition.occupant_impact,
            equipment_impact: definition.equipment_impact,
            ..HealthCheck::default()
        };
        let status =
            TypedCell::with_options(initial, CellOptions::new().with_clock(Arc::clone(&clock)));
        Self {
            inner: Arc::new(CheckInner {
                id,
                owner,
                definition,
                clock,
                status,
                registry,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Composite `owner:check` id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    pub fn definition(&self) -> &CheckDefinition {
        &self.inner.definition
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Insert a fault, or update the fault with the same code in place.
    ///
    /// An existing fault keeps its `first_seen_time`; its `update_time`
    /// follows the check's [`RecordTimePolicy`].
    pub fn add_or_update_fault(&self, fault: Fault) {
        let policy = self.inner.definition.record_time_policy;
        self.mutate(|status, now| {
            match status.faults.iter_mut().find(|f| f.code == fault.code) {
                Some(existing) => {
                    let touch = match policy {
                        RecordTimePolicy::OnContentChange => !existing.same_content(&fault),
                        RecordTimePolicy::KeepWhileSameSeverity => {
                            existing.severity != fault.severity
                        }
                    };
                    existing.summary_text = fault.summary_text;
                    existing.details_text = fault.details_text;
                    existing.severity = fault.severity;
                    if touch {
                        existing.update_time = now;
                    }
                }
                None => {
                    debug!(check = %self.inner.id, code = %fault.code, "fault raised");
                    status.faults.push(Fault {
                        first_seen_time: now,
                        update_time: now,
                        ..fault
                    });
                }
            }
        });
    }

    /// Remove the fault with this code. Missing codes are a no-op.
    pub fn remove_fault(&self, code: impl AsRef<str>) {
        let code = code.as_ref();
        self.mutate(|status, _| {
            status.faults.retain(|f| f.code != code);
        });
    }

    pub fn clear_faults(&self) {
        self.mutate(|status, _| status.faults.clear());
    }

    /// Record connectivity state. Never raises or clears faults by itself.
    pub fn update_reliability(&self, reliability: Reliability) {
        self.mutate(|status, now| {
            if status.reliability != reliability {
                status.reliability = reliability;
                status.reliability_change_time = Some(now);
            }
        });
    }

    fn mutate(&self, f: impl FnOnce(&mut HealthCheck, DateTime<Utc>)) {
        if self.is_disposed() {
            return;
        }
        let now = self.inner.clock.now();
        let result = self.inner.status.modify(|status| {
            // Re-checked under the cell lock: dispose may have won the race.
            if self.is_disposed() {
                return Ok(());
            }
            f(status, now);
            status.refresh_normality(now);
            Ok(())
        });
        if let Err(error) = result {
            warn!(check = %self.inner.id, %error, "failed to update check status");
        }
    }

    /// Remove the check from its registry and reset reliability to unknown.
    /// Status streams end. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let now = self.inner.clock.now();
        let result = self.inner.status.modify(|status| {
            if status.reliability != Reliability::default() {
                status.reliability = Reliability::default();
                status.reliability_change_time = Some(now);
            }
            Ok(())
        });
        if let Err(error) = result {
            warn!(check = %self.inner.id, %error, "failed to reset check reliability");
        }
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.release(self);
        }
        self.inner.status.close();
        debug!(check = %self.inner.id, "fault check disposed");
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn status(&self) -> HealthCheck {
        self.inner.status.get()
    }

    pub fn normality(&self) -> Normality {
        self.status().normality
    }

    pub fn reliability(&self) -> Reliability {
        self.status().reliability
    }

    pub fn faults(&self) -> Vec<Fault> {
        self.status().faults
    }

    /// Stream status changes. Ends when the check is disposed.
    pub fn pull(&self, cancel: CancellationToken, opts: PullOptions) -> ChangeStream<HealthCheck> {
        self.inner.status.pull(cancel, opts)
    }

    pub(crate) fn same_check(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for FaultCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultCheck")
            .field("id", &self.inner.id)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
