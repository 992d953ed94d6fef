// ── Fault registry ──

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::check::FaultCheck;
use super::types::{CheckDefinition, HealthCheck};
use crate::clock::{self, Clock};
use crate::error::CoreError;

/// The set of live health checks for one gateway or driver.
///
/// Constructed explicitly and handed to each driver; there is no global
/// registry. Clones share the same set of checks.
#[derive(Clone)]
pub struct FaultRegistry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    checks: Mutex<BTreeMap<String, FaultCheck>>,
    clock: Arc<dyn Clock>,
}

impl RegistryInner {
    /// Drop `check` if it still owns its id; a newer check registered under
    /// the same id is left alone.
    pub(crate) fn release(&self, check: &FaultCheck) {
        let mut checks = self.checks.lock();
        if checks
            .get(check.id())
            .is_some_and(|current| current.same_check(check))
        {
            checks.remove(check.id());
        }
    }
}

impl FaultRegistry {
    pub fn new() -> Self {
        Self::with_clock(clock::system())
    }

    /// Registry whose checks stamp fault and reliability times from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                checks: Mutex::new(BTreeMap::new()),
                clock,
            }),
        }
    }

    /// Register a check under `owner:definition.id`.
    pub fn new_fault_check(
        &self,
        owner: &str,
        definition: CheckDefinition,
    ) -> Result<FaultCheck, CoreError> {
        if owner.is_empty() {
            return Err(CoreError::invalid("check owner must not be empty"));
        }
        if definition.id.is_empty() {
            return Err(CoreError::invalid("check id must not be empty"));
        }
        let id = format!("{owner}:{}", definition.id);

        let mut checks = self.inner.checks.lock();
        if checks.contains_key(&id) {
            return Err(CoreError::already_exists("check", id));
        }
        let check = FaultCheck::new(
            id.clone(),
            owner.to_owned(),
            definition,
            Arc::clone(&self.inner.clock),
            Arc::downgrade(&self.inner),
        );
        checks.insert(id.clone(), check.clone());
        debug!(check = %id, "fault check registered");
        Ok(check)
    }

    pub fn get(&self, id: &str) -> Option<FaultCheck> {
        self.inner.checks.lock().get(id).cloned()
    }

    /// Snapshot of every check registered by `owner`, ordered by id.
    pub fn for_owner(&self, owner: &str) -> Vec<FaultCheck> {
        self.inner
            .checks
            .lock()
            .values()
            .filter(|check| check.owner() == owner)
            .cloned()
            .collect()
    }

    /// Snapshot of every check, ordered by id.
    pub fn checks(&self) -> Vec<FaultCheck> {
        self.inner.checks.lock().values().cloned().collect()
    }

    /// Current status of every check, for export.
    pub fn statuses(&self) -> Vec<HealthCheck> {
        self.checks().iter().map(FaultCheck::status).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.checks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.checks.lock().is_empty()
    }

    /// Dispose every check owned by `owner`. Used when a driver's
    /// configuration is reapplied.
    pub fn dispose_owner(&self, owner: &str) -> usize {
        let checks = self.for_owner(owner);
        for check in &checks {
            check.dispose();
        }
        checks.len()
    }
}

impl Default for FaultRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FaultRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultRegistry")
            .field("checks", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::health::Fault;

    #[test]
    fn composite_ids_are_unique() {
        let registry = FaultRegistry::new();
        let check = registry
            .new_fault_check("ahu-1", CheckDefinition::new("comms"))
            .unwrap();
        assert_eq!(check.id(), "ahu-1:comms");

        let err = registry
            .new_fault_check("ahu-1", CheckDefinition::new("comms"))
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists { .. }));

        registry
            .new_fault_check("ahu-2", CheckDefinition::new("comms"))
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn empty_ids_are_rejected() {
        let registry = FaultRegistry::new();
        assert!(registry.new_fault_check("", CheckDefinition::new("x")).is_err());
        assert!(registry.new_fault_check("o", CheckDefinition::new("")).is_err());
    }

    #[test]
    fn dispose_releases_id_for_reuse() {
        let registry = FaultRegistry::new();
        let first = registry
            .new_fault_check("ahu-1", CheckDefinition::new("comms"))
            .unwrap();
        first.dispose();
        assert!(registry.is_empty());

        let second = registry
            .new_fault_check("ahu-1", CheckDefinition::new("comms"))
            .unwrap();
        first.dispose();
        assert!(registry.get("ahu-1:comms").is_some());
        assert!(!second.is_disposed());
    }

    #[test]
    fn for_owner_filters_and_orders() {
        let registry = FaultRegistry::new();
        registry.new_fault_check("b", CheckDefinition::new("z")).unwrap();
        registry.new_fault_check("a", CheckDefinition::new("y")).unwrap();
        registry.new_fault_check("b", CheckDefinition::new("x")).unwrap();

        let ids: Vec<String> = registry
            .for_owner("b")
            .iter()
            .map(|c| c.id().to_owned())
            .collect();
        assert_eq!(ids, ["b:x", "b:z"]);
    }

    #[test]
    fn statuses_reflect_faults() {
        let registry = FaultRegistry::new();
        let check = registry
            .new_fault_check("vav-3", CheckDefinition::new("temp").with_display_name("Zone temp"))
            .unwrap();
        check.add_or_update_fault(Fault::new("TEMP_HIGH", "too hot"));

        let statuses = registry.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].display_name, "Zone temp");
        assert_eq!(statuses[0].faults.len(), 1);
    }

    #[test]
    fn dispose_owner_removes_only_that_owner() {
        let registry = FaultRegistry::new();
        registry.new_fault_check("a", CheckDefinition::new("1")).unwrap();
        registry.new_fault_check("a", CheckDefinition::new("2")).unwrap();
        registry.new_fault_check("b", CheckDefinition::new("1")).unwrap();

        assert_eq!(registry.dispose_owner("a"), 2);
        assert_eq!(registry.len(), 1);
    }
}
