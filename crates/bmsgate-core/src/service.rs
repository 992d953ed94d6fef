// ── Trait servers and routing ──
//
// A trait server wraps the cell holding one trait instance. Servers plug
// into the router through the explicit `Register` / `Unwrap` pair.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::clock::Clock;
use crate::error::CoreError;
use crate::model::{AirTemperature, MeterReading, OpenClosePosition, TraitKind, TraitModel};
use crate::store::{ErasedCell, TypedCell};

/// Access to the model behind a server.
pub trait Unwrap {
    type Model;

    fn unwrap_model(&self) -> Arc<Self::Model>;
}

/// Attach a server to a router under a trait instance name.
pub trait Register {
    fn register(self: Arc<Self>, router: &TraitRouter, name: &str) -> Result<(), CoreError>;
}

/// Serves one trait instance backed by a [`TypedCell`].
#[derive(Debug)]
pub struct ModelServer<T: TraitModel> {
    cell: Arc<TypedCell<T>>,
}

impl<T: TraitModel> ModelServer<T> {
    pub fn new(cell: Arc<TypedCell<T>>) -> Self {
        Self { cell }
    }

    /// Server over a fresh default-valued cell configured for `T`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(TypedCell::with_options(
            T::default(),
            T::cell_options(clock),
        )))
    }
}

impl<T: TraitModel> Unwrap for ModelServer<T> {
    type Model = TypedCell<T>;

    fn unwrap_model(&self) -> Arc<TypedCell<T>> {
        Arc::clone(&self.cell)
    }
}

impl<T: TraitModel> Register for ModelServer<T> {
    fn register(self: Arc<Self>, router: &TraitRouter, name: &str) -> Result<(), CoreError> {
        let cell: Arc<dyn ErasedCell> = self.cell.clone();
        router.insert(name, T::KIND, self, cell)
    }
}

// ── Router ───────────────────────────────────────────────────────────

struct Route {
    server: Arc<dyn Any + Send + Sync>,
    cell: Arc<dyn ErasedCell>,
}

/// Registered trait servers, keyed by `(instance name, kind)`.
#[derive(Default)]
pub struct TraitRouter {
    routes: DashMap<(String, TraitKind), Route>,
}

impl TraitRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(
        &self,
        name: &str,
        kind: TraitKind,
        server: Arc<dyn Any + Send + Sync>,
        cell: Arc<dyn ErasedCell>,
    ) -> Result<(), CoreError> {
        if name.is_empty() {
            return Err(CoreError::invalid("trait name must not be empty"));
        }
        match self.routes.entry((name.to_owned(), kind)) {
            Entry::Occupied(_) => {
                Err(CoreError::already_exists("trait", format!("{name} ({kind})")))
            }
            Entry::Vacant(slot) => {
                slot.insert(Route { server, cell });
                debug!(name, %kind, "trait registered");
                Ok(())
            }
        }
    }

    /// The typed server for `name`, if one of model `T` is registered.
    pub fn server<T: TraitModel>(&self, name: &str) -> Option<Arc<ModelServer<T>>> {
        let route = self.routes.get(&(name.to_owned(), T::KIND))?;
        Arc::clone(&route.server).downcast::<ModelServer<T>>().ok()
    }

    pub fn cell(&self, name: &str, kind: TraitKind) -> Option<Arc<dyn ErasedCell>> {
        self.routes
            .get(&(name.to_owned(), kind))
            .map(|route| Arc::clone(&route.cell))
    }

    pub fn remove(&self, name: &str, kind: TraitKind) -> bool {
        self.routes.remove(&(name.to_owned(), kind)).is_some()
    }

    /// Registered `(name, kind)` pairs, sorted.
    pub fn list(&self) -> Vec<(String, TraitKind)> {
        let mut routes: Vec<_> = self.routes.iter().map(|entry| entry.key().clone()).collect();
        routes.sort();
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Create and register a default server for `kind`, returning its cell.
    pub fn serve(
        &self,
        name: &str,
        kind: TraitKind,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<dyn ErasedCell>, CoreError> {
        match kind {
            TraitKind::AirTemperature => {
                Arc::new(ModelServer::<AirTemperature>::with_clock(clock)).register(self, name)?;
            }
            TraitKind::Meter => {
                Arc::new(ModelServer::<MeterReading>::with_clock(clock)).register(self, name)?;
            }
            TraitKind::OpenClose => {
                Arc::new(ModelServer::<OpenClosePosition>::with_clock(clock))
                    .register(self, name)?;
            }
        }
        self.cell(name, kind)
            .ok_or_else(|| CoreError::Internal(format!("trait {name} vanished after register")))
    }
}

impl std::fmt::Debug for TraitRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraitRouter")
            .field("routes", &self.list())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::model::OpenCloseState;
    use crate::store::WriteOptions;
    use serde_json::json;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(SystemClock)
    }

    #[test]
    fn register_then_unwrap_typed_server() {
        let router = TraitRouter::new();
        let server = Arc::new(ModelServer::<OpenClosePosition>::with_clock(clock()));
        Arc::clone(&server).register(&router, "door-1").unwrap();

        let found = router.server::<OpenClosePosition>("door-1").unwrap();
        found
            .unwrap_model()
            .set(
                OpenClosePosition {
                    state: OpenCloseState::Open,
                    ..OpenClosePosition::default()
                },
                &WriteOptions::new(),
            )
            .unwrap();
        assert_eq!(server.unwrap_model().get().state, OpenCloseState::Open);
    }

    #[test]
    fn wrong_model_type_does_not_match() {
        let router = TraitRouter::new();
        router.serve("door-1", TraitKind::OpenClose, clock()).unwrap();
        assert!(router.server::<MeterReading>("door-1").is_none());
    }

    #[test]
    fn duplicate_registration_fails() {
        let router = TraitRouter::new();
        router.serve("ahu-1", TraitKind::AirTemperature, clock()).unwrap();
        assert!(matches!(
            router.serve("ahu-1", TraitKind::AirTemperature, clock()),
            Err(CoreError::AlreadyExists { .. })
        ));
        let existing = router.cell("ahu-1", TraitKind::AirTemperature).unwrap();
        assert!(format!("{existing:?}").contains("TypedCell"));

        router.serve("ahu-1", TraitKind::Meter, clock()).unwrap();
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn erased_cell_reaches_typed_model() {
        let router = TraitRouter::new();
        let cell = router.serve("ahu-1", TraitKind::AirTemperature, clock()).unwrap();
        cell.write_field("temperature_set_point", json!(21.5)).unwrap();

        let typed = router.server::<AirTemperature>("ahu-1").unwrap().unwrap_model();
        assert!((typed.get().temperature_set_point - 21.5).abs() < f32::EPSILON);
    }

    #[test]
    fn list_is_sorted_and_remove_works() {
        let router = TraitRouter::new();
        router.serve("b", TraitKind::Meter, clock()).unwrap();
        router.serve("a", TraitKind::OpenClose, clock()).unwrap();
        assert_eq!(
            router.list(),
            vec![
                ("a".to_owned(), TraitKind::OpenClose),
                ("b".to_owned(), TraitKind::Meter)
            ]
        );
        assert!(router.remove("a", TraitKind::OpenClose));
        assert!(!router.remove("a", TraitKind::OpenClose));
    }
}
