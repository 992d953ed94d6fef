// ── Cell, write and pull options ──

use std::fmt;
use std::sync::Arc;

use crate::Message;
use crate::clock::{self, Clock};
use crate::equivalence::Equivalence;
use crate::error::CoreError;
use crate::mask::FieldMask;

/// Construction-time settings for a [`TypedCell`](super::TypedCell).
pub struct CellOptions<T> {
    pub(crate) equivalence: Equivalence<T>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) interceptor: Option<Interceptor<T>>,
}

impl<T: Message> CellOptions<T> {
    pub fn new() -> Self {
        Self {
            equivalence: Equivalence::Exact,
            clock: clock::system(),
            interceptor: None,
        }
    }

    pub fn with_equivalence(mut self, equivalence: Equivalence<T>) -> Self {
        self.equivalence = equivalence;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Hook run on every write to the cell, after any per-write interceptors,
    /// with `(current, candidate)`.
    pub fn with_interceptor(
        mut self,
        f: impl Fn(&T, &mut T) -> Result<(), CoreError> + Send + Sync + 'static,
    ) -> Self {
        self.interceptor = Some(Arc::new(f));
        self
    }
}

impl<T: Message> Default for CellOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CellOptions<T> {
    fn clone(&self) -> Self {
        Self {
            equivalence: self.equivalence.clone(),
            clock: Arc::clone(&self.clock),
            interceptor: self.interceptor.clone(),
        }
    }
}

impl<T> fmt::Debug for CellOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellOptions")
            .field("equivalence", &self.equivalence)
            .field("clock", &self.clock)
            .field("interceptor", &self.interceptor.is_some())
            .finish()
    }
}

/// Hook run around a write: receives the current value and the candidate,
/// may adjust the candidate, or reject the write.
pub type Interceptor<T> = Arc<dyn Fn(&T, &mut T) -> Result<(), CoreError> + Send + Sync>;

/// Per-write settings for `set` / `update`.
pub struct WriteOptions<T> {
    pub(crate) update_mask: Option<FieldMask>,
    pub(crate) expected_value: Option<T>,
    pub(crate) before: Option<Interceptor<T>>,
    pub(crate) after: Option<Interceptor<T>>,
    pub(crate) allow_duplicates: bool,
}

impl<T: Message> WriteOptions<T> {
    pub fn new() -> Self {
        Self {
            update_mask: None,
            expected_value: None,
            before: None,
            after: None,
            allow_duplicates: false,
        }
    }

    /// Only the masked fields of the new value are merged onto the current one.
    pub fn with_update_mask(mut self, mask: FieldMask) -> Self {
        self.update_mask = Some(mask);
        self
    }

    /// Fail with `PreconditionFailed` unless the current value equals `expected`.
    pub fn with_expected_value(mut self, expected: T) -> Self {
        self.expected_value = Some(expected);
        self
    }

    /// Runs before the merge with `(current, incoming)`.
    pub fn intercept_before(
        mut self,
        f: impl Fn(&T, &mut T) -> Result<(), CoreError> + Send + Sync + 'static,
    ) -> Self {
        self.before = Some(Arc::new(f));
        self
    }

    /// Runs after the merge with `(current, merged)`; e.g. stamping an end time.
    pub fn intercept_after(
        mut self,
        f: impl Fn(&T, &mut T) -> Result<(), CoreError> + Send + Sync + 'static,
    ) -> Self {
        self.after = Some(Arc::new(f));
        self
    }

    /// Publish a change even when the result is equivalent to the current value.
    pub fn allow_duplicates(mut self) -> Self {
        self.allow_duplicates = true;
        self
    }
}

impl<T: Message> Default for WriteOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for WriteOptions<T> {
    fn clone(&self) -> Self {
        Self {
            update_mask: self.update_mask.clone(),
            expected_value: self.expected_value.clone(),
            before: self.before.clone(),
            after: self.after.clone(),
            allow_duplicates: self.allow_duplicates,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for WriteOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOptions")
            .field("update_mask", &self.update_mask)
            .field("expected_value", &self.expected_value)
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("allow_duplicates", &self.allow_duplicates)
            .finish()
    }
}

/// Per-subscriber settings for `pull`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullOptions {
    pub read_mask: Option<FieldMask>,
    /// Skip the initial replay of current state.
    pub updates_only: bool,
}

impl PullOptions {
    /// Seeded pull of every field.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only changes applied after subscription.
    pub fn updates_only() -> Self {
        Self {
            read_mask: None,
            updates_only: true,
        }
    }

    pub fn with_read_mask(mut self, mask: FieldMask) -> Self {
        self.read_mask = Some(mask);
        self
    }
}
