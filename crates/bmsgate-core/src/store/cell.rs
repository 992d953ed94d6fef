// ── Typed reactive cell ──
//
// A single value guarded by a narrow mutex. The lock covers the copy /
// merge / publish of one write and is never held across an await.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::broadcast::{ChangeBroadcaster, Subscription};
use super::change::{Change, ChangeStream};
use super::options::{CellOptions, PullOptions, WriteOptions};
use crate::Message;
use crate::error::CoreError;
use crate::mask::FieldMask;

/// A single mutable value of a known message type.
///
/// Readers always receive copies. Writes that leave the value equivalent
/// (per the cell's [`Equivalence`](crate::Equivalence)) neither advance the
/// change time nor notify subscribers.
pub struct TypedCell<T: Message> {
    key: Option<String>,
    options: CellOptions<T>,
    state: Mutex<CellState<T>>,
}

struct CellState<T> {
    value: T,
    change_time: DateTime<Utc>,
    subscribers: ChangeBroadcaster<Change<T>>,
    closed: bool,
}

/// Result of applying one write, used by tables to mirror cell changes.
pub(crate) struct Applied<T> {
    pub old: T,
    pub new: T,
    pub change_time: DateTime<Utc>,
    pub changed: bool,
}

impl<T: Message> TypedCell<T> {
    pub fn new(initial: T) -> Self {
        Self::with_options(initial, CellOptions::new())
    }

    pub fn with_options(initial: T, options: CellOptions<T>) -> Self {
        Self::build(None, initial, options)
    }

    pub(crate) fn keyed(key: String, initial: T, options: CellOptions<T>) -> Self {
        Self::build(Some(key), initial, options)
    }

    fn build(key: Option<String>, initial: T, options: CellOptions<T>) -> Self {
        let change_time = options.clock.now();
        Self {
            key,
            state: Mutex::new(CellState {
                value: initial,
                change_time,
                subscribers: ChangeBroadcaster::new(),
                closed: false,
            }),
            options,
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// A copy of the current value.
    pub fn get(&self) -> T {
        self.state.lock().value.clone()
    }

    /// A copy of the current value restricted to the fields in `mask`.
    pub fn get_with_mask(&self, mask: &FieldMask) -> Result<T, CoreError> {
        let value = self.get();
        mask.filter(&value)
    }

    /// Time of the last write that actually changed the value.
    pub fn change_time(&self) -> DateTime<Utc> {
        self.state.lock().change_time
    }

    /// Merge `value` onto the current value and publish the result if it
    /// differs. Returns the value now held by the cell.
    pub fn set(&self, value: T, opts: &WriteOptions<T>) -> Result<T, CoreError> {
        self.apply(value, opts).map(|applied| applied.new)
    }

    /// Mutate the value in place under the same suppression rules as `set`.
    pub fn modify(&self, f: impl FnOnce(&mut T) -> Result<(), CoreError>) -> Result<T, CoreError> {
        let mut state = self.state.lock();
        let mut next = state.value.clone();
        f(&mut next)?;
        if let Some(hook) = &self.options.interceptor {
            hook(&state.value, &mut next)?;
        }
        Ok(self.commit(&mut state, next, false).new)
    }

    pub(crate) fn apply(&self, value: T, opts: &WriteOptions<T>) -> Result<Applied<T>, CoreError> {
        let mut state = self.state.lock();

        if let Some(expected) = &opts.expected_value {
            if *expected != state.value {
                return Err(CoreError::precondition(
                    "current value does not match the expected value",
                ));
            }
        }

        let mut incoming = value;
        if let Some(before) = &opts.before {
            before(&state.value, &mut incoming)?;
        }

        let mut merged = match &opts.update_mask {
            Some(mask) => mask.merge(&state.value, &incoming)?,
            None => incoming,
        };

        if let Some(after) = &opts.after {
            after(&state.value, &mut merged)?;
        }
        if let Some(hook) = &self.options.interceptor {
            hook(&state.value, &mut merged)?;
        }

        Ok(self.commit(&mut state, merged, opts.allow_duplicates))
    }

    fn commit(&self, state: &mut CellState<T>, next: T, allow_duplicates: bool) -> Applied<T> {
        if !allow_duplicates && self.options.equivalence.equivalent(&state.value, &next) {
            return Applied {
                old: state.value.clone(),
                new: state.value.clone(),
                change_time: state.change_time,
                changed: false,
            };
        }

        let change_time = self.options.clock.now();
        let old = std::mem::replace(&mut state.value, next.clone());
        state.change_time = change_time;

        let change = Change::update(
            self.key.clone(),
            Some(old.clone()),
            Some(next.clone()),
            change_time,
        );
        let delivered = state.subscribers.send(&change);
        trace!(key = ?self.key, delivered, "cell value changed");

        Applied {
            old,
            new: next,
            change_time,
            changed: true,
        }
    }

    /// Stream changes to this cell until `cancel` fires or the cell closes.
    ///
    /// Unless `updates_only` is set, the stream opens with the current value
    /// as a seed change. Registration and the seed snapshot happen under the
    /// same lock, so no write can fall between them.
    pub fn pull(&self, cancel: CancellationToken, opts: PullOptions) -> ChangeStream<T> {
        let (seed, subscription) = {
            let mut state = self.state.lock();
            let seed = (!opts.updates_only).then(|| {
                Change::seed(
                    self.key.clone(),
                    state.value.clone(),
                    state.change_time,
                    true,
                )
            });
            let subscription = (!state.closed).then(|| state.subscribers.subscribe());
            (seed, subscription)
        };
        let read_mask = opts.read_mask.filter(|mask| !mask.is_empty());
        change_stream(seed, subscription, read_mask, cancel)
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.subscriber_count()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Close every subscriber's stream. The value stays readable.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscribers.close();
    }

    /// Publish a removal change and close. Used when a table drops the entry.
    pub(crate) fn retire(&self, removed_at: DateTime<Utc>) -> T {
        let mut state = self.state.lock();
        let value = state.value.clone();
        let change = Change::update(self.key.clone(), Some(value.clone()), None, removed_at);
        state.subscribers.send(&change);
        state.closed = true;
        state.subscribers.close();
        value
    }
}

impl<T: Message> std::fmt::Debug for TypedCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TypedCell")
            .field("key", &self.key)
            .field("value", &state.value)
            .field("change_time", &state.change_time)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

/// Build a subscriber stream: optional seed, then live changes filtered by
/// the read mask.
pub(crate) fn change_stream<T: Message>(
    seed: Option<Change<T>>,
    subscription: Option<Subscription<Change<T>>>,
    read_mask: Option<FieldMask>,
    cancel: CancellationToken,
) -> ChangeStream<T> {
    change_stream_seeded(seed.into_iter().collect(), subscription, read_mask, cancel)
}

pub(crate) fn change_stream_seeded<T: Message>(
    seeds: Vec<Change<T>>,
    subscription: Option<Subscription<Change<T>>>,
    read_mask: Option<FieldMask>,
    cancel: CancellationToken,
) -> ChangeStream<T> {
    Box::pin(async_stream::stream! {
        for seed in seeds {
            match mask_change(seed, read_mask.as_ref()) {
                Ok(Some(change)) => yield change,
                Ok(None) => {}
                Err(error) => warn!(%error, "dropping seed that failed read-mask filtering"),
            }
        }

        if let Some(mut subscription) = subscription {
            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    change = subscription.recv() => change,
                };
                let Some(change) = next else {
                    break;
                };
                match mask_change(change, read_mask.as_ref()) {
                    Ok(Some(change)) => yield change,
                    Ok(None) => {}
                    Err(error) => warn!(%error, "dropping change that failed read-mask filtering"),
                }
            }
            if subscription.lagged() {
                warn!("change stream ended: subscriber fell behind");
            }
        }
    })
}

/// Apply a read mask to both sides of a change. Live updates that do not
/// touch any masked field are skipped.
fn mask_change<T: Message>(
    change: Change<T>,
    mask: Option<&FieldMask>,
) -> Result<Option<Change<T>>, CoreError> {
    let Some(mask) = mask else {
        return Ok(Some(change));
    };
    let is_seed = change.is_seed_value;
    let masked = change.try_map(|value| mask.filter(&value))?;
    if !is_seed && masked.old_value.is_some() && masked.old_value == masked.new_value {
        return Ok(None);
    }
    Ok(Some(masked))
}
