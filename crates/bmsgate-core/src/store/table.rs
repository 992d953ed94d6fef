// ── Keyed table of cells ──

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::broadcast::ChangeBroadcaster;
use super::cell::{TypedCell, change_stream_seeded};
use super::change::{Change, ChangeStream};
use super::options::{CellOptions, PullOptions, WriteOptions};
use crate::Message;
use crate::error::CoreError;
use crate::mask::FieldMask;

const ENTRY: &str = "entry";

/// A registry of [`TypedCell`]s keyed by string.
///
/// The table publishes a merged, key-stamped change stream across all of its
/// entries. Lock order is always table then cell; cells are never handed out,
/// so every write goes through the table and reaches table subscribers.
///
/// Once [`close`](Self::close)d, the table is read-only: mutations fail and
/// new streams end immediately.
pub struct KeyedCellTable<T: Message> {
    options: CellOptions<T>,
    state: Mutex<TableState<T>>,
}

struct TableState<T: Message> {
    cells: BTreeMap<String, Arc<TypedCell<T>>>,
    subscribers: ChangeBroadcaster<Change<T>>,
    closed: bool,
}

impl<T: Message> TableState<T> {
    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.closed {
            return Err(CoreError::precondition("table is closed"));
        }
        Ok(())
    }
}

impl<T: Message> KeyedCellTable<T> {
    pub fn new() -> Self {
        Self::with_options(CellOptions::new())
    }

    /// Every cell the table creates shares these options.
    pub fn with_options(options: CellOptions<T>) -> Self {
        Self {
            options,
            state: Mutex::new(TableState {
                cells: BTreeMap::new(),
                subscribers: ChangeBroadcaster::new(),
                closed: false,
            }),
        }
    }

    /// Exclusive create. Fails with `AlreadyExists` if `key` is present.
    pub fn add(&self, key: &str, value: T) -> Result<T, CoreError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if state.cells.contains_key(key) {
            return Err(CoreError::already_exists(ENTRY, key));
        }
        let cell = TypedCell::keyed(key.to_owned(), value.clone(), self.options.clone());
        let change = Change::update(
            Some(key.to_owned()),
            None,
            Some(value.clone()),
            cell.change_time(),
        );
        state.cells.insert(key.to_owned(), Arc::new(cell));
        state.subscribers.send(&change);
        debug!(key, "table entry added");
        Ok(value)
    }

    /// Apply a write to the cell at `key`.
    ///
    /// An unseen key is created from the message default (with the write
    /// applied on top) only when `create_if_absent` is set.
    pub fn update(
        &self,
        key: &str,
        value: T,
        opts: &WriteOptions<T>,
        create_if_absent: bool,
    ) -> Result<T, CoreError> {
        let mut state = self.state.lock();
        state.ensure_open()?;

        if let Some(cell) = state.cells.get(key) {
            let applied = cell.apply(value, opts)?;
            if applied.changed {
                let change = Change::update(
                    Some(key.to_owned()),
                    Some(applied.old),
                    Some(applied.new.clone()),
                    applied.change_time,
                );
                state.subscribers.send(&change);
            }
            return Ok(applied.new);
        }

        if !create_if_absent {
            return Err(CoreError::not_found(ENTRY, key));
        }

        let cell = TypedCell::keyed(key.to_owned(), T::default(), self.options.clone());
        let applied = cell.apply(value, opts)?;
        let change = Change::update(
            Some(key.to_owned()),
            None,
            Some(applied.new.clone()),
            self.options.clock.now(),
        );
        state.cells.insert(key.to_owned(), Arc::new(cell));
        state.subscribers.send(&change);
        debug!(key, "table entry created on update");
        Ok(applied.new)
    }

    /// Remove the entry, notifying table and per-key subscribers with a
    /// removal change. Returns the removed value, or `None` for a missing
    /// key when `allow_missing` is set.
    pub fn delete(&self, key: &str, allow_missing: bool) -> Result<Option<T>, CoreError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        let Some(cell) = state.cells.remove(key) else {
            return if allow_missing {
                Ok(None)
            } else {
                Err(CoreError::not_found(ENTRY, key))
            };
        };
        let removed_at = self.options.clock.now();
        let value = cell.retire(removed_at);
        let change = Change::update(Some(key.to_owned()), Some(value.clone()), None, removed_at);
        state.subscribers.send(&change);
        debug!(key, "table entry deleted");
        Ok(Some(value))
    }

    pub fn get(&self, key: &str) -> Result<T, CoreError> {
        let state = self.state.lock();
        state
            .cells
            .get(key)
            .map(|cell| cell.get())
            .ok_or_else(|| CoreError::not_found(ENTRY, key))
    }

    pub fn get_with_mask(&self, key: &str, mask: &FieldMask) -> Result<T, CoreError> {
        let value = self.get(key)?;
        mask.filter(&value)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().cells.contains_key(key)
    }

    /// Snapshot of every value, ordered by key.
    pub fn list(&self) -> Vec<T> {
        let state = self.state.lock();
        state.cells.values().map(|cell| cell.get()).collect()
    }

    /// Snapshot of `(key, value)` pairs, ordered by key.
    pub fn list_entries(&self) -> Vec<(String, T)> {
        let state = self.state.lock();
        state
            .cells
            .iter()
            .map(|(key, cell)| (key.clone(), cell.get()))
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().cells.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().cells.is_empty()
    }

    /// Merged change stream across all keys.
    ///
    /// Unless `updates_only` is set, the stream opens with one seed per
    /// existing key in key order; the final seed carries
    /// `is_last_seed_value`. An empty table produces no seed, and a closed
    /// table produces an empty stream.
    pub fn pull(&self, cancel: CancellationToken, opts: PullOptions) -> ChangeStream<T> {
        let (seeds, subscription) = {
            let mut state = self.state.lock();
            if state.closed {
                return change_stream_seeded(Vec::new(), None, None, cancel);
            }
            let seeds = if opts.updates_only {
                Vec::new()
            } else {
                let last = state.cells.len().saturating_sub(1);
                state
                    .cells
                    .iter()
                    .enumerate()
                    .map(|(i, (key, cell))| {
                        Change::seed(Some(key.clone()), cell.get(), cell.change_time(), i == last)
                    })
                    .collect()
            };
            (seeds, state.subscribers.subscribe())
        };
        let read_mask = opts.read_mask.filter(|mask| !mask.is_empty());
        change_stream_seeded(seeds, Some(subscription), read_mask, cancel)
    }

    /// Change stream for one key. Ends after the key's removal change.
    pub fn pull_key(
        &self,
        key: &str,
        cancel: CancellationToken,
        opts: PullOptions,
    ) -> Result<ChangeStream<T>, CoreError> {
        let state = self.state.lock();
        let cell = state
            .cells
            .get(key)
            .ok_or_else(|| CoreError::not_found(ENTRY, key))?;
        Ok(cell.pull(cancel, opts))
    }

    /// End every table and per-key stream and reject further mutations.
    /// Values stay readable. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscribers.close();
        for cell in state.cells.values() {
            cell.close();
        }
    }
}

impl<T: Message> Default for KeyedCellTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Message> std::fmt::Debug for KeyedCellTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedCellTable")
            .field("keys", &self.keys())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::ChangeType;
    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Lamp {
        level: i64,
        name: String,
    }

    fn lamp(level: i64) -> Lamp {
        Lamp {
            level,
            name: "lamp".into(),
        }
    }

    #[test]
    fn update_without_create_fails_for_unknown_key() {
        let table = KeyedCellTable::new();
        let err = table
            .update("a", lamp(1), &WriteOptions::new(), false)
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert!(table.is_empty());
    }

    #[test]
    fn update_with_create_builds_from_default() {
        let table = KeyedCellTable::new();
        let got = table
            .update(
                "a",
                lamp(7),
                &WriteOptions::new().with_update_mask(FieldMask::single("level")),
                true,
            )
            .unwrap();
        assert_eq!(
            got,
            Lamp {
                level: 7,
                name: String::new()
            }
        );
        assert_eq!(table.get("a").unwrap(), got);
    }

    #[test]
    fn add_is_exclusive() {
        let table = KeyedCellTable::new();
        table.add("a", lamp(1)).unwrap();
        let err = table.add("a", lamp(2)).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists { .. }));
        assert_eq!(table.get("a").unwrap(), lamp(1));
    }

    #[test]
    fn delete_respects_allow_missing() {
        let table = KeyedCellTable::<Lamp>::new();
        assert!(matches!(
            table.delete("x", false).unwrap_err(),
            CoreError::NotFound { .. }
        ));
        assert_eq!(table.delete("x", true).unwrap(), None);

        table.add("x", lamp(3)).unwrap();
        assert_eq!(table.delete("x", false).unwrap(), Some(lamp(3)));
        assert!(!table.contains("x"));
    }

    #[test]
    fn listing_is_key_ordered() {
        let table = KeyedCellTable::new();
        table.add("c", lamp(3)).unwrap();
        table.add("a", lamp(1)).unwrap();
        table.add("b", lamp(2)).unwrap();

        assert_eq!(table.keys(), ["a", "b", "c"]);
        assert_eq!(table.list(), vec![lamp(1), lamp(2), lamp(3)]);
        assert_eq!(table.list_entries()[0], ("a".to_owned(), lamp(1)));
        assert_eq!(table.len(), 3);
    }

    #[tokio::test]
    async fn pull_seeds_every_key_then_streams_live_changes() {
        let table = KeyedCellTable::new();
        table.add("a", lamp(1)).unwrap();
        table.add("b", lamp(2)).unwrap();

        let mut changes = table.pull(CancellationToken::new(), PullOptions::new());

        let first = changes.next().await.unwrap();
        assert_eq!(first.key.as_deref(), Some("a"));
        assert!(first.is_seed_value && !first.is_last_seed_value);
        let second = changes.next().await.unwrap();
        assert_eq!(second.key.as_deref(), Some("b"));
        assert!(second.is_last_seed_value);

        table.update("a", lamp(5), &WriteOptions::new(), false).unwrap();
        table.add("c", lamp(9)).unwrap();
        table.delete("b", false).unwrap();

        let update = changes.next().await.unwrap();
        assert_eq!(update.change_type(), ChangeType::Update);
        assert_eq!(update.new_value, Some(lamp(5)));
        let add = changes.next().await.unwrap();
        assert_eq!(add.change_type(), ChangeType::Add);
        assert_eq!(add.key.as_deref(), Some("c"));
        let remove = changes.next().await.unwrap();
        assert_eq!(remove.change_type(), ChangeType::Remove);
        assert_eq!(remove.old_value, Some(lamp(2)));
    }

    #[tokio::test]
    async fn duplicate_update_is_not_published() {
        let table = KeyedCellTable::new();
        table.add("a", lamp(1)).unwrap();
        let mut changes = table.pull(CancellationToken::new(), PullOptions::updates_only());

        table.update("a", lamp(1), &WriteOptions::new(), false).unwrap();
        table.update("a", lamp(2), &WriteOptions::new(), false).unwrap();

        let change = changes.next().await.unwrap();
        assert_eq!(change.new_value, Some(lamp(2)));
    }

    #[tokio::test]
    async fn pull_key_ends_after_removal() {
        let table = KeyedCellTable::new();
        table.add("a", lamp(1)).unwrap();
        let mut changes = table
            .pull_key("a", CancellationToken::new(), PullOptions::updates_only())
            .unwrap();

        table.update("a", lamp(2), &WriteOptions::new(), false).unwrap();
        table.delete("a", false).unwrap();

        let update = changes.next().await.unwrap();
        assert_eq!(update.key.as_deref(), Some("a"));
        let removal = changes.next().await.unwrap();
        assert_eq!(removal.new_value, None);
        assert!(changes.next().await.is_none());
    }

    #[test]
    fn pull_key_for_unknown_key_fails() {
        let table = KeyedCellTable::<Lamp>::new();
        let result = table.pull_key("nope", CancellationToken::new(), PullOptions::new());
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn close_ends_table_stream() {
        let table = KeyedCellTable::<Lamp>::new();
        let mut changes = table.pull(CancellationToken::new(), PullOptions::new());
        table.close();
        assert!(changes.next().await.is_none());
    }

    #[tokio::test]
    async fn closed_table_is_read_only() {
        let table = KeyedCellTable::new();
        table.add("a", lamp(1)).unwrap();
        table.close();
        assert!(table.is_closed());

        let mut late = table.pull(CancellationToken::new(), PullOptions::new());
        assert!(late.next().await.is_none());

        assert!(matches!(
            table.update("a", lamp(2), &WriteOptions::new(), false),
            Err(CoreError::PreconditionFailed { .. })
        ));
        assert!(matches!(
            table.add("b", lamp(3)),
            Err(CoreError::PreconditionFailed { .. })
        ));
        assert!(matches!(
            table.delete("a", false),
            Err(CoreError::PreconditionFailed { .. })
        ));
        assert_eq!(table.get("a").unwrap(), lamp(1));
        assert_eq!(table.list(), vec![lamp(1)]);
    }
}
