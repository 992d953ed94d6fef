// ── Change events ──

use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::Serialize;
use strum::{AsRefStr, Display};

/// A lazily produced, per-subscriber sequence of changes.
pub type ChangeStream<T> = BoxStream<'static, Change<T>>;

/// One mutation of a cell or table entry, as seen by a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change<T> {
    /// Entry key for keyed tables; `None` for standalone cells.
    pub key: Option<String>,
    pub old_value: Option<T>,
    /// `None` when the entry was removed.
    pub new_value: Option<T>,
    pub change_time: DateTime<Utc>,
    /// Part of the initial replay sent to a new subscriber.
    pub is_seed_value: bool,
    /// The final change of the initial replay.
    pub is_last_seed_value: bool,
}

/// Classification of a [`Change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Update,
    Remove,
}

impl<T> Change<T> {
    pub(crate) fn update(
        key: Option<String>,
        old_value: Option<T>,
        new_value: Option<T>,
        change_time: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            old_value,
            new_value,
            change_time,
            is_seed_value: false,
            is_last_seed_value: false,
        }
    }

    pub(crate) fn seed(
        key: Option<String>,
        value: T,
        change_time: DateTime<Utc>,
        is_last: bool,
    ) -> Self {
        Self {
            key,
            old_value: None,
            new_value: Some(value),
            change_time,
            is_seed_value: true,
            is_last_seed_value: is_last,
        }
    }

    pub fn change_type(&self) -> ChangeType {
        match (&self.old_value, &self.new_value) {
            (_, None) => ChangeType::Remove,
            (None, Some(_)) => ChangeType::Add,
            (Some(_), Some(_)) => ChangeType::Update,
        }
    }

    /// Transform both values, keeping the change metadata.
    pub fn try_map<U, E>(self, mut f: impl FnMut(T) -> Result<U, E>) -> Result<Change<U>, E> {
        Ok(Change {
            key: self.key,
            old_value: self.old_value.map(&mut f).transpose()?,
            new_value: self.new_value.map(&mut f).transpose()?,
            change_time: self.change_time,
            is_seed_value: self.is_seed_value,
            is_last_seed_value: self.is_last_seed_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_change_types() {
        let now = Utc::now();
        assert_eq!(Change::seed(None, 1, now, true).change_type(), ChangeType::Add);
        assert_eq!(
            Change::update(None, Some(1), Some(2), now).change_type(),
            ChangeType::Update
        );
        assert_eq!(
            Change::update(Some("k".into()), Some(1), None, now).change_type(),
            ChangeType::Remove
        );
    }

    #[test]
    fn try_map_keeps_metadata() {
        let now = Utc::now();
        let mapped = Change::seed(Some("k".into()), 2, now, true)
            .try_map(|v| Ok::<_, ()>(v * 10))
            .unwrap_or_else(|()| unreachable!());
        assert_eq!(mapped.new_value, Some(20));
        assert!(mapped.is_seed_value && mapped.is_last_seed_value);
        assert_eq!(mapped.key.as_deref(), Some("k"));
    }
}
