// ── Type-erased cell capability ──
//
// The value pipeline and the trait router work across trait types, so they
// address cells through this object-safe view over the serde form.

use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::cell::TypedCell;
use super::change::ChangeStream;
use super::options::{PullOptions, WriteOptions};
use crate::Message;
use crate::error::CoreError;
use crate::mask::{FieldMask, message_with_field};

/// Object-safe view of a [`TypedCell`] over JSON values.
pub trait ErasedCell: std::fmt::Debug + Send + Sync {
    /// Merge a single field (dotted path) into the cell with a one-field
    /// update mask. Returns the resulting full value.
    fn write_field(&self, path: &str, value: Value) -> Result<Value, CoreError>;

    fn get_json(&self) -> Result<Value, CoreError>;

    /// Like `pull`, with each change's values serialized to JSON.
    fn pull_json(&self, cancel: CancellationToken, opts: PullOptions) -> ChangeStream<Value>;

    /// Name of the underlying message type, for diagnostics.
    fn type_name(&self) -> &'static str;
}

impl<T: Message> ErasedCell for TypedCell<T> {
    fn write_field(&self, path: &str, value: Value) -> Result<Value, CoreError> {
        let incoming: T = message_with_field(path, value)?;
        let opts = WriteOptions::new().with_update_mask(FieldMask::single(path));
        let merged = self.set(incoming, &opts)?;
        Ok(serde_json::to_value(merged)?)
    }

    fn get_json(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(self.get())?)
    }

    fn pull_json(&self, cancel: CancellationToken, opts: PullOptions) -> ChangeStream<Value> {
        self.pull(cancel, opts)
            .filter_map(|change| async move {
                match change.try_map(serde_json::to_value) {
                    Ok(change) => Some(change),
                    Err(error) => {
                        tracing::warn!(%error, "dropping change that failed to serialize");
                        None
                    }
                }
            })
            .boxed()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Sensor {
        value: f32,
        unit: String,
    }

    #[test]
    fn write_field_only_touches_named_field() {
        let cell = TypedCell::new(Sensor {
            value: 1.0,
            unit: "C".into(),
        });
        let erased: Arc<dyn ErasedCell> = Arc::new(cell);

        let merged = erased.write_field("value", json!(3.5)).unwrap();
        assert_eq!(merged, json!({ "value": 3.5, "unit": "C" }));
        assert_eq!(erased.get_json().unwrap(), merged);
    }

    #[test]
    fn write_field_rejects_unknown_path() {
        let erased: Arc<dyn ErasedCell> = Arc::new(TypedCell::new(Sensor::default()));
        let err = erased.write_field("missing", json!(1)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn write_field_rejects_mistyped_value() {
        let erased: Arc<dyn ErasedCell> = Arc::new(TypedCell::new(Sensor::default()));
        let err = erased.write_field("value", json!("hot")).unwrap_err();
        assert!(matches!(err, CoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn pull_json_serializes_seed() {
        let erased: Arc<dyn ErasedCell> = Arc::new(TypedCell::new(Sensor::default()));
        let mut changes = erased.pull_json(CancellationToken::new(), PullOptions::new());
        let seed = changes.next().await.unwrap();
        assert_eq!(seed.new_value, Some(json!({ "value": 0.0, "unit": "" })));
    }
}
