// ── Field masks ──
//
// Partial reads and writes over the serde representation of a message.
// Paths are dotted (`"reading.value"`); an empty mask selects every field.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Message;
use crate::error::CoreError;

/// A set of field paths naming the parts of a message to read or write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMask {
    paths: Vec<String>,
}

impl FieldMask {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// A mask naming exactly one field.
    pub fn single(path: impl Into<String>) -> Self {
        Self {
            paths: vec![path.into()],
        }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// An empty mask means "all fields".
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Copy only the masked fields of `value` onto a default message.
    pub fn filter<T: Message>(&self, value: &T) -> Result<T, CoreError> {
        if self.is_empty() {
            return Ok(value.clone());
        }
        let template = serde_json::to_value(T::default())?;
        self.validate_against(&template)?;

        let src = serde_json::to_value(value)?;
        let mut out = template;
        for path in &self.paths {
            copy_path(&src, &mut out, path)?;
        }
        Ok(serde_json::from_value(out)?)
    }

    /// Merge the masked fields of `src` onto `dst`. An empty mask replaces
    /// `dst` wholesale.
    pub fn merge<T: Message>(&self, dst: &T, src: &T) -> Result<T, CoreError> {
        if self.is_empty() {
            return Ok(src.clone());
        }
        let mut out = serde_json::to_value(dst)?;
        self.validate_against(&serde_json::to_value(T::default())?)?;

        let src = serde_json::to_value(src)?;
        for path in &self.paths {
            copy_path(&src, &mut out, path)?;
        }
        Ok(serde_json::from_value(out)?)
    }

    /// Reject paths that do not name a field of the message.
    ///
    /// Validation walks the default message; a path that descends below a
    /// `null` (an unset optional sub-message) is accepted as-is.
    fn validate_against(&self, template: &Value) -> Result<(), CoreError> {
        for path in &self.paths {
            if path.is_empty() {
                return Err(CoreError::invalid("empty field mask path"));
            }
            let mut node = template;
            for segment in path.split('.') {
                match node {
                    Value::Object(map) => match map.get(segment) {
                        Some(next) => node = next,
                        None => {
                            return Err(CoreError::invalid(format!(
                                "unknown field '{path}' in mask"
                            )));
                        }
                    },
                    _ => break,
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for FieldMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.paths.join(","))
    }
}

impl FromStr for FieldMask {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(
            s.split(',').map(str::trim).filter(|p| !p.is_empty()),
        ))
    }
}

/// Build a message whose only non-default field is `path`.
///
/// Used to turn a single converted point value into a masked write.
pub(crate) fn message_with_field<T: Message>(path: &str, field: Value) -> Result<T, CoreError> {
    let mut out = serde_json::to_value(T::default())?;
    FieldMask::single(path).validate_against(&out)?;
    set_path(&mut out, path, field, None)?;
    Ok(serde_json::from_value(out)?)
}

// ── JSON path helpers ────────────────────────────────────────────────

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, segment| node.get(segment))
}

/// Copy the field at `path` from `src` into `out`.
///
/// A path that runs through an unset sub-message in `src` clears the leaf
/// in `out` instead, leaving `out`'s unset sub-messages unset.
fn copy_path(src: &Value, out: &mut Value, path: &str) -> Result<(), CoreError> {
    match lookup(src, path) {
        Some(field) => set_path(out, path, field.clone(), Some(src)),
        None => {
            clear_path(out, path);
            Ok(())
        }
    }
}

/// Write `field` at `path`, creating missing sub-messages on the way.
///
/// A created sub-message takes the shape of the same object in `shape`
/// with every leaf zeroed, so required fields the mask does not name
/// still deserialize.
fn set_path(
    root: &mut Value,
    path: &str,
    field: Value,
    shape: Option<&Value>,
) -> Result<(), CoreError> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut node = root;
    for (depth, segment) in segments.iter().enumerate() {
        if node.is_null() {
            let prefix = segments[..depth].join(".");
            *node = shape
                .and_then(|shape| lookup(shape, &prefix))
                .filter(|found| found.is_object())
                .map_or_else(|| Value::Object(Map::new()), zeroed);
        }
        let Value::Object(map) = node else {
            return Err(CoreError::invalid(format!(
                "field mask path '{path}' descends into a non-message field"
            )));
        };
        if depth + 1 == segments.len() {
            map.insert((*segment).to_owned(), field);
            return Ok(());
        }
        node = map.entry((*segment).to_owned()).or_insert(Value::Null);
    }
    Ok(())
}

/// Reset the leaf at `path` to its zero value, if every sub-message on the
/// way is present.
fn clear_path(root: &mut Value, path: &str) {
    let mut node = root;
    for segment in path.split('.') {
        match node.get_mut(segment) {
            Some(next) => node = next,
            None => return,
        }
    }
    let zero = zeroed(node);
    *node = zero;
}

/// The zero value of a JSON node: empty scalars, and objects with every
/// leaf zeroed.
fn zeroed(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) => Value::Bool(false),
        Value::Number(_) => Value::from(0),
        Value::String(_) => Value::String(String::new()),
        Value::Array(_) => Value::Array(Vec::new()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), zeroed(value)))
                .collect(),
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Inner {
        a: i64,
        b: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Outer {
        name: String,
        level: f32,
        inner: Option<Inner>,
    }

    fn sample() -> Outer {
        Outer {
            name: "ahu".into(),
            level: 2.5,
            inner: Some(Inner {
                a: 7,
                b: "x".into(),
            }),
        }
    }

    #[test]
    fn empty_mask_filters_nothing() {
        let v = sample();
        assert_eq!(FieldMask::default().filter(&v).unwrap(), v);
    }

    #[test]
    fn filter_keeps_only_named_fields() {
        let got = FieldMask::single("level").filter(&sample()).unwrap();
        assert_eq!(
            got,
            Outer {
                level: 2.5,
                ..Outer::default()
            }
        );
    }

    #[test]
    fn merge_copies_nested_field_only() {
        let dst = sample();
        let src = Outer {
            name: "ignored".into(),
            level: 9.0,
            inner: Some(Inner {
                a: 42,
                b: "ignored".into(),
            }),
        };
        let got = FieldMask::single("inner.a").merge(&dst, &src).unwrap();
        assert_eq!(got.name, "ahu");
        assert!((got.level - 2.5).abs() < f32::EPSILON);
        assert_eq!(got.inner.unwrap(), Inner { a: 42, b: "x".into() });
    }

    #[test]
    fn filter_nested_field_into_unset_template() {
        let got = FieldMask::single("inner.a").filter(&sample()).unwrap();
        assert_eq!(
            got,
            Outer {
                inner: Some(Inner {
                    a: 7,
                    b: String::new()
                }),
                ..Outer::default()
            }
        );
    }

    #[test]
    fn filter_nested_field_of_unset_source() {
        let got = FieldMask::single("inner.a").filter(&Outer::default()).unwrap();
        assert_eq!(got, Outer::default());
    }

    #[test]
    fn merge_nested_field_onto_unset_destination() {
        let dst = Outer {
            name: "ahu".into(),
            ..Outer::default()
        };
        let got = FieldMask::single("inner.a").merge(&dst, &sample()).unwrap();
        assert_eq!(got.name, "ahu");
        assert_eq!(
            got.inner,
            Some(Inner {
                a: 7,
                b: String::new()
            })
        );
    }

    #[test]
    fn merge_from_unset_source_clears_leaf() {
        let got = FieldMask::single("inner.a")
            .merge(&sample(), &Outer::default())
            .unwrap();
        assert_eq!(
            got.inner,
            Some(Inner {
                a: 0,
                b: "x".into()
            })
        );
    }

    #[test]
    fn unknown_path_is_rejected() {
        let err = FieldMask::single("nope").filter(&sample()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn message_with_field_sets_single_value() {
        let got: Outer = message_with_field("level", serde_json::json!(4.0)).unwrap();
        assert!((got.level - 4.0).abs() < f32::EPSILON);
        assert_eq!(got.name, "");
    }

    #[test]
    fn parses_comma_separated_paths() {
        let mask: FieldMask = "name, level,,inner.a".parse().unwrap();
        assert_eq!(mask.paths(), ["name", "level", "inner.a"]);
        assert_eq!(mask.to_string(), "name,level,inner.a");
    }
}
