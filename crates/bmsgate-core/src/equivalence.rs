// ── Value equivalence ──
//
// Decides whether a write actually changed a cell. Equivalent writes do not
// advance the change time and never reach subscribers.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::Message;

/// Default tolerance for [`Equivalence::FloatTolerance`].
pub const DEFAULT_FLOAT_TOLERANCE: f64 = 1e-4;

type EquivalenceFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// How a cell compares its current value against a candidate write.
pub enum Equivalence<T> {
    /// Structural equality (`PartialEq`).
    Exact,
    /// Structural equality, except numbers within the tolerance compare equal.
    /// Keeps sensor jitter from turning into a notification storm.
    FloatTolerance(f64),
    /// Caller-supplied comparison.
    Custom(EquivalenceFn<T>),
}

impl<T: Message> Equivalence<T> {
    /// Float-tolerant equivalence using [`DEFAULT_FLOAT_TOLERANCE`].
    pub fn tolerant() -> Self {
        Self::FloatTolerance(DEFAULT_FLOAT_TOLERANCE)
    }

    pub fn custom(f: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    pub fn equivalent(&self, a: &T, b: &T) -> bool {
        match self {
            Self::Exact => a == b,
            Self::FloatTolerance(eps) => {
                if a == b {
                    return true;
                }
                match (serde_json::to_value(a), serde_json::to_value(b)) {
                    (Ok(a), Ok(b)) => json_approx_eq(&a, &b, *eps),
                    _ => false,
                }
            }
            Self::Custom(f) => f(a, b),
        }
    }
}

impl<T> Default for Equivalence<T> {
    fn default() -> Self {
        Self::Exact
    }
}

impl<T> Clone for Equivalence<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Exact => Self::Exact,
            Self::FloatTolerance(eps) => Self::FloatTolerance(*eps),
            Self::Custom(f) => Self::Custom(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for Equivalence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => f.write_str("Exact"),
            Self::FloatTolerance(eps) => f.debug_tuple("FloatTolerance").field(eps).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Compare two JSON trees, treating numbers within `eps` as equal.
pub(crate) fn json_approx_eq(a: &Value, b: &Value, eps: f64) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() <= eps,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len()
                && xs.iter().zip(ys).all(|(x, y)| json_approx_eq(x, y, eps))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| json_approx_eq(x, y, eps)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Reading {
        usage: f32,
        unit: String,
    }

    fn reading(usage: f32) -> Reading {
        Reading {
            usage,
            unit: "kWh".into(),
        }
    }

    #[test]
    fn exact_distinguishes_jitter() {
        let eq = Equivalence::<Reading>::Exact;
        assert!(eq.equivalent(&reading(1.0), &reading(1.0)));
        assert!(!eq.equivalent(&reading(1.0), &reading(1.000_01)));
    }

    #[test]
    fn tolerance_absorbs_jitter_but_not_real_changes() {
        let eq = Equivalence::<Reading>::tolerant();
        assert!(eq.equivalent(&reading(1.0), &reading(1.000_01)));
        assert!(!eq.equivalent(&reading(1.0), &reading(1.01)));
    }

    #[test]
    fn tolerance_still_compares_non_numeric_fields() {
        let eq = Equivalence::<Reading>::tolerant();
        let mut other = reading(1.0);
        other.unit = "MWh".into();
        assert!(!eq.equivalent(&reading(1.0), &other));
    }

    #[test]
    fn custom_comparator_is_used() {
        let eq = Equivalence::<Reading>::custom(|a, b| a.unit == b.unit);
        assert!(eq.equivalent(&reading(1.0), &reading(50.0)));
    }
}
