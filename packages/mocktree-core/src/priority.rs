use std::cmp::Ordering;
use std::fmt;

use serde_json::{Number, Value};

use crate::error::{Error, Result};

/// Sort priority attached to a node.
///
/// `Null` sorts before everything, numbers sort before strings, and values of
/// the same type use their natural order.
#[derive(Clone, Debug, Default)]
pub enum Priority {
    #[default]
    Null,
    Number(f64),
    Text(String),
}

impl Priority {
    pub fn is_null(&self) -> bool {
        matches!(self, Priority::Null)
    }

    /// Read a priority out of JSON. Only null, numbers and strings are valid.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Priority::Null),
            Value::Number(n) => n
                .as_f64()
                .map(Priority::from)
                .ok_or_else(|| Error::Validation(format!("priority {n} is not representable"))),
            Value::String(s) => Ok(Priority::Text(s.clone())),
            other => Err(Error::Validation(format!(
                "priority must be a number, string or null, got {other}"
            ))),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Priority::Null => Value::Null,
            Priority::Number(n) => number_to_json(*n),
            Priority::Text(s) => Value::String(s.clone()),
        }
    }
}

fn number_to_json(n: f64) -> Value {
    // Integral priorities round-trip as JSON integers.
    if n.fract() == 0.0 && n.abs() < (1u64 << 53) as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Total order over priorities.
pub fn compare_priorities(a: &Priority, b: &Priority) -> Ordering {
    match (a, b) {
        (Priority::Null, Priority::Null) => Ordering::Equal,
        (Priority::Null, _) => Ordering::Less,
        (_, Priority::Null) => Ordering::Greater,
        // Equal by value, so `-0.0` ties with `0.0`.
        (Priority::Number(x), Priority::Number(y)) => x.partial_cmp(y).unwrap_or_else(|| x.total_cmp(y)),
        (Priority::Number(_), Priority::Text(_)) => Ordering::Less,
        (Priority::Text(_), Priority::Number(_)) => Ordering::Greater,
        (Priority::Text(x), Priority::Text(y)) => x.cmp(y),
    }
}

/// Canonical ordering for siblings: priority first, key as the tie-break.
pub fn compare_children(a_priority: &Priority, a_key: &str, b_priority: &Priority, b_key: &str) -> Ordering {
    compare_priorities(a_priority, b_priority).then_with(|| a_key.cmp(b_key))
}

impl PartialEq for Priority {
    fn eq(&self, other: &Self) -> bool {
        compare_priorities(self, other) == Ordering::Equal
    }
}

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_priorities(self, other)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Null => f.write_str("null"),
            Priority::Number(n) => write!(f, "{n}"),
            Priority::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<f64> for Priority {
    fn from(value: f64) -> Self {
        // Adding positive zero turns `-0.0` into `0.0`.
        Priority::Number(value + 0.0)
    }
}

impl From<i64> for Priority {
    fn from(value: i64) -> Self {
        Priority::Number(value as f64)
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority::Number(f64::from(value))
    }
}

impl From<&str> for Priority {
    fn from(value: &str) -> Self {
        Priority::Text(value.to_string())
    }
}

impl From<String> for Priority {
    fn from(value: String) -> Self {
        Priority::Text(value)
    }
}

impl<T: Into<Priority>> From<Option<T>> for Priority {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Priority::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn null_sorts_first() {
        assert_eq!(compare_priorities(&Priority::Null, &Priority::from(-1e9)), Ordering::Less);
        assert_eq!(compare_priorities(&Priority::from(""), &Priority::Null), Ordering::Greater);
        assert_eq!(compare_priorities(&Priority::Null, &Priority::Null), Ordering::Equal);
    }

    #[test]
    fn numbers_sort_before_strings() {
        assert_eq!(compare_priorities(&Priority::from(1e12), &Priority::from("0")), Ordering::Less);
        assert_eq!(compare_priorities(&Priority::from("a"), &Priority::from(3)), Ordering::Greater);
    }

    #[test]
    fn same_type_uses_native_order() {
        assert_eq!(compare_priorities(&Priority::from(2), &Priority::from(10)), Ordering::Less);
        assert_eq!(compare_priorities(&Priority::from("10"), &Priority::from("2")), Ordering::Less);
        assert_eq!(compare_priorities(&Priority::from(1.5), &Priority::from(1.5)), Ordering::Equal);
    }

    #[test]
    fn keys_break_ties() {
        let p = Priority::from(1);
        assert_eq!(compare_children(&p, "a", &p, "b"), Ordering::Less);
        assert_eq!(compare_children(&p, "b", &p, "b"), Ordering::Equal);
        assert_eq!(
            compare_children(&Priority::Null, "z", &Priority::from(0), "a"),
            Ordering::Less
        );
    }

    #[test]
    fn json_conversion() {
        assert_eq!(Priority::from_json(&json!(3)).unwrap(), Priority::from(3));
        assert_eq!(Priority::from_json(&json!("x")).unwrap(), Priority::from("x"));
        assert_eq!(Priority::from_json(&Value::Null).unwrap(), Priority::Null);
        assert!(matches!(Priority::from_json(&json!(true)), Err(Error::Validation(_))));
        assert_eq!(Priority::from(7).to_json(), json!(7));
        assert_eq!(Priority::from(0.5).to_json(), json!(0.5));
    }

    #[test]
    fn negative_zero_equals_zero() {
        assert_eq!(Priority::from(0.0), Priority::from(-0.0));
        assert_eq!(Priority::from_json(&json!(-0.0)).unwrap(), Priority::from(0));
        assert_eq!(
            compare_children(&Priority::from(0.0), "a", &Priority::from(-0.0), "b"),
            Ordering::Less
        );
        assert_eq!(
            compare_priorities(&Priority::Number(-0.0), &Priority::Number(0.0)),
            Ordering::Equal
        );
        assert_eq!(Priority::from(-0.0).to_json(), json!(0));
    }

    fn arb_priority() -> impl Strategy<Value = Priority> {
        prop_oneof![
            Just(Priority::Null),
            (-1000i32..1000).prop_map(Priority::from),
            "[a-c]{0,3}".prop_map(Priority::from),
        ]
    }

    proptest! {
        #[test]
        fn comparator_is_antisymmetric(a in arb_priority(), b in arb_priority()) {
            prop_assert_eq!(compare_priorities(&a, &b), compare_priorities(&b, &a).reverse());
        }

        #[test]
        fn comparator_is_transitive(a in arb_priority(), b in arb_priority(), c in arb_priority()) {
            if compare_priorities(&a, &b) != Ordering::Greater
                && compare_priorities(&b, &c) != Ordering::Greater
            {
                prop_assert_ne!(compare_priorities(&a, &c), Ordering::Greater);
            }
        }
    }
}
