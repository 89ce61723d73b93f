//! Ordering of flat rows.
//!
//! Sort keys compare by type first (`null` < booleans < numbers < strings <
//! arrays < objects), then by value. A missing field sorts like `null`, below
//! every defined value. Sorting is stable.

use crate::{Direction, Record};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// Computes a sort key from a flat row.
pub type KeyFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

#[derive(Clone)]
pub(crate) enum OrderKey {
    Field(String),
    Computed(KeyFn),
}

#[derive(Clone)]
pub(crate) struct Order {
    pub key: OrderKey,
    pub direction: Direction,
}

impl Order {
    fn key_of(&self, record: &Record) -> Value {
        match &self.key {
            OrderKey::Field(field) => record.get(field).cloned().unwrap_or(Value::Null),
            OrderKey::Computed(f) => f(record),
        }
    }
}

/// Sort `records` by `orders`, earlier orders taking precedence.
pub(crate) fn sort(records: Vec<Record>, orders: &[Order]) -> Vec<Record> {
    if orders.is_empty() {
        return records;
    }
    let mut keyed: Vec<(Vec<Value>, Record)> = records
        .into_iter()
        .map(|record| (orders.iter().map(|o| o.key_of(&record)).collect(), record))
        .collect();

    keyed.sort_by(|(a, _), (b, _)| {
        for ((x, y), order) in a.iter().zip(b).zip(orders) {
            let ordering = match order.direction {
                Direction::Asc => compare_values(x, y),
                Direction::Desc => compare_values(y, x),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    keyed.into_iter().map(|(_, record)| record).collect()
}

const fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values used for sorting.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: &[Value]) -> Vec<Record> {
        values
            .iter()
            .map(|v| v.as_object().cloned().unwrap_or_default())
            .collect()
    }

    fn field(name: &str, direction: Direction) -> Order {
        Order {
            key: OrderKey::Field(name.into()),
            direction,
        }
    }

    fn names(records: &[Record]) -> Vec<&str> {
        records
            .iter()
            .filter_map(|r| r.get("name").and_then(Value::as_str))
            .collect()
    }

    #[test]
    fn missing_values_sort_first() {
        let sorted = sort(
            rows(&[json!({"name": "b", "age": 3}), json!({"name": "a"}), json!({"name": "c", "age": 1})]),
            &[field("age", Direction::Asc)],
        );
        assert_eq!(names(&sorted), vec!["a", "c", "b"]);
    }

    #[test]
    fn secondary_keys_break_ties_and_sort_is_stable() {
        let input = rows(&[
            json!({"name": "x", "group": 1, "rank": 2}),
            json!({"name": "y", "group": 1, "rank": 2}),
            json!({"name": "z", "group": 0, "rank": 9}),
            json!({"name": "w", "group": 1, "rank": 5}),
        ]);
        let sorted = sort(input, &[field("group", Direction::Asc), field("rank", Direction::Desc)]);
        assert_eq!(names(&sorted), vec!["z", "w", "x", "y"]);
    }

    #[test]
    fn computed_keys() {
        let by_length = Order {
            key: OrderKey::Computed(Arc::new(|r: &Record| {
                json!(r.get("name").and_then(Value::as_str).map_or(0, str::len))
            })),
            direction: Direction::Asc,
        };
        let sorted = sort(rows(&[json!({"name": "ccc"}), json!({"name": "a"}), json!({"name": "bb"})]), &[by_length]);
        assert_eq!(names(&sorted), vec!["a", "bb", "ccc"]);
    }

    #[test]
    fn values_order_by_type_then_value() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!(1.5), &json!(1)), Ordering::Greater);
        assert_eq!(compare_values(&json!("10"), &json!(2)), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &json!(false)), Ordering::Less);
    }
}
