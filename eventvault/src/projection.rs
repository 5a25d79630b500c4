//! Field selection on read model documents.

use crate::path::{FieldPath, PathSegment};
use serde_json::{Map, Value};

/// A list of dotted selection paths.
///
/// `items[].sku` projects the `items` array keeping only `sku` inside each
/// element. Fields missing from the source are left out of the result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    paths: Vec<FieldPath>,
}

impl Projection {
    /// Builds a projection from dotted field paths.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            paths: fields
                .into_iter()
                .map(|field| FieldPath::parse(field.as_ref()))
                .collect(),
        }
    }

    /// The parsed selection paths.
    pub fn paths(&self) -> &[FieldPath] {
        &self.paths
    }

    /// Builds a new value containing only the selected fields.
    pub fn apply(&self, source: &Value) -> Value {
        let mut projected = Value::Object(Map::new());
        for path in &self.paths {
            if let Some(selected) = project_path(source, path.segments()) {
                merge(&mut projected, selected);
            }
        }
        projected
    }
}

fn project_path(source: &Value, segments: &[PathSegment]) -> Option<Value> {
    match segments.split_first() {
        None => Some(source.clone()),
        Some((PathSegment::Key(key), rest)) => {
            let Value::Object(fields) = source else {
                return None;
            };
            let selected = project_path(fields.get(key)?, rest)?;
            let mut wrapper = Map::new();
            wrapper.insert(key.clone(), selected);
            Some(Value::Object(wrapper))
        }
        Some((PathSegment::Each, rest)) => {
            let Value::Array(items) = source else {
                return None;
            };
            // keep one output element per input element
            Some(Value::Array(
                items
                    .iter()
                    .map(|item| project_path(item, rest).unwrap_or_else(|| Value::Object(Map::new())))
                    .collect(),
            ))
        }
    }
}

/// Deep merge; objects merge by key, arrays by index.
fn merge(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(fields)) => {
            for (key, value) in fields {
                match existing.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(existing), Value::Array(items)) => {
            for (index, item) in items.into_iter().enumerate() {
                match existing.get_mut(index) {
                    Some(slot) => merge(slot, item),
                    None => existing.push(item),
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "id": "u1",
            "name": "Ana",
            "address": {"city": "Lisbon", "zip": "1000"},
            "orders": [
                {"id": "o1", "total": 10, "lines": [{"sku": "A", "qty": 1}, {"sku": "B", "qty": 2}]},
                {"id": "o2", "lines": []},
                {"total": 3},
            ],
            "grid": [[{"v": 1, "w": 0}], [{"v": 2}, {"w": 5}]],
        })
    }

    #[test]
    fn selects_top_level_and_nested_fields() {
        let projected = Projection::new(["id", "address.city"]).apply(&doc());
        assert_eq!(projected, json!({"id": "u1", "address": {"city": "Lisbon"}}));
    }

    #[test]
    fn missing_fields_are_omitted() {
        let projected = Projection::new(["id", "nickname", "address.country"]).apply(&doc());
        assert_eq!(projected, json!({"id": "u1"}));
    }

    #[test]
    fn arrays_keep_order_and_count() {
        let projected = Projection::new(["orders[].id", "orders[].total"]).apply(&doc());
        assert_eq!(
            projected,
            json!({"orders": [{"id": "o1", "total": 10}, {"id": "o2"}, {"total": 3}]})
        );
    }

    #[test]
    fn nested_arrays_recurse() {
        let projected = Projection::new(["orders[].lines[].sku"]).apply(&doc());
        assert_eq!(
            projected,
            json!({"orders": [{"lines": [{"sku": "A"}, {"sku": "B"}]}, {"lines": []}, {}]})
        );

        let grid = Projection::new(["grid[][].v"]).apply(&doc());
        assert_eq!(grid, json!({"grid": [[{"v": 1}], [{"v": 2}, {}]]}));
    }

    #[test]
    fn whole_subtrees_can_be_selected() {
        let projected = Projection::new(["address"]).apply(&doc());
        assert_eq!(projected, json!({"address": {"city": "Lisbon", "zip": "1000"}}));
    }
}
