//! Multi-key sorting of JSON documents.
//!
//! A sort specification may be nested (`{"address": {"city": "ASC"}}`); it
//! is flattened once into an ordered list of `(path, direction)` keys, in
//! declared order. Ties on one key fall through to the next.

use crate::filter::compare_numbers;
use crate::path::FieldPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Sort direction of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    /// Ascending order
    Asc,
    /// Descending order
    Desc,
}

impl SortDirection {
    fn parse(text: &str) -> Option<Self> {
        if text.eq_ignore_ascii_case("asc") {
            Some(Self::Asc)
        } else if text.eq_ignore_ascii_case("desc") {
            Some(Self::Desc)
        } else {
            None
        }
    }
}

/// One flattened sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// The field to order by
    pub path: FieldPath,
    /// The sort direction
    pub direction: SortDirection,
}

/// An ordered list of sort keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortBy {
    keys: Vec<SortKey>,
}

impl SortBy {
    /// No ordering.
    pub const fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Appends a key; earlier keys take precedence.
    #[must_use]
    pub fn then(mut self, path: impl AsRef<str>, direction: SortDirection) -> Self {
        self.keys.push(SortKey {
            path: FieldPath::parse(path.as_ref()),
            direction,
        });
        self
    }

    /// Flattens a possibly nested `{field: "ASC" | "DESC"}` specification.
    ///
    /// Entries whose value is neither a direction nor a nested object are
    /// ignored.
    pub fn from_json(spec: &Value) -> Self {
        let mut keys = Vec::new();
        flatten(spec, &FieldPath::default(), &mut keys);
        Self { keys }
    }

    /// The flattened keys in precedence order.
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Returns true when no key is declared.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Compares two documents key by key.
    pub fn compare(&self, left: &Value, right: &Value) -> Ordering {
        self.keys
            .iter()
            .map(|key| {
                let ordering = compare_values(key.path.resolve(left), key.path.resolve(right));
                match key.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// Stable in-place sort of `items` by the document `value_of` returns.
    pub fn sort<T>(&self, items: &mut [T], value_of: impl Fn(&T) -> &Value) {
        if self.is_empty() {
            return;
        }
        items.sort_by(|left, right| self.compare(value_of(left), value_of(right)));
    }
}

fn flatten(spec: &Value, prefix: &FieldPath, keys: &mut Vec<SortKey>) {
    let Value::Object(entries) = spec else {
        return;
    };
    for (field, value) in entries {
        let path = prefix.join(&FieldPath::parse(field));
        match value {
            Value::String(direction) => {
                if let Some(direction) = SortDirection::parse(direction) {
                    keys.push(SortKey { path, direction });
                }
            }
            Value::Object(_) => flatten(value, &path, keys),
            _ => {}
        }
    }
}

const fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

/// Total order over optional JSON values.
///
/// Missing < null < booleans < numbers < strings < arrays < objects; values
/// of the same kind compare naturally, arrays element-wise.
pub fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (Some(Value::Bool(l)), Some(Value::Bool(r))) => l.cmp(r),
        (Some(Value::Number(l)), Some(Value::Number(r))) => {
            compare_numbers(l, r).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(l)), Some(Value::String(r))) => l.cmp(r),
        (Some(Value::Array(l)), Some(Value::Array(r))) => l
            .iter()
            .zip(r.iter())
            .map(|(l, r)| compare_values(Some(l), Some(r)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| l.len().cmp(&r.len())),
        (Some(l @ Value::Object(_)), Some(r @ Value::Object(_))) => {
            l.to_string().cmp(&r.to_string())
        }
        _ => type_rank(left).cmp(&type_rank(right)),
    }
}
