use super::{ElementMatch, FieldPredicate, Filter, Operator};
use crate::path::step;
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// Decides whether `value` satisfies `filter`.
///
/// Independent of any storage engine. The empty filter always matches.
pub fn evaluate(value: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::All(children) => children.iter().all(|child| evaluate(value, child)),
        Filter::Any(children) => children.iter().any(|child| evaluate(value, child)),
        Filter::Not(child) => !evaluate(value, child),
        Filter::Field { path, predicate } => matches_predicate(path.resolve(value), predicate),
    }
}

fn matches_predicate(field: Option<&Value>, predicate: &FieldPredicate) -> bool {
    match predicate {
        FieldPredicate::Equals(expected) => field.is_some_and(|actual| values_equal(actual, expected)),
        FieldPredicate::Operators(operators) => operators
            .iter()
            .all(|operator| apply_operator(field, operator)),
    }
}

fn apply_operator(field: Option<&Value>, operator: &Operator) -> bool {
    match operator {
        Operator::Eq(expected) => field.is_some_and(|actual| values_equal(actual, expected)),
        Operator::Ne(expected) => !field.is_some_and(|actual| values_equal(actual, expected)),
        Operator::Lt(bound) => ordering(field, bound) == Some(Ordering::Less),
        Operator::Gt(bound) => ordering(field, bound) == Some(Ordering::Greater),
        Operator::Lte(bound) => matches!(
            ordering(field, bound),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Operator::Gte(bound) => matches!(
            ordering(field, bound),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::In(candidates) => field.is_some_and(|actual| {
            candidates
                .iter()
                .any(|candidate| values_equal(actual, candidate))
        }),
        Operator::IsDefined(expected) => is_present(field) == *expected,
        Operator::Contains(text) => field
            .and_then(Value::as_str)
            .is_some_and(|actual| actual.contains(text.as_str())),
        Operator::BeginsWith(text) => field
            .and_then(Value::as_str)
            .is_some_and(|actual| actual.starts_with(text.as_str())),
        Operator::Matches(pattern) => match field {
            Some(Value::String(actual)) => pattern.is_match(actual),
            // compiled `includes` on a list of strings
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .any(|item| pattern.is_match(item)),
            _ => false,
        },
        Operator::Includes(element) => includes(field, element),
        Operator::Nested(segment, predicate) => {
            matches_predicate(field.and_then(|value| step(value, segment)), predicate)
        }
    }
}

fn includes(field: Option<&Value>, element: &ElementMatch) -> bool {
    match (field, element) {
        (Some(Value::Array(items)), ElementMatch::Text(text)) => items
            .iter()
            .filter_map(Value::as_str)
            .any(|item| item.contains(text.as_str())),
        (Some(Value::String(actual)), ElementMatch::Text(text)) => actual.contains(text.as_str()),
        (Some(Value::Array(items)), ElementMatch::Equals(expected)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        (Some(Value::Array(items)), ElementMatch::Matching(filter)) => {
            items.iter().any(|item| evaluate(item, filter))
        }
        _ => false,
    }
}

/// Neither missing nor the `null` absence marker.
fn is_present(field: Option<&Value>) -> bool {
    field.is_some_and(|value| !value.is_null())
}

/// Strict equality, with numbers compared by value (`1` equals `1.0`).
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => compare_numbers(l, r) == Some(Ordering::Equal),
        _ => left == right,
    }
}

/// Ordered comparison for numbers, strings and booleans; `None` otherwise.
fn ordering(field: Option<&Value>, bound: &Value) -> Option<Ordering> {
    match (field?, bound) {
        (Value::Number(l), Value::Number(r)) => compare_numbers(l, r),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// Integers compare exactly; anything else falls back to floating point.
pub(crate) fn compare_numbers(left: &Number, right: &Number) -> Option<Ordering> {
    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        return Some(l.cmp(&r));
    }
    if let (Some(l), Some(r)) = (left.as_u64(), right.as_u64()) {
        return Some(l.cmp(&r));
    }
    left.as_f64()?.partial_cmp(&right.as_f64()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matches(filter: Value, value: Value) -> bool {
        evaluate(&value, &Filter::from_json(&filter))
    }

    #[test]
    fn empty_filter_matches_anything() {
        assert!(matches(json!({}), json!({"a": 1})));
        assert!(matches(json!(null), json!(42)));
    }

    #[test]
    fn literal_means_equality() {
        assert!(matches(json!({"name": "Ana"}), json!({"name": "Ana"})));
        assert!(!matches(json!({"name": "Ana"}), json!({"name": "Bea"})));
        assert!(!matches(json!({"name": "Ana"}), json!({})));
        assert!(matches(json!({"score": 1}), json!({"score": 1.0})));
    }

    #[test]
    fn comparison_operators_are_typed() {
        let doc = json!({"age": 30, "name": "mario", "since": "2024-01-02T00:00:00Z"});
        assert!(matches(json!({"age": {"gt": 18, "lte": 30}}), doc.clone()));
        assert!(!matches(json!({"age": {"lt": 30}}), doc.clone()));
        assert!(matches(json!({"name": {"gte": "luigi"}}), doc.clone()));
        assert!(matches(
            json!({"since": {"gt": "2024-01-01T00:00:00Z"}}),
            doc.clone()
        ));
        // mixed types never compare
        assert!(!matches(json!({"age": {"gt": "10"}}), doc.clone()));
        assert!(!matches(json!({"missing": {"lt": 5}}), doc));
    }

    #[test]
    fn first_failing_operator_fails_the_field() {
        assert!(!matches(json!({"age": {"gt": 10, "lt": 20}}), json!({"age": 25})));
    }

    #[test]
    fn ne_and_in() {
        assert!(matches(json!({"status": {"ne": "closed"}}), json!({"status": "open"})));
        assert!(matches(json!({"status": {"ne": "closed"}}), json!({})));
        assert!(matches(json!({"status": {"in": ["a", "b"]}}), json!({"status": "b"})));
        assert!(!matches(json!({"status": {"in": ["a", "b"]}}), json!({"status": "c"})));
    }

    #[test]
    fn is_defined_treats_null_as_absent() {
        assert!(matches(json!({"x": {"isDefined": true}}), json!({"x": 0})));
        assert!(matches(json!({"x": {"isDefined": false}}), json!({"x": null})));
        assert!(matches(json!({"x": {"exists": false}}), json!({})));
        assert!(!matches(json!({"x": {"exists": true}}), json!({})));
    }

    #[test]
    fn string_operators_require_strings() {
        let doc = json!({"title": "Hello world", "n": 12});
        assert!(matches(json!({"title": {"contains": "lo w"}}), doc.clone()));
        assert!(matches(json!({"title": {"beginsWith": "Hell"}}), doc.clone()));
        assert!(!matches(json!({"n": {"contains": "1"}}), doc.clone()));
        assert!(matches(json!({"title": {"regex": "^H.*d$"}}), doc.clone()));
        assert!(!matches(json!({"title": {"regex": "^hello"}}), doc.clone()));
        assert!(matches(json!({"title": {"iRegex": "^hello"}}), doc.clone()));
        assert!(!matches(json!({"n": {"regex": "12"}}), doc));
    }

    #[test]
    fn malformed_regex_is_a_non_match() {
        assert!(!matches(json!({"title": {"regex": "(*"}}), json!({"title": "(*"})));
        assert!(matches(
            json!({"not": {"title": {"regex": "(*"}}}),
            json!({"title": "(*"})
        ));
    }

    #[test]
    fn includes_on_arrays() {
        let doc = json!({
            "tags": ["red-apple", "green"],
            "sizes": [1, 2, 3],
            "items": [{"sku": "A", "qty": 1}, {"sku": "B", "qty": 5}],
        });
        assert!(matches(json!({"tags": {"includes": "apple"}}), doc.clone()));
        assert!(!matches(json!({"tags": {"includes": "blue"}}), doc.clone()));
        assert!(matches(json!({"sizes": {"includes": 2}}), doc.clone()));
        assert!(matches(
            json!({"items": {"includes": {"sku": "B", "qty": {"gt": 4}}}}),
            doc.clone()
        ));
        assert!(!matches(
            json!({"items": {"includes": {"sku": "A", "qty": {"gt": 4}}}}),
            doc.clone()
        ));
        assert!(!matches(json!({"missing": {"includes": "x"}}), doc));
    }

    #[test]
    fn logical_combinators() {
        let doc = json!({"a": 1, "b": 2});
        assert!(matches(json!({"and": [{"a": 1}, {"b": 2}]}), doc.clone()));
        assert!(!matches(json!({"and": [{"a": 1}, {"b": 3}]}), doc.clone()));
        assert!(matches(json!({"or": [{"a": 9}, {"b": 2}]}), doc.clone()));
        assert!(!matches(json!({"or": []}), doc.clone()));
        assert!(matches(json!({"not": {"a": 9}}), doc.clone()));
        assert!(!matches(json!({"not": {"a": 1}}), doc));
    }

    #[test]
    fn dotted_paths_and_nested_continuations_agree() {
        let doc = json!({"address": {"city": "Oslo", "zip": "0150"}});
        assert!(matches(json!({"address.city": "Oslo"}), doc.clone()));
        assert!(matches(json!({"address": {"city": {"eq": "Oslo"}}}), doc.clone()));
        assert!(matches(json!({"address": {"zip": {"beginsWith": "01"}}}), doc.clone()));
        assert!(!matches(json!({"address.country": {"eq": "NO"}}), doc));
    }
}
