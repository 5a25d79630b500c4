//! Translation from the nested external filter form into the typed tree.
//!
//! The external form nests objects for field paths (`{"address": {"city":
//! {"eq": "Oslo"}}}`) and may place `and`/`or`/`not` at any depth; those
//! combinators inherit the path prefix they appear under. String matching
//! operators are compiled into a single regular-expression operator.

use super::{operand_text, ElementMatch, FieldPredicate, Filter, Operator, Pattern};
use crate::path::FieldPath;
use serde_json::Value;

const OPERATOR_KEYS: &[&str] = &[
    "eq",
    "ne",
    "lt",
    "gt",
    "lte",
    "gte",
    "in",
    "isDefined",
    "exists",
    "contains",
    "beginsWith",
    "regex",
    "iRegex",
    "includes",
];

/// Converts an external, nested filter into a [`Filter`].
///
/// Purely syntactic and total. Malformed patterns yield an operator that
/// matches nothing.
pub fn convert_filter(external: &Value) -> Filter {
    convert_level(external, &FieldPath::default())
}

fn convert_level(external: &Value, prefix: &FieldPath) -> Filter {
    let Value::Object(entries) = external else {
        return Filter::everything();
    };
    Filter::All(
        entries
            .iter()
            .map(|(key, value)| convert_entry(key, value, prefix))
            .collect(),
    )
}

fn convert_children(value: &Value, prefix: &FieldPath) -> Vec<Filter> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| convert_level(item, prefix))
            .collect(),
        other => vec![convert_level(other, prefix)],
    }
}

fn convert_entry(key: &str, value: &Value, prefix: &FieldPath) -> Filter {
    match key {
        "and" => Filter::All(convert_children(value, prefix)),
        "or" => Filter::Any(convert_children(value, prefix)),
        "not" => Filter::Not(Box::new(convert_level(value, prefix))),
        _ => {
            let path = prefix.join(&FieldPath::parse(key));
            match value {
                Value::Object(operands) if operands.keys().any(|k| is_operator(k)) => {
                    Filter::Field {
                        path,
                        predicate: convert_operators(value),
                    }
                }
                Value::Object(_) => convert_level(value, &path),
                literal => Filter::Field {
                    path,
                    predicate: FieldPredicate::Equals(literal.clone()),
                },
            }
        }
    }
}

fn is_operator(key: &str) -> bool {
    OPERATOR_KEYS.contains(&key)
}

fn convert_operators(value: &Value) -> FieldPredicate {
    match value {
        Value::Object(operands) => FieldPredicate::Operators(
            operands
                .iter()
                .map(|(key, operand)| convert_operator(key, operand))
                .collect(),
        ),
        literal => FieldPredicate::Equals(literal.clone()),
    }
}

fn convert_operator(key: &str, operand: &Value) -> Operator {
    match key {
        "contains" => Operator::Matches(Pattern::substring(&operand_text(operand))),
        "beginsWith" => Operator::Matches(Pattern::prefix(&operand_text(operand))),
        "regex" => Operator::Matches(Pattern::new(operand_text(operand), false)),
        "iRegex" => Operator::Matches(Pattern::new(operand_text(operand), true)),
        "includes" => match operand {
            Value::String(text) => Operator::Matches(Pattern::substring(text)),
            Value::Object(_) => {
                Operator::Includes(ElementMatch::Matching(Box::new(convert_filter(operand))))
            }
            scalar => Operator::Includes(ElementMatch::Equals(scalar.clone())),
        },
        known if is_operator(known) => Operator::from_entry(known, operand),
        nested => Operator::Nested(nested.to_string(), convert_operators(operand)),
    }
}
