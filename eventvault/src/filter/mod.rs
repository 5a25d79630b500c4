//! The query filter language.
//!
//! A filter is a predicate tree over a JSON value. It arrives either in the
//! canonical operator form (dotted field keys mapping to a literal or to an
//! operator object, plus `and`/`or`/`not` combinators), parsed by
//! [`Filter::from_json`], or in the nested external form produced by a query
//! layer, translated by [`convert_filter`]. Both end up as the same typed
//! tree, which [`evaluate`] walks.
//!
//! ```rust,ignore
//! let filter = Filter::from_json(&json!({
//!     "age": {"gte": 18},
//!     "or": [{"country": "ES"}, {"country": "PT"}],
//! }));
//! assert!(filter.matches(&json!({"age": 30, "country": "PT"})));
//! ```

mod convert;
mod evaluate;

pub use convert::convert_filter;
pub use evaluate::evaluate;
pub(crate) use evaluate::{compare_numbers, values_equal};

use crate::path::FieldPath;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use tracing::debug;

/// A predicate tree over a JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every child must match. The empty conjunction matches everything.
    All(Vec<Filter>),
    /// At least one child must match.
    Any(Vec<Filter>),
    /// The child must not match.
    Not(Box<Filter>),
    /// A predicate on the value found at `path`.
    Field {
        /// Where to look in the value
        path: FieldPath,
        /// What the value found there must satisfy
        predicate: FieldPredicate,
    },
}

/// What a single field must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldPredicate {
    /// Implicit equality with a literal.
    Equals(Value),
    /// Every operator must hold; evaluation stops at the first failure.
    Operators(Vec<Operator>),
}

/// A field-level operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    /// Strict equality
    Eq(Value),
    /// Strict inequality
    Ne(Value),
    /// Less than
    Lt(Value),
    /// Greater than
    Gt(Value),
    /// Less than or equal
    Lte(Value),
    /// Greater than or equal
    Gte(Value),
    /// The field equals one of the listed values
    In(Vec<Value>),
    /// `isDefined` / `exists`: presence compared with the flag
    IsDefined(bool),
    /// Substring check on a string field
    Contains(String),
    /// Prefix check on a string field
    BeginsWith(String),
    /// Regular expression (`regex`, `iRegex`, or compiled by the converter)
    Matches(Pattern),
    /// Array membership
    Includes(ElementMatch),
    /// Any unrecognized key continues the path one level deeper
    Nested(String, FieldPredicate),
}

/// The operand of `includes`.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementMatch {
    /// Some string element contains this text
    Text(String),
    /// Some element equals this scalar
    Equals(Value),
    /// Some element satisfies this sub-filter
    Matching(Box<Filter>),
}

/// A regular expression that fails safe.
///
/// A malformed source compiles to a pattern that matches nothing, so a bad
/// pattern excludes every document instead of failing the query.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    case_insensitive: bool,
    compiled: Option<Regex>,
}

impl Pattern {
    /// Compiles `source`.
    pub fn new(source: impl Into<String>, case_insensitive: bool) -> Self {
        let source = source.into();
        let compiled = match RegexBuilder::new(&source)
            .case_insensitive(case_insensitive)
            .build()
        {
            Ok(regex) => Some(regex),
            Err(error) => {
                debug!(pattern = %source, %error, "malformed filter pattern will match nothing");
                None
            }
        };
        Self {
            source,
            case_insensitive,
            compiled,
        }
    }

    /// A pattern matching any text that contains `text` literally.
    pub fn substring(text: &str) -> Self {
        Self::new(regex::escape(text), false)
    }

    /// A pattern matching any text that starts with `text` literally.
    pub fn prefix(text: &str) -> Self {
        Self::new(format!("^{}", regex::escape(text)), false)
    }

    /// The pattern source as given.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether matching ignores case.
    pub const fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// Whether the source compiled.
    pub const fn is_valid(&self) -> bool {
        self.compiled.is_some()
    }

    /// Tests `text`; always false for a malformed pattern.
    pub fn is_match(&self, text: &str) -> bool {
        self.compiled
            .as_ref()
            .is_some_and(|regex| regex.is_match(text))
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.case_insensitive == other.case_insensitive
    }
}

impl Filter {
    /// The filter that matches everything.
    pub const fn everything() -> Self {
        Self::All(Vec::new())
    }

    /// Implicit equality on `path`.
    pub fn equals(path: impl AsRef<str>, value: impl Into<Value>) -> Self {
        Self::Field {
            path: FieldPath::parse(path.as_ref()),
            predicate: FieldPredicate::Equals(value.into()),
        }
    }

    /// A single operator on `path`.
    pub fn field(path: impl AsRef<str>, operator: Operator) -> Self {
        Self::Field {
            path: FieldPath::parse(path.as_ref()),
            predicate: FieldPredicate::Operators(vec![operator]),
        }
    }

    /// Returns true when the filter has no conditions at all.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::All(children) if children.is_empty())
    }

    /// Evaluates the filter against `value`.
    pub fn matches(&self, value: &Value) -> bool {
        evaluate(value, self)
    }

    /// Parses the canonical operator form.
    ///
    /// Parsing is total: anything that is not an object matches everything,
    /// and unrecognized operator keys become nested path continuations.
    pub fn from_json(filter: &Value) -> Self {
        let Value::Object(clauses) = filter else {
            return Self::everything();
        };
        Self::All(
            clauses
                .iter()
                .map(|(key, value)| match key.as_str() {
                    "and" => Self::All(children(value)),
                    "or" => Self::Any(children(value)),
                    "not" => Self::Not(Box::new(Self::from_json(value))),
                    _ => Self::Field {
                        path: FieldPath::parse(key),
                        predicate: FieldPredicate::from_json(value),
                    },
                })
                .collect(),
        )
    }
}

fn children(value: &Value) -> Vec<Filter> {
    match value {
        Value::Array(items) => items.iter().map(Filter::from_json).collect(),
        other => vec![Filter::from_json(other)],
    }
}

impl FieldPredicate {
    /// Parses the value side of a canonical field clause.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(operators) => Self::Operators(
                operators
                    .iter()
                    .map(|(key, operand)| Operator::from_entry(key, operand))
                    .collect(),
            ),
            literal => Self::Equals(literal.clone()),
        }
    }
}

impl Operator {
    /// Parses one `key: operand` entry of an operator object.
    pub fn from_entry(key: &str, operand: &Value) -> Self {
        match key {
            "eq" => Self::Eq(operand.clone()),
            "ne" => Self::Ne(operand.clone()),
            "lt" => Self::Lt(operand.clone()),
            "gt" => Self::Gt(operand.clone()),
            "lte" => Self::Lte(operand.clone()),
            "gte" => Self::Gte(operand.clone()),
            "in" => Self::In(match operand {
                Value::Array(items) => items.clone(),
                single => vec![single.clone()],
            }),
            "isDefined" | "exists" => {
                Self::IsDefined(operand.as_bool().unwrap_or(!operand.is_null()))
            }
            "contains" => Self::Contains(operand_text(operand)),
            "beginsWith" => Self::BeginsWith(operand_text(operand)),
            "regex" => Self::Matches(Pattern::new(operand_text(operand), false)),
            "iRegex" => Self::Matches(Pattern::new(operand_text(operand), true)),
            "includes" => Self::Includes(ElementMatch::from_json(operand)),
            other => Self::Nested(other.to_string(), FieldPredicate::from_json(operand)),
        }
    }
}

impl ElementMatch {
    /// Classifies an `includes` operand.
    pub fn from_json(operand: &Value) -> Self {
        match operand {
            Value::String(text) => Self::Text(text.clone()),
            Value::Object(_) => Self::Matching(Box::new(Filter::from_json(operand))),
            scalar => Self::Equals(scalar.clone()),
        }
    }
}

/// Text form of a string operator operand.
pub(crate) fn operand_text(operand: &Value) -> String {
    match operand {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn malformed_patterns_match_nothing_and_are_traced() {
        let pattern = Pattern::new("([unclosed", false);
        assert!(!pattern.is_valid());
        assert!(!pattern.is_match("([unclosed"));
        assert!(logs_contain("malformed filter pattern"));
    }

    #[test]
    fn parses_combinators_and_fields() {
        let filter = Filter::from_json(&json!({
            "name": "Ana",
            "or": [{"age": {"lt": 18}}, {"age": {"gt": 65}}],
            "not": {"banned": true},
        }));

        let Filter::All(clauses) = filter else {
            panic!("expected a conjunction");
        };
        assert_eq!(clauses.len(), 3);
        assert_eq!(clauses[0], Filter::equals("name", "Ana"));
        assert!(matches!(&clauses[1], Filter::Any(children) if children.len() == 2));
        assert!(matches!(&clauses[2], Filter::Not(_)));
    }

    #[test]
    fn unknown_operator_keys_continue_the_path() {
        let predicate = FieldPredicate::from_json(&json!({"city": {"eq": "Oslo"}}));
        let FieldPredicate::Operators(operators) = predicate else {
            panic!("expected operators");
        };
        assert!(matches!(&operators[0], Operator::Nested(segment, _) if segment == "city"));
    }

    #[test]
    fn exists_is_an_alias_of_is_defined() {
        assert_eq!(
            Operator::from_entry("exists", &json!(false)),
            Operator::from_entry("isDefined", &json!(false))
        );
    }

    #[test]
    fn includes_operand_is_classified() {
        assert_eq!(ElementMatch::from_json(&json!("ab")), ElementMatch::Text("ab".into()));
        assert_eq!(ElementMatch::from_json(&json!(3)), ElementMatch::Equals(json!(3)));
        assert!(matches!(
            ElementMatch::from_json(&json!({"sku": "X"})),
            ElementMatch::Matching(_)
        ));
    }

    #[test]
    fn literal_patterns_escape_metacharacters() {
        assert!(Pattern::substring("a.b").is_match("xa.by"));
        assert!(!Pattern::substring("a.b").is_match("axb"));
        assert!(Pattern::prefix("(1)").is_match("(1) first"));
        assert!(!Pattern::prefix("(1)").is_match("x (1)"));
    }

    #[test]
    fn non_object_filters_match_everything() {
        assert!(Filter::from_json(&Value::Null).is_empty());
        assert!(Filter::from_json(&json!({})).matches(&json!({"any": 1})));
    }
}
