//! Dotted field paths.
//!
//! A path such as `items[].sku` is parsed once into segments and then drives
//! filter resolution, sort key extraction and projection by structural
//! matching instead of repeated string slicing.

use serde_json::Value;
use std::fmt;

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Descend into an object field (or an array index when numeric)
    Key(String),
    /// Apply the rest of the path to every element of an array
    Each,
}

/// A parsed, dot-separated path into a JSON value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    /// Parses a dotted path. A `[]` suffix on a segment marks an array;
    /// repeated suffixes (`grid[][]`) mark arrays of arrays.
    pub fn parse(dotted: &str) -> Self {
        let mut segments = Vec::new();
        for part in dotted.split('.').filter(|part| !part.is_empty()) {
            let mut name = part;
            let mut each_count = 0;
            while let Some(stripped) = name.strip_suffix("[]") {
                name = stripped;
                each_count += 1;
            }
            if !name.is_empty() {
                segments.push(PathSegment::Key(name.to_string()));
            }
            segments.extend((0..each_count).map(|_| PathSegment::Each));
        }
        Self { segments }
    }

    /// Returns the parsed segments.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Returns true for the empty path, which resolves to the root value.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns a new path with `other` appended.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Walks the path from `root`. Any missing step yields `None`.
    ///
    /// Array markers are transparent here: `tags[]` resolves to the array
    /// itself so that operators such as `includes` can inspect it.
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(root, |current, segment| match segment {
                PathSegment::Key(key) => step(current, key),
                PathSegment::Each => Some(current),
            })
    }
}

/// Resolves a single key against an object, or an index against an array.
pub(crate) fn step<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(fields) => fields.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    }
}

impl From<&str> for FieldPath {
    fn from(dotted: &str) -> Self {
        Self::parse(dotted)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            match segment {
                PathSegment::Key(key) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
                PathSegment::Each => f.write_str("[]")?,
            }
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_keys_and_array_markers() {
        let path = FieldPath::parse("order.items[].sku");
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("order".into()),
                PathSegment::Key("items".into()),
                PathSegment::Each,
                PathSegment::Key("sku".into()),
            ]
        );
        assert_eq!(path.to_string(), "order.items[].sku");
    }

    #[test]
    fn parses_arrays_of_arrays() {
        let path = FieldPath::parse("grid[][].value");
        assert_eq!(path.segments().len(), 4);
        assert_eq!(path.to_string(), "grid[][].value");
    }

    #[test]
    fn resolves_nested_values_and_indices() {
        let doc = json!({"address": {"city": "Madrid"}, "tags": ["a", "b"]});
        assert_eq!(FieldPath::parse("address.city").resolve(&doc), Some(&json!("Madrid")));
        assert_eq!(FieldPath::parse("tags.1").resolve(&doc), Some(&json!("b")));
        assert_eq!(FieldPath::parse("tags[]").resolve(&doc), Some(&json!(["a", "b"])));
        assert_eq!(FieldPath::parse("address.zip").resolve(&doc), None);
        assert_eq!(FieldPath::parse("address.city.more").resolve(&doc), None);
    }

    #[test]
    fn empty_path_resolves_to_root() {
        let doc = json!(7);
        assert!(FieldPath::parse("").is_empty());
        assert_eq!(FieldPath::parse("").resolve(&doc), Some(&doc));
    }
}
