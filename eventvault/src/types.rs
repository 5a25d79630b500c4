//! Core identifier and time types.
//!
//! Names and identifiers use smart constructors so that an empty or oversized
//! value can never reach a registry. Once constructed they are always valid.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Name of an entity type, e.g. `Cart`.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct EntityTypeName(String);

/// Identifier of one entity instance within its entity type.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct EntityId(String);

/// Name of a domain event type, e.g. `ProductAdded`.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct EventTypeName(String);

/// Name of a read model type, e.g. `CartReadModel`.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ReadModelTypeName(String);

/// The stable `id` carried inside a read model document.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ReadModelId(String);

/// Registry-assigned identifier of a stored event or snapshot.
///
/// Backed by a UUIDv7, so identifiers handed out later sort after earlier
/// ones within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueId(Uuid);

impl UniqueId {
    /// Generates a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UniqueId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UniqueId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for UniqueId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for UniqueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A UTC instant.
///
/// Serialized as an RFC 3339 string with a fixed microsecond precision, so
/// the lexicographic order of the serialized form and the chronological order
/// agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a new timestamp from a UTC `DateTime`.
    pub const fn new(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    /// Creates a timestamp representing the current moment, truncated to
    /// the serialized precision.
    pub fn now() -> Self {
        Self(Utc::now().trunc_subsecs(6))
    }

    /// Parses an RFC 3339 / ISO-8601 string.
    pub fn parse(text: &str) -> Result<Self, chrono::ParseError> {
        DateTime::parse_from_rfc3339(text)
            .map(|parsed| Self(parsed.with_timezone(&Utc).trunc_subsecs(6)))
    }

    /// Returns the timestamp one microsecond later.
    #[must_use]
    pub fn next_tick(self) -> Self {
        Self(self.0 + Duration::microseconds(1))
    }

    /// Returns the underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn entity_id_accepts_valid_strings(s in "[a-zA-Z0-9_-]{1,255}") {
            let id = EntityId::try_new(s.clone()).unwrap();
            prop_assert_eq!(id.as_ref(), &s);
        }

        #[test]
        fn entity_type_name_trims_whitespace(s in " {0,10}[a-zA-Z0-9_]{1,200} {0,10}") {
            let name = EntityTypeName::try_new(s.clone()).unwrap();
            prop_assert_eq!(name.as_ref(), s.trim());
        }
    }

    #[test]
    fn names_reject_blank_input() {
        assert!(EntityTypeName::try_new("   ").is_err());
        assert!(ReadModelId::try_new("").is_err());
        assert!(EventTypeName::try_new("x".repeat(256)).is_err());
    }

    #[test]
    fn unique_ids_sort_in_creation_order() {
        let first = UniqueId::new();
        let second = UniqueId::new();
        assert!(first < second);
        assert_eq!(first.to_string().parse::<UniqueId>().unwrap(), first);
    }

    #[test]
    fn timestamp_text_order_matches_chronological_order() {
        let earlier = Timestamp::parse("2024-01-01T10:00:00Z").unwrap();
        let later = earlier.next_tick();
        assert!(earlier < later);
        assert!(earlier.to_string() < later.to_string());
    }

    #[test]
    fn timestamp_serializes_as_rfc3339() {
        let ts = Timestamp::parse("2024-03-05T08:09:10.123Z").unwrap();
        let json = serde_json::to_value(ts).unwrap();
        assert_eq!(json, serde_json::json!("2024-03-05T08:09:10.123000Z"));
        assert_eq!(serde_json::from_value::<Timestamp>(json).unwrap(), ts);
    }
}
