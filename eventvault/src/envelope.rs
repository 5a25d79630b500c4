//! Stored record shapes.
//!
//! An [`EventEnvelope`] wraps one immutable domain fact or one entity
//! snapshot; a [`ReadModelEnvelope`] wraps one versioned derived document.

use crate::errors::{RegistryError, RegistryResult};
use crate::types::{
    EntityId, EntityTypeName, EventTypeName, ReadModelId, ReadModelTypeName, Timestamp, UniqueId,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key holding framework metadata inside a read model value.
pub const METADATA_FIELD: &str = "_metadata";

/// Key of the version number inside [`METADATA_FIELD`].
pub const VERSION_FIELD: &str = "version";

/// Which collection an event envelope belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// A domain event in the append-only log
    #[default]
    Event,
    /// A materialized reduction of an entity's events
    Snapshot,
}

/// An event or entity snapshot with its storage metadata.
///
/// Once stored, the payload and entity identity never change. The only
/// permitted mutation is tombstoning via [`EventEnvelope::tombstone`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Event or snapshot
    pub kind: EnvelopeKind,
    /// Entity type the envelope belongs to
    pub entity_type_name: EntityTypeName,
    /// Entity instance the envelope belongs to
    #[serde(rename = "entityID")]
    pub entity_id: EntityId,
    /// Event type name, or the entity type name for snapshots
    pub type_name: EventTypeName,
    /// Domain payload
    pub value: Value,
    /// Creation time; events are read back in this order
    pub created_at: Timestamp,
    /// Request that produced the event
    #[serde(default, rename = "requestID", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Soft-delete time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
    /// For snapshots, creation time of the last event reduced into it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshotted_event_created_at: Option<Timestamp>,
    /// For snapshots, when the snapshot was persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted_at: Option<Timestamp>,
}

impl EventEnvelope {
    /// A domain event.
    pub const fn event(
        entity_type_name: EntityTypeName,
        entity_id: EntityId,
        type_name: EventTypeName,
        value: Value,
        created_at: Timestamp,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Event,
            entity_type_name,
            entity_id,
            type_name,
            value,
            created_at,
            request_id: None,
            deleted_at: None,
            snapshotted_event_created_at: None,
            persisted_at: None,
        }
    }

    /// An entity snapshot capturing events up to `snapshotted_event_created_at`.
    pub const fn snapshot(
        entity_type_name: EntityTypeName,
        entity_id: EntityId,
        type_name: EventTypeName,
        value: Value,
        created_at: Timestamp,
        snapshotted_event_created_at: Timestamp,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Snapshot,
            entity_type_name,
            entity_id,
            type_name,
            value,
            created_at,
            request_id: None,
            deleted_at: None,
            snapshotted_event_created_at: Some(snapshotted_event_created_at),
            persisted_at: None,
        }
    }

    /// Attaches the originating request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Stamps the persistence time.
    #[must_use]
    pub const fn with_persisted_at(mut self, persisted_at: Timestamp) -> Self {
        self.persisted_at = Some(persisted_at);
        self
    }

    /// The soft-deleted form: payload emptied, deletion time recorded.
    #[must_use]
    pub fn tombstone(mut self, deleted_at: Timestamp) -> Self {
        self.value = Value::Object(Map::new());
        self.deleted_at = Some(deleted_at);
        self
    }

    /// Returns true once tombstoned.
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns true for snapshots.
    pub fn is_snapshot(&self) -> bool {
        self.kind == EnvelopeKind::Snapshot
    }
}

/// An event envelope together with its registry-assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEventEnvelope {
    /// Registry-assigned identifier
    pub id: UniqueId,
    /// The stored envelope
    #[serde(flatten)]
    pub envelope: EventEnvelope,
}

/// A versioned read model document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadModelEnvelope {
    /// Read model type
    pub type_name: ReadModelTypeName,
    /// Stable id, mirrored from `value.id`
    pub id: ReadModelId,
    /// The document
    pub value: Value,
}

impl ReadModelEnvelope {
    /// Wraps `value`, which must be an object carrying a string `id`.
    pub fn new(type_name: ReadModelTypeName, value: Value) -> RegistryResult<Self> {
        let raw_id = match value.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(RegistryError::InvalidReadModel(format!(
                    "{type_name} value has no `id`"
                )))
            }
        };
        let id = ReadModelId::try_new(raw_id)
            .map_err(|error| RegistryError::InvalidReadModel(error.to_string()))?;
        Ok(Self {
            type_name,
            id,
            value,
        })
    }

    /// The declared version, `1` when the metadata carries none.
    pub fn version(&self) -> u64 {
        self.value
            .get(METADATA_FIELD)
            .and_then(|metadata| metadata.get(VERSION_FIELD))
            .and_then(Value::as_u64)
            .unwrap_or(1)
    }

    /// Sets the declared version.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        if let Value::Object(fields) = &mut self.value {
            let metadata = fields
                .entry(METADATA_FIELD)
                .or_insert_with(|| Value::Object(Map::new()));
            if !metadata.is_object() {
                *metadata = Value::Object(Map::new());
            }
            if let Value::Object(metadata) = metadata {
                metadata.insert(VERSION_FIELD.to_string(), Value::from(version));
            }
        }
        self
    }
}

/// A read model as kept by a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredReadModel {
    /// Unique key derived from type, id and version
    pub unique_key: String,
    /// The stored document
    pub envelope: ReadModelEnvelope,
}

impl StoredReadModel {
    /// Derives the unique key and wraps `envelope`.
    pub fn new(envelope: ReadModelEnvelope) -> Self {
        let unique_key = format!(
            "{}:{}:{}",
            envelope.type_name,
            envelope.id,
            envelope.version()
        );
        Self {
            unique_key,
            envelope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cart_event() -> EventEnvelope {
        EventEnvelope::event(
            EntityTypeName::try_new("Cart").unwrap(),
            EntityId::try_new("1").unwrap(),
            EventTypeName::try_new("ProductAdded").unwrap(),
            json!({"sku": "A"}),
            Timestamp::parse("2024-01-01T00:00:00Z").unwrap(),
        )
    }

    #[test]
    fn envelopes_serialize_with_framework_field_names() {
        let stored = StoredEventEnvelope {
            id: UniqueId::new(),
            envelope: cart_event().with_request_id("req-1"),
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["kind"], json!("event"));
        assert_eq!(json["entityTypeName"], json!("Cart"));
        assert_eq!(json["entityID"], json!("1"));
        assert_eq!(json["requestID"], json!("req-1"));
        assert!(json.get("deletedAt").is_none());

        let back: StoredEventEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, stored);
    }

    #[test]
    fn tombstone_clears_payload_and_sets_deleted_at() {
        let deleted_at = Timestamp::parse("2024-02-01T00:00:00Z").unwrap();
        let tombstone = cart_event().tombstone(deleted_at);
        assert!(tombstone.is_deleted());
        assert_eq!(tombstone.value, json!({}));
        assert_eq!(tombstone.entity_id.as_ref(), "1");
    }

    #[test]
    fn read_model_requires_an_id() {
        let type_name = ReadModelTypeName::try_new("User").unwrap();
        assert!(ReadModelEnvelope::new(type_name.clone(), json!({"name": "x"})).is_err());
        assert!(ReadModelEnvelope::new(type_name.clone(), json!({"id": ""})).is_err());
        let envelope = ReadModelEnvelope::new(type_name, json!({"id": "u1"})).unwrap();
        assert_eq!(envelope.id.as_ref(), "u1");
    }

    #[test]
    fn version_defaults_to_one_and_can_be_set() {
        let type_name = ReadModelTypeName::try_new("User").unwrap();
        let envelope = ReadModelEnvelope::new(type_name, json!({"id": "u1"})).unwrap();
        assert_eq!(envelope.version(), 1);

        let bumped = envelope.with_version(4);
        assert_eq!(bumped.version(), 4);
        assert_eq!(bumped.value["_metadata"]["version"], json!(4));
        assert_eq!(StoredReadModel::new(bumped).unique_key, "User:u1:4");
    }
}
