use super::clock::MonotonicClock;
use crate::envelope::{EventEnvelope, StoredEventEnvelope};
use crate::errors::RegistryResult;
use crate::health::HealthReport;
use crate::registry::{EventQuery, EventRegistry, SortOrder};
use crate::types::{EntityId, EntityTypeName, EventTypeName, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{info, instrument};

/// An event emitted by a handler, not yet stamped or stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Owning entity type
    pub entity_type_name: EntityTypeName,
    /// Owning entity id
    pub entity_id: EntityId,
    /// Event type
    pub type_name: EventTypeName,
    /// Payload
    pub value: Value,
    /// Request that caused the event
    pub request_id: Option<String>,
}

/// An entity reduction, not yet stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSnapshot {
    /// Entity type
    pub entity_type_name: EntityTypeName,
    /// Entity id
    pub entity_id: EntityId,
    /// Entity type name recorded as the snapshot's type
    pub type_name: EventTypeName,
    /// Reduced entity state
    pub value: Value,
    /// Creation time of the last event folded into `value`
    pub snapshotted_event_created_at: Timestamp,
}

/// Criteria for [`EventStoreAdapter::search`]. Unset fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSearchParameters {
    /// Entity type
    pub entity_type_name: Option<EntityTypeName>,
    /// Entity id, only meaningful together with an entity type
    pub entity_id: Option<EntityId>,
    /// Event type
    pub type_name: Option<EventTypeName>,
    /// Inclusive lower bound on creation time
    pub from: Option<Timestamp>,
    /// Inclusive upper bound on creation time
    pub to: Option<Timestamp>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

/// One search hit, flattened for external consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSearchResponse {
    /// Request that caused the event
    #[serde(rename = "requestID", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Event type
    #[serde(rename = "type")]
    pub type_name: EventTypeName,
    /// Entity type
    pub entity: EntityTypeName,
    /// Entity id
    #[serde(rename = "entityID")]
    pub entity_id: EntityId,
    /// Creation time
    pub created_at: Timestamp,
    /// Payload, `{}` for tombstones
    pub value: Value,
    /// Soft-delete time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

impl From<StoredEventEnvelope> for EventSearchResponse {
    fn from(stored: StoredEventEnvelope) -> Self {
        let envelope = stored.envelope;
        Self {
            request_id: envelope.request_id,
            type_name: envelope.type_name,
            entity: envelope.entity_type_name,
            entity_id: envelope.entity_id,
            created_at: envelope.created_at,
            value: envelope.value,
            deleted_at: envelope.deleted_at,
        }
    }
}

/// A page of distinct entity ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedEntityIds {
    /// Ids on this page, most recently active first
    pub items: Vec<EntityId>,
    /// Number of ids on this page
    pub count: usize,
    /// Offset of the next page; `None` once the ids are exhausted
    pub cursor: Option<usize>,
}

/// Identifies the event (and dependent snapshots) a caller wants removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDeletionParameters {
    /// Entity type
    pub entity_type_name: EntityTypeName,
    /// Entity id
    pub entity_id: EntityId,
    /// Creation time of the event
    pub created_at: Timestamp,
}

/// Event-store side of the adapter contract.
#[derive(Debug)]
pub struct EventStoreAdapter<R> {
    registry: R,
    clock: MonotonicClock,
}

impl<R: EventRegistry> EventStoreAdapter<R> {
    /// Wraps `registry`.
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            clock: MonotonicClock::new(),
        }
    }

    /// The wrapped registry.
    pub const fn registry(&self) -> &R {
        &self.registry
    }

    /// Stamps and stores events in order.
    #[instrument(skip_all, fields(count = events.len()))]
    pub async fn store(&self, events: Vec<NewEvent>) -> RegistryResult<Vec<StoredEventEnvelope>> {
        let mut stored = Vec::with_capacity(events.len());
        for event in events {
            let mut envelope = EventEnvelope::event(
                event.entity_type_name,
                event.entity_id,
                event.type_name,
                event.value,
                self.clock.tick()?,
            );
            envelope.request_id = event.request_id;
            let id = self.registry.store(envelope.clone()).await?;
            stored.push(StoredEventEnvelope { id, envelope });
        }
        Ok(stored)
    }

    /// Stores a snapshot, stamping its creation and persistence time.
    #[instrument(skip_all, fields(entity_type = %snapshot.entity_type_name, entity_id = %snapshot.entity_id))]
    pub async fn store_snapshot(&self, snapshot: NewSnapshot) -> RegistryResult<StoredEventEnvelope> {
        let now = self.clock.tick()?;
        let envelope = EventEnvelope::snapshot(
            snapshot.entity_type_name,
            snapshot.entity_id,
            snapshot.type_name,
            snapshot.value,
            now,
            snapshot.snapshotted_event_created_at,
        )
        .with_persisted_at(now);
        let id = self.registry.store(envelope.clone()).await?;
        Ok(StoredEventEnvelope { id, envelope })
    }

    /// Live events of one entity created strictly after `since`, oldest first.
    #[instrument(skip(self))]
    pub async fn for_entity_since(
        &self,
        entity_type_name: &EntityTypeName,
        entity_id: &EntityId,
        since: Option<Timestamp>,
    ) -> RegistryResult<Vec<StoredEventEnvelope>> {
        let mut query = EventQuery::events()
            .for_entity(entity_type_name.clone(), entity_id.clone())
            .deleted(false);
        if let Some(since) = since {
            query = query.created_after(since);
        }
        self.registry.query(&query, SortOrder::Asc, None).await
    }

    /// The snapshot of one entity with the latest snapshotted-event time.
    #[instrument(skip(self))]
    pub async fn latest_entity_snapshot(
        &self,
        entity_type_name: &EntityTypeName,
        entity_id: &EntityId,
    ) -> RegistryResult<Option<StoredEventEnvelope>> {
        let query =
            EventQuery::snapshots().for_entity(entity_type_name.clone(), entity_id.clone());
        self.registry.query_latest_snapshot(&query).await
    }

    /// Events matching `parameters`, newest first.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        parameters: &EventSearchParameters,
    ) -> RegistryResult<Vec<EventSearchResponse>> {
        let query = EventQuery {
            entity_type_name: parameters.entity_type_name.clone(),
            entity_id: parameters.entity_id.clone(),
            type_name: parameters.type_name.clone(),
            ..EventQuery::events()
        };
        let query = match parameters.from {
            Some(from) => query.created_from(from),
            None => query,
        };
        let query = match parameters.to {
            Some(to) => query.created_until(to),
            None => query,
        };
        let found = self
            .registry
            .query(&query, SortOrder::Desc, parameters.limit)
            .await?;
        Ok(found.into_iter().map(EventSearchResponse::from).collect())
    }

    /// Distinct ids of live entities of one type, most recently active first.
    ///
    /// `cursor` is the offset returned by the previous page.
    #[instrument(skip(self))]
    pub async fn search_entities_ids(
        &self,
        limit: usize,
        cursor: Option<usize>,
        entity_type_name: &EntityTypeName,
    ) -> RegistryResult<PaginatedEntityIds> {
        let query = EventQuery::events()
            .of_entity_type(entity_type_name.clone())
            .deleted(false);
        let events = self.registry.query(&query, SortOrder::Desc, None).await?;

        let mut seen = HashSet::new();
        let offset = cursor.unwrap_or(0);
        let mut distinct = events
            .into_iter()
            .map(|stored| stored.envelope.entity_id)
            .filter(|id| seen.insert(id.clone()))
            .skip(offset);
        let items: Vec<EntityId> = distinct.by_ref().take(limit).collect();
        let exhausted = distinct.next().is_none();

        Ok(PaginatedEntityIds {
            count: items.len(),
            cursor: (!exhausted).then_some(offset + items.len()),
            items,
        })
    }

    /// Records the event as dispatched; true only the first time.
    #[instrument(skip_all, fields(event_id = %event.id))]
    pub async fn store_dispatched(&self, event: &StoredEventEnvelope) -> RegistryResult<bool> {
        self.registry.store_dispatched(&event.id).await
    }

    /// Live events of the entity created exactly at `parameters.created_at`.
    #[instrument(skip(self))]
    pub async fn find_deletable_event(
        &self,
        parameters: &EventDeletionParameters,
    ) -> RegistryResult<Vec<StoredEventEnvelope>> {
        let query = EventQuery::events()
            .for_entity(
                parameters.entity_type_name.clone(),
                parameters.entity_id.clone(),
            )
            .created_from(parameters.created_at)
            .created_until(parameters.created_at)
            .deleted(false);
        self.registry.query(&query, SortOrder::Asc, None).await
    }

    /// Snapshots of the entity that fold in the event at `parameters.created_at`.
    #[instrument(skip(self))]
    pub async fn find_deletable_snapshot(
        &self,
        parameters: &EventDeletionParameters,
    ) -> RegistryResult<Vec<StoredEventEnvelope>> {
        let query = EventQuery::snapshots().for_entity(
            parameters.entity_type_name.clone(),
            parameters.entity_id.clone(),
        );
        let snapshots = self.registry.query(&query, SortOrder::Asc, None).await?;
        Ok(snapshots
            .into_iter()
            .filter(|stored| {
                stored
                    .envelope
                    .snapshotted_event_created_at
                    .is_some_and(|captured| captured >= parameters.created_at)
            })
            .collect())
    }

    /// Tombstones each event in place.
    #[instrument(skip_all, fields(count = events.len()))]
    pub async fn delete_event(&self, events: &[StoredEventEnvelope]) -> RegistryResult<()> {
        for stored in events {
            let tombstone = stored.envelope.clone().tombstone(self.clock.tick()?);
            if !self
                .registry
                .replace_or_delete_item(&stored.id, Some(tombstone))
                .await?
            {
                info!(event_id = %stored.id, "event to delete was not found");
            }
        }
        Ok(())
    }

    /// Hard-deletes each snapshot.
    #[instrument(skip_all, fields(count = snapshots.len()))]
    pub async fn delete_snapshot(&self, snapshots: &[StoredEventEnvelope]) -> RegistryResult<()> {
        for stored in snapshots {
            if !self.registry.replace_or_delete_item(&stored.id, None).await? {
                info!(snapshot_id = %stored.id, "snapshot to delete was not found");
            }
        }
        Ok(())
    }

    /// Whether the registry can serve requests.
    pub async fn is_up(&self) -> bool {
        self.registry.is_up().await
    }

    /// Backend-specific health details.
    pub async fn details(&self) -> RegistryResult<Value> {
        self.registry.details().await
    }

    /// Locations of the backing storage.
    pub fn urls(&self) -> Vec<String> {
        self.registry.urls()
    }

    /// The health triple as one report.
    pub async fn health(&self) -> HealthReport {
        if !self.is_up().await {
            return HealthReport::down("event registry is down", self.urls());
        }
        match self.details().await {
            Ok(details) => HealthReport::up(details, self.urls()),
            Err(error) => HealthReport::down(error.to_string(), self.urls()),
        }
    }
}
