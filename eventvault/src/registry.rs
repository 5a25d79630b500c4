//! Registry contracts and the query descriptions they accept.
//!
//! Backends implement [`EventRegistry`] and [`ReadModelRegistry`]. Matching,
//! ordering and pagination live here on the query types so that every
//! backend answers a query the same way; a backend only decides which
//! candidates to look at.

use crate::envelope::{
    EnvelopeKind, EventEnvelope, ReadModelEnvelope, StoredEventEnvelope, StoredReadModel,
};
use crate::errors::RegistryResult;
use crate::filter::{values_equal, Filter};
use crate::path::FieldPath;
use crate::projection::Projection;
use crate::sort::SortBy;
use crate::types::{
    EntityId, EntityTypeName, EventTypeName, ReadModelId, ReadModelTypeName, Timestamp, UniqueId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Creation-time ordering of event query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first
    #[default]
    Asc,
    /// Newest first
    Desc,
}

/// Range conditions on a timestamp. Unset bounds are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    /// Strictly after
    pub gt: Option<Timestamp>,
    /// At or after
    pub gte: Option<Timestamp>,
    /// Strictly before
    pub lt: Option<Timestamp>,
    /// At or before
    pub lte: Option<Timestamp>,
}

impl TimeRange {
    /// Returns true if `instant` satisfies every bound.
    pub fn contains(&self, instant: &Timestamp) -> bool {
        self.gt.map_or(true, |bound| *instant > bound)
            && self.gte.map_or(true, |bound| *instant >= bound)
            && self.lt.map_or(true, |bound| *instant < bound)
            && self.lte.map_or(true, |bound| *instant <= bound)
    }
}

/// Selection criteria for events or snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Collection to read; events unless asked otherwise
    pub kind: EnvelopeKind,
    /// Exact entity type
    pub entity_type_name: Option<EntityTypeName>,
    /// Exact entity id
    pub entity_id: Option<EntityId>,
    /// Entity id must be one of these
    pub entity_ids: Option<Vec<EntityId>>,
    /// Exact event type
    pub type_name: Option<EventTypeName>,
    /// Bounds on `created_at`
    pub created_at: TimeRange,
    /// `Some(false)` keeps live envelopes only, `Some(true)` tombstones only
    pub deleted: Option<bool>,
}

impl EventQuery {
    /// Matches every event.
    pub fn events() -> Self {
        Self::default()
    }

    /// Matches every snapshot.
    pub fn snapshots() -> Self {
        Self {
            kind: EnvelopeKind::Snapshot,
            ..Self::default()
        }
    }

    /// Restricts to one entity.
    #[must_use]
    pub fn for_entity(mut self, entity_type_name: EntityTypeName, entity_id: EntityId) -> Self {
        self.entity_type_name = Some(entity_type_name);
        self.entity_id = Some(entity_id);
        self
    }

    /// Restricts to any of the listed entity ids.
    #[must_use]
    pub fn for_entity_ids(mut self, entity_ids: impl IntoIterator<Item = EntityId>) -> Self {
        self.entity_ids = Some(entity_ids.into_iter().collect());
        self
    }

    /// Restricts to one entity type.
    #[must_use]
    pub fn of_entity_type(mut self, entity_type_name: EntityTypeName) -> Self {
        self.entity_type_name = Some(entity_type_name);
        self
    }

    /// Restricts to one event type.
    #[must_use]
    pub fn of_type(mut self, type_name: EventTypeName) -> Self {
        self.type_name = Some(type_name);
        self
    }

    /// Keeps envelopes created strictly after `instant`.
    #[must_use]
    pub const fn created_after(mut self, instant: Timestamp) -> Self {
        self.created_at.gt = Some(instant);
        self
    }

    /// Keeps envelopes created at or after `instant`.
    #[must_use]
    pub const fn created_from(mut self, instant: Timestamp) -> Self {
        self.created_at.gte = Some(instant);
        self
    }

    /// Keeps envelopes created strictly before `instant`.
    #[must_use]
    pub const fn created_before(mut self, instant: Timestamp) -> Self {
        self.created_at.lt = Some(instant);
        self
    }

    /// Keeps envelopes created at or before `instant`.
    #[must_use]
    pub const fn created_until(mut self, instant: Timestamp) -> Self {
        self.created_at.lte = Some(instant);
        self
    }

    /// Filters on the existence of the soft-delete timestamp.
    #[must_use]
    pub const fn deleted(mut self, exists: bool) -> Self {
        self.deleted = Some(exists);
        self
    }

    /// The `(entity type, entity id)` index key, when both are fixed.
    pub fn entity_key(&self) -> Option<(EntityTypeName, EntityId)> {
        Some((self.entity_type_name.clone()?, self.entity_id.clone()?))
    }

    /// Returns true if `envelope` satisfies every condition.
    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        envelope.kind == self.kind
            && self
                .entity_type_name
                .as_ref()
                .map_or(true, |name| *name == envelope.entity_type_name)
            && self
                .entity_id
                .as_ref()
                .map_or(true, |id| *id == envelope.entity_id)
            && self
                .entity_ids
                .as_ref()
                .map_or(true, |ids| ids.contains(&envelope.entity_id))
            && self
                .type_name
                .as_ref()
                .map_or(true, |name| *name == envelope.type_name)
            && self.created_at.contains(&envelope.created_at)
            && self
                .deleted
                .map_or(true, |exists| envelope.is_deleted() == exists)
    }

    /// Orders matching candidates by creation time and truncates to `limit`.
    pub fn select<'a, I>(
        &self,
        candidates: I,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Vec<StoredEventEnvelope>
    where
        I: IntoIterator<Item = (&'a UniqueId, &'a EventEnvelope)>,
    {
        let mut selected: Vec<(&UniqueId, &EventEnvelope)> = candidates
            .into_iter()
            .filter(|(_, envelope)| self.matches(envelope))
            .collect();
        // ties on created_at keep id order, which follows insertion
        selected.sort_by(|(left_id, left), (right_id, right)| {
            let by_time = left.created_at.cmp(&right.created_at);
            let ordering = match order {
                SortOrder::Asc => by_time,
                SortOrder::Desc => by_time.reverse(),
            };
            ordering.then_with(|| left_id.cmp(right_id))
        });
        selected
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(id, envelope)| StoredEventEnvelope {
                id: *id,
                envelope: envelope.clone(),
            })
            .collect()
    }

    /// The matching snapshot with the greatest snapshotted-event time.
    pub fn latest_snapshot<'a, I>(&self, candidates: I) -> Option<StoredEventEnvelope>
    where
        I: IntoIterator<Item = (&'a UniqueId, &'a EventEnvelope)>,
    {
        let query = Self {
            kind: EnvelopeKind::Snapshot,
            ..self.clone()
        };
        candidates
            .into_iter()
            .filter(|(_, envelope)| query.matches(envelope))
            .max_by(|(left_id, left), (right_id, right)| {
                left.snapshotted_event_created_at
                    .cmp(&right.snapshotted_event_created_at)
                    .then_with(|| left_id.cmp(right_id))
            })
            .map(|(id, envelope)| StoredEventEnvelope {
                id: *id,
                envelope: envelope.clone(),
            })
    }
}

/// Selection, ordering, pagination and projection of read models.
///
/// Execution order: match, sort, skip, limit, project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadModelQuery {
    /// Exact read model type
    pub type_name: Option<ReadModelTypeName>,
    /// Exact document id
    pub id: Option<ReadModelId>,
    /// Equality constraints on `value.<path>`
    pub value_equals: Vec<(FieldPath, Value)>,
    /// General filter tree evaluated against the value
    pub filter: Option<Filter>,
    /// Ordering keys
    pub sort_by: SortBy,
    /// Number of sorted matches to skip
    pub skip: Option<usize>,
    /// Maximum number of results after skipping
    pub limit: Option<usize>,
    /// Field selection applied to each result
    pub projection: Option<Projection>,
}

impl ReadModelQuery {
    /// Matches every read model.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches every read model of one type.
    pub fn of_type(type_name: ReadModelTypeName) -> Self {
        Self {
            type_name: Some(type_name),
            ..Self::default()
        }
    }

    /// Restricts to one document id.
    #[must_use]
    pub fn with_id(mut self, id: ReadModelId) -> Self {
        self.id = Some(id);
        self
    }

    /// Requires `value.<path>` to equal `expected`.
    #[must_use]
    pub fn where_value(mut self, path: impl AsRef<str>, expected: impl Into<Value>) -> Self {
        self.value_equals
            .push((FieldPath::parse(path.as_ref()), expected.into()));
        self
    }

    /// Sets the filter tree.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sets the ordering.
    #[must_use]
    pub fn with_sort(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    /// Skips the first `skip` sorted matches.
    #[must_use]
    pub const fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Selects fields of each result.
    #[must_use]
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Returns true if `envelope` satisfies type, id, value and filter conditions.
    pub fn matches(&self, envelope: &ReadModelEnvelope) -> bool {
        self.type_name
            .as_ref()
            .map_or(true, |name| *name == envelope.type_name)
            && self.id.as_ref().map_or(true, |id| *id == envelope.id)
            && self.value_equals.iter().all(|(path, expected)| {
                path.resolve(&envelope.value)
                    .is_some_and(|actual| values_equal(actual, expected))
            })
            && self
                .filter
                .as_ref()
                .map_or(true, |filter| filter.matches(&envelope.value))
    }

    /// Runs the full pipeline over `candidates`.
    pub fn execute<'a, I>(&self, candidates: I) -> Vec<ReadModelEnvelope>
    where
        I: IntoIterator<Item = &'a ReadModelEnvelope>,
    {
        let mut matched: Vec<&ReadModelEnvelope> = candidates
            .into_iter()
            .filter(|envelope| self.matches(envelope))
            .collect();
        self.sort_by.sort(&mut matched, |envelope| &envelope.value);
        matched
            .into_iter()
            .skip(self.skip.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .map(|envelope| match &self.projection {
                Some(projection) => ReadModelEnvelope {
                    type_name: envelope.type_name.clone(),
                    id: envelope.id.clone(),
                    value: projection.apply(&envelope.value),
                },
                None => envelope.clone(),
            })
            .collect()
    }
}

/// Append-only home of the event log and entity snapshots.
#[async_trait]
pub trait EventRegistry: Send + Sync {
    /// Persists an event or snapshot and returns its new id.
    async fn store(&self, envelope: EventEnvelope) -> RegistryResult<UniqueId>;

    /// Matching envelopes ordered by creation time, truncated to `limit`.
    async fn query(
        &self,
        query: &EventQuery,
        order: SortOrder,
        limit: Option<usize>,
    ) -> RegistryResult<Vec<StoredEventEnvelope>>;

    /// The matching snapshot with the greatest snapshotted-event time.
    async fn query_latest_snapshot(
        &self,
        query: &EventQuery,
    ) -> RegistryResult<Option<StoredEventEnvelope>>;

    /// Records that `event_id` entered the dispatch pipeline.
    ///
    /// Returns true only the first time an id is presented, atomically with
    /// respect to concurrent callers.
    async fn store_dispatched(&self, event_id: &UniqueId) -> RegistryResult<bool>;

    /// Overwrites the envelope stored under `id`, or hard-removes it when
    /// `replacement` is `None`. Returns false if `id` is unknown.
    async fn replace_or_delete_item(
        &self,
        id: &UniqueId,
        replacement: Option<EventEnvelope>,
    ) -> RegistryResult<bool>;

    /// Clears every collection and index, returning the number of envelopes removed.
    async fn delete_all(&self) -> RegistryResult<usize>;

    /// Number of envelopes `query` would return without a limit.
    ///
    /// `None` means [`EventQuery::events`]: every event, snapshots excluded.
    async fn count(&self, query: Option<&EventQuery>) -> RegistryResult<usize>;

    /// Whether the registry can serve requests.
    async fn is_up(&self) -> bool {
        true
    }

    /// Backend-specific health details.
    async fn details(&self) -> RegistryResult<Value>;

    /// Locations of the backing storage.
    fn urls(&self) -> Vec<String>;
}

/// Versioned document store for read models.
#[async_trait]
pub trait ReadModelRegistry: Send + Sync {
    /// Stores a document under optimistic concurrency.
    ///
    /// Version 0 is rejected as [`crate::RegistryError::InvalidReadModel`].
    /// Version 1 always inserts (or overwrites). A higher version replaces
    /// the stored document only if its version equals
    /// `expected_current_version`; otherwise the write fails with
    /// [`crate::RegistryError::OptimisticConcurrency`].
    async fn store(
        &self,
        envelope: ReadModelEnvelope,
        expected_current_version: u64,
    ) -> RegistryResult<StoredReadModel>;

    /// Runs `query`.
    async fn query(&self, query: &ReadModelQuery) -> RegistryResult<Vec<ReadModelEnvelope>>;

    /// Removes one document. Returns 0 when nothing matched.
    async fn delete_by_id(
        &self,
        id: &ReadModelId,
        type_name: &ReadModelTypeName,
    ) -> RegistryResult<usize>;

    /// Clears every document, returning how many were removed.
    async fn delete_all(&self) -> RegistryResult<usize>;

    /// Number of documents matching `query`, ignoring pagination.
    async fn count(&self, query: Option<&ReadModelQuery>) -> RegistryResult<usize>;

    /// Whether the registry can serve requests.
    async fn is_up(&self) -> bool {
        true
    }

    /// Backend-specific health details.
    async fn details(&self) -> RegistryResult<Value>;

    /// Locations of the backing storage.
    fn urls(&self) -> Vec<String>;
}

#[async_trait]
impl<R: EventRegistry + ?Sized> EventRegistry for std::sync::Arc<R> {
    async fn store(&self, envelope: EventEnvelope) -> RegistryResult<UniqueId> {
        (**self).store(envelope).await
    }

    async fn query(
        &self,
        query: &EventQuery,
        order: SortOrder,
        limit: Option<usize>,
    ) -> RegistryResult<Vec<StoredEventEnvelope>> {
        (**self).query(query, order, limit).await
    }

    async fn query_latest_snapshot(
        &self,
        query: &EventQuery,
    ) -> RegistryResult<Option<StoredEventEnvelope>> {
        (**self).query_latest_snapshot(query).await
    }

    async fn store_dispatched(&self, event_id: &UniqueId) -> RegistryResult<bool> {
        (**self).store_dispatched(event_id).await
    }

    async fn replace_or_delete_item(
        &self,
        id: &UniqueId,
        replacement: Option<EventEnvelope>,
    ) -> RegistryResult<bool> {
        (**self).replace_or_delete_item(id, replacement).await
    }

    async fn delete_all(&self) -> RegistryResult<usize> {
        (**self).delete_all().await
    }

    async fn count(&self, query: Option<&EventQuery>) -> RegistryResult<usize> {
        (**self).count(query).await
    }

    async fn is_up(&self) -> bool {
        (**self).is_up().await
    }

    async fn details(&self) -> RegistryResult<Value> {
        (**self).details().await
    }

    fn urls(&self) -> Vec<String> {
        (**self).urls()
    }
}

#[async_trait]
impl<R: ReadModelRegistry + ?Sized> ReadModelRegistry for std::sync::Arc<R> {
    async fn store(
        &self,
        envelope: ReadModelEnvelope,
        expected_current_version: u64,
    ) -> RegistryResult<StoredReadModel> {
        (**self).store(envelope, expected_current_version).await
    }

    async fn query(&self, query: &ReadModelQuery) -> RegistryResult<Vec<ReadModelEnvelope>> {
        (**self).query(query).await
    }

    async fn delete_by_id(
        &self,
        id: &ReadModelId,
        type_name: &ReadModelTypeName,
    ) -> RegistryResult<usize> {
        (**self).delete_by_id(id, type_name).await
    }

    async fn delete_all(&self) -> RegistryResult<usize> {
        (**self).delete_all().await
    }

    async fn count(&self, query: Option<&ReadModelQuery>) -> RegistryResult<usize> {
        (**self).count(query).await
    }

    async fn is_up(&self) -> bool {
        (**self).is_up().await
    }

    async fn details(&self) -> RegistryResult<Value> {
        (**self).details().await
    }

    fn urls(&self) -> Vec<String> {
        (**self).urls()
    }
}
