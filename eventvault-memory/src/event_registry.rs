use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use eventvault::index::SecondaryIndex;
use eventvault::{
    EntityId, EntityTypeName, EnvelopeKind, EventEnvelope, EventQuery, EventRegistry,
    RegistryError, RegistryResult, SortOrder, StoredEventEnvelope, UniqueId,
};
use serde_json::{json, Value};
use tracing::{debug, instrument};

type EntityKey = (EntityTypeName, EntityId);

/// One collection of envelopes plus its per-entity index.
#[derive(Debug, Default)]
struct Collection {
    items: BTreeMap<UniqueId, EventEnvelope>,
    by_entity: SecondaryIndex<EntityKey, UniqueId>,
}

impl Collection {
    fn insert(&mut self, id: UniqueId, envelope: EventEnvelope) {
        self.by_entity.insert(entity_key(&envelope), id);
        self.items.insert(id, envelope);
    }

    fn remove(&mut self, id: &UniqueId) -> Option<EventEnvelope> {
        let removed = self.items.remove(id)?;
        self.by_entity.remove(&entity_key(&removed), id);
        Some(removed)
    }

    /// Envelopes worth matching against `query`, via the index when it applies.
    fn candidates<'a>(&'a self, query: &EventQuery) -> Vec<(&'a UniqueId, &'a EventEnvelope)> {
        match query.entity_key() {
            Some(key) => self
                .by_entity
                .get(&key)
                .filter_map(|id| self.items.get_key_value(id))
                .collect(),
            None => self.items.iter().collect(),
        }
    }

    fn clear(&mut self) -> usize {
        let removed = self.items.len();
        self.items.clear();
        self.by_entity.clear();
        removed
    }
}

fn entity_key(envelope: &EventEnvelope) -> EntityKey {
    (envelope.entity_type_name.clone(), envelope.entity_id.clone())
}

#[derive(Debug, Default)]
struct EventCollections {
    events: Collection,
    snapshots: Collection,
    dispatched: HashSet<UniqueId>,
}

impl EventCollections {
    const fn collection(&self, kind: EnvelopeKind) -> &Collection {
        match kind {
            EnvelopeKind::Event => &self.events,
            EnvelopeKind::Snapshot => &self.snapshots,
        }
    }

    fn collection_mut(&mut self, kind: EnvelopeKind) -> &mut Collection {
        match kind {
            EnvelopeKind::Event => &mut self.events,
            EnvelopeKind::Snapshot => &mut self.snapshots,
        }
    }

    fn insert(&mut self, id: UniqueId, envelope: EventEnvelope) {
        self.collection_mut(envelope.kind).insert(id, envelope);
    }

    fn from_records(
        records: impl IntoIterator<Item = StoredEventEnvelope>,
        dispatched: impl IntoIterator<Item = UniqueId>,
    ) -> Self {
        let mut collections = Self::default();
        for record in records {
            if let Some(kind) = collections.locate(&record.id) {
                collections.collection_mut(kind).remove(&record.id);
            }
            collections.insert(record.id, record.envelope);
        }
        collections.dispatched.extend(dispatched);
        collections
    }

    fn locate(&self, id: &UniqueId) -> Option<EnvelopeKind> {
        if self.events.items.contains_key(id) {
            Some(EnvelopeKind::Event)
        } else if self.snapshots.items.contains_key(id) {
            Some(EnvelopeKind::Snapshot)
        } else {
            None
        }
    }
}

/// Thread-safe in-memory event and snapshot log.
///
/// Events and snapshots live in separate collections, each indexed by
/// `(entity type, entity id)`. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventRegistry {
    collections: Arc<RwLock<EventCollections>>,
}

impl InMemoryEventRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a registry from previously stored records.
    ///
    /// A record whose id appears twice keeps the later occurrence.
    pub fn from_records(
        records: impl IntoIterator<Item = StoredEventEnvelope>,
        dispatched: impl IntoIterator<Item = UniqueId>,
    ) -> Self {
        Self {
            collections: Arc::new(RwLock::new(EventCollections::from_records(
                records, dispatched,
            ))),
        }
    }

    /// Replaces every collection with the given records, rebuilding indices.
    ///
    /// Clones observe the new contents.
    pub fn restore(
        &self,
        records: impl IntoIterator<Item = StoredEventEnvelope>,
        dispatched: impl IntoIterator<Item = UniqueId>,
    ) -> RegistryResult<()> {
        let rebuilt = EventCollections::from_records(records, dispatched);
        *self.write("restore")? = rebuilt;
        Ok(())
    }

    /// Forgets a dispatch mark. Returns false if `event_id` was not marked.
    pub fn unmark_dispatched(&self, event_id: &UniqueId) -> RegistryResult<bool> {
        Ok(self.write("unmark_dispatched")?.dispatched.remove(event_id))
    }

    /// Every record of one kind, in id order.
    pub fn records(&self, kind: EnvelopeKind) -> RegistryResult<Vec<StoredEventEnvelope>> {
        let collections = self.read("records")?;
        Ok(collections
            .collection(kind)
            .items
            .iter()
            .map(|(id, envelope)| StoredEventEnvelope {
                id: *id,
                envelope: envelope.clone(),
            })
            .collect())
    }

    /// Every id recorded as dispatched, in id order.
    pub fn dispatched_ids(&self) -> RegistryResult<Vec<UniqueId>> {
        let collections = self.read("dispatched_ids")?;
        let mut ids: Vec<UniqueId> = collections.dispatched.iter().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// The collection holding `id`, if any.
    pub fn locate(&self, id: &UniqueId) -> RegistryResult<Option<EnvelopeKind>> {
        Ok(self.read("locate")?.locate(id))
    }

    fn read(&self, operation: &'static str) -> RegistryResult<RwLockReadGuard<'_, EventCollections>> {
        self.collections
            .read()
            .map_err(|_| RegistryError::StoreFailure { operation })
    }

    fn write(
        &self,
        operation: &'static str,
    ) -> RegistryResult<RwLockWriteGuard<'_, EventCollections>> {
        self.collections
            .write()
            .map_err(|_| RegistryError::StoreFailure { operation })
    }
}

#[async_trait]
impl EventRegistry for InMemoryEventRegistry {
    #[instrument(skip_all, fields(kind = ?envelope.kind, entity_type = %envelope.entity_type_name, entity_id = %envelope.entity_id))]
    async fn store(&self, envelope: EventEnvelope) -> RegistryResult<UniqueId> {
        let id = UniqueId::new();
        self.write("store")?.insert(id, envelope);
        debug!(%id, "stored envelope");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn query(
        &self,
        query: &EventQuery,
        order: SortOrder,
        limit: Option<usize>,
    ) -> RegistryResult<Vec<StoredEventEnvelope>> {
        let collections = self.read("query")?;
        let candidates = collections.collection(query.kind).candidates(query);
        Ok(query.select(candidates, order, limit))
    }

    #[instrument(skip(self))]
    async fn query_latest_snapshot(
        &self,
        query: &EventQuery,
    ) -> RegistryResult<Option<StoredEventEnvelope>> {
        let collections = self.read("query_latest_snapshot")?;
        let candidates = collections.snapshots.candidates(query);
        Ok(query.latest_snapshot(candidates))
    }

    #[instrument(skip(self))]
    async fn store_dispatched(&self, event_id: &UniqueId) -> RegistryResult<bool> {
        Ok(self.write("store_dispatched")?.dispatched.insert(*event_id))
    }

    #[instrument(skip(self, replacement), fields(replace = replacement.is_some()))]
    async fn replace_or_delete_item(
        &self,
        id: &UniqueId,
        replacement: Option<EventEnvelope>,
    ) -> RegistryResult<bool> {
        let mut collections = self.write("replace_or_delete_item")?;
        let Some(kind) = collections.locate(id) else {
            return Ok(false);
        };
        collections.collection_mut(kind).remove(id);
        if let Some(envelope) = replacement {
            collections.insert(*id, envelope);
        }
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn delete_all(&self) -> RegistryResult<usize> {
        let mut collections = self.write("delete_all")?;
        let removed = collections.events.clear() + collections.snapshots.clear();
        collections.dispatched.clear();
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn count(&self, query: Option<&EventQuery>) -> RegistryResult<usize> {
        let collections = self.read("count")?;
        let everything = EventQuery::events();
        let query = query.unwrap_or(&everything);
        Ok(collections
            .collection(query.kind)
            .candidates(query)
            .into_iter()
            .filter(|(_, envelope)| query.matches(envelope))
            .count())
    }

    async fn is_up(&self) -> bool {
        !self.collections.is_poisoned()
    }

    async fn details(&self) -> RegistryResult<Value> {
        let collections = self.read("details")?;
        Ok(json!({
            "events": collections.events.items.len(),
            "snapshots": collections.snapshots.items.len(),
            "dispatched": collections.dispatched.len(),
        }))
    }

    fn urls(&self) -> Vec<String> {
        vec!["memory://events".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventvault::{EventTypeName, Timestamp};

    fn at(text: &str) -> Timestamp {
        Timestamp::parse(text).unwrap()
    }

    fn cart_event(entity_id: &str, created_at: &str) -> EventEnvelope {
        EventEnvelope::event(
            EntityTypeName::try_new("Cart").unwrap(),
            EntityId::try_new(entity_id).unwrap(),
            EventTypeName::try_new("ProductAdded").unwrap(),
            json!({"sku": "A"}),
            at(created_at),
        )
    }

    fn cart_snapshot(entity_id: &str, snapshotted: &str) -> EventEnvelope {
        EventEnvelope::snapshot(
            EntityTypeName::try_new("Cart").unwrap(),
            EntityId::try_new(entity_id).unwrap(),
            EventTypeName::try_new("Cart").unwrap(),
            json!({"items": 1}),
            at(snapshotted),
            at(snapshotted),
        )
    }

    fn cart_query(entity_id: &str) -> EventQuery {
        EventQuery::events().for_entity(
            EntityTypeName::try_new("Cart").unwrap(),
            EntityId::try_new(entity_id).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_clone_shares_storage() {
        let registry = InMemoryEventRegistry::new();
        #[allow(clippy::redundant_clone)]
        let other = registry.clone();
        assert!(Arc::ptr_eq(&registry.collections, &other.collections));
    }

    #[tokio::test]
    async fn test_store_routes_by_kind_and_indexes_entity() {
        let registry = InMemoryEventRegistry::new();
        let event_id = registry
            .store(cart_event("1", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        let snapshot_id = registry
            .store(cart_snapshot("1", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(registry.locate(&event_id).unwrap(), Some(EnvelopeKind::Event));
        assert_eq!(
            registry.locate(&snapshot_id).unwrap(),
            Some(EnvelopeKind::Snapshot)
        );

        let collections = registry.collections.read().unwrap();
        let key = (
            EntityTypeName::try_new("Cart").unwrap(),
            EntityId::try_new("1").unwrap(),
        );
        assert_eq!(collections.events.by_entity.get(&key).count(), 1);
        assert_eq!(collections.snapshots.by_entity.get(&key).count(), 1);
    }

    #[tokio::test]
    async fn test_query_uses_entity_index() {
        let registry = InMemoryEventRegistry::new();
        registry
            .store(cart_event("1", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        registry
            .store(cart_event("2", "2024-01-02T00:00:00Z"))
            .await
            .unwrap();

        let found = registry
            .query(&cart_query("2"), SortOrder::Asc, None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].envelope.entity_id.as_ref(), "2");
    }

    #[tokio::test]
    async fn test_hard_delete_drops_index_reference() {
        let registry = InMemoryEventRegistry::new();
        let id = registry
            .store(cart_snapshot("1", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        assert!(registry.replace_or_delete_item(&id, None).await.unwrap());
        assert!(!registry.replace_or_delete_item(&id, None).await.unwrap());
        assert!(registry.collections.read().unwrap().snapshots.by_entity.is_empty());
    }

    #[tokio::test]
    async fn test_from_records_round_trips_records() {
        let registry = InMemoryEventRegistry::new();
        let id = registry
            .store(cart_event("1", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        registry.store_dispatched(&id).await.unwrap();

        let rebuilt = InMemoryEventRegistry::from_records(
            registry.records(EnvelopeKind::Event).unwrap(),
            registry.dispatched_ids().unwrap(),
        );
        assert_eq!(
            rebuilt.records(EnvelopeKind::Event).unwrap(),
            registry.records(EnvelopeKind::Event).unwrap()
        );
        assert!(!rebuilt.store_dispatched(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_count_without_query_counts_events_like_query() {
        let registry = InMemoryEventRegistry::new();
        registry
            .store(cart_event("1", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        registry
            .store(cart_snapshot("1", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        let listed = registry
            .query(&EventQuery::events(), SortOrder::Asc, None)
            .await
            .unwrap();
        assert_eq!(registry.count(None).await.unwrap(), listed.len());
        assert_eq!(registry.count(None).await.unwrap(), 1);
        assert_eq!(
            registry.count(Some(&EventQuery::snapshots())).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_restore_replaces_contents_for_every_clone() {
        let registry = InMemoryEventRegistry::new();
        let shared = registry.clone();
        let kept = registry
            .store(cart_event("1", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        let before = registry.records(EnvelopeKind::Event).unwrap();

        let dropped = registry
            .store(cart_event("2", "2024-01-02T00:00:00Z"))
            .await
            .unwrap();
        registry.store_dispatched(&dropped).await.unwrap();
        registry.restore(before, Vec::new()).unwrap();

        assert_eq!(shared.locate(&kept).unwrap(), Some(EnvelopeKind::Event));
        assert_eq!(shared.locate(&dropped).unwrap(), None);
        assert!(shared.dispatched_ids().unwrap().is_empty());
        assert_eq!(shared.query(&cart_query("2"), SortOrder::Asc, None).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_unmark_dispatched_allows_a_fresh_mark() {
        let registry = InMemoryEventRegistry::new();
        let id = UniqueId::new();
        assert!(registry.store_dispatched(&id).await.unwrap());
        assert!(registry.unmark_dispatched(&id).unwrap());
        assert!(!registry.unmark_dispatched(&id).unwrap());
        assert!(registry.store_dispatched(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_details_report_collection_sizes() {
        let registry = InMemoryEventRegistry::new();
        registry
            .store(cart_event("1", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        assert!(registry.is_up().await);
        assert_eq!(
            registry.details().await.unwrap(),
            json!({"events": 1, "snapshots": 0, "dispatched": 0})
        );
    }
}
