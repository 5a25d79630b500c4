use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use eventvault::index::SecondaryIndex;
use eventvault::{
    ReadModelEnvelope, ReadModelId, ReadModelQuery, ReadModelRegistry, ReadModelTypeName,
    RegistryError, RegistryResult, StoredReadModel,
};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

type DocumentKey = (ReadModelTypeName, ReadModelId);

#[derive(Debug, Default)]
struct ReadModelCollections {
    documents: BTreeMap<DocumentKey, ReadModelEnvelope>,
    by_type: SecondaryIndex<ReadModelTypeName, ReadModelId>,
}

impl ReadModelCollections {
    fn from_records(records: impl IntoIterator<Item = StoredReadModel>) -> Self {
        let mut collections = Self::default();
        for record in records {
            collections.insert(record.envelope);
        }
        collections
    }

    fn insert(&mut self, envelope: ReadModelEnvelope) {
        self.by_type
            .insert(envelope.type_name.clone(), envelope.id.clone());
        self.documents
            .insert((envelope.type_name.clone(), envelope.id.clone()), envelope);
    }

    fn remove(&mut self, key: &DocumentKey) -> Option<ReadModelEnvelope> {
        let removed = self.documents.remove(key)?;
        self.by_type.remove(&key.0, &key.1);
        Some(removed)
    }

    /// Documents worth matching against `query`, narrowed by type and id when given.
    fn candidates(&self, query: &ReadModelQuery) -> Vec<&ReadModelEnvelope> {
        match (&query.type_name, &query.id) {
            (Some(type_name), Some(id)) => self
                .documents
                .get(&(type_name.clone(), id.clone()))
                .into_iter()
                .collect(),
            (Some(type_name), None) => self
                .by_type
                .get(type_name)
                .filter_map(|id| self.documents.get(&(type_name.clone(), id.clone())))
                .collect(),
            (None, _) => self.documents.values().collect(),
        }
    }
}

/// Thread-safe in-memory read model store.
///
/// Documents are keyed by `(type, id)` and indexed by type. The version
/// check and the write happen under one write lock, so of two writers racing
/// to replace the same version only one succeeds. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReadModelRegistry {
    collections: Arc<RwLock<ReadModelCollections>>,
}

impl InMemoryReadModelRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a registry from previously stored records; later records win.
    pub fn from_records(records: impl IntoIterator<Item = StoredReadModel>) -> Self {
        Self {
            collections: Arc::new(RwLock::new(ReadModelCollections::from_records(records))),
        }
    }

    /// Replaces every document with the given records, rebuilding the index.
    ///
    /// Clones observe the new contents.
    pub fn restore(&self, records: impl IntoIterator<Item = StoredReadModel>) -> RegistryResult<()> {
        let rebuilt = ReadModelCollections::from_records(records);
        *self.write("restore")? = rebuilt;
        Ok(())
    }

    /// Every stored document, ordered by type then id.
    pub fn records(&self) -> RegistryResult<Vec<StoredReadModel>> {
        let collections = self.read("records")?;
        Ok(collections
            .documents
            .values()
            .cloned()
            .map(StoredReadModel::new)
            .collect())
    }

    fn read(
        &self,
        operation: &'static str,
    ) -> RegistryResult<RwLockReadGuard<'_, ReadModelCollections>> {
        self.collections
            .read()
            .map_err(|_| RegistryError::StoreFailure { operation })
    }

    fn write(
        &self,
        operation: &'static str,
    ) -> RegistryResult<RwLockWriteGuard<'_, ReadModelCollections>> {
        self.collections
            .write()
            .map_err(|_| RegistryError::StoreFailure { operation })
    }
}

#[async_trait]
impl ReadModelRegistry for InMemoryReadModelRegistry {
    #[instrument(skip(self, envelope), fields(type_name = %envelope.type_name, id = %envelope.id, version = envelope.version()))]
    async fn store(
        &self,
        envelope: ReadModelEnvelope,
        expected_current_version: u64,
    ) -> RegistryResult<StoredReadModel> {
        if envelope.version() == 0 {
            return Err(RegistryError::InvalidReadModel(format!(
                "{} '{}' has version 0; versions start at 1",
                envelope.type_name, envelope.id
            )));
        }
        let mut collections = self.write("store")?;
        if envelope.version() > 1 {
            let key = (envelope.type_name.clone(), envelope.id.clone());
            let current = collections
                .documents
                .get(&key)
                .map(ReadModelEnvelope::version);
            if current != Some(expected_current_version) {
                warn!(?current, "read model version conflict");
                return Err(RegistryError::OptimisticConcurrency {
                    type_name: key.0,
                    id: key.1,
                    expected: expected_current_version,
                    current,
                });
            }
        }
        collections.insert(envelope.clone());
        Ok(StoredReadModel::new(envelope))
    }

    #[instrument(skip(self))]
    async fn query(&self, query: &ReadModelQuery) -> RegistryResult<Vec<ReadModelEnvelope>> {
        let collections = self.read("query")?;
        Ok(query.execute(collections.candidates(query)))
    }

    #[instrument(skip(self))]
    async fn delete_by_id(
        &self,
        id: &ReadModelId,
        type_name: &ReadModelTypeName,
    ) -> RegistryResult<usize> {
        let mut collections = self.write("delete_by_id")?;
        if collections
            .remove(&(type_name.clone(), id.clone()))
            .is_some()
        {
            Ok(1)
        } else {
            info!("no read model to delete");
            Ok(0)
        }
    }

    #[instrument(skip(self))]
    async fn delete_all(&self) -> RegistryResult<usize> {
        let mut collections = self.write("delete_all")?;
        let removed = collections.documents.len();
        collections.documents.clear();
        collections.by_type.clear();
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn count(&self, query: Option<&ReadModelQuery>) -> RegistryResult<usize> {
        let collections = self.read("count")?;
        Ok(match query {
            Some(query) => collections
                .candidates(query)
                .into_iter()
                .filter(|envelope| query.matches(envelope))
                .count(),
            None => collections.documents.len(),
        })
    }

    async fn is_up(&self) -> bool {
        !self.collections.is_poisoned()
    }

    async fn details(&self) -> RegistryResult<Value> {
        let collections = self.read("details")?;
        Ok(json!({ "readModels": collections.documents.len() }))
    }

    fn urls(&self) -> Vec<String> {
        vec!["memory://read-models".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn user(id: &str, version: u64) -> ReadModelEnvelope {
        ReadModelEnvelope::new(
            ReadModelTypeName::try_new("User").unwrap(),
            json!({"id": id, "name": format!("user {id}")}),
        )
        .unwrap()
        .with_version(version)
    }

    #[tokio::test]
    async fn test_version_one_always_inserts() {
        let registry = InMemoryReadModelRegistry::new();
        registry.store(user("u1", 1), 0).await.unwrap();
        registry.store(user("u1", 2), 1).await.unwrap();

        let stored = registry.store(user("u1", 1), 99).await.unwrap();
        assert_eq!(stored.unique_key, "User:u1:1");
        assert_eq!(registry.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_higher_version_without_document_conflicts() {
        let registry = InMemoryReadModelRegistry::new();
        let error = registry.store(user("u1", 2), 1).await.unwrap_err();
        assert!(matches!(
            error,
            RegistryError::OptimisticConcurrency { current: None, expected: 1, .. }
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_stale_write_is_rejected_and_logged() {
        let registry = InMemoryReadModelRegistry::new();
        registry.store(user("u1", 1), 0).await.unwrap();
        registry.store(user("u1", 2), 1).await.unwrap();

        let error = registry.store(user("u1", 2), 1).await.unwrap_err();
        assert!(error.is_concurrency_conflict());
        assert!(logs_contain("read model version conflict"));
    }

    #[tokio::test]
    async fn test_version_zero_is_rejected_without_overwriting() {
        let registry = InMemoryReadModelRegistry::new();
        registry.store(user("u1", 1), 0).await.unwrap();
        registry.store(user("u1", 2), 1).await.unwrap();

        let error = registry.store(user("u1", 0), 2).await.unwrap_err();
        assert!(matches!(error, RegistryError::InvalidReadModel(_)));
        let stored = registry.records().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].envelope.version(), 2);
    }

    #[tokio::test]
    async fn test_restore_replaces_documents() {
        let registry = InMemoryReadModelRegistry::new();
        registry.store(user("u1", 1), 0).await.unwrap();
        let before = registry.records().unwrap();
        registry.store(user("u1", 2), 1).await.unwrap();
        registry.store(user("u2", 1), 0).await.unwrap();

        registry.restore(before.clone()).unwrap();
        assert_eq!(registry.records().unwrap(), before);
        registry.store(user("u1", 2), 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_updates_type_index() {
        let registry = InMemoryReadModelRegistry::new();
        registry.store(user("u1", 1), 0).await.unwrap();
        let type_name = ReadModelTypeName::try_new("User").unwrap();
        let id = ReadModelId::try_new("u1").unwrap();

        assert_eq!(registry.delete_by_id(&id, &type_name).await.unwrap(), 1);
        assert_eq!(registry.delete_by_id(&id, &type_name).await.unwrap(), 0);
        assert!(!registry
            .collections
            .read()
            .unwrap()
            .by_type
            .contains_key(&type_name));
    }

    #[tokio::test]
    async fn test_records_rebuild_the_same_documents() {
        let registry = InMemoryReadModelRegistry::new();
        registry.store(user("u1", 1), 0).await.unwrap();
        registry.store(user("u2", 1), 0).await.unwrap();
        registry.store(user("u2", 2), 1).await.unwrap();

        let rebuilt = InMemoryReadModelRegistry::from_records(registry.records().unwrap());
        assert_eq!(rebuilt.records().unwrap(), registry.records().unwrap());
        rebuilt.store(user("u2", 3), 2).await.unwrap();
    }
}
