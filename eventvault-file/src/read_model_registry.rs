use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use eventvault::{
    ReadModelEnvelope, ReadModelId, ReadModelQuery, ReadModelRegistry, ReadModelTypeName,
    RegistryResult, StoredReadModel,
};
use eventvault_memory::InMemoryReadModelRegistry;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::config::FileRegistryConfig;
use crate::jsonl;

/// Read model store persisted as one JSON-lines file.
///
/// The version check runs inside the in-memory engine while the write gate
/// is held, so the compare-and-swap and the file rewrite form one step. If
/// the rewrite fails, memory is put back to the documents still on disk.
#[derive(Debug, Clone)]
pub struct FileReadModelRegistry {
    config: Arc<FileRegistryConfig>,
    inner: InMemoryReadModelRegistry,
    write_gate: Arc<Mutex<()>>,
}

impl FileReadModelRegistry {
    /// Loads the read model collection under `config.data_dir`, creating the
    /// directory if it does not exist yet.
    #[instrument(skip_all, fields(data_dir = %config.data_dir.display()))]
    pub async fn open(config: FileRegistryConfig) -> RegistryResult<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let records: Vec<StoredReadModel> =
            jsonl::load(&config.path_of(&config.read_models)).await?;
        info!(records = records.len(), "opened read model registry");

        Ok(Self {
            inner: InMemoryReadModelRegistry::from_records(records),
            config: Arc::new(config),
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    /// The configuration this registry was opened with.
    pub fn config(&self) -> &FileRegistryConfig {
        &self.config
    }

    fn path(&self) -> PathBuf {
        self.config.path_of(&self.config.read_models)
    }

    async fn persist(&self) -> RegistryResult<()> {
        jsonl::rewrite(&self.path(), &self.inner.records()?).await
    }

    /// Persists the current documents, restoring `checkpoint` if that fails.
    async fn persist_or_restore(&self, checkpoint: Vec<StoredReadModel>) -> RegistryResult<()> {
        let Err(error) = self.persist().await else {
            return Ok(());
        };
        warn!(%error, "rewrite failed, restoring previous documents");
        if let Err(restore_error) = self.inner.restore(checkpoint) {
            warn!(error = %restore_error, "could not restore read model registry");
        }
        Err(error)
    }
}

#[async_trait]
impl ReadModelRegistry for FileReadModelRegistry {
    #[instrument(skip(self, envelope), fields(type_name = %envelope.type_name, id = %envelope.id))]
    async fn store(
        &self,
        envelope: ReadModelEnvelope,
        expected_current_version: u64,
    ) -> RegistryResult<StoredReadModel> {
        let _gate = self.write_gate.lock().await;
        let checkpoint = self.inner.records()?;
        let stored = self.inner.store(envelope, expected_current_version).await?;
        self.persist_or_restore(checkpoint).await?;
        Ok(stored)
    }

    async fn query(&self, query: &ReadModelQuery) -> RegistryResult<Vec<ReadModelEnvelope>> {
        self.inner.query(query).await
    }

    #[instrument(skip(self))]
    async fn delete_by_id(
        &self,
        id: &ReadModelId,
        type_name: &ReadModelTypeName,
    ) -> RegistryResult<usize> {
        let _gate = self.write_gate.lock().await;
        let checkpoint = self.inner.records()?;
        let removed = self.inner.delete_by_id(id, type_name).await?;
        if removed > 0 {
            self.persist_or_restore(checkpoint).await?;
        }
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn delete_all(&self) -> RegistryResult<usize> {
        let _gate = self.write_gate.lock().await;
        let checkpoint = self.inner.records()?;
        let removed = self.inner.delete_all().await?;
        self.persist_or_restore(checkpoint).await?;
        Ok(removed)
    }

    async fn count(&self, query: Option<&ReadModelQuery>) -> RegistryResult<usize> {
        self.inner.count(query).await
    }

    async fn is_up(&self) -> bool {
        self.inner.is_up().await && tokio::fs::metadata(&self.config.data_dir).await.is_ok()
    }

    async fn details(&self) -> RegistryResult<Value> {
        let mut details = self.inner.details().await?;
        if let Value::Object(fields) = &mut details {
            fields.insert(
                "dataDir".to_string(),
                Value::from(self.config.data_dir.display().to_string()),
            );
        }
        Ok(details)
    }

    fn urls(&self) -> Vec<String> {
        vec![format!("file://{}", self.path().display())]
    }
}
