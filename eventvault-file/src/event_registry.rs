use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use eventvault::{
    EnvelopeKind, EventEnvelope, EventQuery, EventRegistry, RegistryError, RegistryResult,
    SortOrder, StoredEventEnvelope, UniqueId,
};
use eventvault_memory::InMemoryEventRegistry;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::config::FileRegistryConfig;
use crate::jsonl;

const EVERY_KIND: [EnvelopeKind; 2] = [EnvelopeKind::Event, EnvelopeKind::Snapshot];

/// In-memory contents captured before a mutation.
struct Checkpoint {
    records: Vec<StoredEventEnvelope>,
    dispatched: Vec<UniqueId>,
}

/// Event and snapshot log persisted as JSON-lines files.
///
/// Reads are served from memory. Stores and dispatch marks are appended;
/// replacements, deletions and resets rewrite the affected file. A mutation
/// whose file write fails is undone in memory before the error is returned.
#[derive(Debug, Clone)]
pub struct FileEventRegistry {
    config: Arc<FileRegistryConfig>,
    inner: InMemoryEventRegistry,
    write_gate: Arc<Mutex<()>>,
}

impl FileEventRegistry {
    /// Loads the collections under `config.data_dir`, creating the directory
    /// if it does not exist yet.
    #[instrument(skip_all, fields(data_dir = %config.data_dir.display()))]
    pub async fn open(config: FileRegistryConfig) -> RegistryResult<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let mut records: Vec<StoredEventEnvelope> =
            jsonl::load(&config.path_of(&config.events)).await?;
        records.extend(jsonl::load::<StoredEventEnvelope>(&config.path_of(&config.snapshots)).await?);
        let dispatched: Vec<UniqueId> = jsonl::load(&config.path_of(&config.dispatched)).await?;
        info!(records = records.len(), dispatched = dispatched.len(), "opened event registry");

        Ok(Self {
            inner: InMemoryEventRegistry::from_records(records, dispatched),
            config: Arc::new(config),
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    /// The configuration this registry was opened with.
    pub fn config(&self) -> &FileRegistryConfig {
        &self.config
    }

    fn path_for(&self, kind: EnvelopeKind) -> PathBuf {
        match kind {
            EnvelopeKind::Event => self.config.path_of(&self.config.events),
            EnvelopeKind::Snapshot => self.config.path_of(&self.config.snapshots),
        }
    }

    fn dispatched_path(&self) -> PathBuf {
        self.config.path_of(&self.config.dispatched)
    }

    async fn persist(&self, kind: EnvelopeKind) -> RegistryResult<()> {
        jsonl::rewrite(&self.path_for(kind), &self.inner.records(kind)?).await
    }

    async fn persist_all(&self, kinds: &[EnvelopeKind], dispatched: bool) -> RegistryResult<()> {
        for kind in kinds {
            self.persist(*kind).await?;
        }
        if dispatched {
            jsonl::rewrite(&self.dispatched_path(), &self.inner.dispatched_ids()?).await?;
        }
        Ok(())
    }

    fn checkpoint(&self) -> RegistryResult<Checkpoint> {
        let mut records = self.inner.records(EnvelopeKind::Event)?;
        records.extend(self.inner.records(EnvelopeKind::Snapshot)?);
        Ok(Checkpoint {
            records,
            dispatched: self.inner.dispatched_ids()?,
        })
    }

    /// Restores `checkpoint` in memory and rewrites the touched files from it.
    async fn roll_back(
        &self,
        checkpoint: Checkpoint,
        kinds: &[EnvelopeKind],
        dispatched: bool,
        error: RegistryError,
    ) -> RegistryError {
        warn!(%error, "write failed, restoring previous state");
        if let Err(restore_error) = self.inner.restore(checkpoint.records, checkpoint.dispatched) {
            warn!(error = %restore_error, "could not restore event registry");
        } else if let Err(rewrite_error) = self.persist_all(kinds, dispatched).await {
            warn!(error = %rewrite_error, "collection files may not match memory");
        }
        error
    }
}

#[async_trait]
impl EventRegistry for FileEventRegistry {
    #[instrument(skip_all, fields(kind = ?envelope.kind))]
    async fn store(&self, envelope: EventEnvelope) -> RegistryResult<UniqueId> {
        let _gate = self.write_gate.lock().await;
        let kind = envelope.kind;
        let id = self.inner.store(envelope.clone()).await?;
        let record = StoredEventEnvelope { id, envelope };
        if let Err(error) = jsonl::append(&self.path_for(kind), &[record]).await {
            warn!(%id, %error, "append failed, discarding envelope");
            self.inner.replace_or_delete_item(&id, None).await?;
            return Err(error);
        }
        Ok(id)
    }

    async fn query(
        &self,
        query: &EventQuery,
        order: SortOrder,
        limit: Option<usize>,
    ) -> RegistryResult<Vec<StoredEventEnvelope>> {
        self.inner.query(query, order, limit).await
    }

    async fn query_latest_snapshot(
        &self,
        query: &EventQuery,
    ) -> RegistryResult<Option<StoredEventEnvelope>> {
        self.inner.query_latest_snapshot(query).await
    }

    #[instrument(skip(self))]
    async fn store_dispatched(&self, event_id: &UniqueId) -> RegistryResult<bool> {
        let _gate = self.write_gate.lock().await;
        let first_time = self.inner.store_dispatched(event_id).await?;
        if first_time {
            if let Err(error) = jsonl::append(&self.dispatched_path(), &[event_id]).await {
                warn!(%event_id, %error, "append failed, discarding dispatch mark");
                self.inner.unmark_dispatched(event_id)?;
                return Err(error);
            }
        }
        Ok(first_time)
    }

    #[instrument(skip(self, replacement), fields(replace = replacement.is_some()))]
    async fn replace_or_delete_item(
        &self,
        id: &UniqueId,
        replacement: Option<EventEnvelope>,
    ) -> RegistryResult<bool> {
        let _gate = self.write_gate.lock().await;
        let Some(before) = self.inner.locate(id)? else {
            return Ok(false);
        };
        let mut touched = vec![before];
        if let Some(after) = replacement.as_ref().map(|envelope| envelope.kind) {
            if after != before {
                touched.push(after);
            }
        }
        let checkpoint = self.checkpoint()?;
        self.inner.replace_or_delete_item(id, replacement).await?;

        if let Err(error) = self.persist_all(&touched, false).await {
            return Err(self.roll_back(checkpoint, &touched, false, error).await);
        }
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn delete_all(&self) -> RegistryResult<usize> {
        let _gate = self.write_gate.lock().await;
        let checkpoint = self.checkpoint()?;
        let removed = self.inner.delete_all().await?;
        if let Err(error) = self.persist_all(&EVERY_KIND, true).await {
            return Err(self.roll_back(checkpoint, &EVERY_KIND, true, error).await);
        }
        Ok(removed)
    }

    async fn count(&self, query: Option<&EventQuery>) -> RegistryResult<usize> {
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
        [
            &self.config.events,
            &self.config.snapshots,
            &self.config.dispatched,
        ]
        .into_iter()
        .map(|name| format!("file://{}", self.config.path_of(name).display()))
        .collect()
    }
}
