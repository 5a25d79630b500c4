use std::path::{Path, PathBuf};

use eventvault::{RegistryError, RegistryResult};
use nutype::nutype;
use serde::{Deserialize, Serialize};

/// Environment variable naming the data directory.
pub const DATA_DIR_ENV: &str = "EVENTVAULT_DATA_DIR";

const DEFAULT_DATA_DIR: &str = ".eventvault";

/// Name of one collection file inside the data directory.
///
/// Must be a bare file name: no path separators, not `.` or `..`.
#[nutype(
    sanitize(trim),
    validate(
        not_empty,
        len_char_max = 255,
        predicate = |name| !name.contains(['/', '\\']) && name != "." && name != ".."
    ),
    derive(Debug, Clone, PartialEq, Eq, Hash, AsRef, Display, Serialize, Deserialize)
)]
pub struct CollectionFileName(String);

fn file_name(raw: &str) -> RegistryResult<CollectionFileName> {
    CollectionFileName::try_new(raw)
        .map_err(|error| RegistryError::Configuration(format!("collection file `{raw}`: {error}")))
}

/// Where the file-backed registries keep their collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRegistryConfig {
    /// Directory holding every collection file
    pub data_dir: PathBuf,
    /// Event collection (default `events.jsonl`)
    pub events: CollectionFileName,
    /// Snapshot collection (default `snapshots.jsonl`)
    pub snapshots: CollectionFileName,
    /// Dispatched event ids (default `dispatched.jsonl`)
    pub dispatched: CollectionFileName,
    /// Read model collection (default `read_models.jsonl`)
    pub read_models: CollectionFileName,
}

impl FileRegistryConfig {
    /// Default file names under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> RegistryResult<Self> {
        Ok(Self {
            data_dir: data_dir.into(),
            events: file_name("events.jsonl")?,
            snapshots: file_name("snapshots.jsonl")?,
            dispatched: file_name("dispatched.jsonl")?,
            read_models: file_name("read_models.jsonl")?,
        })
    }

    /// Reads the data directory from `EVENTVAULT_DATA_DIR`, falling back to
    /// `.eventvault` in the working directory.
    pub fn from_env() -> RegistryResult<Self> {
        let data_dir = std::env::var_os(DATA_DIR_ENV)
            .filter(|value| !value.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from);
        Self::new(data_dir)
    }

    /// Overrides the event collection file.
    #[must_use]
    pub fn with_events(mut self, name: CollectionFileName) -> Self {
        self.events = name;
        self
    }

    /// Overrides the snapshot collection file.
    #[must_use]
    pub fn with_snapshots(mut self, name: CollectionFileName) -> Self {
        self.snapshots = name;
        self
    }

    /// Overrides the dispatched-id collection file.
    #[must_use]
    pub fn with_dispatched(mut self, name: CollectionFileName) -> Self {
        self.dispatched = name;
        self
    }

    /// Overrides the read model collection file.
    #[must_use]
    pub fn with_read_models(mut self, name: CollectionFileName) -> Self {
        self.read_models = name;
        self
    }

    /// Rejects configurations where two collections share one file.
    pub fn validate(&self) -> RegistryResult<()> {
        let names = [
            &self.events,
            &self.snapshots,
            &self.dispatched,
            &self.read_models,
        ];
        for (index, name) in names.iter().enumerate() {
            if names[index + 1..].contains(name) {
                return Err(RegistryError::Configuration(format!(
                    "collection file `{name}` is used twice"
                )));
            }
        }
        Ok(())
    }

    /// The data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub(crate) fn path_of(&self, name: &CollectionFileName) -> PathBuf {
        self.data_dir.join(name.as_ref())
    }
}
