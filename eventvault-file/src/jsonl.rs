//! JSON-lines collection files: one serialized record per line.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use eventvault::{RegistryError, RegistryResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Reads every record; a missing file is an empty collection.
pub(crate) async fn load<T: DeserializeOwned>(path: &Path) -> RegistryResult<Vec<T>> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error.into()),
    };
    let records = contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|error| {
                RegistryError::Serialization(format!(
                    "{}:{}: {error}",
                    path.display(),
                    index + 1
                ))
            })
        })
        .collect::<RegistryResult<Vec<T>>>()?;
    debug!(path = %path.display(), records = records.len(), "loaded collection");
    Ok(records)
}

fn encode<T: Serialize>(records: &[T]) -> RegistryResult<Vec<u8>> {
    let mut buffer = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buffer, record)?;
        buffer.push(b'\n');
    }
    Ok(buffer)
}

/// Appends records to the end of the file, creating it if needed.
pub(crate) async fn append<T: Serialize>(path: &Path, records: &[T]) -> RegistryResult<()> {
    let buffer = encode(records)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&buffer).await?;
    file.sync_data().await?;
    Ok(())
}

/// Replaces the whole file through a temporary sibling and a rename.
pub(crate) async fn rewrite<T: Serialize>(path: &Path, records: &[T]) -> RegistryResult<()> {
    let buffer = encode(records)?;
    let staging = staging_path(path);
    let mut file = fs::File::create(&staging).await?;
    file.write_all(&buffer).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&staging, path).await?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    PathBuf::from(staging)
}
