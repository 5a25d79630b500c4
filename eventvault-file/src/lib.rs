//! File-backed registries for `EventVault`
//!
//! Each logical collection (events, snapshots, dispatched ids, read models)
//! is one JSON-lines file under a data directory. The registries keep the
//! in-memory engines from `eventvault-memory` as their working set and write
//! every mutation through to disk before returning. A per-registry write gate
//! serializes mutations, so the file order always matches the order in which
//! the in-memory engine accepted them.
//!
//! ```rust,ignore
//! use eventvault_file::{FileEventRegistry, FileRegistryConfig};
//!
//! let config = FileRegistryConfig::from_env()?;
//! let events = FileEventRegistry::open(config).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

mod config;
mod event_registry;
mod jsonl;
mod read_model_registry;

pub use config::{CollectionFileName, FileRegistryConfig, DATA_DIR_ENV};
pub use event_registry::FileEventRegistry;
pub use read_model_registry::FileReadModelRegistry;
