//! In-memory registries for `EventVault`
//!
//! This crate provides the default implementations of the
//! [`eventvault::EventRegistry`] and [`eventvault::ReadModelRegistry`]
//! traits. All state lives in process memory behind a lock; clones share the
//! same storage, so one instance can be handed to several adapters.
//!
//! The file-backed registries in `eventvault-file` reuse these engines and
//! persist their records on every mutation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

mod event_registry;
mod read_model_registry;

pub use event_registry::InMemoryEventRegistry;
pub use read_model_registry::InMemoryReadModelRegistry;
