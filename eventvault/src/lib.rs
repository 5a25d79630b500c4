//! `EventVault` - persistence and query core for event-sourced applications
//!
//! This crate holds the vocabulary shared by every storage backend: an
//! append-only event and snapshot log, a versioned read-model document store,
//! and the small filter language both of them evaluate. Backends such as
//! `eventvault-memory` and `eventvault-file` implement the [`EventRegistry`]
//! and [`ReadModelRegistry`] traits; the [`adapter`] module exposes those
//! registries through the narrow contract the rest of a framework consumes.
//!
//! # Example
//!
//! ```rust,ignore
//! use eventvault::{ReadModelQuery, SortBy, SortDirection, filter::Filter};
//!
//! let query = ReadModelQuery::of_type(type_name)
//!     .with_filter(Filter::from_json(&json!({"age": {"gte": 18}})))
//!     .with_sort(SortBy::new().then("age", SortDirection::Desc))
//!     .with_limit(10);
//! let adults = registry.query(&query).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod envelope;
pub mod errors;
pub mod filter;
pub mod health;
pub mod index;
pub mod path;
pub mod projection;
pub mod registry;
pub mod sort;
pub mod types;

pub use envelope::{
    EnvelopeKind, EventEnvelope, ReadModelEnvelope, StoredEventEnvelope, StoredReadModel,
};
pub use errors::{RegistryError, RegistryResult};
pub use health::HealthReport;
pub use path::{FieldPath, PathSegment};
pub use projection::Projection;
pub use registry::{
    EventQuery, EventRegistry, ReadModelQuery, ReadModelRegistry, SortOrder, TimeRange,
};
pub use sort::{SortBy, SortDirection, SortKey};
pub use types::{
    EntityId, EntityTypeName, EventTypeName, ReadModelId, ReadModelTypeName, Timestamp, UniqueId,
};
