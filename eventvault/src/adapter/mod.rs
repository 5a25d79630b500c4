//! The narrow contract the rest of a framework uses to reach the registries.
//!
//! [`EventStoreAdapter`] and [`ReadModelStoreAdapter`] wrap a registry
//! instance owned by the composition root. They stamp timestamps, translate
//! external filter and sort documents into the typed query forms, and shape
//! paginated results. All storage semantics stay in the registries.

mod clock;
mod events;
mod read_models;

pub use clock::MonotonicClock;
pub use events::{
    EventDeletionParameters, EventSearchParameters, EventSearchResponse, EventStoreAdapter,
    NewEvent, NewSnapshot, PaginatedEntityIds,
};
pub use read_models::{ReadModelPage, ReadModelSearch, ReadModelSearchResult, ReadModelStoreAdapter};
