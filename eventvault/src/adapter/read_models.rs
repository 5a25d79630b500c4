use crate::envelope::{ReadModelEnvelope, StoredReadModel};
use crate::errors::RegistryResult;
use crate::filter::convert_filter;
use crate::health::HealthReport;
use crate::projection::Projection;
use crate::registry::{ReadModelQuery, ReadModelRegistry};
use crate::sort::SortBy;
use crate::types::{ReadModelId, ReadModelTypeName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

/// A read model search as issued by an external query layer.
///
/// `filters` and `sort_by` are the nested external documents; they are
/// converted into a typed [`ReadModelQuery`] before reaching the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadModelSearch {
    /// Nested external filter document
    pub filters: Value,
    /// Nested `{field: "ASC" | "DESC"}` document
    pub sort_by: Option<Value>,
    /// Page size
    pub limit: Option<usize>,
    /// Offset returned by the previous page
    pub cursor: Option<usize>,
    /// Whether to wrap results in a [`ReadModelPage`]
    pub paginated: bool,
    /// Dotted field selection
    pub projection: Option<Vec<String>>,
}

/// One page of read models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadModelPage {
    /// Documents on this page
    pub items: Vec<ReadModelEnvelope>,
    /// Number of documents on this page
    pub count: usize,
    /// Offset of the next page; `None` once the documents are exhausted
    pub cursor: Option<usize>,
}

/// Outcome of [`ReadModelStoreAdapter::search`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReadModelSearchResult {
    /// Plain list of documents
    Items(Vec<ReadModelEnvelope>),
    /// Paginated result
    Page(ReadModelPage),
}

impl ReadModelSearchResult {
    /// The documents, whatever the shape.
    pub fn into_items(self) -> Vec<ReadModelEnvelope> {
        match self {
            Self::Items(items) => items,
            Self::Page(page) => page.items,
        }
    }
}

/// Read-model side of the adapter contract.
#[derive(Debug)]
pub struct ReadModelStoreAdapter<R> {
    registry: R,
}

impl<R: ReadModelRegistry> ReadModelStoreAdapter<R> {
    /// Wraps `registry`.
    pub const fn new(registry: R) -> Self {
        Self { registry }
    }

    /// The wrapped registry.
    pub const fn registry(&self) -> &R {
        &self.registry
    }

    /// The current document for `(type_name, id)`.
    #[instrument(skip(self))]
    pub async fn fetch(
        &self,
        type_name: &ReadModelTypeName,
        id: &ReadModelId,
    ) -> RegistryResult<Option<ReadModelEnvelope>> {
        let query = ReadModelQuery::of_type(type_name.clone()).with_id(id.clone());
        Ok(self.registry.query(&query).await?.into_iter().next())
    }

    /// Filters, sorts, pages and projects documents of one type.
    #[instrument(skip(self, search), fields(paginated = search.paginated))]
    pub async fn search(
        &self,
        type_name: &ReadModelTypeName,
        search: &ReadModelSearch,
    ) -> RegistryResult<ReadModelSearchResult> {
        let offset = search.cursor.unwrap_or(0);
        let mut query = ReadModelQuery::of_type(type_name.clone())
            .with_filter(convert_filter(&search.filters))
            .with_skip(offset);
        if let Some(sort_by) = &search.sort_by {
            query = query.with_sort(SortBy::from_json(sort_by));
        }
        if let Some(limit) = search.limit {
            // one extra document tells a full last page from a partial one
            let fetched = if search.paginated {
                limit.saturating_add(1)
            } else {
                limit
            };
            query = query.with_limit(fetched);
        }
        if let Some(fields) = &search.projection {
            query = query.with_projection(Projection::new(fields));
        }

        let mut items = self.registry.query(&query).await?;
        if !search.paginated {
            return Ok(ReadModelSearchResult::Items(items));
        }
        let has_more = search.limit.is_some_and(|limit| items.len() > limit);
        if let Some(limit) = search.limit {
            items.truncate(limit);
        }
        Ok(ReadModelSearchResult::Page(ReadModelPage {
            count: items.len(),
            cursor: has_more.then_some(offset + items.len()),
            items,
        }))
    }

    /// Stores `envelope`, expecting the stored version to be one below its own.
    #[instrument(skip_all, fields(type_name = %envelope.type_name, id = %envelope.id))]
    pub async fn store(&self, envelope: ReadModelEnvelope) -> RegistryResult<StoredReadModel> {
        let expected = envelope.version().saturating_sub(1);
        self.registry.store(envelope, expected).await
    }

    /// Removes a document; a miss is logged, not returned.
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        type_name: &ReadModelTypeName,
        id: &ReadModelId,
    ) -> RegistryResult<()> {
        if self.registry.delete_by_id(id, type_name).await? == 0 {
            info!("read model to delete was not found");
        }
        Ok(())
    }

    /// Whether the registry can serve requests.
    pub async fn is_up(&self) -> bool {
        self.registry.is_up().await
    }

    /// Backend-specific health details.
    pub async fn details(&self) -> RegistryResult<Value> {
        self.registry.details().await
    }

    /// Locations of the backing storage.
    pub fn urls(&self) -> Vec<String> {
        self.registry.urls()
    }

    /// The health triple as one report.
    pub async fn health(&self) -> HealthReport {
        if !self.is_up().await {
            return HealthReport::down("read model registry is down", self.urls());
        }
        match self.details().await {
            Ok(details) => HealthReport::up(details, self.urls()),
            Err(error) => HealthReport::down(error.to_string(), self.urls()),
        }
    }
}
