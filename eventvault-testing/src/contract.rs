//! Behavioural contract shared by every registry backend.
//!
//! Each `test_*` function builds a fresh registry through the supplied
//! factory, runs one scenario and reports the first broken expectation as a
//! [`ContractTestFailure`]. The `*_contract_tests!` macros expand the whole
//! suite into `#[tokio::test]` functions.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use eventvault::filter::Filter;
use eventvault::{
    EntityId, EntityTypeName, EventEnvelope, EventQuery, EventRegistry, EventTypeName, Projection,
    ReadModelEnvelope, ReadModelId, ReadModelQuery, ReadModelRegistry, ReadModelTypeName,
    RegistryError, SortBy, SortDirection, SortOrder, Timestamp, UniqueId,
};
use futures::future::join_all;
use serde_json::{json, Value};

/// A broken expectation, tagged with the scenario that found it.
#[derive(Debug)]
pub struct ContractTestFailure {
    scenario: &'static str,
    detail: String,
}

impl ContractTestFailure {
    fn new(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self {
            scenario,
            detail: detail.into(),
        }
    }

    fn registry_error(
        scenario: &'static str,
        operation: &'static str,
        error: RegistryError,
    ) -> Self {
        Self::new(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }

    fn assertion(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self::new(scenario, detail)
    }
}

impl fmt::Display for ContractTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.detail)
    }
}

impl std::error::Error for ContractTestFailure {}

/// Outcome of one contract scenario.
pub type ContractTestResult = Result<(), ContractTestFailure>;

fn ensure(
    scenario: &'static str,
    condition: bool,
    detail: impl FnOnce() -> String,
) -> ContractTestResult {
    if condition {
        Ok(())
    } else {
        Err(ContractTestFailure::assertion(scenario, detail()))
    }
}

fn fixture<T, E: fmt::Display>(
    scenario: &'static str,
    raw: &str,
    parsed: Result<T, E>,
) -> Result<T, ContractTestFailure> {
    parsed.map_err(|error| {
        ContractTestFailure::assertion(scenario, format!("invalid fixture `{raw}`: {error}"))
    })
}

fn instant(scenario: &'static str, raw: &str) -> Result<Timestamp, ContractTestFailure> {
    fixture(scenario, raw, Timestamp::parse(raw))
}

fn cart_type(scenario: &'static str) -> Result<EntityTypeName, ContractTestFailure> {
    fixture(scenario, "Cart", EntityTypeName::try_new("Cart"))
}

fn cart_id(scenario: &'static str, raw: &str) -> Result<EntityId, ContractTestFailure> {
    fixture(scenario, raw, EntityId::try_new(raw))
}

fn cart_event(
    scenario: &'static str,
    type_name: &str,
    entity_id: &str,
    created_at: &str,
) -> Result<EventEnvelope, ContractTestFailure> {
    Ok(EventEnvelope::event(
        cart_type(scenario)?,
        cart_id(scenario, entity_id)?,
        fixture(scenario, type_name, EventTypeName::try_new(type_name))?,
        json!({ "cart": entity_id, "at": created_at }),
        instant(scenario, created_at)?,
    ))
}

fn cart_snapshot(
    scenario: &'static str,
    entity_id: &str,
    snapshotted_event_created_at: &str,
) -> Result<EventEnvelope, ContractTestFailure> {
    let captured = instant(scenario, snapshotted_event_created_at)?;
    Ok(EventEnvelope::snapshot(
        cart_type(scenario)?,
        cart_id(scenario, entity_id)?,
        fixture(scenario, "Cart", EventTypeName::try_new("Cart"))?,
        json!({ "cart": entity_id, "upTo": snapshotted_event_created_at }),
        captured,
        captured,
    ))
}

fn cart_query(scenario: &'static str, entity_id: &str) -> Result<EventQuery, ContractTestFailure> {
    Ok(EventQuery::events().for_entity(cart_type(scenario)?, cart_id(scenario, entity_id)?))
}

async fn store_event<R: EventRegistry>(
    scenario: &'static str,
    registry: &R,
    envelope: EventEnvelope,
) -> Result<UniqueId, ContractTestFailure> {
    registry
        .store(envelope)
        .await
        .map_err(|error| ContractTestFailure::registry_error(scenario, "store", error))
}

async fn query_events<R: EventRegistry>(
    scenario: &'static str,
    registry: &R,
    query: &EventQuery,
    order: SortOrder,
    limit: Option<usize>,
) -> Result<Vec<UniqueId>, ContractTestFailure> {
    let found = registry
        .query(query, order, limit)
        .await
        .map_err(|error| ContractTestFailure::registry_error(scenario, "query", error))?;
    Ok(found.into_iter().map(|stored| stored.id).collect())
}

async fn count_events<R: EventRegistry>(
    scenario: &'static str,
    registry: &R,
    query: Option<&EventQuery>,
) -> Result<usize, ContractTestFailure> {
    registry
        .count(query)
        .await
        .map_err(|error| ContractTestFailure::registry_error(scenario, "count", error))
}

/// Per-entity queries come back in creation order, honour `since` and `limit`.
pub async fn test_entity_events_in_creation_order<F, Fut, R>(make_registry: F) -> ContractTestResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = R>,
    R: EventRegistry,
{
    const SCENARIO: &str = "entity_events_in_creation_order";

    let registry = make_registry().await;
    let t1 = "2024-05-01T10:00:00Z";
    let t2 = "2024-05-01T11:00:00Z";
    let a = store_event(SCENARIO, &registry, cart_event(SCENARIO, "ProductAdded", "1", t1)?).await?;
    let _other = store_event(
        SCENARIO,
        &registry,
        cart_event(SCENARIO, "ProductAdded", "2", "2024-05-01T10:30:00Z")?,
    )
    .await?;
    let b = store_event(SCENARIO, &registry, cart_event(SCENARIO, "ProductAdded", "1", t2)?).await?;

    let query = cart_query(SCENARIO, "1")?;
    let ascending = query_events(SCENARIO, &registry, &query, SortOrder::Asc, None).await?;
    ensure(SCENARIO, ascending == vec![a, b], || {
        format!("expected [A, B] ascending, observed {ascending:?}")
    })?;

    let since = query.clone().created_after(instant(SCENARIO, t1)?);
    let after_t1 = query_events(SCENARIO, &registry, &since, SortOrder::Asc, None).await?;
    ensure(SCENARIO, after_t1 == vec![b], || {
        format!("expected only B after T1, observed {after_t1:?}")
    })?;

    let newest = query_events(SCENARIO, &registry, &query, SortOrder::Desc, Some(1)).await?;
    ensure(SCENARIO, newest == vec![b], || {
        format!("expected newest event B, observed {newest:?}")
    })
}

/// The latest snapshot is the one with the greatest snapshotted-event time.
pub async fn test_latest_snapshot_selection<F, Fut, R>(make_registry: F) -> ContractTestResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = R>,
    R: EventRegistry,
{
    const SCENARIO: &str = "latest_snapshot_selection";

    let registry = make_registry().await;
    let query = EventQuery::snapshots().for_entity(cart_type(SCENARIO)?, cart_id(SCENARIO, "1")?);

    let none = registry
        .query_latest_snapshot(&query)
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "query_latest_snapshot", error))?;
    ensure(SCENARIO, none.is_none(), || {
        format!("expected no snapshot before any was stored, observed {none:?}")
    })?;

    let _ = store_event(SCENARIO, &registry, cart_snapshot(SCENARIO, "1", "2024-05-02T00:00:00Z")?).await?;
    let latest = store_event(SCENARIO, &registry, cart_snapshot(SCENARIO, "1", "2024-05-03T00:00:00Z")?).await?;
    let _ = store_event(SCENARIO, &registry, cart_snapshot(SCENARIO, "1", "2024-05-01T00:00:00Z")?).await?;
    let _ = store_event(SCENARIO, &registry, cart_snapshot(SCENARIO, "2", "2024-06-01T00:00:00Z")?).await?;

    let found = registry
        .query_latest_snapshot(&query)
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "query_latest_snapshot", error))?;
    let found_id = found.map(|stored| stored.id);
    ensure(SCENARIO, found_id == Some(latest), || {
        format!("expected snapshot {latest}, observed {found_id:?}")
    })
}

/// Dispatch tracking reports each id as new exactly once, even under races.
pub async fn test_dispatched_at_most_once<F, Fut, R>(make_registry: F) -> ContractTestResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = R>,
    R: EventRegistry + 'static,
{
    const SCENARIO: &str = "dispatched_at_most_once";

    let registry = Arc::new(make_registry().await);
    let event_id = UniqueId::new();

    let first = registry
        .store_dispatched(&event_id)
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "store_dispatched", error))?;
    let second = registry
        .store_dispatched(&event_id)
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "store_dispatched", error))?;
    ensure(SCENARIO, first && !second, || {
        format!("expected true then false, observed {first} then {second}")
    })?;

    let raced_id = UniqueId::new();
    let attempts = (0..16).map(|_| {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.store_dispatched(&raced_id).await })
    });
    let mut winners = 0;
    for outcome in join_all(attempts).await {
        let outcome = outcome
            .map_err(|error| ContractTestFailure::assertion(SCENARIO, format!("task failed: {error}")))?;
        if outcome.map_err(|error| ContractTestFailure::registry_error(SCENARIO, "store_dispatched", error))? {
            winners += 1;
        }
    }
    ensure(SCENARIO, winners == 1, || {
        format!("expected exactly one first-time dispatch, observed {winners}")
    })
}

/// Tombstoned events stay queryable; hard-deleted snapshots disappear.
pub async fn test_soft_and_hard_delete<F, Fut, R>(make_registry: F) -> ContractTestResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = R>,
    R: EventRegistry,
{
    const SCENARIO: &str = "soft_and_hard_delete";

    let registry = make_registry().await;
    let event = cart_event(SCENARIO, "ProductAdded", "1", "2024-05-01T10:00:00Z")?;
    let event_id = store_event(SCENARIO, &registry, event.clone()).await?;
    let snapshot_id =
        store_event(SCENARIO, &registry, cart_snapshot(SCENARIO, "1", "2024-05-01T10:00:00Z")?).await?;

    let tombstone = event.tombstone(instant(SCENARIO, "2024-05-02T00:00:00Z")?);
    let replaced = registry
        .replace_or_delete_item(&event_id, Some(tombstone))
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "replace_or_delete_item", error))?;
    ensure(SCENARIO, replaced, || "expected the event to be replaced".to_string())?;

    let query = cart_query(SCENARIO, "1")?;
    let live = query_events(SCENARIO, &registry, &query.clone().deleted(false), SortOrder::Asc, None).await?;
    ensure(SCENARIO, live.is_empty(), || {
        format!("expected tombstoned event to be excluded, observed {live:?}")
    })?;

    let all = registry
        .query(&query, SortOrder::Asc, None)
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "query", error))?;
    let tombstoned = all
        .first()
        .is_some_and(|stored| stored.id == event_id && stored.envelope.is_deleted() && stored.envelope.value == json!({}));
    ensure(SCENARIO, all.len() == 1 && tombstoned, || {
        format!("expected one tombstone with an empty payload, observed {all:?}")
    })?;

    let removed = registry
        .replace_or_delete_item(&snapshot_id, None)
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "replace_or_delete_item", error))?;
    ensure(SCENARIO, removed, || "expected the snapshot to be removed".to_string())?;

    let snapshots = count_events(SCENARIO, &registry, Some(&EventQuery::snapshots())).await?;
    ensure(SCENARIO, snapshots == 0, || {
        format!("expected no snapshots after hard delete, observed {snapshots}")
    })?;

    let missing = registry
        .replace_or_delete_item(&UniqueId::new(), None)
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "replace_or_delete_item", error))?;
    ensure(SCENARIO, !missing, || "expected unknown id to report false".to_string())
}

/// Type and creation-time conditions narrow both queries and counts; an
/// unfiltered count matches an unfiltered query and skips snapshots.
pub async fn test_type_and_time_filters<F, Fut, R>(make_registry: F) -> ContractTestResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = R>,
    R: EventRegistry,
{
    const SCENARIO: &str = "type_and_time_filters";

    let registry = make_registry().await;
    let _ = store_event(SCENARIO, &registry, cart_event(SCENARIO, "ProductAdded", "1", "2024-05-01T00:00:00Z")?).await?;
    let removed = store_event(SCENARIO, &registry, cart_event(SCENARIO, "ProductRemoved", "1", "2024-05-02T00:00:00Z")?).await?;
    let added = store_event(SCENARIO, &registry, cart_event(SCENARIO, "ProductAdded", "2", "2024-05-03T00:00:00Z")?).await?;
    let _ = store_event(SCENARIO, &registry, cart_event(SCENARIO, "ProductAdded", "3", "2024-05-04T00:00:00Z")?).await?;
    let _ = store_event(SCENARIO, &registry, cart_snapshot(SCENARIO, "1", "2024-05-02T00:00:00Z")?).await?;

    let window = EventQuery::events()
        .of_entity_type(cart_type(SCENARIO)?)
        .created_from(instant(SCENARIO, "2024-05-02T00:00:00Z")?)
        .created_before(instant(SCENARIO, "2024-05-04T00:00:00Z")?);
    let in_window = query_events(SCENARIO, &registry, &window, SortOrder::Asc, None).await?;
    ensure(SCENARIO, in_window == vec![removed, added], || {
        format!("expected the two events inside the window, observed {in_window:?}")
    })?;

    let added_type = fixture(SCENARIO, "ProductAdded", EventTypeName::try_new("ProductAdded"))?;
    let of_type = window.of_type(added_type);
    let typed = count_events(SCENARIO, &registry, Some(&of_type)).await?;
    ensure(SCENARIO, typed == 1, || {
        format!("expected one ProductAdded in the window, observed {typed}")
    })?;

    let total = count_events(SCENARIO, &registry, None).await?;
    let listed = query_events(SCENARIO, &registry, &EventQuery::events(), SortOrder::Asc, None).await?;
    ensure(SCENARIO, total == 4 && listed.len() == 4, || {
        format!("expected an unfiltered count of 4 events like query, observed {total} and {}", listed.len())
    })
}

/// `delete_all` empties every collection and reports what it removed.
pub async fn test_delete_all_resets_registry<F, Fut, R>(make_registry: F) -> ContractTestResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = R>,
    R: EventRegistry,
{
    const SCENARIO: &str = "delete_all_resets_registry";

    let registry = make_registry().await;
    let event_id = store_event(SCENARIO, &registry, cart_event(SCENARIO, "ProductAdded", "1", "2024-05-01T00:00:00Z")?).await?;
    let _ = store_event(SCENARIO, &registry, cart_event(SCENARIO, "ProductAdded", "2", "2024-05-02T00:00:00Z")?).await?;
    let _ = store_event(SCENARIO, &registry, cart_snapshot(SCENARIO, "1", "2024-05-01T00:00:00Z")?).await?;
    let _ = registry
        .store_dispatched(&event_id)
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "store_dispatched", error))?;

    let removed = registry
        .delete_all()
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "delete_all", error))?;
    ensure(SCENARIO, removed == 3, || format!("expected 3 removed envelopes, observed {removed}"))?;

    let remaining = count_events(SCENARIO, &registry, None).await?;
    ensure(SCENARIO, remaining == 0, || format!("expected an empty registry, observed {remaining}"))?;

    let found = query_events(SCENARIO, &registry, &cart_query(SCENARIO, "1")?, SortOrder::Asc, None).await?;
    ensure(SCENARIO, found.is_empty(), || format!("expected no indexed events, observed {found:?}"))
}

fn user_type(scenario: &'static str) -> Result<ReadModelTypeName, ContractTestFailure> {
    fixture(scenario, "User", ReadModelTypeName::try_new("User"))
}

fn read_model(
    scenario: &'static str,
    type_name: &str,
    value: Value,
    version: u64,
) -> Result<ReadModelEnvelope, ContractTestFailure> {
    let type_name = fixture(scenario, type_name, ReadModelTypeName::try_new(type_name))?;
    ReadModelEnvelope::new(type_name, value)
        .map(|envelope| envelope.with_version(version))
        .map_err(|error| ContractTestFailure::registry_error(scenario, "ReadModelEnvelope::new", error))
}

async fn store_read_model<R: ReadModelRegistry>(
    scenario: &'static str,
    registry: &R,
    envelope: ReadModelEnvelope,
    expected_current_version: u64,
) -> ContractTestResult {
    registry
        .store(envelope, expected_current_version)
        .await
        .map(|_| ())
        .map_err(|error| ContractTestFailure::registry_error(scenario, "store", error))
}

async fn query_ids<R: ReadModelRegistry>(
    scenario: &'static str,
    registry: &R,
    query: &ReadModelQuery,
) -> Result<Vec<String>, ContractTestFailure> {
    let found = registry
        .query(query)
        .await
        .map_err(|error| ContractTestFailure::registry_error(scenario, "query", error))?;
    Ok(found.into_iter().map(|envelope| envelope.id.to_string()).collect())
}

fn expect_conflict(
    scenario: &'static str,
    outcome: Result<eventvault::StoredReadModel, RegistryError>,
) -> ContractTestResult {
    match outcome {
        Err(error) if error.is_concurrency_conflict() => Ok(()),
        Err(error) => Err(ContractTestFailure::registry_error(scenario, "store", error)),
        Ok(stored) => Err(ContractTestFailure::assertion(
            scenario,
            format!("expected a concurrency conflict but stored {}", stored.unique_key),
        )),
    }
}

/// A stale expected version is rejected once the document has moved on, and
/// version 0 is never accepted.
pub async fn test_version_monotonicity<F, Fut, R>(make_registry: F) -> ContractTestResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = R>,
    R: ReadModelRegistry,
{
    const SCENARIO: &str = "version_monotonicity";

    let registry = make_registry().await;
    store_read_model(SCENARIO, &registry, read_model(SCENARIO, "User", json!({"id": "u1"}), 1)?, 0).await?;
    store_read_model(SCENARIO, &registry, read_model(SCENARIO, "User", json!({"id": "u1"}), 2)?, 1).await?;

    let stale = registry
        .store(read_model(SCENARIO, "User", json!({"id": "u1"}), 2)?, 1)
        .await;
    expect_conflict(SCENARIO, stale)?;

    let missing = registry
        .store(read_model(SCENARIO, "User", json!({"id": "u2"}), 3)?, 2)
        .await;
    expect_conflict(SCENARIO, missing)?;

    let unversioned = registry
        .store(read_model(SCENARIO, "User", json!({"id": "u1", "reset": true}), 0)?, 2)
        .await;
    ensure(
        SCENARIO,
        matches!(unversioned, Err(RegistryError::InvalidReadModel(_))),
        || format!("expected version 0 to be rejected, observed {unversioned:?}"),
    )?;
    let query = ReadModelQuery::of_type(user_type(SCENARIO)?);
    let found = registry
        .query(&query)
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "query", error))?;
    let versions: Vec<u64> = found.iter().map(ReadModelEnvelope::version).collect();
    ensure(SCENARIO, versions == [2], || {
        format!("expected u1 to stay at version 2, observed {versions:?}")
    })
}

/// Version 1 writes never conflict, even over an existing document.
pub async fn test_version_one_always_inserts<F, Fut, R>(make_registry: F) -> ContractTestResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = R>,
    R: ReadModelRegistry,
{
    const SCENARIO: &str = "version_one_always_inserts";

    let registry = make_registry().await;
    store_read_model(SCENARIO, &registry, read_model(SCENARIO, "User", json!({"id": "u1", "n": 1}), 1)?, 0).await?;
    store_read_model(SCENARIO, &registry, read_model(SCENARIO, "User", json!({"id": "u1", "n": 2}), 2)?, 1).await?;
    let _ = registry
        .delete_all()
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "delete_all", error))?;
    store_read_model(SCENARIO, &registry, read_model(SCENARIO, "User", json!({"id": "u1", "n": 3}), 1)?, 7).await?;
    store_read_model(SCENARIO, &registry, read_model(SCENARIO, "User", json!({"id": "u1", "n": 4}), 1)?, 0).await?;

    let query = ReadModelQuery::of_type(user_type(SCENARIO)?);
    let found = registry
        .query(&query)
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "query", error))?;
    let latest = found.first().map(|envelope| envelope.value["n"].clone());
    ensure(SCENARIO, found.len() == 1 && latest == Some(json!(4)), || {
        format!("expected the last version 1 write to win, observed {found:?}")
    })
}

/// Of several writers racing to replace one version, exactly one succeeds.
pub async fn test_concurrent_writers_single_winner<F, Fut, R>(make_registry: F) -> ContractTestResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = R>,
    R: ReadModelRegistry + 'static,
{
    const SCENARIO: &str = "concurrent_writers_single_winner";

    let registry = Arc::new(make_registry().await);
    store_read_model(SCENARIO, registry.as_ref(), read_model(SCENARIO, "User", json!({"id": "u1"}), 1)?, 0).await?;

    let mut writers = Vec::new();
    for writer in 0..8 {
        let envelope = read_model(SCENARIO, "User", json!({"id": "u1", "writer": writer}), 2)?;
        let registry = Arc::clone(&registry);
        writers.push(tokio::spawn(async move { registry.store(envelope, 1).await }));
    }

    let mut winners = 0;
    for outcome in join_all(writers).await {
        match outcome {
            Ok(Ok(_)) => winners += 1,
            Ok(Err(error)) if error.is_concurrency_conflict() => {}
            Ok(Err(error)) => return Err(ContractTestFailure::registry_error(SCENARIO, "store", error)),
            Err(error) => {
                return Err(ContractTestFailure::assertion(SCENARIO, format!("task failed: {error}")))
            }
        }
    }
    ensure(SCENARIO, winners == 1, || {
        format!("expected exactly one winning writer, observed {winners}")
    })
}

/// Match, sort, skip, limit and project run in that order.
pub async fn test_query_pipeline<F, Fut, R>(make_registry: F) -> ContractTestResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = R>,
    R: ReadModelRegistry,
{
    const SCENARIO: &str = "query_pipeline";

    let registry = make_registry().await;
    for (id, age) in [("e", 30), ("c", 30), ("a", 30), ("b", 40), ("d", 20)] {
        let user = read_model(SCENARIO, "User", json!({"id": id, "age": age, "tags": ["x"]}), 1)?;
        store_read_model(SCENARIO, &registry, user, 0).await?;
    }
    let admin = read_model(SCENARIO, "Admin", json!({"id": "z", "age": 50}), 1)?;
    store_read_model(SCENARIO, &registry, admin, 0).await?;

    let matching = ReadModelQuery::of_type(user_type(SCENARIO)?)
        .with_filter(Filter::from_json(&json!({"age": {"gte": 25}})))
        .with_sort(
            SortBy::new()
                .then("age", SortDirection::Desc)
                .then("id", SortDirection::Asc),
        );
    let sorted = query_ids(SCENARIO, &registry, &matching).await?;
    ensure(SCENARIO, sorted == ["b", "a", "c", "e"], || {
        format!("expected age DESC then id ASC, observed {sorted:?}")
    })?;

    let page = matching.clone().with_skip(1).with_limit(2);
    let paged = query_ids(SCENARIO, &registry, &page).await?;
    ensure(SCENARIO, paged == ["a", "c"], || {
        format!("expected skip before limit, observed {paged:?}")
    })?;

    let counted = registry
        .count(Some(&page))
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "count", error))?;
    ensure(SCENARIO, counted == 4, || {
        format!("expected count to ignore pagination, observed {counted}")
    })?;

    let by_value = ReadModelQuery::all().where_value("age", 40);
    let valued = query_ids(SCENARIO, &registry, &by_value).await?;
    ensure(SCENARIO, valued == ["b"], || {
        format!("expected value equality to select b, observed {valued:?}")
    })?;

    let projected = registry
        .query(&page.with_projection(Projection::new(["id", "missing"])))
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "query", error))?;
    let values: Vec<Value> = projected.into_iter().map(|envelope| envelope.value).collect();
    ensure(
        SCENARIO,
        values == vec![json!({"id": "a"}), json!({"id": "c"})],
        || format!("expected projected ids only, observed {values:?}"),
    )
}

/// Projection omits missing fields and maps arrays element by element.
pub async fn test_projection_shapes<F, Fut, R>(make_registry: F) -> ContractTestResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = R>,
    R: ReadModelRegistry,
{
    const SCENARIO: &str = "projection_shapes";

    let registry = make_registry().await;
    let order = read_model(
        SCENARIO,
        "Order",
        json!({
            "id": "o1",
            "items": [{"sku": "A", "qty": 1}, {"sku": "B"}, {"sku": "C", "qty": 3}],
            "address": {"city": "Oslo", "zip": "0150"},
        }),
        1,
    )?;
    store_read_model(SCENARIO, &registry, order, 0).await?;

    let order_type = fixture(SCENARIO, "Order", ReadModelTypeName::try_new("Order"))?;
    let query = ReadModelQuery::of_type(order_type)
        .with_id(fixture(SCENARIO, "o1", ReadModelId::try_new("o1"))?)
        .with_projection(Projection::new(["id", "items[].qty", "address.city", "missing.field"]));
    let found = registry
        .query(&query)
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "query", error))?;
    let value = found.into_iter().next().map(|envelope| envelope.value);
    let expected = json!({
        "id": "o1",
        "items": [{"qty": 1}, {}, {"qty": 3}],
        "address": {"city": "Oslo"},
    });
    ensure(SCENARIO, value.as_ref() == Some(&expected), || {
        format!("expected {expected}, observed {value:?}")
    })
}

/// Deleting a missing document reports zero rather than failing.
pub async fn test_delete_by_id_is_lenient<F, Fut, R>(make_registry: F) -> ContractTestResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = R>,
    R: ReadModelRegistry,
{
    const SCENARIO: &str = "delete_by_id_is_lenient";

    let registry = make_registry().await;
    let type_name = user_type(SCENARIO)?;
    let id = fixture(SCENARIO, "u1", ReadModelId::try_new("u1"))?;

    let missing = registry
        .delete_by_id(&id, &type_name)
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "delete_by_id", error))?;
    ensure(SCENARIO, missing == 0, || format!("expected 0 for a miss, observed {missing}"))?;

    store_read_model(SCENARIO, &registry, read_model(SCENARIO, "User", json!({"id": "u1"}), 1)?, 0).await?;
    store_read_model(SCENARIO, &registry, read_model(SCENARIO, "User", json!({"id": "u2"}), 1)?, 0).await?;
    let removed = registry
        .delete_by_id(&id, &type_name)
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "delete_by_id", error))?;
    ensure(SCENARIO, removed == 1, || format!("expected 1 for a hit, observed {removed}"))?;

    let remaining = query_ids(SCENARIO, &registry, &ReadModelQuery::of_type(type_name)).await?;
    ensure(SCENARIO, remaining == ["u2"], || {
        format!("expected only u2 to remain, observed {remaining:?}")
    })?;

    let cleared = registry
        .delete_all()
        .await
        .map_err(|error| ContractTestFailure::registry_error(SCENARIO, "delete_all", error))?;
    ensure(SCENARIO, cleared == 1, || format!("expected delete_all to remove 1, observed {cleared}"))
}

/// Runs every event registry scenario against a backend.
#[macro_export]
macro_rules! event_registry_contract_tests {
    (suite = $suite:ident, make_registry = $make_registry:expr $(,)?) => {
        #[allow(non_snake_case)]
        mod $suite {
            use $crate::contract::{
                test_delete_all_resets_registry, test_dispatched_at_most_once,
                test_entity_events_in_creation_order, test_latest_snapshot_selection,
                test_soft_and_hard_delete, test_type_and_time_filters,
            };

            #[tokio::test(flavor = "multi_thread")]
            async fn entity_events_in_creation_order_contract() {
                $crate::init_tracing();
                test_entity_events_in_creation_order($make_registry)
                    .await
                    .expect("event registry contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn latest_snapshot_selection_contract() {
                $crate::init_tracing();
                test_latest_snapshot_selection($make_registry)
                    .await
                    .expect("event registry contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn dispatched_at_most_once_contract() {
                $crate::init_tracing();
                test_dispatched_at_most_once($make_registry)
                    .await
                    .expect("event registry contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn soft_and_hard_delete_contract() {
                $crate::init_tracing();
                test_soft_and_hard_delete($make_registry)
                    .await
                    .expect("event registry contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn type_and_time_filters_contract() {
                $crate::init_tracing();
                test_type_and_time_filters($make_registry)
                    .await
                    .expect("event registry contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn delete_all_resets_registry_contract() {
                $crate::init_tracing();
                test_delete_all_resets_registry($make_registry)
                    .await
                    .expect("event registry contract failed");
            }
        }
    };
}

pub use event_registry_contract_tests;

/// Runs every read model registry scenario against a backend.
#[macro_export]
macro_rules! read_model_registry_contract_tests {
    (suite = $suite:ident, make_registry = $make_registry:expr $(,)?) => {
        #[allow(non_snake_case)]
        mod $suite {
            use $crate::contract::{
                test_concurrent_writers_single_winner, test_delete_by_id_is_lenient,
                test_projection_shapes, test_query_pipeline, test_version_monotonicity,
                test_version_one_always_inserts,
            };

            #[tokio::test(flavor = "multi_thread")]
            async fn version_monotonicity_contract() {
                $crate::init_tracing();
                test_version_monotonicity($make_registry)
                    .await
                    .expect("read model registry contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn version_one_always_inserts_contract() {
                $crate::init_tracing();
                test_version_one_always_inserts($make_registry)
                    .await
                    .expect("read model registry contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn concurrent_writers_single_winner_contract() {
                $crate::init_tracing();
                test_concurrent_writers_single_winner($make_registry)
                    .await
                    .expect("read model registry contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn query_pipeline_contract() {
                $crate::init_tracing();
                test_query_pipeline($make_registry)
                    .await
                    .expect("read model registry contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn projection_shapes_contract() {
                $crate::init_tracing();
                test_projection_shapes($make_registry)
                    .await
                    .expect("read model registry contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn delete_by_id_is_lenient_contract() {
                $crate::init_tracing();
                test_delete_by_id_is_lenient($make_registry)
                    .await
                    .expect("read model registry contract failed");
            }
        }
    };
}

pub use read_model_registry_contract_tests;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_name_their_scenario() {
        let failure = ContractTestFailure::assertion("query_pipeline", "expected [a], observed []");
        assert_eq!(
            failure.to_string(),
            "[query_pipeline] expected [a], observed []"
        );
    }

    #[test]
    fn ensure_only_builds_detail_on_failure() {
        assert!(ensure("scenario", true, || unreachable!()).is_ok());
        let failure = ensure("scenario", false, || "broken".to_string()).unwrap_err();
        assert_eq!(failure.to_string(), "[scenario] broken");
    }

    #[test]
    fn invalid_fixtures_are_reported_not_panicked() {
        let failure = cart_id("fixtures", "   ").unwrap_err();
        assert!(failure.to_string().starts_with("[fixtures] invalid fixture"));
    }
}
