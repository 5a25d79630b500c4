//! Adapter behaviour over the in-memory registries.

use eventvault::adapter::{
    EventDeletionParameters, EventSearchParameters, EventStoreAdapter, NewEvent, NewSnapshot,
    ReadModelSearch, ReadModelSearchResult, ReadModelStoreAdapter,
};
use eventvault::{
    EntityId, EntityTypeName, EventTypeName, ReadModelEnvelope, ReadModelId, ReadModelTypeName,
    RegistryError,
};
use eventvault_memory::{InMemoryEventRegistry, InMemoryReadModelRegistry};
use serde_json::json;
use tracing_test::traced_test;

fn cart() -> EntityTypeName {
    EntityTypeName::try_new("Cart").unwrap()
}

fn cart_id(raw: &str) -> EntityId {
    EntityId::try_new(raw).unwrap()
}

fn new_event(entity_id: &str, type_name: &str) -> NewEvent {
    NewEvent {
        entity_type_name: cart(),
        entity_id: cart_id(entity_id),
        type_name: EventTypeName::try_new(type_name).unwrap(),
        value: json!({"cart": entity_id}),
        request_id: Some("req-1".to_string()),
    }
}

fn user(id: &str, version: u64) -> ReadModelEnvelope {
    ReadModelEnvelope::new(
        ReadModelTypeName::try_new("User").unwrap(),
        json!({"id": id, "name": format!("user {id}")}),
    )
    .unwrap()
    .with_version(version)
}

#[tokio::test]
async fn for_entity_since_returns_events_after_the_given_instant() {
    let adapter = EventStoreAdapter::new(InMemoryEventRegistry::new());
    let stored = adapter
        .store(vec![new_event("1", "ProductAdded"), new_event("1", "ProductAdded")])
        .await
        .unwrap();
    let (a, b) = (&stored[0], &stored[1]);
    assert!(a.envelope.created_at < b.envelope.created_at);

    let all = adapter
        .for_entity_since(&cart(), &cart_id("1"), None)
        .await
        .unwrap();
    assert_eq!(all, vec![a.clone(), b.clone()]);

    let since = adapter
        .for_entity_since(&cart(), &cart_id("1"), Some(a.envelope.created_at))
        .await
        .unwrap();
    assert_eq!(since, vec![b.clone()]);
}

#[tokio::test]
async fn latest_entity_snapshot_prefers_the_newest_captured_event() {
    let adapter = EventStoreAdapter::new(InMemoryEventRegistry::new());
    let events = adapter
        .store(vec![new_event("1", "ProductAdded"), new_event("1", "ProductAdded")])
        .await
        .unwrap();

    for captured in [events[1].envelope.created_at, events[0].envelope.created_at] {
        adapter
            .store_snapshot(NewSnapshot {
                entity_type_name: cart(),
                entity_id: cart_id("1"),
                type_name: EventTypeName::try_new("Cart").unwrap(),
                value: json!({"items": 2}),
                snapshotted_event_created_at: captured,
            })
            .await
            .unwrap();
    }

    let latest = adapter
        .latest_entity_snapshot(&cart(), &cart_id("1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        latest.envelope.snapshotted_event_created_at,
        Some(events[1].envelope.created_at)
    );
    assert!(latest.envelope.persisted_at.is_some());
    assert!(adapter
        .latest_entity_snapshot(&cart(), &cart_id("2"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn store_dispatched_is_true_only_once() {
    let adapter = EventStoreAdapter::new(InMemoryEventRegistry::new());
    let stored = adapter.store(vec![new_event("1", "ProductAdded")]).await.unwrap();

    assert!(adapter.store_dispatched(&stored[0]).await.unwrap());
    assert!(!adapter.store_dispatched(&stored[0]).await.unwrap());
}

#[tokio::test]
async fn search_returns_newest_first_within_bounds() {
    let adapter = EventStoreAdapter::new(InMemoryEventRegistry::new());
    let stored = adapter
        .store(vec![
            new_event("1", "ProductAdded"),
            new_event("2", "ProductRemoved"),
            new_event("1", "ProductAdded"),
        ])
        .await
        .unwrap();

    let found = adapter
        .search(&EventSearchParameters {
            type_name: Some(EventTypeName::try_new("ProductAdded").unwrap()),
            from: Some(stored[0].envelope.created_at),
            ..EventSearchParameters::default()
        })
        .await
        .unwrap();
    let times: Vec<_> = found.iter().map(|hit| hit.created_at).collect();
    assert_eq!(
        times,
        vec![stored[2].envelope.created_at, stored[0].envelope.created_at]
    );
    assert_eq!(found[0].request_id.as_deref(), Some("req-1"));

    let limited = adapter
        .search(&EventSearchParameters {
            entity_type_name: Some(cart()),
            limit: Some(1),
            ..EventSearchParameters::default()
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].created_at, stored[2].envelope.created_at);
}

#[tokio::test]
async fn search_entities_ids_pages_through_distinct_ids() {
    let adapter = EventStoreAdapter::new(InMemoryEventRegistry::new());
    adapter
        .store(vec![
            new_event("1", "ProductAdded"),
            new_event("2", "ProductAdded"),
            new_event("1", "ProductAdded"),
            new_event("3", "ProductAdded"),
        ])
        .await
        .unwrap();

    let first = adapter.search_entities_ids(2, None, &cart()).await.unwrap();
    assert_eq!(first.items, vec![cart_id("3"), cart_id("1")]);
    assert_eq!(first.cursor, Some(2));

    let second = adapter
        .search_entities_ids(2, first.cursor, &cart())
        .await
        .unwrap();
    assert_eq!(second.items, vec![cart_id("2")]);
    assert_eq!(second.count, 1);
    assert_eq!(second.cursor, None);
}

#[tokio::test]
#[traced_test]
async fn deleting_an_event_tombstones_it_and_drops_its_snapshots() {
    let adapter = EventStoreAdapter::new(InMemoryEventRegistry::new());
    let stored = adapter.store(vec![new_event("1", "ProductAdded")]).await.unwrap();
    let created_at = stored[0].envelope.created_at;
    adapter
        .store_snapshot(NewSnapshot {
            entity_type_name: cart(),
            entity_id: cart_id("1"),
            type_name: EventTypeName::try_new("Cart").unwrap(),
            value: json!({"items": 1}),
            snapshotted_event_created_at: created_at,
        })
        .await
        .unwrap();

    let parameters = EventDeletionParameters {
        entity_type_name: cart(),
        entity_id: cart_id("1"),
        created_at,
    };
    let events = adapter.find_deletable_event(&parameters).await.unwrap();
    let snapshots = adapter.find_deletable_snapshot(&parameters).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(snapshots.len(), 1);

    adapter.delete_event(&events).await.unwrap();
    adapter.delete_snapshot(&snapshots).await.unwrap();

    assert!(adapter
        .for_entity_since(&cart(), &cart_id("1"), None)
        .await
        .unwrap()
        .is_empty());
    let history = adapter
        .search(&EventSearchParameters::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].deleted_at.is_some());
    assert_eq!(history[0].value, json!({}));
    assert!(adapter
        .latest_entity_snapshot(&cart(), &cart_id("1"))
        .await
        .unwrap()
        .is_none());

    adapter.delete_snapshot(&snapshots).await.unwrap();
    assert!(logs_contain("snapshot to delete was not found"));
}

#[tokio::test]
async fn read_model_store_derives_the_expected_version() {
    let adapter = ReadModelStoreAdapter::new(InMemoryReadModelRegistry::new());
    adapter.store(user("u1", 1)).await.unwrap();
    let stored = adapter.store(user("u1", 2)).await.unwrap();
    assert_eq!(stored.unique_key, "User:u1:2");

    let stale = adapter.store(user("u1", 2)).await.unwrap_err();
    assert!(matches!(
        stale,
        RegistryError::OptimisticConcurrency {
            expected: 1,
            current: Some(2),
            ..
        }
    ));

    let type_name = ReadModelTypeName::try_new("User").unwrap();
    let fetched = adapter
        .fetch(&type_name, &ReadModelId::try_new("u1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.version(), 2);
}

#[tokio::test]
async fn read_model_search_converts_external_filters_and_paginates() {
    let adapter = ReadModelStoreAdapter::new(InMemoryReadModelRegistry::new());
    for (id, city) in [("u1", "Oslo"), ("u2", "Bergen"), ("u3", "Oslo"), ("u4", "Oslo")] {
        let value = json!({"id": id, "address": {"city": city}});
        let envelope =
            ReadModelEnvelope::new(ReadModelTypeName::try_new("User").unwrap(), value).unwrap();
        adapter.store(envelope).await.unwrap();
    }
    let type_name = ReadModelTypeName::try_new("User").unwrap();
    let search = ReadModelSearch {
        filters: json!({"address": {"city": {"eq": "Oslo"}}}),
        sort_by: Some(json!({"id": "DESC"})),
        limit: Some(2),
        paginated: true,
        projection: Some(vec!["id".to_string()]),
        ..ReadModelSearch::default()
    };

    let ReadModelSearchResult::Page(first) = adapter.search(&type_name, &search).await.unwrap()
    else {
        panic!("expected a paginated result");
    };
    let ids: Vec<_> = first.items.iter().map(|doc| doc.value.clone()).collect();
    assert_eq!(ids, vec![json!({"id": "u4"}), json!({"id": "u3"})]);
    assert_eq!(first.count, 2);
    assert_eq!(first.cursor, Some(2));

    let ReadModelSearchResult::Page(last) = adapter
        .search(
            &type_name,
            &ReadModelSearch {
                cursor: first.cursor,
                ..search.clone()
            },
        )
        .await
        .unwrap()
    else {
        panic!("expected a paginated result");
    };
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].id.as_ref(), "u1");
    assert_eq!(last.cursor, None);

    let plain = adapter
        .search(
            &type_name,
            &ReadModelSearch {
                cursor: Some(1),
                paginated: false,
                ..search
            },
        )
        .await
        .unwrap()
        .into_items();
    assert_eq!(plain.len(), 2);
}

#[tokio::test]
async fn exactly_full_last_page_has_no_cursor() {
    let adapter = ReadModelStoreAdapter::new(InMemoryReadModelRegistry::new());
    for id in ["u1", "u2"] {
        adapter.store(user(id, 1)).await.unwrap();
    }
    let type_name = ReadModelTypeName::try_new("User").unwrap();
    let search = ReadModelSearch {
        filters: json!({}),
        limit: Some(2),
        paginated: true,
        ..ReadModelSearch::default()
    };

    let ReadModelSearchResult::Page(page) = adapter.search(&type_name, &search).await.unwrap()
    else {
        panic!("expected a paginated result");
    };
    assert_eq!(page.count, 2);
    assert_eq!(page.cursor, None);

    let unlimited = ReadModelSearch {
        limit: None,
        ..search
    };
    let ReadModelSearchResult::Page(all) = adapter.search(&type_name, &unlimited).await.unwrap()
    else {
        panic!("expected a paginated result");
    };
    assert_eq!(all.count, 2);
    assert_eq!(all.cursor, None);
}

#[tokio::test]
#[traced_test]
async fn read_model_delete_of_missing_document_is_not_an_error() {
    let adapter = ReadModelStoreAdapter::new(InMemoryReadModelRegistry::new());
    let type_name = ReadModelTypeName::try_new("User").unwrap();
    adapter
        .delete(&type_name, &ReadModelId::try_new("ghost").unwrap())
        .await
        .unwrap();
    assert!(logs_contain("not found"));
}

#[tokio::test]
async fn health_reports_collection_details() {
    let events = EventStoreAdapter::new(InMemoryEventRegistry::new());
    events.store(vec![new_event("1", "ProductAdded")]).await.unwrap();
    let report = events.health().await;
    assert!(report.is_up);
    assert_eq!(report.details["events"], json!(1));
    assert_eq!(report.urls, vec!["memory://events".to_string()]);

    let read_models = ReadModelStoreAdapter::new(InMemoryReadModelRegistry::new());
    assert!(read_models.health().await.is_up);
}
