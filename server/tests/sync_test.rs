//! Integration tests for the sync protocol.
//!
//! These run the engine client against the batch resolver over the
//! in-memory document store, with manual clocks on both sides.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tether_engine::{
    ClientConfig, ClientSyncInfo, ManualClock, OperationType, ServerOperation, ServerSyncInfo,
    SyncClient, TypeRegistration,
};
use tether_server::resolver::{BatchResolver, IdentityFields};
use tether_server::store::MemoryDocumentStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Todo {
    id: String,
    title: String,
    completed: bool,
}

fn todo(id: &str, title: &str) -> Todo {
    Todo {
        id: id.into(),
        title: title.into(),
        completed: false,
    }
}

struct Harness {
    client: SyncClient,
    client_clock: Arc<ManualClock>,
    server_clock: Arc<ManualClock>,
    resolver: BatchResolver,
    store: Arc<MemoryDocumentStore>,
}

async fn harness() -> Harness {
    let client_clock = Arc::new(ManualClock::new(1_000));
    let server_clock = Arc::new(ManualClock::new(1_000));

    let client = SyncClient::new(ClientConfig::default().with_clock(client_clock.clone()));
    client.initialize_in_memory().await.unwrap();
    client
        .register(TypeRegistration::<Todo>::new(|t| t.id.clone()))
        .await
        .unwrap();

    let store = Arc::new(MemoryDocumentStore::with_clock(server_clock.clone()));
    let resolver = BatchResolver::new(store.clone(), IdentityFields::default())
        .with_clock(server_clock.clone());

    Harness {
        client,
        client_clock,
        server_clock,
        resolver,
        store,
    }
}

/// Push pending changes, resolve them, reconcile the answers.
async fn sync_round(h: &Harness) -> Vec<ServerSyncInfo<Value>> {
    let outbound: Vec<ClientSyncInfo<Value>> = h
        .client
        .pending_changes::<Todo>(None)
        .await
        .unwrap()
        .into_iter()
        .map(|info| ClientSyncInfo {
            modified_on: info.modified_on,
            operation: info.operation,
            partition: info.partition,
            value: info.value.map(|v| serde_json::to_value(v).unwrap()),
        })
        .collect();

    let outcomes = h.resolver.resolve("Todo", outbound).await.unwrap();

    let typed: Vec<ServerSyncInfo<Todo>> = outcomes
        .iter()
        .cloned()
        .map(|info| info.try_map(serde_json::from_value).unwrap())
        .collect();
    h.client.reconcile(typed, None).await.unwrap();
    outcomes
}

// ============================================================================
// Server last-writer-wins
// ============================================================================

#[tokio::test]
async fn older_client_change_gets_server_value_back() {
    let h = harness().await;
    h.server_clock.set(5_000);
    h.resolver
        .resolve(
            "Todo",
            vec![ClientSyncInfo::new(
                4_000,
                OperationType::Create,
                Some(json!({"id": "1", "title": "server", "completed": true})),
            )],
        )
        .await
        .unwrap();

    let outcomes = h
        .resolver
        .resolve(
            "Todo",
            vec![ClientSyncInfo::new(
                4_500,
                OperationType::Update,
                Some(json!({"id": "1", "title": "client", "completed": false})),
            )],
        )
        .await
        .unwrap();

    assert_eq!(outcomes[0].operation, ServerOperation::Updated);
    assert_eq!(outcomes[0].modified_on, 5_000);
    assert_eq!(outcomes[0].value.as_ref().unwrap()["title"], "server");
}

#[tokio::test]
async fn newer_client_change_is_persisted() {
    let h = harness().await;
    h.server_clock.set(5_000);
    h.resolver
        .resolve(
            "Todo",
            vec![ClientSyncInfo::new(
                4_000,
                OperationType::Create,
                Some(json!({"id": "1", "title": "server", "completed": true})),
            )],
        )
        .await
        .unwrap();

    h.server_clock.set(7_000);
    let outcomes = h
        .resolver
        .resolve(
            "Todo",
            vec![ClientSyncInfo::new(
                6_000,
                OperationType::Update,
                Some(json!({"id": "1", "title": "client", "completed": false})),
            )],
        )
        .await
        .unwrap();

    assert_eq!(outcomes[0].operation, ServerOperation::Updated);
    assert_eq!(outcomes[0].modified_on, 7_000);
    assert_eq!(outcomes[0].value.as_ref().unwrap()["title"], "client");
}

// ============================================================================
// Round trips
// ============================================================================

#[tokio::test]
async fn offline_changes_converge_after_sync() {
    let h = harness().await;
    h.client.create(&todo("a", "write tests"), None).await.unwrap();
    h.client_clock.advance(10);
    h.client.create(&todo("b", "ship"), None).await.unwrap();
    h.client_clock.advance(10);
    h.client
        .update(
            &Todo {
                completed: true,
                ..todo("a", "write tests")
            },
            None,
        )
        .await
        .unwrap();

    let outcomes = sync_round(&h).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|o| o.operation == ServerOperation::Created));
    assert_eq!(h.store.len(), 2);

    let pending = h.client.pending_changes::<Todo>(None).await.unwrap();
    assert!(pending.is_empty());

    let a = h.client.get_latest::<Todo>("a", None).await.unwrap().unwrap();
    assert!(a.completed);
    let cached = h.client.get_cached::<Todo>("b", None).await.unwrap();
    assert_eq!(cached, Some(todo("b", "ship")));
}

#[tokio::test]
async fn losing_client_adopts_server_version() {
    let h = harness().await;

    // Another device already wrote "a" at 9_000.
    h.server_clock.set(9_000);
    h.resolver
        .resolve(
            "Todo",
            vec![ClientSyncInfo::new(
                9_000,
                OperationType::Create,
                Some(serde_json::to_value(todo("a", "from elsewhere")).unwrap()),
            )],
        )
        .await
        .unwrap();

    h.client_clock.set(2_000);
    h.client.create(&todo("a", "stale"), None).await.unwrap();

    let outcomes = sync_round(&h).await;
    assert_eq!(outcomes[0].operation, ServerOperation::Updated);

    let latest = h.client.get_latest::<Todo>("a", None).await.unwrap();
    assert_eq!(latest, Some(todo("a", "from elsewhere")));
}

#[tokio::test]
async fn delete_propagates_and_clears_local_state() {
    let h = harness().await;
    h.client.create(&todo("a", "temp"), None).await.unwrap();
    sync_round(&h).await;
    assert_eq!(h.store.len(), 1);

    h.client_clock.advance(5);
    h.client.delete(&todo("a", "temp"), None).await.unwrap();
    let outcomes = sync_round(&h).await;

    assert_eq!(outcomes[0].operation, ServerOperation::Deleted);
    assert!(h.store.is_empty());
    assert_eq!(h.client.get_latest::<Todo>("a", None).await.unwrap(), None);
    assert!(h.client.get_all_latest::<Todo>(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn repeated_sync_is_safe() {
    let h = harness().await;
    h.client.create(&todo("a", "once"), None).await.unwrap();

    let first = sync_round(&h).await;
    let second = sync_round(&h).await;

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
    assert_eq!(h.store.len(), 1);
    let all = h.client.get_all_latest::<Todo>(None).await.unwrap();
    assert_eq!(all, vec![todo("a", "once")]);
}
