//! End-to-end sync against a mocked PostgREST server.

use std::sync::Arc;
use std::time::Duration;

use agrosync_core::{
    LocalStore, PostgrestClient, RemoteStore, Row, SelectQuery, SyncEngine, SyncOptions,
};
use mockito::{Matcher, ServerGuard};
use serde_json::{json, Value};

fn record(value: Value) -> Row {
    value.as_object().cloned().unwrap()
}

fn engine(server: &ServerGuard, store: Arc<LocalStore>) -> SyncEngine {
    let client = PostgrestClient::new(
        &server.url(),
        "anon-key",
        Duration::from_secs(5),
        "connection_test",
    )
    .unwrap();
    let remote: Arc<dyn RemoteStore> = Arc::new(client);
    SyncEngine::new(store, remote, SyncOptions::default())
}

async fn probe_ok(server: &mut ServerGuard) -> mockito::Mock {
    server
        .mock("GET", "/rest/v1/connection_test")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .create_async()
        .await
}

#[tokio::test]
async fn table_sync_pulls_remote_rows_and_pushes_local_ones() {
    let mut server = mockito::Server::new_async().await;
    let store = Arc::new(LocalStore::open_memory().unwrap());
    let local_id = store.insert("producer", &record(json!({"name": "Local"}))).unwrap();

    let _probe = probe_ok(&mut server).await;
    let pull = server
        .mock("GET", "/rest/v1/producer")
        .match_query(Matcher::UrlEncoded("order".into(), "id.asc".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!([{
                "id": 10,
                "name": "Remote",
                "updated_at": "2024-03-01T10:00:00Z",
                "created_by": "web",
                "last_sync": "2024-03-01T10:00:00Z"
            }])
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let push = server
        .mock("POST", "/rest/v1/producer")
        .match_query(Matcher::UrlEncoded("on_conflict".into(), "id".into()))
        .match_header("apikey", "anon-key")
        .match_body(Matcher::Regex(r#""name":"Local""#.into()))
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    let result = engine(&server, Arc::clone(&store))
        .sync_table("producer")
        .await
        .unwrap();

    pull.assert_async().await;
    push.assert_async().await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.pulled, 1);
    assert_eq!(result.pushed, 1);
    assert_eq!(result.failed_pushes, 0);

    let pulled = store
        .select("producer", &SelectQuery::all().filter("id = ?", vec![json!(10)]))
        .unwrap();
    assert_eq!(pulled.len(), 1);
    assert_eq!(pulled[0]["name"], json!("Remote"));
    assert_eq!(pulled[0]["updated_at"], json!("2024-03-01T10:00:00.000Z"));
    assert!(!pulled[0].contains_key("created_by"));

    assert!(store.unsynced_rows("producer").unwrap().is_empty());
    assert_eq!(store.last_sync_marker("producer"), result.last_sync);
    assert!(store
        .select("producer", &SelectQuery::all().filter("id = ?", vec![json!(local_id)]))
        .unwrap()[0]["last_sync"]
        .is_string());
}

#[tokio::test]
async fn unreachable_remote_skips_the_table() {
    let mut server = mockito::Server::new_async().await;
    let store = Arc::new(LocalStore::open_memory().unwrap());
    store.insert("producer", &record(json!({"name": "Local"}))).unwrap();

    let _probe = server
        .mock("GET", "/rest/v1/connection_test")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body(r#"{"message":"maintenance"}"#)
        .create_async()
        .await;
    let pull = server
        .mock("GET", "/rest/v1/producer")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let result = engine(&server, Arc::clone(&store))
        .sync_table("producer")
        .await
        .unwrap();

    pull.assert_async().await;
    assert!(result.offline);
    assert!(!result.success);
    assert_eq!(store.unsynced_rows("producer").unwrap().len(), 1);
    assert_eq!(store.last_sync_marker("producer"), None);
}

#[tokio::test]
async fn rejected_push_keeps_row_dirty() {
    let mut server = mockito::Server::new_async().await;
    let store = Arc::new(LocalStore::open_memory().unwrap());
    store
        .insert("address", &record(json!({"house_number": "7", "state_code": "MG"})))
        .unwrap();

    let _probe = probe_ok(&mut server).await;
    let _pull = server
        .mock("GET", "/rest/v1/address")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .create_async()
        .await;
    let _push = server
        .mock("POST", "/rest/v1/address")
        .match_query(Matcher::Any)
        .with_status(409)
        .with_header("content-type", "application/json")
        .with_body(r#"{"code":"23505","message":"duplicate key"}"#)
        .create_async()
        .await;

    let result = engine(&server, Arc::clone(&store))
        .sync_table("address")
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.pushed, 0);
    assert_eq!(result.failed_pushes, 1);
    assert_eq!(store.unsynced_rows("address").unwrap().len(), 1);
}

#[tokio::test]
async fn local_delete_reaches_remote_before_pull() {
    let mut server = mockito::Server::new_async().await;
    let store = Arc::new(LocalStore::open_memory().unwrap());
    let id = store.insert("producer", &record(json!({"name": "Gone"}))).unwrap();
    store.delete_tracked("producer", &json!(id)).unwrap();

    let _probe = probe_ok(&mut server).await;
    let delete = server
        .mock("DELETE", "/rest/v1/producer")
        .match_query(Matcher::UrlEncoded("id".into(), format!("eq.{id}")))
        .with_status(204)
        .expect(1)
        .create_async()
        .await;
    // The remote still lists the row; it must not come back.
    let _pull = server
        .mock("GET", "/rest/v1/producer")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!([{"id": id, "name": "Gone", "updated_at": "2024-01-01T00:00:00Z"}]).to_string())
        .create_async()
        .await;

    let result = engine(&server, Arc::clone(&store))
        .sync_table("producer")
        .await
        .unwrap();

    delete.assert_async().await;
    assert_eq!(result.deleted_remote, 1);
    assert_eq!(result.pulled, 0);
    assert!(store.pending_tombstones("producer").unwrap().is_empty());
    assert!(store.select("producer", &SelectQuery::all()).unwrap().is_empty());
}
