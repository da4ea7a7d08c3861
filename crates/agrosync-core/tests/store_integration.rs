//! Integration tests for the embedded store on real database files.

use agrosync_core::storage::{StorePhase, Tombstone};
use agrosync_core::{LocalStore, Row, SelectQuery, Statement, StoreError, StoreOptions};
use serde_json::{json, Value};

fn record(value: Value) -> Row {
    value.as_object().cloned().unwrap()
}

fn count(store: &LocalStore, table: &str) -> usize {
    store.select(table, &SelectQuery::all()).unwrap().len()
}

#[test]
fn initialize_twice_creates_schema_once_and_keeps_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("farm.db");

    let store = LocalStore::open(StoreOptions::file(&path)).unwrap();
    assert_eq!(store.schema_creations(), 1);
    store.insert("producer", &record(json!({"name": "Ana"}))).unwrap();
    store
        .insert("address", &record(json!({"house_number": "7", "state_code": "MG"})))
        .unwrap();

    store.initialize().unwrap();
    assert_eq!(store.schema_creations(), 1);
    assert_eq!(count(&store, "producer"), 1);
    assert_eq!(count(&store, "address"), 1);
    store.close().unwrap();

    // A new handle on an existing file finds the sentinel table.
    let reopened = LocalStore::open(StoreOptions::file(&path)).unwrap();
    assert_eq!(reopened.schema_creations(), 0);
    assert_eq!(count(&reopened, "producer"), 1);
}

#[test]
fn queued_inserts_run_in_submission_order() {
    let store = LocalStore::new(StoreOptions::memory());
    assert_eq!(store.phase(), StorePhase::Uninitialized);

    let mut completions: Vec<_> = ["A", "B", "C"]
        .iter()
        .map(|name| {
            store.submit(Statement::new(
                "INSERT INTO producer (name) VALUES (?)",
                &[json!(name)],
            ))
        })
        .collect();
    assert_eq!(store.pending_len(), 3);

    store.initialize().unwrap();
    for completion in &mut completions {
        assert_eq!(completion.try_recv().unwrap().unwrap().changes(), 1);
    }

    let rows = store
        .select("producer", &SelectQuery::all().order_by("id"))
        .unwrap();
    let names: Vec<_> = rows.iter().map(|r| r["name"].clone()).collect();
    assert_eq!(names, vec![json!("A"), json!("B"), json!("C")]);
}

#[test]
fn dirty_detection_follows_last_sync_and_updates() {
    let store = LocalStore::open_memory().unwrap();
    let id = store.insert("producer", &record(json!({"name": "Ana"}))).unwrap();

    let dirty = store.unsynced_rows("producer").unwrap();
    assert_eq!(dirty.len(), 1);
    assert_eq!(dirty[0]["id"], json!(id));

    // Stamping after updated_at cleans the row and does not touch updated_at.
    std::thread::sleep(std::time::Duration::from_millis(5));
    let before = store.select("producer", &SelectQuery::all()).unwrap()[0]["updated_at"].clone();
    assert!(store
        .set_last_sync_marker("producer", &agrosync_core::storage::timestamp::now())
        .unwrap());
    assert!(store.unsynced_rows("producer").unwrap().is_empty());
    let after = store.select("producer", &SelectQuery::all()).unwrap()[0]["updated_at"].clone();
    assert_eq!(before, after);

    // A user edit bumps updated_at past last_sync.
    std::thread::sleep(std::time::Duration::from_millis(5));
    store
        .update("producer", &record(json!({"name": "Ana Maria"})), "id = ?", &[json!(id)])
        .unwrap();
    let dirty = store.unsynced_rows("producer").unwrap();
    assert_eq!(dirty.len(), 1);
    assert_eq!(dirty[0]["name"], json!("Ana Maria"));
}

#[test]
fn restamping_with_the_same_marker_keeps_rows_clean() {
    let store = LocalStore::open_memory().unwrap();
    let id = store.insert("producer", &record(json!({"name": "Ana"}))).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));
    let marker = agrosync_core::storage::timestamp::now();
    store.set_last_sync_marker("producer", &marker).unwrap();
    let updated_at = store.select("producer", &SelectQuery::all()).unwrap()[0]["updated_at"].clone();

    std::thread::sleep(std::time::Duration::from_millis(5));
    store.set_last_sync_marker("producer", &marker).unwrap();
    store.mark_synced("producer", &[json!(id)], &marker).unwrap();

    let row = store.select("producer", &SelectQuery::all()).unwrap().remove(0);
    assert_eq!(row["updated_at"], updated_at);
    assert_eq!(row["last_sync"], json!(marker));
    assert!(store.unsynced_rows("producer").unwrap().is_empty());
}

#[test]
fn tables_without_updated_at_are_dirty_until_stamped() {
    let store = LocalStore::open_memory().unwrap();
    store
        .insert("address", &record(json!({"house_number": "1", "state_code": "SP"})))
        .unwrap();
    assert_eq!(store.unsynced_rows("address").unwrap().len(), 1);
    store
        .set_last_sync_marker("address", "2024-01-01T00:00:00.000Z")
        .unwrap();
    assert!(store.unsynced_rows("address").unwrap().is_empty());
}

#[test]
fn failing_statement_rolls_back_whole_transaction() {
    let store = LocalStore::open_memory().unwrap();
    let result = store.run_in_transaction(&[
        Statement::new("INSERT INTO producer (name) VALUES (?)", &[json!("One")]),
        Statement::new("INSERT INTO producer (name) VALUES (?)", &[json!("Two")]),
        Statement::new("INSERT INTO producer (name) VALUES (NULL)", &[]),
    ]);
    assert!(matches!(result, Err(StoreError::Statement { .. })));
    assert_eq!(count(&store, "producer"), 0);

    let outcomes = store
        .run_in_transaction(&[
            Statement::new("INSERT INTO producer (name) VALUES (?)", &[json!("One")]),
            Statement::new("SELECT COUNT(*) AS n FROM producer", &[]),
        ])
        .unwrap();
    assert_eq!(outcomes[0].changes(), 1);
    assert_eq!(outcomes[1].rows()[0]["n"], json!(1));
}

fn is_uuid_v4(id: &str) -> bool {
    let bytes = id.as_bytes();
    id.len() == 36
        && [8, 13, 18, 23].iter().all(|&i| bytes[i] == b'-')
        && bytes[14] == b'4'
        && matches!(bytes[19], b'8' | b'9' | b'a' | b'b')
        && id
            .chars()
            .enumerate()
            .all(|(i, c)| [8, 13, 18, 23].contains(&i) || c.is_ascii_hexdigit())
}

#[test]
fn generated_ids_are_v4_and_select_back() {
    let store = LocalStore::open_memory().unwrap();
    let producer = store.insert("producer", &record(json!({"name": "Ana"}))).unwrap();

    let inserted = store
        .insert_with_generated_id(
            "expense",
            &record(json!({"employee": "Joao", "fuel_cost": 120.5, "producer_id": producer})),
        )
        .unwrap();
    assert!(is_uuid_v4(&inserted.id), "not a v4 uuid: {}", inserted.id);

    let rows = store
        .select("expense", &SelectQuery::all().filter("id = ?", vec![json!(inserted.id)]))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["employee"], json!("Joao"));
    assert_eq!(rows[0]["fuel_cost"], json!(120.5));
    assert_eq!(rows[0]["occurred_on"].as_str().map(str::len), Some(10));
}

#[test]
fn tracked_delete_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("farm.db");
    let store = LocalStore::open(StoreOptions::file(&path)).unwrap();
    let id = store.insert("producer", &record(json!({"name": "Ana"}))).unwrap();
    store.delete_tracked("producer", &json!(id)).unwrap();
    store.close().unwrap();

    let reopened = LocalStore::open(StoreOptions::file(&path)).unwrap();
    let tombstones: Vec<Tombstone> = reopened.pending_tombstones("producer").unwrap();
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones[0].row_id, id.to_string());
}

#[test]
fn delete_database_file_removes_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("farm.db");
    let store = LocalStore::open(StoreOptions::file(&path)).unwrap();
    assert!(path.exists());

    store.delete_database_file().unwrap();
    assert!(!path.exists());
    assert_eq!(store.phase(), StorePhase::Closed);
    assert_eq!(
        store.select("producer", &SelectQuery::all()).unwrap_err(),
        StoreError::Closed
    );
}
