//! File-backed key-value store round trips.

use serde_json::json;

use rb_core::ports::KeyValueStorePort;
use rb_infra::FileKeyValueStore;

#[tokio::test]
async fn missing_document_reads_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileKeyValueStore::new(dir.path().join("state.json"));
    assert!(store.get("anything").await.unwrap().is_none());
}

#[tokio::test]
async fn values_round_trip_and_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let store = FileKeyValueStore::new(&path);
    store
        .set("payload_order", json!(["a.bin", "b.bin"]))
        .await
        .unwrap();
    store.set("auto_boot", json!(true)).await.unwrap();

    let reopened = FileKeyValueStore::new(&path);
    assert_eq!(
        reopened.get("payload_order").await.unwrap(),
        Some(json!(["a.bin", "b.bin"]))
    );
    assert_eq!(reopened.get("auto_boot").await.unwrap(), Some(json!(true)));
}

#[tokio::test]
async fn set_overwrites_and_remove_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileKeyValueStore::new(dir.path().join("state.json"));

    store.set("selected_payload", json!("a.bin")).await.unwrap();
    store.set("selected_payload", json!("b.bin")).await.unwrap();
    assert_eq!(
        store.get("selected_payload").await.unwrap(),
        Some(json!("b.bin"))
    );

    store.remove("selected_payload").await.unwrap();
    assert!(store.get("selected_payload").await.unwrap().is_none());

    // removing a missing key is fine
    store.remove("selected_payload").await.unwrap();
}

#[tokio::test]
async fn parent_directories_are_created_on_first_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("state.json");
    let store = FileKeyValueStore::new(&path);
    store.set("auto_boot", json!(false)).await.unwrap();
    assert!(path.exists());
}

#[tokio::test]
async fn malformed_document_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    tokio::fs::write(&path, "not json").await.unwrap();

    let store = FileKeyValueStore::new(&path);
    assert!(store.get("auto_boot").await.is_err());
}

#[tokio::test]
async fn no_temp_file_left_behind() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileKeyValueStore::new(dir.path().join("state.json"));
    store.set("auto_boot", json!(true)).await.unwrap();

    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    assert_eq!(names, ["state.json"]);
}
