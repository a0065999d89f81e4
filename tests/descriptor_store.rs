// tests/descriptor_store.rs

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;

use shellrelay::descriptor::{CommandDescriptor, Document};
use shellrelay::errors::RelayError;
use shellrelay::store::{
    DescriptorStore, FileDescriptorStore, MemoryDescriptorStore, NotificationReceiver,
    StoreNotification,
};
use shellrelay_test_utils::{DocumentBuilder, init_tracing, with_timeout};

fn fields(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// Wait for a `Changed` snapshot satisfying `pred`, skipping the rest.
async fn next_matching(rx: &mut NotificationReceiver, pred: impl Fn(&Document) -> bool) -> Document {
    loop {
        match rx.recv().await {
            Some(StoreNotification::Changed(doc)) if pred(&doc) => return doc,
            Some(_) => continue,
            None => panic!("notification channel closed"),
        }
    }
}

#[tokio::test]
async fn memory_store_merges_and_notifies() {
    init_tracing();
    let store = MemoryDescriptorStore::with_document(
        DocumentBuilder::request("uptime", 1, 0).field("owner", json!("ops")).build(),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = store.subscribe(tx).unwrap();

    store
        .update(fields(json!({ "enabled": false, "result": "done" })))
        .await
        .unwrap();

    let doc = with_timeout(rx.recv()).await;
    match doc {
        Some(StoreNotification::Changed(doc)) => {
            assert_eq!(doc["owner"], json!("ops"));
            assert_eq!(doc["command"], json!("uptime"));
            assert_eq!(doc["enabled"], json!(false));
        }
        other => panic!("expected a snapshot, got {other:?}"),
    }
    assert_eq!(store.writes().len(), 1);
    assert!(!store.read_enabled().await.unwrap());

    assert_eq!(store.active_subscribers(), 1);
    drop(subscription);
    assert_eq!(store.active_subscribers(), 0);
    assert_eq!(store.subscribe_count(), 1);
    assert_eq!(store.unsubscribe_count(), 1);
}

#[tokio::test]
async fn memory_store_operator_writes_are_not_recorded() {
    let store = MemoryDescriptorStore::new();
    store.set_fields(DocumentBuilder::request("id", 1, 0).build());
    assert!(store.writes().is_empty());
    assert!(store.read_enabled().await.unwrap());
}

#[tokio::test]
async fn memory_store_failure_injection() {
    let store = MemoryDescriptorStore::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = store.subscribe(tx).unwrap();

    store.fail_writes(true);
    assert!(matches!(store.update(Document::new()).await, Err(RelayError::Store(_))));
    store.fail_reads(true);
    assert!(store.fetch().await.is_err());
    assert!(store.read_enabled().await.is_err());

    store.push_error("backend unavailable");
    match with_timeout(rx.recv()).await {
        Some(StoreNotification::Failed(msg)) => assert_eq!(msg, "backend unavailable"),
        other => panic!("expected a failure, got {other:?}"),
    }
}

#[tokio::test]
async fn file_store_reads_missing_and_blank_files_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("descriptor.json");
    let store = FileDescriptorStore::new(&path);

    assert!(store.fetch().await.unwrap().is_empty());

    std::fs::write(&path, "  \n").unwrap();
    assert!(store.fetch().await.unwrap().is_empty());

    std::fs::write(&path, "[1, 2]").unwrap();
    match store.fetch().await {
        Err(RelayError::Store(msg)) => assert!(msg.contains("array")),
        other => panic!("expected a store error, got {other:?}"),
    }

    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(store.fetch().await, Err(RelayError::JsonError(_))));
}

#[tokio::test]
async fn file_store_update_preserves_unknown_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("descriptor.json");
    std::fs::write(
        &path,
        r#"{ "command": "df -h", "enabled": true, "count": 2, "owner": "ops" }"#,
    )
    .unwrap();
    let store = FileDescriptorStore::new(&path);

    store
        .update(fields(json!({ "enabled": false, "result": "ok", "updatedAt": 5 })))
        .await
        .unwrap();

    let doc = store.fetch().await.unwrap();
    assert_eq!(doc["owner"], json!("ops"));
    assert_eq!(doc["count"], json!(2));
    let d = CommandDescriptor::from_document(&doc);
    assert!(!d.enabled);
    assert_eq!(d.result, "ok");
    assert_eq!(d.updated_at, Some(5));
    assert!(!dir.path().join(".descriptor.json.tmp").exists());
}

#[tokio::test]
async fn file_store_notifies_on_external_writes() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("descriptor.json");
    std::fs::write(&path, "{}").unwrap();
    let store = FileDescriptorStore::new(&path);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = store.subscribe(tx).unwrap();
    // Give the backend a moment to register the watch.
    tokio::time::sleep(Duration::from_millis(100)).await;

    std::fs::write(&path, r#"{ "command": "whoami", "enabled": true }"#).unwrap();

    let doc = with_timeout(next_matching(&mut rx, |doc| doc.get("command") == Some(&json!("whoami")))).await;
    assert!(CommandDescriptor::from_document(&doc).enabled);

    // Writes through the store are observed as well.
    store.update(fields(json!({ "enabled": false }))).await.unwrap();
    let doc = with_timeout(next_matching(&mut rx, |doc| doc.get("enabled") == Some(&json!(false)))).await;
    assert_eq!(doc["command"], json!("whoami"));

    drop(subscription);
}

#[tokio::test]
async fn file_store_subscription_reports_only_later_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("descriptor.json");
    std::fs::write(&path, r#"{ "command": "id", "enabled": true }"#).unwrap();
    let store = FileDescriptorStore::new(&path);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = store.subscribe(tx).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());

    // The current document is read explicitly instead.
    let current = store.fetch().await.unwrap();
    assert!(CommandDescriptor::from_document(&current).enabled);
}

#[tokio::test]
async fn file_store_concurrent_updates_keep_every_field() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("descriptor.json");
    let store = FileDescriptorStore::new(&path);

    let writes = (0..8).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            let mut field = Document::new();
            field.insert(format!("field{i}"), json!(i));
            store.update(field).await
        })
    });
    for write in futures::future::join_all(writes).await {
        write.unwrap().unwrap();
    }

    let doc = store.fetch().await.unwrap();
    for i in 0..8 {
        assert_eq!(doc[&format!("field{i}")], json!(i));
    }
}
