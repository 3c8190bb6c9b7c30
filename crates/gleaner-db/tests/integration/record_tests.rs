use gleaner_core::traits::RecordStore;
use serde_json::json;
use uuid::Uuid;

use crate::common::setup_test_db;

#[tokio::test]
async fn save_and_get_record() {
    let (db, _container) = setup_test_db().await;
    let repo = db.record_repo();

    let payload = json!({
        "jobId": Uuid::new_v4(),
        "url": "https://example.com",
        "status": "completed",
        "data": {"title": "Example Domain", "tags": ["a", "b"]}
    });

    let id = repo.save(&payload).await.unwrap();
    assert!(!id.is_nil());

    let stored = repo
        .get(id)
        .await
        .unwrap()
        .expect("Should find the record");
    assert_eq!(stored.id, id);
    assert_eq!(stored.payload, payload);
}

#[tokio::test]
async fn get_unknown_record_is_none() {
    let (db, _container) = setup_test_db().await;
    let repo = db.record_repo();

    assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn list_returns_newest_first_with_limit() {
    let (db, _container) = setup_test_db().await;
    let repo = db.record_repo();

    let mut ids = Vec::new();
    for n in 0..3 {
        ids.push(repo.save(&json!({"n": n})).await.unwrap());
        // Small delay to ensure different timestamps
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let all = repo.list(10).await.unwrap();
    assert_eq!(
        all.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![ids[2], ids[1], ids[0]]
    );

    let limited = repo.list(2).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].payload, json!({"n": 2}));
}

#[tokio::test]
async fn record_store_trait_roundtrip() {
    let (db, _container) = setup_test_db().await;
    let store = db.record_repo();

    let id = RecordStore::save(&store, &json!({"status": "failed", "error": "HTTP 503"}))
        .await
        .unwrap();
    let fetched = RecordStore::get(&store, id).await.unwrap().unwrap();
    assert_eq!(fetched.payload["error"], "HTTP 503");
}

#[tokio::test]
async fn health_check_succeeds() {
    let (db, _container) = setup_test_db().await;
    db.record_repo().health_check().await.unwrap();
}
