mod common;

use common::{Harness, alice, intent, issue_created, pull_request_created};
use forge_core::config::{StoreBackend, StoreConfig};
use forge_core::store::{SqliteStore, open_store};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn aggregates_survive_reopening_the_database() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("aggregates.db");

    let h = Harness::with_store(Arc::new(SqliteStore::open(&path).expect("open"))).await;
    let issue = h
        .issues()
        .create(
            &alice(),
            vec![
                issue_created("Login broken"),
                intent("label.assigned", json!({"id": "l1"})),
                intent("comment.created", json!({"text": "seen on staging"})),
            ],
        )
        .await
        .expect("create");
    let pr = h
        .pull_requests()
        .create(&alice(), vec![pull_request_created("Fix login")])
        .await
        .expect("create pr");
    drop(h);

    let config = StoreConfig {
        backend: StoreBackend::Sqlite,
        path: path.clone(),
    };
    let reopened = Harness::with_store(open_store(&config).expect("reopen")).await;

    let state = reopened
        .issues()
        .projected_state(&issue.id)
        .await
        .expect("issue state");
    assert_eq!(Some(&state), issue.state());
    assert_eq!(state.comments[0].text, "seen on staging");

    let pr_state = reopened
        .pull_requests()
        .projected_state(&pr.id)
        .await
        .expect("pr state");
    assert_eq!(Some(&pr_state), pr.state());

    assert_eq!(reopened.issues().list().await.expect("list"), vec![issue.id.clone()]);
}

#[tokio::test]
async fn appended_events_overwrite_the_stored_document() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = Arc::new(SqliteStore::open(&dir.path().join("aggregates.db")).expect("open"));
    let h = Harness::with_store(store).await;
    let issues = h.issues();

    let issue = issues
        .create(&alice(), vec![issue_created("T")])
        .await
        .expect("create");
    issues
        .append_events(&issue.id, &alice(), vec![intent("issue.closed", json!({}))])
        .await
        .expect("close");

    let document = h
        .store
        .load(forge_core::AggregateKind::Issue, &issue.id)
        .await
        .expect("load")
        .expect("present");
    assert_eq!(document.body["events"].as_array().map(Vec::len), Some(2));
    assert_eq!(document.body["state"]["lifecycle"], "closed");
}
