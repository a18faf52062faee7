mod common;

use common::*;
use uuid::Uuid;
use weavecore::{Execution, ExecutionStatus, NodeSpec, StoreError, ValueMap, Workflow};
use weaveruntime::ExecutionStore;

#[tokio::test]
async fn test_snapshot_round_trip_keeps_executions_and_logs() {
    let runtime = test_runtime();
    let mut wf = Workflow::new("snapshot");
    wf.add_node(NodeSpec::new("start", "start"));
    wf.add_node(NodeSpec::new("a", "pass"));
    wf.connect("start", "trigger", "a", "input");

    let first = runtime.execute(&wf, ValueMap::new(), "tester").await;
    let second = runtime.execute(&wf, ValueMap::new(), "tester").await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    runtime.store().save_snapshot(&path).await.unwrap();

    let restored = ExecutionStore::new();
    assert_eq!(restored.load_snapshot(&path).await.unwrap(), 2);

    let ids: Vec<_> = restored.list_all().await.into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert_eq!(restored.get(first.id).await.unwrap(), first);
    assert_eq!(
        restored.get_logs(first.id).await.unwrap(),
        runtime.store().get_logs(first.id).await.unwrap()
    );

    // terminal records stay immutable after a reload
    let mut tampered = first.clone();
    tampered.status = ExecutionStatus::Running;
    assert!(matches!(
        restored.save(&tampered).await,
        Err(StoreError::TerminalExecution(_))
    ));
}

#[tokio::test]
async fn test_missing_snapshot_is_an_io_error() {
    let store = ExecutionStore::new();
    let dir = tempfile::tempdir().unwrap();
    let result = store.load_snapshot(dir.path().join("absent.json")).await;
    assert!(matches!(result, Err(StoreError::Io(_))));
}

#[tokio::test]
async fn test_unfinished_runs_come_back_failed_after_reload() {
    let store = ExecutionStore::new();
    let mut running = Execution::new(Uuid::new_v4(), ValueMap::new(), "tester");
    running.mark_running();
    running.start_node("start", "start", ValueMap::new());
    running.complete_node("start", ValueMap::new(), "trigger".into(), 0);
    running.start_node("slow", "pass", ValueMap::new());
    let pending = Execution::new(Uuid::new_v4(), ValueMap::new(), "tester");
    store.save(&running).await.unwrap();
    store.save(&pending).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    store.save_snapshot(&path).await.unwrap();

    let restored = ExecutionStore::new();
    assert_eq!(restored.load_snapshot(&path).await.unwrap(), 2);

    let reloaded = restored.get(running.id).await.unwrap();
    assert_eq!(reloaded.status, ExecutionStatus::Failed);
    assert!(reloaded.completed_at.is_some());
    assert!(reloaded.error_message.as_deref().unwrap().contains("interrupted"));
    assert_eq!(
        reloaded.node_execution("start").unwrap().status,
        ExecutionStatus::Completed
    );
    assert_eq!(
        reloaded.node_execution("slow").unwrap().status,
        ExecutionStatus::Failed
    );
    assert_eq!(
        restored.get(pending.id).await.unwrap().status,
        ExecutionStatus::Failed
    );
    assert!(!restored.get_logs(running.id).await.unwrap().is_empty());

    // the failed record is now final
    assert!(matches!(
        restored.save(&running).await,
        Err(StoreError::TerminalExecution(_))
    ));
}
