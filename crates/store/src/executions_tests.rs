// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::Store;
use chrono::{Duration, Utc};
use sbx_core::{RuntimeKind, Session, Template};
use serde_json::json;
use std::collections::BTreeMap;

async fn store() -> Store {
    Store::connect_memory().await.unwrap()
}

async fn seeded_execution(store: &Store) -> Execution {
    let template = Template::new(
        format!("tpl-{}", SessionId::new().suffix()),
        "sandbox/python:3.12",
        Utc::now(),
    );
    store.templates().insert(&template).await.unwrap();
    let session = Session::new_creating(
        SessionId::new(),
        template.id.clone(),
        RuntimeKind::Docker,
        "/tmp/ws",
        template.limits,
        BTreeMap::new(),
        300,
        vec![],
        Utc::now(),
    );
    store.sessions().insert(&session).await.unwrap();
    let execution = Execution::new_pending(
        ExecutionId::new(),
        session.id.clone(),
        "def handler(event): return event",
        Language::Python,
        Some(json!({"x": 1})),
        30,
        Utc::now(),
    );
    store.sessions().insert_execution_touch(&execution, Utc::now()).await.unwrap();
    execution
}

fn completed_result() -> ExecutionResult {
    ExecutionResult {
        status: ExecutionStatus::Completed,
        stdout: "ok".into(),
        stderr: String::new(),
        exit_code: Some(0),
        execution_time_seconds: Some(0.4),
        return_value: Some(json!({"x": 1})),
        metrics: Some(json!({"cpu_seconds": 0.1})),
        artifacts: vec![],
    }
}

#[tokio::test]
async fn round_trip_preserves_event_and_language() {
    let store = store().await;
    let execution = seeded_execution(&store).await;
    let found = store.executions().find_by_id(&execution.id).await.unwrap().unwrap();
    assert_eq!(found, execution);
}

#[tokio::test]
async fn mark_running_only_from_pending() {
    let store = store().await;
    let execution = seeded_execution(&store).await;
    assert!(store.executions().mark_running(&execution.id, Utc::now()).await.unwrap());
    assert!(!store.executions().mark_running(&execution.id, Utc::now()).await.unwrap());

    let e = store.executions().find_by_id(&execution.id).await.unwrap().unwrap();
    assert_eq!(e.status, ExecutionStatus::Running);
    assert!(e.last_heartbeat_at.is_some());
    assert!(e.dispatched_at.is_some());
}

#[tokio::test]
async fn abort_fails_any_live_row_but_not_terminal_ones() {
    let store = store().await;
    let execution = seeded_execution(&store).await;

    assert!(store.executions().abort(&execution.id, "\nsession ended", Utc::now()).await.unwrap());
    let e = store.executions().find_by_id(&execution.id).await.unwrap().unwrap();
    assert_eq!(e.status, ExecutionStatus::Failed);
    assert!(e.stderr.unwrap().contains("session ended"));

    // terminal rows are untouched
    assert!(!store.executions().abort(&execution.id, "again", Utc::now()).await.unwrap());
}

#[tokio::test]
async fn heartbeat_requires_running() {
    let store = store().await;
    let execution = seeded_execution(&store).await;
    assert!(!store.executions().heartbeat(&execution.id, Utc::now()).await.unwrap());
    store.executions().mark_running(&execution.id, Utc::now()).await.unwrap();
    assert!(store.executions().heartbeat(&execution.id, Utc::now()).await.unwrap());
}

#[tokio::test]
async fn ingest_result_first_write_wins() {
    let store = store().await;
    let execution = seeded_execution(&store).await;
    store.executions().mark_running(&execution.id, Utc::now()).await.unwrap();

    let outcome =
        store.executions().ingest_result(&execution.id, &completed_result(), Utc::now()).await.unwrap();
    let IngestOutcome::Applied(applied) = outcome else {
        panic!("expected Applied");
    };
    assert_eq!(applied.status, ExecutionStatus::Completed);
    assert_eq!(applied.exit_code, Some(0));
    assert!(applied.completed_at.is_some());

    // Replay with a different payload: discarded, stored fields unchanged.
    let mut second = completed_result();
    second.status = ExecutionStatus::Failed;
    second.stdout = "different".into();
    let outcome =
        store.executions().ingest_result(&execution.id, &second, Utc::now()).await.unwrap();
    assert_eq!(outcome, IngestOutcome::AlreadyTerminal);

    let e = store.executions().find_by_id(&execution.id).await.unwrap().unwrap();
    assert_eq!(e.status, ExecutionStatus::Completed);
    assert_eq!(e.stdout.as_deref(), Some("ok"));
}

#[tokio::test]
async fn ingest_result_unknown_id_is_not_found() {
    let store = store().await;
    let outcome = store
        .executions()
        .ingest_result(&ExecutionId::new(), &completed_result(), Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::NotFound);
}

#[tokio::test]
async fn ingest_result_rejects_non_terminal_status() {
    let store = store().await;
    let execution = seeded_execution(&store).await;
    let mut result = completed_result();
    result.status = ExecutionStatus::Running;
    let err =
        store.executions().ingest_result(&execution.id, &result, Utc::now()).await.unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));
}

#[tokio::test]
async fn crash_retry_cycle_caps_attempts() {
    let store = store().await;
    let execution = seeded_execution(&store).await;

    for attempt in 1..=3u32 {
        store.executions().mark_running(&execution.id, Utc::now()).await.unwrap();
        assert!(store.executions().mark_crashed(&execution.id).await.unwrap());
        let retried = store.executions().claim_retry(&execution.id, 3).await.unwrap().unwrap();
        assert_eq!(retried.status, ExecutionStatus::Pending);
        assert_eq!(retried.retry_count, attempt);
    }

    store.executions().mark_running(&execution.id, Utc::now()).await.unwrap();
    store.executions().mark_crashed(&execution.id).await.unwrap();
    assert!(store.executions().claim_retry(&execution.id, 3).await.unwrap().is_none());

    assert!(store.executions().give_up(&execution.id, "\nretries exhausted", Utc::now()).await.unwrap());
    let e = store.executions().find_by_id(&execution.id).await.unwrap().unwrap();
    assert_eq!(e.status, ExecutionStatus::Failed);
    assert_eq!(e.retry_count, 3);
    assert!(e.completed_at.is_some());
}

#[tokio::test]
async fn mark_crashed_ignores_terminal_rows() {
    let store = store().await;
    let execution = seeded_execution(&store).await;
    store.executions().mark_running(&execution.id, Utc::now()).await.unwrap();
    store.executions().ingest_result(&execution.id, &completed_result(), Utc::now()).await.unwrap();
    assert!(!store.executions().mark_crashed(&execution.id).await.unwrap());
}

#[tokio::test]
async fn force_timeout_terminates_live_rows() {
    let store = store().await;
    let execution = seeded_execution(&store).await;
    store.executions().mark_running(&execution.id, Utc::now()).await.unwrap();

    assert!(store
        .executions()
        .force_timeout(&execution.id, "\nexecution timed out", 2.5, Utc::now())
        .await
        .unwrap());
    let e = store.executions().find_by_id(&execution.id).await.unwrap().unwrap();
    assert_eq!(e.status, ExecutionStatus::Timeout);
    assert_eq!(e.execution_time_seconds, Some(2.5));
    assert!(e.stderr.unwrap().contains("timed out"));

    // already terminal: no-op
    assert!(!store
        .executions()
        .force_timeout(&execution.id, "again", 9.9, Utc::now())
        .await
        .unwrap());
}

#[tokio::test]
async fn stale_heartbeat_query_finds_silent_runners() {
    let store = store().await;
    let execution = seeded_execution(&store).await;
    store.executions().mark_running(&execution.id, Utc::now()).await.unwrap();

    let stale = store
        .executions()
        .find_running_heartbeat_older_than(Utc::now() + Duration::seconds(60))
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);

    let fresh = store
        .executions()
        .find_running_heartbeat_older_than(Utc::now() - Duration::seconds(60))
        .await
        .unwrap();
    assert!(fresh.is_empty());
}
