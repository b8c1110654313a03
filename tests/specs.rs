// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios driven through the managers with a fake runtime:
//! the control plane's externally observable behavior, minus the HTTP
//! framing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sbx_core::{
    Clock, ExecutionStatus, FakeClock, NodeId, NodeStatus, RetryPolicy, RuntimeKind, RuntimeNode,
    SessionStatus, Template, RESULT_SENTINEL_BEGIN, RESULT_SENTINEL_END,
};
use sbx_daemon::{
    CreateSessionRequest, ExecutionManager, FakeExecutor, Reconciler, ResultPayload, Scheduler,
    SessionError, SessionManager, SubmitRequest, TerminateOutcome,
};
use sbx_driver::{FakeDriver, RuntimeDriver};
use sbx_store::{ArtifactStore, Fetched, FsArtifactStore, Store};
use serde_json::json;

struct ControlPlane {
    store: Store,
    driver: FakeDriver,
    executor: FakeExecutor,
    artifacts: Arc<dyn ArtifactStore>,
    sessions: Arc<SessionManager>,
    executions: Arc<ExecutionManager>,
    reconciler: Reconciler,
    clock: FakeClock,
    _tempdir: tempfile::TempDir,
}

async fn control_plane() -> ControlPlane {
    let tempdir = tempfile::tempdir().unwrap();
    let vars = HashMap::from([
        ("DATABASE_URL".to_string(), "sqlite::memory:".to_string()),
        ("INTERNAL_API_TOKEN".to_string(), "spec-token".to_string()),
        ("ARTIFACT_STORE_ROOT".to_string(), tempdir.path().display().to_string()),
    ]);
    let config = Arc::new(sbx_daemon::Config::from_vars(&vars).unwrap());

    let store = Store::connect_memory().await.unwrap();
    let driver = FakeDriver::new();
    let executor = FakeExecutor::new();
    let clock = FakeClock::new();
    let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
    let artifacts: Arc<dyn ArtifactStore> =
        Arc::new(FsArtifactStore::new(&config.artifact_root, config.artifact_inline_max_bytes));
    let scheduler = Arc::new(Scheduler::new(store.nodes()));

    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        Arc::new(driver.clone()),
        Arc::clone(&artifacts),
        Arc::clone(&scheduler),
        Arc::clone(&clock_arc),
        Arc::clone(&config),
    ));
    let executions = Arc::new(
        ExecutionManager::new(
            store.clone(),
            Arc::new(driver.clone()),
            Arc::clone(&artifacts),
            Arc::new(executor.clone()),
            Arc::clone(&clock_arc),
            Arc::clone(&config),
        )
        .with_policy(RetryPolicy {
            base: Duration::from_millis(1),
            factor: 2,
            max_backoff: Duration::from_millis(5),
            max_attempts: 3,
        }),
    );
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(driver.clone()),
        Arc::clone(&sessions),
        Arc::clone(&executions),
        Arc::clone(&clock_arc),
        Arc::clone(&config),
    );

    let template = Template::new("python-basic", "sandbox/python:3.12", clock.now_utc());
    store.templates().insert(&template).await.unwrap();
    let node = RuntimeNode::new(
        NodeId::from_string("node-a"),
        RuntimeKind::Docker,
        "tcp://node-a:2375",
        16_000,
        32 * 1024 * 1024 * 1024,
        50,
    );
    store.nodes().upsert(&node).await.unwrap();

    ControlPlane {
        store,
        driver,
        executor,
        artifacts,
        sessions,
        executions,
        reconciler,
        clock,
        _tempdir: tempdir,
    }
}

impl ControlPlane {
    async fn running_session(&self) -> sbx_core::Session {
        let session = self
            .sessions
            .create(CreateSessionRequest {
                template_id: "python-basic".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        // the executor in the fresh container reports readiness
        self.sessions.container_ready(&session.id).await.unwrap();
        self.sessions.get(&session.id).await.unwrap()
    }

    async fn wait_for(&self, id: &sbx_core::ExecutionId, status: ExecutionStatus) {
        for _ in 0..200 {
            if self.executions.get(id).await.unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution never reached {status}");
    }
}

fn completed_payload(stdout: String, exit_code: i32) -> ResultPayload {
    serde_json::from_value(json!({
        "status": if exit_code == 0 { "completed" } else { "failed" },
        "stdout": stdout,
        "stderr": "",
        "exit_code": exit_code,
        "execution_time_seconds": 0.3,
    }))
    .unwrap()
}

// --- scenario 1: happy-path session + execute ---

#[tokio::test]
async fn happy_path_session_and_execute() {
    let cp = control_plane().await;
    let session = cp.running_session().await;
    assert_eq!(session.status, SessionStatus::Running);

    let execution = cp
        .executions
        .submit(
            &session.id,
            SubmitRequest {
                code: "def handler(e): return {'n': e['n'] + 1}".into(),
                language: "python".into(),
                event: Some(json!({"n": 41})),
                timeout: None,
            },
        )
        .await
        .unwrap();
    cp.wait_for(&execution.id, ExecutionStatus::Running).await;

    // executor reports the result with the sentinel-framed return value
    let stdout =
        format!("{}\n{{\"n\": 42}}\n{}", RESULT_SENTINEL_BEGIN, RESULT_SENTINEL_END);
    cp.executions.ingest_result(&execution.id, completed_payload(stdout, 0)).await.unwrap();

    let done = cp.executions.get(&execution.id).await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.return_value, Some(json!({"n": 42})));
    assert_eq!(done.exit_code, Some(0));
    assert!(done.completed_at.is_some());
}

// --- scenario 2: dependency install failure ---

#[tokio::test]
async fn dependency_install_failure_fails_the_session() {
    let cp = control_plane().await;
    let session = cp
        .sessions
        .create(CreateSessionRequest {
            template_id: "python-basic".into(),
            dependencies: vec!["nonexistent_pkg_xyz==1.0".into()],
            ..Default::default()
        })
        .await
        .unwrap();
    let handle = session.container_handle.clone().unwrap();
    cp.sessions.container_ready(&session.id).await.unwrap();

    cp.sessions
        .dependency_install_result(
            &session.id,
            false,
            vec![],
            Some("ERROR: No matching distribution found for nonexistent_pkg_xyz==1.0".into()),
        )
        .await
        .unwrap();

    let after = cp.sessions.get(&session.id).await.unwrap();
    assert_eq!(after.status, SessionStatus::Failed);
    assert_eq!(after.dependency_status.to_string(), "failed");
    assert!(after.failure_reason.unwrap().contains("nonexistent_pkg_xyz"));
    // no container remains
    assert!(after.container_handle.is_none());
    assert_eq!(cp.driver.destroy_count(&handle.as_str().into()), 1);
    assert!(cp.driver.live_handles().is_empty());
}

// --- scenario 3: execution timeout ---

#[tokio::test]
async fn execution_timeout_is_enforced_by_the_control_plane() {
    let cp = control_plane().await;
    let session = cp.running_session().await;

    let execution = cp
        .executions
        .submit(
            &session.id,
            SubmitRequest {
                code: "import time\ndef handler(e): time.sleep(10)".into(),
                language: "python".into(),
                event: None,
                timeout: Some(2),
            },
        )
        .await
        .unwrap();
    cp.wait_for(&execution.id, ExecutionStatus::Running).await;

    // the executor went silent past timeout + grace
    cp.clock.advance(Duration::from_secs(2 + 30 + 1));
    cp.executions.heartbeat(&execution.id).await.ok();
    cp.executions.watchdog_once(cp.clock.now_utc()).await.unwrap();

    let done = cp.executions.get(&execution.id).await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Timeout);
    assert!(done.execution_time_seconds.unwrap() >= 2.0);
    assert!(done.stderr.unwrap().contains("timed out"));
}

// --- scenario 4: container crash + recovery preserves the workspace ---

#[tokio::test]
async fn container_crash_recovery_preserves_workspace_files() {
    let cp = control_plane().await;
    let session = cp.running_session().await;

    cp.artifacts.upload(&session.id, "seed.txt", b"seed contents").await.unwrap();

    // the container dies out from under the session
    let old_handle = session.container_handle.clone().unwrap();
    cp.driver.kill(&old_handle.as_str().into());

    let recovered = cp.reconciler.reconcile_once().await;
    assert_eq!(recovered, 1);
    cp.sessions.container_ready(&session.id).await.unwrap();

    let after = cp.sessions.get(&session.id).await.unwrap();
    assert_eq!(after.status, SessionStatus::Running);
    assert_eq!(after.workspace_uri, session.workspace_uri);
    assert_ne!(after.container_handle.as_deref(), Some(old_handle.as_str()));

    // the file written before the crash is still visible
    match cp.artifacts.download(&session.id, "seed.txt").await.unwrap() {
        Fetched::Inline(bytes) => assert_eq!(bytes, b"seed contents"),
        Fetched::Presigned(_) => panic!("small file should be inline"),
    }

    // and a fresh execution dispatches into the new container
    let execution = cp
        .executions
        .submit(
            &session.id,
            SubmitRequest {
                code: "def handler(e): return open('/workspace/seed.txt').read()".into(),
                language: "python".into(),
                event: None,
                timeout: None,
            },
        )
        .await
        .unwrap();
    cp.wait_for(&execution.id, ExecutionStatus::Running).await;
    let delivery_urls: Vec<String> =
        cp.executor.deliveries().into_iter().map(|(url, _)| url).collect();
    assert!(delivery_urls.last().unwrap().contains(&after.container_handle.unwrap()));
}

// --- scenario 5: concurrent terminate ---

#[tokio::test]
async fn concurrent_terminates_settle_exactly_once() {
    let cp = control_plane().await;
    let session = cp.running_session().await;
    let handle = session.container_handle.clone().unwrap();

    let (a, b) = tokio::join!(
        cp.sessions.terminate(&session.id),
        cp.sessions.terminate(&session.id)
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let wins =
        outcomes.iter().filter(|o| matches!(o, TerminateOutcome::Terminated)).count();
    assert_eq!(wins, 1, "exactly one terminate wins: {outcomes:?}");

    let after = cp.sessions.get(&session.id).await.unwrap();
    assert_eq!(after.status, SessionStatus::Terminated);
    assert!(after.container_handle.is_none());
    // destroy is called at least once and at most once per unique handle
    assert_eq!(cp.driver.destroy_count(&handle.as_str().into()), 1);
}

// --- scenario 6: no capacity ---

#[tokio::test]
async fn no_capacity_fails_fast() {
    let cp = control_plane().await;
    cp.store
        .nodes()
        .set_status(&NodeId::from_string("node-a"), NodeStatus::Offline)
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let err = cp
        .sessions
        .create(CreateSessionRequest { template_id: "python-basic".into(), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NoCapacity));
    assert!(started.elapsed() < Duration::from_millis(100));
}

// --- round-trip laws ---

#[tokio::test]
async fn artifact_round_trip_returns_identical_bytes() {
    let cp = control_plane().await;
    let session = cp.running_session().await;
    let bytes: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

    cp.artifacts.upload(&session.id, "blob.bin", &bytes).await.unwrap();
    match cp.artifacts.download(&session.id, "blob.bin").await.unwrap() {
        Fetched::Inline(returned) => assert_eq!(returned, bytes),
        Fetched::Presigned(_) => panic!("4KiB should be inline"),
    }
}

#[tokio::test]
async fn created_session_reads_back_with_template_and_workspace() {
    let cp = control_plane().await;
    let created = cp
        .sessions
        .create(CreateSessionRequest { template_id: "python-basic".into(), ..Default::default() })
        .await
        .unwrap();

    let template =
        cp.store.templates().find_by_name("python-basic").await.unwrap().unwrap();
    let fetched = cp.sessions.get(&created.id).await.unwrap();
    assert_eq!(fetched.template_id, template.id);
    assert_eq!(fetched.workspace_uri, created.workspace_uri);
}

// --- idempotence laws ---

#[tokio::test]
async fn double_delete_all_and_double_destroy_are_idempotent() {
    let cp = control_plane().await;
    let session = cp.running_session().await;
    let handle = session.container_handle.clone().unwrap();
    cp.artifacts.upload(&session.id, "x.txt", b"x").await.unwrap();

    cp.artifacts.delete_all(&session.id).await.unwrap();
    cp.artifacts.delete_all(&session.id).await.unwrap();
    assert!(cp.artifacts.list(&session.id).await.unwrap().is_empty());

    cp.driver.destroy(&handle.as_str().into()).await.unwrap();
    cp.driver.destroy(&handle.as_str().into()).await.unwrap();
}

#[tokio::test]
async fn replayed_result_callback_changes_nothing() {
    let cp = control_plane().await;
    let session = cp.running_session().await;
    let execution = cp
        .executions
        .submit(
            &session.id,
            SubmitRequest {
                code: "pass".into(),
                language: "python".into(),
                event: None,
                timeout: None,
            },
        )
        .await
        .unwrap();
    cp.wait_for(&execution.id, ExecutionStatus::Running).await;

    cp.executions
        .ingest_result(&execution.id, completed_payload("first".into(), 0))
        .await
        .unwrap();
    cp.executions
        .ingest_result(&execution.id, completed_payload("replay".into(), 0))
        .await
        .unwrap();

    let done = cp.executions.get(&execution.id).await.unwrap();
    assert_eq!(done.stdout.as_deref(), Some("first"));
}
