// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for engine, lifecycle, and API tests: in-memory store,
//! fake driver/executor, filesystem artifacts in a tempdir, fake clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sbx_core::{Clock, FakeClock, NodeId, RetryPolicy, RuntimeKind, RuntimeNode, Template};
use sbx_driver::FakeDriver;
use sbx_store::{ArtifactStore, FsArtifactStore, Store};

use crate::engine::{ExecutionManager, SessionManager};
use crate::env::Config;
use crate::executor::fake::FakeExecutor;
use crate::scheduler::Scheduler;

pub(crate) struct Harness {
    pub store: Store,
    pub driver: FakeDriver,
    pub executor: FakeExecutor,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub scheduler: Arc<Scheduler>,
    pub sessions: Arc<SessionManager>,
    pub executions: Arc<ExecutionManager>,
    pub clock: FakeClock,
    pub config: Arc<Config>,
    _tempdir: tempfile::TempDir,
}

pub(crate) async fn harness() -> Harness {
    let tempdir = tempfile::tempdir().unwrap();
    let vars = HashMap::from([
        ("DATABASE_URL".to_string(), "sqlite::memory:".to_string()),
        ("INTERNAL_API_TOKEN".to_string(), "test-token".to_string()),
        (
            "ARTIFACT_STORE_ROOT".to_string(),
            tempdir.path().display().to_string(),
        ),
    ]);
    let config = Arc::new(Config::from_vars(&vars).unwrap());

    let store = Store::connect_memory().await.unwrap();
    let driver = FakeDriver::new();
    let executor = FakeExecutor::new();
    let clock = FakeClock::new();
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(
        &config.artifact_root,
        config.artifact_inline_max_bytes,
    ));
    let scheduler = Arc::new(Scheduler::new(store.nodes()));
    let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());

    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        Arc::new(driver.clone()),
        Arc::clone(&artifacts),
        Arc::clone(&scheduler),
        Arc::clone(&clock_arc),
        Arc::clone(&config),
    ));
    // millisecond backoff so crash/retry tests finish quickly
    let policy = RetryPolicy {
        base: Duration::from_millis(1),
        factor: 2,
        max_backoff: Duration::from_millis(10),
        max_attempts: config.max_execution_retries,
    };
    let executions = Arc::new(
        ExecutionManager::new(
            store.clone(),
            Arc::new(driver.clone()),
            Arc::clone(&artifacts),
            Arc::new(executor.clone()),
            Arc::clone(&clock_arc),
            Arc::clone(&config),
        )
        .with_policy(policy),
    );

    Harness {
        store,
        driver,
        executor,
        artifacts,
        scheduler,
        sessions,
        executions,
        clock,
        config,
        _tempdir: tempdir,
    }
}

impl Harness {
    pub async fn seed_template(&self, name: &str) -> Template {
        let template = Template::new(name, "sandbox/python:3.12", self.clock.now_utc());
        self.store.templates().insert(&template).await.unwrap();
        template
    }

    pub async fn seed_node(&self, id: &str) -> RuntimeNode {
        let node = RuntimeNode::new(
            NodeId::from_string(id),
            RuntimeKind::Docker,
            format!("tcp://{id}:2375"),
            16_000,
            32 * 1024 * 1024 * 1024,
            50,
        );
        self.store.nodes().upsert(&node).await.unwrap();
        self.scheduler.invalidate_cache();
        node
    }
}

/// Poll until `check` passes or two seconds elapse; spawned manager tasks
/// (dispatch, retries, readiness watchers) settle in the meantime.
pub(crate) async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}
