// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution manager: at-least-once dispatch with idempotent ingestion.
//!
//! ```text
//! (absent) --submit--> pending --dispatched--> running
//! running  --result--> completed | failed | timeout
//! running  --heartbeat_timeout / executor_crash--> crashed
//! crashed  --retry--> pending         while retry_count < max_attempts
//! crashed  --give_up--> failed
//! ```
//!
//! The execution id is the idempotency key; terminal transitions are
//! monotone in the store, so replayed callbacks and racing watchdogs cannot
//! double-write a result.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sbx_core::{
    parse_return_value, truncate_with_marker, ArtifactDescriptor, ArtifactKind, Clock, Execution,
    ExecutionId, ExecutionResult, ExecutionStatus, Language, RetryPolicy, SessionId,
};
use sbx_driver::{ContainerHandle, RuntimeDriver};
use sbx_store::{ArtifactStore, IngestOutcome, Store};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::env::Config;
use crate::executor::{ExecuteRequest, ExecutorClient};

use super::ExecutionError;

/// Client request to run code in a session.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub code: String,
    pub language: String,
    pub event: Option<Value>,
    pub timeout: Option<u32>,
}

/// Terminal result callback payload from the executor.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ResultPayload {
    pub status: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub execution_time_seconds: Option<f64>,
    #[serde(default)]
    pub return_value: Option<Value>,
    #[serde(default)]
    pub metrics: Option<Value>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactDescriptor>,
}

/// Outcome of a result callback, mapped to HTTP by the API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestResponse {
    /// First delivery; the result is now stored.
    Applied,
    /// Replay of a terminal execution, or a result for a terminated
    /// session: accepted and discarded.
    Discarded,
}

pub struct ExecutionManager {
    store: Store,
    driver: Arc<dyn RuntimeDriver>,
    artifacts: Arc<dyn ArtifactStore>,
    executor: Arc<dyn ExecutorClient>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
    policy: RetryPolicy,
}

impl ExecutionManager {
    pub fn new(
        store: Store,
        driver: Arc<dyn RuntimeDriver>,
        artifacts: Arc<dyn ArtifactStore>,
        executor: Arc<dyn ExecutorClient>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        let policy = RetryPolicy {
            max_attempts: config.max_execution_retries,
            ..RetryPolicy::default()
        };
        Self { store, driver, artifacts, executor, clock, config, policy }
    }

    /// Override the backoff policy (tests shrink the delays).
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Accept a code run for a running session. The execution row and the
    /// session activity touch commit together; dispatch happens async.
    pub async fn submit(
        self: &Arc<Self>,
        session_id: &SessionId,
        req: SubmitRequest,
    ) -> Result<Execution, ExecutionError> {
        let language = Language::parse(&req.language)
            .ok_or_else(|| ExecutionError::Validation(format!("unsupported language: {}", req.language)))?;
        if req.timeout == Some(0) {
            return Err(ExecutionError::Validation("timeout must be positive".into()));
        }

        let session = self
            .store
            .sessions()
            .find_by_id(session_id)
            .await?
            .ok_or(ExecutionError::SessionNotFound)?;
        if !session.accepts_executions() {
            return Err(ExecutionError::SessionNotReady(format!(
                "status={} dependency_status={}",
                session.status, session.dependency_status
            )));
        }

        let now = self.clock.now_utc();
        let execution = Execution::new_pending(
            ExecutionId::new(),
            session_id.clone(),
            req.code,
            language,
            req.event,
            self.config.clamp_timeout(req.timeout),
            now,
        );
        self.store.sessions().insert_execution_touch(&execution, now).await?;
        info!(execution_id = %execution.id, session_id = %session_id, "execution submitted");

        let manager = Arc::clone(self);
        let id = execution.id.clone();
        tokio::spawn(async move {
            manager.dispatch(&id).await;
        });
        Ok(execution)
    }

    /// Deliver a pending execution to its session's executor. Unreachable
    /// executors classify the attempt as crashed and enter the retry path.
    pub async fn dispatch(self: &Arc<Self>, id: &ExecutionId) {
        let Ok(Some(execution)) = self.store.executions().find_by_id(id).await else {
            return;
        };
        if execution.status != ExecutionStatus::Pending {
            return;
        }
        let Ok(Some(session)) = self.store.sessions().find_by_id(&execution.session_id).await
        else {
            return;
        };
        if session.status.is_terminal() {
            debug!(execution_id = %id, "session terminal, aborting execution");
            let now = self.clock.now_utc();
            let _ = self.store.executions().abort(id, "\nsession ended", now).await;
            return;
        }

        let delivered = match &session.container_handle {
            None => Err("session has no container".to_string()),
            Some(handle) => {
                let handle = ContainerHandle::from(handle.as_str());
                match self.driver.executor_url(&handle).await {
                    Err(e) => Err(e.to_string()),
                    Ok(url) => {
                        let request = ExecuteRequest {
                            execution_id: execution.id.clone(),
                            code: execution.code.clone(),
                            language: execution.language,
                            timeout: execution.timeout_seconds,
                            stdin: execution.event.clone(),
                        };
                        self.executor.execute(&url, &request).await.map_err(|e| e.to_string())
                    }
                }
            }
        };

        let now = self.clock.now_utc();
        match delivered {
            Ok(()) => {
                if self.store.executions().mark_running(id, now).await.unwrap_or(false) {
                    debug!(execution_id = %id, "execution dispatched");
                }
            }
            Err(reason) => {
                warn!(execution_id = %id, %reason, "dispatch failed");
                if self.store.executions().mark_crashed(id).await.unwrap_or(false) {
                    self.schedule_retry(id.clone(), execution.retry_count);
                }
            }
        }
    }

    /// Back off, then either reclaim the crashed row for another attempt or
    /// give up once attempts are exhausted.
    fn schedule_retry(self: &Arc<Self>, id: ExecutionId, retry_count: u32) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(manager.policy.delay(retry_count)).await;
            match manager.store.executions().claim_retry(&id, manager.policy.max_attempts).await {
                Ok(Some(_)) => {
                    info!(execution_id = %id, "retrying crashed execution");
                    manager.dispatch(&id).await;
                }
                Ok(None) => {
                    let now = manager.clock.now_utc();
                    if manager
                        .store
                        .executions()
                        .give_up(&id, "\nexecution crashed; retries exhausted", now)
                        .await
                        .unwrap_or(false)
                    {
                        warn!(execution_id = %id, "retries exhausted, execution failed");
                    }
                }
                Err(e) => warn!(execution_id = %id, error = %e, "retry claim failed"),
            }
        });
    }

    /// Executor heartbeat; `false` means the execution is unknown.
    pub async fn heartbeat(&self, id: &ExecutionId) -> Result<(), ExecutionError> {
        self.store.executions().heartbeat(id, self.clock.now_utc()).await?;
        self.store.executions().find_by_id(id).await?.ok_or(ExecutionError::NotFound)?;
        Ok(())
    }

    /// Executor status callback (`pending → running`).
    pub async fn mark_running(&self, id: &ExecutionId) -> Result<(), ExecutionError> {
        self.store.executions().mark_running(id, self.clock.now_utc()).await?;
        self.store.executions().find_by_id(id).await?.ok_or(ExecutionError::NotFound)?;
        Ok(())
    }

    pub async fn get(&self, id: &ExecutionId) -> Result<Execution, ExecutionError> {
        self.store.executions().find_by_id(id).await?.ok_or(ExecutionError::NotFound)
    }

    /// Idempotent terminal ingestion keyed by execution id.
    ///
    /// Large stdout/stderr is truncated inline and spilled whole to the
    /// artifact store; the Python sentinel block is parsed for the return
    /// value when the executor did not supply one.
    pub async fn ingest_result(
        &self,
        id: &ExecutionId,
        payload: ResultPayload,
    ) -> Result<IngestResponse, ExecutionError> {
        let status = ExecutionStatus::parse(&payload.status)
            .filter(|s| s.is_terminal())
            .ok_or_else(|| {
                ExecutionError::Validation(format!("not a terminal status: {}", payload.status))
            })?;

        let Some(execution) = self.store.executions().find_by_id(id).await? else {
            return Err(ExecutionError::NotFound);
        };
        // Results for terminated sessions are ignored (the workspace is
        // already reclaimed); accepted so the executor stops retrying.
        if let Some(session) = self.store.sessions().find_by_id(&execution.session_id).await? {
            if session.status.is_terminal() {
                debug!(execution_id = %id, "result after session end, discarding");
                return Ok(IngestResponse::Discarded);
            }
        }

        let mut result = ExecutionResult {
            // a "completed" claim with a non-zero exit is a user-code failure
            status: if status == ExecutionStatus::Completed
                && payload.exit_code.unwrap_or(0) != 0
            {
                ExecutionStatus::Failed
            } else {
                status
            },
            stdout: payload.stdout,
            stderr: payload.stderr,
            exit_code: payload.exit_code,
            execution_time_seconds: payload.execution_time_seconds,
            return_value: payload.return_value,
            metrics: payload.metrics,
            artifacts: payload.artifacts,
        };

        if result.return_value.is_none() && execution.language == Language::Python {
            result.return_value = parse_return_value(&result.stdout);
        }

        let cap = self.config.result_truncate_bytes;
        for (name, text) in [("stdout", &mut result.stdout), ("stderr", &mut result.stderr)] {
            let (truncated, was_truncated) = truncate_with_marker(text, cap);
            if was_truncated {
                let path = format!(".sbx/logs/{id}-{name}.log");
                match self.artifacts.upload(&execution.session_id, &path, text.as_bytes()).await {
                    Ok(mut descriptor) => {
                        descriptor.kind = ArtifactKind::Log;
                        result.artifacts.push(descriptor);
                    }
                    Err(e) => warn!(execution_id = %id, error = %e, "log spill failed"),
                }
                *text = truncated;
            }
        }

        let now = self.clock.now_utc();
        match self.store.executions().ingest_result(id, &result, now).await? {
            IngestOutcome::Applied(applied) => {
                info!(execution_id = %id, status = %applied.status, "execution finished");
                Ok(IngestResponse::Applied)
            }
            IngestOutcome::AlreadyTerminal => Ok(IngestResponse::Discarded),
            IngestOutcome::NotFound => Err(ExecutionError::NotFound),
        }
    }

    /// Crash every live execution of a session (container loss). The usual
    /// retry policy applies to each.
    pub async fn crash_running_for_session(
        self: &Arc<Self>,
        session_id: &SessionId,
    ) -> Result<(), ExecutionError> {
        for execution in self.store.executions().find_by_session(session_id).await? {
            if matches!(execution.status, ExecutionStatus::Pending | ExecutionStatus::Running)
                && self.store.executions().mark_crashed(&execution.id).await?
            {
                info!(execution_id = %execution.id, "execution crashed with its container");
                self.schedule_retry(execution.id.clone(), execution.retry_count);
            }
        }
        Ok(())
    }

    /// Periodic watchdog pass.
    ///
    /// Tier (b) first: executions past `timeout + grace` since dispatch are
    /// force-timed-out and their container destroyed (a dead executor cannot
    /// be trusted to report). Then heartbeat staleness classifies crashes.
    pub async fn watchdog_once(self: &Arc<Self>, now: DateTime<Utc>) -> Result<(), ExecutionError> {
        let grace = chrono::Duration::seconds(self.config.execution_grace.as_secs() as i64);
        for execution in self.store.executions().find_by_status(ExecutionStatus::Running).await? {
            let Some(dispatched_at) = execution.dispatched_at else {
                continue;
            };
            let deadline =
                dispatched_at + chrono::Duration::seconds(execution.timeout_seconds as i64) + grace;
            if now <= deadline {
                continue;
            }
            let elapsed = (now - dispatched_at).num_milliseconds() as f64 / 1000.0;
            if self
                .store
                .executions()
                .force_timeout(&execution.id, "\nexecution timed out (control plane deadline)", elapsed, now)
                .await?
            {
                warn!(execution_id = %execution.id, "control-plane deadline fired");
                self.destroy_container_of(&execution.session_id).await;
            }
        }

        let stale_cutoff =
            now - chrono::Duration::seconds(self.config.heartbeat_timeout.as_secs() as i64);
        for execution in
            self.store.executions().find_running_heartbeat_older_than(stale_cutoff).await?
        {
            if self.store.executions().mark_crashed(&execution.id).await? {
                warn!(execution_id = %execution.id, "heartbeat lost, execution crashed");
                self.schedule_retry(execution.id.clone(), execution.retry_count);
            }
        }
        Ok(())
    }

    /// Destroy the session's container so the reconciler rebuilds it.
    async fn destroy_container_of(&self, session_id: &SessionId) {
        let Ok(Some(session)) = self.store.sessions().find_by_id(session_id).await else {
            return;
        };
        if let Some(handle) = &session.container_handle {
            let handle = ContainerHandle::from(handle.as_str());
            if let Err(e) = self.driver.destroy(&handle).await {
                warn!(session_id = %session_id, error = %e, "container destroy failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "executions_tests.rs"]
mod tests;
