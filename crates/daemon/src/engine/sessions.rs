// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session manager: owns the session lifecycle state machine.
//!
//! ```text
//! (absent) --create--> creating --container_ready--> running
//! creating --create_fail/ready_timeout--> failed
//! running  --container_lost--> creating          (reconciler)
//! running  --terminate/idle/max_lifetime--> terminated
//! ```
//!
//! `creating → running` is driven by the executor's callback, never by
//! client input. Every transition goes through a status-guarded store write,
//! so concurrent terminates and recoveries race in the database.

use std::collections::BTreeMap;
use std::sync::Arc;

use sbx_core::{Clock, DependencyStatus, ResourceLimits, Session, SessionId, SessionStatus};
use sbx_driver::{ContainerHandle, ContainerSpec, RuntimeDriver};
use sbx_store::{ArtifactStore, Store};
use tracing::{info, warn};

use crate::env::Config;
use crate::scheduler::{Scheduler, SchedulerError};

use super::SessionError;

/// Client request to create a session.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionRequest {
    /// Template id, or its unique name.
    pub template_id: String,
    pub resources: Option<ResourceLimits>,
    pub timeout: Option<u32>,
    pub env_vars: BTreeMap<String, String>,
    pub dependencies: Vec<String>,
}

/// Result of a terminate call; both are successful outcomes for the caller,
/// but only one of two concurrent terminates observes `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    Terminated,
    AlreadyTerminal,
}

pub struct SessionManager {
    store: Store,
    driver: Arc<dyn RuntimeDriver>,
    artifacts: Arc<dyn ArtifactStore>,
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
}

impl SessionManager {
    pub fn new(
        store: Store,
        driver: Arc<dyn RuntimeDriver>,
        artifacts: Arc<dyn ArtifactStore>,
        scheduler: Arc<Scheduler>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        Self { store, driver, artifacts, scheduler, clock, config }
    }

    /// Create a session: persist intent, pick a node, materialize the
    /// container, and hand readiness to the executor callback.
    pub async fn create(
        self: &Arc<Self>,
        req: CreateSessionRequest,
    ) -> Result<Session, SessionError> {
        if req.timeout == Some(0) {
            return Err(SessionError::Validation("timeout must be positive".into()));
        }

        let templates = self.store.templates();
        let as_id = sbx_core::TemplateId::from_string(req.template_id.as_str());
        let template = match templates.find_by_id(&as_id).await? {
            Some(t) => t,
            None => templates
                .find_by_name(&req.template_id)
                .await?
                .ok_or_else(|| SessionError::InvalidTemplate(req.template_id.clone()))?,
        };

        let id = SessionId::new();
        let limits = template.limits.merged(req.resources.as_ref());
        let now = self.clock.now_utc();
        let session = Session::new_creating(
            id.clone(),
            template.id.clone(),
            self.driver.kind(),
            self.artifacts.workspace_uri(&id),
            limits,
            req.env_vars,
            self.config.clamp_timeout(req.timeout),
            req.dependencies,
            now,
        );
        self.store.sessions().insert(&session).await?;
        info!(session_id = %id, template = %template.name, "session created");

        match self.materialize(&session, &template.image_ref).await {
            Ok(()) => {}
            Err(e) => {
                let reason = e.to_string();
                self.store.sessions().fail(&id, &reason, self.clock.now_utc()).await?;
                warn!(session_id = %id, error = %reason, "session create failed");
                return Err(e);
            }
        }

        self.store.sessions().find_by_id(&id).await?.ok_or(SessionError::NotFound)
    }

    /// Schedule + create + bind a container for a session. Shared by the
    /// create path and reconciler recovery; the workspace URI is whatever the
    /// session row says, so recovered containers see the same files.
    async fn materialize(
        self: &Arc<Self>,
        session: &Session,
        image_ref: &str,
    ) -> Result<(), SessionError> {
        let node = match self.scheduler.schedule(image_ref, &session.limits).await {
            Ok(node) => node,
            Err(SchedulerError::NoCapacity) => return Err(SessionError::NoCapacity),
            Err(SchedulerError::Store(e)) => return Err(SessionError::Store(e)),
        };

        super::with_driver_retries(|| self.driver.ensure_image(image_ref, &node)).await?;

        let spec = ContainerSpec::for_session(
            session,
            &self.config.control_plane_url,
            &self.config.internal_api_token,
        )
        .with_image(image_ref);
        let handle = self.driver.create_container(&node, &spec).await?;

        let now = self.clock.now_utc();
        let bound =
            self.store.sessions().bind_container(&session.id, &node.id, handle.as_str(), now).await?;
        if !bound {
            // terminated while we were creating: tear the container back down
            warn!(session_id = %session.id, "session left creating during bind, destroying");
            let _ = self.driver.destroy(&handle).await;
            return Ok(());
        }

        let nodes = self.store.nodes();
        nodes
            .apply_usage_delta(&node.id, session.limits.cpu_millis, session.limits.memory_bytes, 1)
            .await?;
        nodes.add_cached_image(&node.id, image_ref).await?;

        let manager = Arc::clone(self);
        let session_id = session.id.clone();
        tokio::spawn(async move {
            manager.await_ready(session_id, handle).await;
        });
        Ok(())
    }

    /// Watch a fresh container until the create deadline. Success is a
    /// no-op (the executor's `container_ready` callback flips the status);
    /// deadline expiry destroys the container and fails the session.
    pub async fn await_ready(&self, id: SessionId, handle: ContainerHandle) {
        match self.driver.wait_ready(&handle, self.config.session_create_deadline).await {
            Ok(()) => {}
            Err(e) => {
                warn!(session_id = %id, error = %e, "container not ready, failing session");
                let _ = self.driver.destroy(&handle).await;
                self.release_node_of(&id).await;
                let now = self.clock.now_utc();
                if let Err(e) = self
                    .store
                    .sessions()
                    .fail(&id, "container not ready before deadline", now)
                    .await
                {
                    warn!(session_id = %id, error = %e, "failing session after ready timeout");
                }
            }
        }
    }

    /// Executor callback: the container is up and serving.
    pub async fn container_ready(&self, id: &SessionId) -> Result<(), SessionError> {
        let advanced = self.store.sessions().mark_ready(id, self.clock.now_utc()).await?;
        if advanced {
            info!(session_id = %id, "session running");
            return Ok(());
        }
        // Idempotent for replays; only a missing session is an error.
        self.store.sessions().find_by_id(id).await?.ok_or(SessionError::NotFound)?;
        Ok(())
    }

    /// Executor callback: early container exit. Detach the binding so the
    /// reconciler recreates the container on its next pass.
    pub async fn container_exited(&self, id: &SessionId) -> Result<(), SessionError> {
        let Some(session) = self.store.sessions().find_by_id(id).await? else {
            return Err(SessionError::NotFound);
        };
        if !session.status.is_active() {
            return Ok(());
        }
        self.release_node(&session).await;
        if let Some(handle) = &session.container_handle {
            let _ = self.driver.destroy(&ContainerHandle::from(handle.as_str())).await;
        }
        let now = self.clock.now_utc();
        let detached = match session.status {
            SessionStatus::Running => self.store.sessions().detach_for_recovery(id, now).await?,
            _ => self.store.sessions().clear_binding(id, now).await?,
        };
        if detached {
            info!(session_id = %id, "container exited, queued for recovery");
        }
        Ok(())
    }

    /// Executor callback with the in-container dependency install outcome.
    pub async fn dependency_install_result(
        &self,
        id: &SessionId,
        success: bool,
        installed: Vec<String>,
        log: Option<String>,
    ) -> Result<(), SessionError> {
        let Some(session) = self.store.sessions().find_by_id(id).await? else {
            return Err(SessionError::NotFound);
        };
        let now = self.clock.now_utc();
        if success {
            self.store
                .sessions()
                .set_dependency_result(id, DependencyStatus::Ready, &installed, now)
                .await?;
            info!(session_id = %id, count = installed.len(), "dependencies installed");
            return Ok(());
        }

        let reason = format!(
            "dependency install failed: {}",
            log.as_deref().unwrap_or("no install log")
        );
        self.store
            .sessions()
            .set_dependency_result(id, DependencyStatus::Failed, &[], now)
            .await?;
        self.release_node(&session).await;
        if let Some(handle) = &session.container_handle {
            let _ = self.driver.destroy(&ContainerHandle::from(handle.as_str())).await;
        }
        self.store.sessions().fail(id, &reason, self.clock.now_utc()).await?;
        warn!(session_id = %id, %reason, "session failed");
        Ok(())
    }

    pub async fn get(&self, id: &SessionId) -> Result<Session, SessionError> {
        self.store.sessions().find_by_id(id).await?.ok_or(SessionError::NotFound)
    }

    pub async fn list(
        &self,
        status: Option<SessionStatus>,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<Vec<Session>, SessionError> {
        Ok(self.store.sessions().list(status, limit, cursor).await?)
    }

    /// Terminate a session: exactly one concurrent caller wins the status
    /// write; the container is destroyed once per unique handle and the
    /// workspace is reclaimed asynchronously.
    pub async fn terminate(&self, id: &SessionId) -> Result<TerminateOutcome, SessionError> {
        let Some(before) = self.store.sessions().find_by_id(id).await? else {
            return Err(SessionError::NotFound);
        };
        let won = self.store.sessions().terminate(id, self.clock.now_utc()).await?.is_some();
        if !won {
            // already terminal, or lost the race to a concurrent terminate
            return Ok(TerminateOutcome::AlreadyTerminal);
        }

        self.release_node(&before).await;
        if let Some(handle) = &before.container_handle {
            if let Err(e) = self.driver.destroy(&ContainerHandle::from(handle.as_str())).await {
                warn!(session_id = %id, error = %e, "container destroy failed");
            }
        }

        let artifacts = Arc::clone(&self.artifacts);
        let session_id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = artifacts.delete_all(&session_id).await {
                warn!(session_id = %session_id, error = %e, "workspace cleanup failed");
            }
        });

        info!(session_id = %id, "session terminated");
        Ok(TerminateOutcome::Terminated)
    }

    /// Background sweep: terminate idle and over-age running sessions.
    pub async fn idle_sweep(&self, now: chrono::DateTime<chrono::Utc>) -> Result<(), SessionError> {
        let idle_cutoff =
            now - chrono::Duration::seconds(self.config.session_idle_timeout.as_secs() as i64);
        for session in self.store.sessions().find_idle_running_older_than(idle_cutoff).await? {
            info!(session_id = %session.id, "terminating idle session");
            let _ = self.terminate(&session.id).await;
        }

        let age_cutoff =
            now - chrono::Duration::seconds(self.config.session_max_lifetime.as_secs() as i64);
        for session in self.store.sessions().find_running_created_before(age_cutoff).await? {
            info!(session_id = %session.id, "terminating session past max lifetime");
            let _ = self.terminate(&session.id).await;
        }
        Ok(())
    }

    /// Reconciler entry: the session's container is gone; rebuild it around
    /// the same workspace. Failure fails the session and surfaces the error
    /// so the reconciler can crash its executions.
    pub async fn recover(self: &Arc<Self>, session: &Session) -> Result<(), SessionError> {
        let now = self.clock.now_utc();
        self.release_node(session).await;
        match session.status {
            SessionStatus::Running => {
                if !self.store.sessions().detach_for_recovery(&session.id, now).await? {
                    return Ok(()); // someone else already moved it
                }
            }
            SessionStatus::Creating => {
                self.store.sessions().clear_binding(&session.id, now).await?;
            }
            _ => return Ok(()),
        }

        let template = self
            .store
            .templates()
            .find_by_id(&session.template_id)
            .await?
            .ok_or_else(|| SessionError::InvalidTemplate(session.template_id.to_string()))?;

        let Some(detached) = self.store.sessions().find_by_id(&session.id).await? else {
            return Err(SessionError::NotFound);
        };
        info!(session_id = %session.id, "recovering session container");
        match self.materialize(&detached, &template.image_ref).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let reason = format!("recovery failed: {e}");
                self.store.sessions().fail(&session.id, &reason, self.clock.now_utc()).await?;
                warn!(session_id = %session.id, %reason, "session failed");
                Err(e)
            }
        }
    }

    /// Return the session's resources to its node's advisory counters.
    async fn release_node(&self, session: &Session) {
        if let Some(node_id) = &session.runtime_node_id {
            let limits = session.limits;
            if let Err(e) = self
                .store
                .nodes()
                .apply_usage_delta(node_id, -limits.cpu_millis, -limits.memory_bytes, -1)
                .await
            {
                warn!(session_id = %session.id, error = %e, "usage release failed");
            }
        }
    }

    async fn release_node_of(&self, id: &SessionId) {
        if let Ok(Some(session)) = self.store.sessions().find_by_id(id).await {
            self.release_node(&session).await;
        }
    }
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
