// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session drift reconciliation.
//!
//! Runs once at startup (before the HTTP listener binds, so requests never
//! observe a half-initialized binding table) and every 30 seconds after.
//! For each active session the recorded container is checked against the
//! runtime; dead containers trigger recovery around the same workspace, and
//! unrecoverable sessions fail with their live executions crashed into the
//! usual retry path.

use std::sync::Arc;

use sbx_core::{Clock, NodeId, Session, SessionStatus};
use sbx_driver::{ContainerHandle, RuntimeDriver};
use sbx_store::Store;
use tracing::{info, warn};

use crate::engine::{ExecutionManager, SessionManager};
use crate::env::Config;

pub struct Reconciler {
    store: Store,
    driver: Arc<dyn RuntimeDriver>,
    sessions: Arc<SessionManager>,
    executions: Arc<ExecutionManager>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
}

impl Reconciler {
    pub fn new(
        store: Store,
        driver: Arc<dyn RuntimeDriver>,
        sessions: Arc<SessionManager>,
        executions: Arc<ExecutionManager>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        Self { store, driver, sessions, executions, clock, config }
    }

    /// One pass over every active session. Returns how many sessions were
    /// sent into recovery.
    pub async fn reconcile_once(&self) -> usize {
        let sessions = match self.store.sessions().find_active().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "reconcile: store unavailable, skipping pass");
                return 0;
            }
        };
        let mut recovered = 0;
        for session in sessions {
            if self.reconcile_session(&session).await {
                recovered += 1;
            }
        }
        recovered
    }

    /// Targeted pass over one node's sessions, used when the health probe
    /// marks a node offline.
    pub async fn reconcile_node(&self, node_id: &NodeId) -> usize {
        let sessions = match self.store.sessions().find_by_node(node_id).await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, node_id = %node_id, "reconcile: store unavailable");
                return 0;
            }
        };
        info!(node_id = %node_id, count = sessions.len(), "reconciling sessions of lost node");
        let mut recovered = 0;
        for session in sessions.iter().filter(|s| s.status.is_active()) {
            if self.recover(session).await {
                recovered += 1;
            }
        }
        recovered
    }

    /// Check one session; returns whether recovery was initiated.
    async fn reconcile_session(&self, session: &Session) -> bool {
        match &session.container_handle {
            Some(handle) => {
                let handle = ContainerHandle::from(handle.as_str());
                match self.driver.is_running(&handle).await {
                    Ok(true) => false,
                    Ok(false) => {
                        info!(session_id = %session.id, "container gone, recovering");
                        self.recover(session).await
                    }
                    Err(e) => {
                        // transient runtime errors are not evidence of loss
                        warn!(session_id = %session.id, error = %e, "liveness check failed");
                        false
                    }
                }
            }
            None if session.status == SessionStatus::Creating => {
                // A handleless creating session is either mid-create or an
                // interrupted create from before a restart. Only the latter
                // is ours: require the row to be older than the create
                // deadline so we never race the create path.
                let age = self.clock.now_utc() - session.updated_at;
                let deadline =
                    chrono::Duration::seconds(self.config.session_create_deadline.as_secs() as i64);
                if age > deadline {
                    info!(session_id = %session.id, "stale creating session, recovering");
                    self.recover(session).await
                } else {
                    false
                }
            }
            None => false,
        }
    }

    async fn recover(&self, session: &Session) -> bool {
        match self.sessions.recover(session).await {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "recovery failed");
                if let Err(e) = self.executions.crash_running_for_session(&session.id).await {
                    warn!(session_id = %session.id, error = %e, "crashing executions failed");
                }
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
