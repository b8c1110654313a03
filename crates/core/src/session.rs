// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session entity and lifecycle state machine.
//!
//! A session is a logical execution context bound to at most one live
//! container. The binding may be rebuilt any number of times (container
//! loss, node loss) without changing the session id or its workspace.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::template::ResourceLimits;
use crate::{NodeId, TemplateId};

crate::define_id! {
    /// Unique identifier for a session.
    ///
    /// Stable across container reincarnations; the workspace and all
    /// executions hang off this id.
    pub struct SessionId("sess-");
}

/// Which container runtime realizes the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Docker,
    Kubernetes,
}

crate::status_str! {
    RuntimeKind {
        Docker => "docker",
        Kubernetes => "kubernetes",
    }
}

/// Session lifecycle status.
///
/// `Completed` is reserved: it is part of the persisted vocabulary but no
/// transition currently targets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Creating,
    Running,
    Completed,
    Failed,
    Timeout,
    Terminated,
}

crate::status_str! {
    SessionStatus {
        Creating => "creating",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Timeout => "timeout",
        Terminated => "terminated",
    }
}

impl SessionStatus {
    /// Active sessions own (or are acquiring) a container.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Creating | SessionStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Whether `self → to` is a legal lifecycle edge.
    ///
    /// Terminal states have no outgoing edges. `Running → Creating` is the
    /// reconciler's container-loss edge; everything else follows the create /
    /// terminate / fail paths.
    pub fn can_transition_to(&self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Creating, Running)
                | (Creating, Failed)
                | (Creating, Terminated)
                | (Running, Creating)
                | (Running, Failed)
                | (Running, Terminated)
        )
    }
}

/// Progress of in-container dependency installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    None,
    Installing,
    Ready,
    Failed,
}

crate::status_str! {
    DependencyStatus {
        None => "none",
        Installing => "installing",
        Ready => "ready",
        Failed => "failed",
    }
}

/// Logical execution context, 1:1 with at most one live container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub template_id: TemplateId,
    pub status: SessionStatus,
    pub runtime_kind: RuntimeKind,
    /// Node currently hosting the container; cleared on container loss.
    pub runtime_node_id: Option<NodeId>,
    /// Runtime-specific opaque identifier; null while no container exists.
    pub container_handle: Option<String>,
    /// Never changes after creation; a recreated container reuses it.
    pub workspace_uri: String,
    pub limits: ResourceLimits,
    pub env_vars: BTreeMap<String, String>,
    /// Default per-execution timeout for this session.
    pub timeout_seconds: u32,
    pub requested_dependencies: Vec<String>,
    pub installed_dependencies: Vec<String>,
    pub dependency_status: DependencyStatus,
    /// Diagnostic for failed sessions (create failure, install failure, ...).
    pub failure_reason: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency counter; bumped by every store write.
    pub version: i64,
}

impl Session {
    /// A fresh `creating` session. The caller supplies the workspace URI so
    /// the same value can be threaded to the driver spec.
    #[allow(clippy::too_many_arguments)]
    pub fn new_creating(
        id: SessionId,
        template_id: TemplateId,
        runtime_kind: RuntimeKind,
        workspace_uri: impl Into<String>,
        limits: ResourceLimits,
        env_vars: BTreeMap<String, String>,
        timeout_seconds: u32,
        requested_dependencies: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let dependency_status = if requested_dependencies.is_empty() {
            DependencyStatus::None
        } else {
            DependencyStatus::Installing
        };
        Self {
            id,
            template_id,
            status: SessionStatus::Creating,
            runtime_kind,
            runtime_node_id: None,
            container_handle: None,
            workspace_uri: workspace_uri.into(),
            limits,
            env_vars,
            timeout_seconds,
            requested_dependencies,
            installed_dependencies: Vec::new(),
            dependency_status,
            failure_reason: None,
            last_activity_at: now,
            created_at: now,
            updated_at: now,
            completed_at: None,
            version: 0,
        }
    }

    /// Executions are accepted only when the container is up and dependencies
    /// (if any were requested) are installed.
    pub fn accepts_executions(&self) -> bool {
        self.status == SessionStatus::Running
            && matches!(self.dependency_status, DependencyStatus::None | DependencyStatus::Ready)
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
