// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Driver-neutral container specification.

use std::collections::BTreeMap;

use sbx_core::{ResourceLimits, Session, SessionId};

/// Port the in-container executor listens on.
pub const EXECUTOR_PORT: u16 = 8000;
/// Hard cap on processes inside the sandbox.
pub const PID_LIMIT: u32 = 128;
/// Non-root uid/gid the sandbox runs as.
pub const SANDBOX_UID: u32 = 1000;
pub const SANDBOX_GID: u32 = 1000;

/// Network attachment for the container.
///
/// `Isolated` is the default posture; `ControlPlane` is required whenever
/// the executor must call back (readiness, heartbeats, results) or install
/// dependencies from an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    Isolated,
    ControlPlane,
}

/// Everything a driver needs to materialize a session's container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub session_id: SessionId,
    pub image_ref: String,
    /// Includes `SESSION_ID`, `CONTROL_PLANE_URL`, `INTERNAL_API_TOKEN`.
    pub env: BTreeMap<String, String>,
    pub limits: ResourceLimits,
    pub network: NetworkMode,
    /// Mounted at `/workspace`; identical across container reincarnations.
    pub workspace_uri: String,
    pub requested_dependencies: Vec<String>,
}

impl ContainerSpec {
    /// Build the spec for a session. The executor's callback environment is
    /// injected here so both drivers agree on it.
    pub fn for_session(session: &Session, control_plane_url: &str, internal_token: &str) -> Self {
        let mut env = session.env_vars.clone();
        env.insert("SESSION_ID".to_string(), session.id.to_string());
        env.insert("CONTROL_PLANE_URL".to_string(), control_plane_url.to_string());
        env.insert("INTERNAL_API_TOKEN".to_string(), internal_token.to_string());
        Self {
            session_id: session.id.clone(),
            image_ref: String::new(),
            env,
            limits: session.limits,
            network: NetworkMode::ControlPlane,
            workspace_uri: session.workspace_uri.clone(),
            requested_dependencies: session.requested_dependencies.clone(),
        }
    }

    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = image_ref.into();
        self
    }

    /// Canonical container name: `sandbox-<session_id>`.
    pub fn container_name(&self) -> String {
        format!("sandbox-{}", self.session_id)
    }
}

#[cfg(test)]
#[path = "spec_tests.rs"]
mod tests;
