// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sbx-driver: uniform container operations over Docker and Kubernetes.
//!
//! The control plane never talks to a runtime directly; it goes through
//! [`RuntimeDriver`]. Divergence between the two runtimes (creation
//! asynchrony, networking, volume semantics) lives entirely inside the
//! driver implementations. `create_container` returns as soon as the runtime
//! acknowledges the object; readiness is observed uniformly through the
//! executor's own health endpoint and callbacks.

pub mod docker;
pub mod k8s;
pub mod spec;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use docker::DockerDriver;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeDriver;
pub use k8s::KubernetesDriver;
pub use spec::{ContainerSpec, NetworkMode, EXECUTOR_PORT, PID_LIMIT, SANDBOX_GID, SANDBOX_UID};

use async_trait::async_trait;
use sbx_core::{RuntimeKind, RuntimeNode};
use std::time::Duration;
use thiserror::Error;

/// Errors from runtime driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("create failed: {0}")]
    CreateFailed(String),

    #[error("container not ready before deadline: {0}")]
    ReadyTimeout(String),

    #[error("dependency install failed: {log}")]
    InstallFailed { log: String },

    #[error("runtime command failed: {0}")]
    CommandFailed(String),

    #[error("runtime api error: {0}")]
    Api(String),
}

impl DriverError {
    /// Transient errors are retried with bounded backoff by the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::CommandFailed(_) | DriverError::Api(_))
    }
}

/// Opaque runtime-specific container identifier.
///
/// Self-contained: it carries everything a driver needs to address the
/// container after a control-plane restart (the entity store persists it as
/// plain TEXT and hands it back to the reconciler).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(pub String);

impl ContainerHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ContainerHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Uniform operations both runtime drivers implement.
#[async_trait]
pub trait RuntimeDriver: Send + Sync + 'static {
    fn kind(&self) -> RuntimeKind;

    /// Make sure the image is present on the node. May be a no-op if cached.
    async fn ensure_image(&self, image_ref: &str, node: &RuntimeNode) -> Result<(), DriverError>;

    /// Create and start the container. The returned handle is valid
    /// immediately; readiness is not implied.
    async fn create_container(
        &self,
        node: &RuntimeNode,
        spec: &ContainerSpec,
    ) -> Result<ContainerHandle, DriverError>;

    /// Poll the in-container executor's health endpoint until it answers or
    /// the deadline elapses.
    async fn wait_ready(
        &self,
        handle: &ContainerHandle,
        deadline: Duration,
    ) -> Result<(), DriverError>;

    /// Install packages into a live container.
    ///
    /// Both drivers already install requested dependencies at boot (wrapping
    /// entrypoint on Docker, init container on Kubernetes); this operation
    /// covers post-boot installs, e.g. after a recovery rebind.
    async fn exec_dependency_install(
        &self,
        handle: &ContainerHandle,
        specs: &[String],
    ) -> Result<(), DriverError>;

    /// Direct query to the underlying runtime; never consults the entity
    /// store. This is the reconciler's source of truth.
    async fn is_running(&self, handle: &ContainerHandle) -> Result<bool, DriverError>;

    /// Idempotent teardown: `Ok` if the container is already gone.
    async fn destroy(&self, handle: &ContainerHandle) -> Result<(), DriverError>;

    /// Best-effort log tail.
    async fn logs(&self, handle: &ContainerHandle, tail: u32) -> Result<String, DriverError>;

    /// Base URL of the in-container executor, reachable from the control
    /// plane through the driver's network.
    async fn executor_url(&self, handle: &ContainerHandle) -> Result<String, DriverError>;
}
