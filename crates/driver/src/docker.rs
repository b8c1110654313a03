// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docker runtime driver.
//!
//! Containers are managed through the docker CLI (`DOCKER_HOST` pointed at
//! the node's endpoint). Each container gets a unique host port mapped to
//! the executor's port so the control plane can reach it over TCP. The
//! workspace is a host-path bind mount, so files survive container
//! reincarnations. Dependency install at boot goes through a wrapping
//! entrypoint script written into the workspace at create time.

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sbx_core::{RuntimeKind, RuntimeNode};
use tracing::{debug, info, warn};

use crate::spec::{ContainerSpec, NetworkMode, EXECUTOR_PORT, PID_LIMIT, SANDBOX_GID, SANDBOX_UID};
use crate::{ContainerHandle, DriverError, RuntimeDriver};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Decoded form of a Docker container handle.
///
/// The handle is persisted as `docker|{endpoint}|{container_name}|{host_port}`
/// so that every operation is self-contained after a control-plane restart.
#[derive(Debug, PartialEq, Eq)]
struct DockerHandle {
    endpoint: String,
    container_name: String,
    host_port: u16,
}

impl DockerHandle {
    fn encode(&self) -> ContainerHandle {
        ContainerHandle(format!(
            "docker|{}|{}|{}",
            self.endpoint, self.container_name, self.host_port
        ))
    }

    fn decode(handle: &ContainerHandle) -> Result<Self, DriverError> {
        let mut parts = handle.as_str().splitn(4, '|');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("docker"), Some(endpoint), Some(name), Some(port)) => {
                let host_port = port
                    .parse()
                    .map_err(|_| DriverError::NotFound(format!("bad handle: {handle}")))?;
                Ok(Self {
                    endpoint: endpoint.to_string(),
                    container_name: name.to_string(),
                    host_port,
                })
            }
            _ => Err(DriverError::NotFound(format!("bad handle: {handle}"))),
        }
    }

    /// Host the mapped executor port is reachable on.
    fn host(&self) -> &str {
        endpoint_host(&self.endpoint)
    }
}

fn endpoint_host(endpoint: &str) -> &str {
    if let Some(rest) = endpoint.strip_prefix("tcp://") {
        rest.split(':').next().unwrap_or("127.0.0.1")
    } else {
        // unix sockets mean the node is this machine
        "127.0.0.1"
    }
}

/// Build the `docker run` argument vector for a container spec.
///
/// Kept as a pure function: the sandbox posture (non-root, dropped caps,
/// no-new-privileges, pid cap, tmpfs /tmp) is encoded here and verified by
/// tests without a Docker daemon.
fn run_args(spec: &ContainerSpec, host_port: u16, entrypoint: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "-d".into(),
        "--name".into(),
        spec.container_name(),
        "--user".into(),
        format!("{SANDBOX_UID}:{SANDBOX_GID}"),
        "--cap-drop".into(),
        "ALL".into(),
        "--security-opt".into(),
        "no-new-privileges".into(),
        "--pids-limit".into(),
        PID_LIMIT.to_string(),
        "--tmpfs".into(),
        "/tmp".into(),
        "--cpus".into(),
        format!("{:.3}", spec.limits.cpu_millis as f64 / 1000.0),
        "--memory".into(),
        format!("{}b", spec.limits.memory_bytes),
    ];

    match spec.network {
        NetworkMode::Isolated => {
            args.push("--network".into());
            args.push("none".into());
        }
        NetworkMode::ControlPlane => {
            args.push("-p".into());
            args.push(format!("{host_port}:{EXECUTOR_PORT}"));
        }
    }

    args.push("-v".into());
    args.push(format!("{}:/workspace", spec.workspace_uri));
    args.push("-w".into());
    args.push("/workspace".into());

    for (key, value) in &spec.env {
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }

    if let Some(entrypoint) = entrypoint {
        args.push("--entrypoint".into());
        args.push(entrypoint.into());
    }

    args.push(spec.image_ref.clone());
    args
}

/// Wrapping entrypoint that installs requested packages before handing off
/// to the image's command. Install output lands in the workspace where the
/// executor picks it up and reports the outcome.
fn install_entrypoint(specs: &[String]) -> String {
    let quoted: Vec<String> = specs.iter().map(|s| format!("'{}'", s.replace('\'', ""))).collect();
    format!(
        "#!/bin/sh\nmkdir -p /workspace/.sbx\n\
         if pip install --no-cache-dir {} > /workspace/.sbx/install.log 2>&1; then\n\
         \ttouch /workspace/.sbx/install_ok\n\
         else\n\
         \ttouch /workspace/.sbx/install_failed\n\
         fi\n\
         exec \"$@\"\n",
        quoted.join(" ")
    )
}

/// Agent driver that runs sandboxes in Docker containers.
pub struct DockerDriver {
    http: reqwest::Client,
    port_counter: AtomicU16,
}

impl DockerDriver {
    pub fn new() -> Self {
        let base_port: u16 = std::env::var("SBX_DOCKER_BASE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(9100);
        Self {
            http: reqwest::Client::new(),
            port_counter: AtomicU16::new(base_port),
        }
    }

    /// Allocate the next host port for a container.
    fn next_port(&self) -> u16 {
        self.port_counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for DockerDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a docker CLI command against a node endpoint, returning stdout.
async fn run_docker(endpoint: &str, args: &[&str]) -> Result<String, DriverError> {
    let output = tokio::process::Command::new("docker")
        .env("DOCKER_HOST", endpoint)
        .args(args)
        .output()
        .await
        .map_err(|e| DriverError::CommandFailed(format!("failed to exec docker: {e}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(DriverError::CommandFailed(format!(
            "docker {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        )))
    }
}

#[async_trait]
impl RuntimeDriver for DockerDriver {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Docker
    }

    async fn ensure_image(&self, image_ref: &str, node: &RuntimeNode) -> Result<(), DriverError> {
        if run_docker(&node.endpoint, &["image", "inspect", image_ref]).await.is_ok() {
            debug!(%image_ref, node_id = %node.id, "image already cached");
            return Ok(());
        }
        info!(%image_ref, node_id = %node.id, "pulling image");
        run_docker(&node.endpoint, &["pull", image_ref]).await?;
        Ok(())
    }

    async fn create_container(
        &self,
        node: &RuntimeNode,
        spec: &ContainerSpec,
    ) -> Result<ContainerHandle, DriverError> {
        let host_port = self.next_port();

        let entrypoint_path = if spec.requested_dependencies.is_empty() {
            None
        } else {
            let script = install_entrypoint(&spec.requested_dependencies);
            let dir = std::path::Path::new(&spec.workspace_uri).join(".sbx");
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| DriverError::CreateFailed(format!("workspace setup: {e}")))?;
            let path = dir.join("entrypoint.sh");
            tokio::fs::write(&path, script)
                .await
                .map_err(|e| DriverError::CreateFailed(format!("entrypoint write: {e}")))?;
            Some("/workspace/.sbx/entrypoint.sh".to_string())
        };

        let args = run_args(spec, host_port, entrypoint_path.as_deref());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        info!(
            session_id = %spec.session_id,
            container = %spec.container_name(),
            node_id = %node.id,
            host_port,
            "creating docker container"
        );
        run_docker(&node.endpoint, &arg_refs)
            .await
            .map_err(|e| DriverError::CreateFailed(e.to_string()))?;

        let handle = DockerHandle {
            endpoint: node.endpoint.clone(),
            container_name: spec.container_name(),
            host_port,
        };
        Ok(handle.encode())
    }

    async fn wait_ready(
        &self,
        handle: &ContainerHandle,
        deadline: Duration,
    ) -> Result<(), DriverError> {
        let url = format!("{}/health", self.executor_url(handle).await?);
        let started = Instant::now();
        loop {
            match self.http.get(&url).timeout(Duration::from_secs(2)).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => debug!(%url, status = %resp.status(), "executor not ready"),
                Err(e) => debug!(%url, error = %e, "executor not reachable yet"),
            }
            if started.elapsed() >= deadline {
                return Err(DriverError::ReadyTimeout(handle.to_string()));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn exec_dependency_install(
        &self,
        handle: &ContainerHandle,
        specs: &[String],
    ) -> Result<(), DriverError> {
        let decoded = DockerHandle::decode(handle)?;
        let mut args = vec!["exec", decoded.container_name.as_str(), "pip", "install",
            "--no-cache-dir"];
        args.extend(specs.iter().map(String::as_str));
        match run_docker(&decoded.endpoint, &args).await {
            Ok(_) => Ok(()),
            Err(DriverError::CommandFailed(log)) => Err(DriverError::InstallFailed { log }),
            Err(e) => Err(e),
        }
    }

    async fn is_running(&self, handle: &ContainerHandle) -> Result<bool, DriverError> {
        let decoded = DockerHandle::decode(handle)?;
        match run_docker(
            &decoded.endpoint,
            &["inspect", "-f", "{{.State.Running}}", &decoded.container_name],
        )
        .await
        {
            Ok(out) => Ok(out.trim() == "true"),
            Err(DriverError::CommandFailed(msg)) if msg.contains("No such") => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn destroy(&self, handle: &ContainerHandle) -> Result<(), DriverError> {
        let decoded = DockerHandle::decode(handle)?;
        match run_docker(&decoded.endpoint, &["rm", "-f", &decoded.container_name]).await {
            Ok(_) => Ok(()),
            Err(DriverError::CommandFailed(msg)) if msg.contains("No such") => {
                debug!(container = %decoded.container_name, "destroy: already gone");
                Ok(())
            }
            Err(e) => {
                warn!(container = %decoded.container_name, error = %e, "destroy failed");
                Err(e)
            }
        }
    }

    async fn logs(&self, handle: &ContainerHandle, tail: u32) -> Result<String, DriverError> {
        let decoded = DockerHandle::decode(handle)?;
        run_docker(
            &decoded.endpoint,
            &["logs", "--tail", &tail.to_string(), &decoded.container_name],
        )
        .await
    }

    async fn executor_url(&self, handle: &ContainerHandle) -> Result<String, DriverError> {
        let decoded = DockerHandle::decode(handle)?;
        Ok(format!("http://{}:{}", decoded.host(), decoded.host_port))
    }
}

#[cfg(test)]
#[path = "docker_tests.rs"]
mod tests;
