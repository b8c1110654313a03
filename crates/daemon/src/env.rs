// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon.
//!
//! Everything is read once at startup into [`Config`]; components receive
//! the struct, not the environment.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use sbx_core::NodeId;
use thiserror::Error;

/// Process exit codes for the `sbxd` binary.
pub const EXIT_OK: i32 = 0;
pub const EXIT_GENERAL: i32 = 1;
pub const EXIT_CONFIG_MISSING: i32 = 2;
pub const EXIT_BACKEND_UNAVAILABLE: i32 = 3;
pub const EXIT_READINESS_TIMEOUT: i32 = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Which runtime the deployment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeChoice {
    Docker,
    Kubernetes,
    /// Kubernetes when running in-cluster, Docker otherwise.
    Auto,
}

/// A statically registered Docker node from `SBX_NODES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticNode {
    pub id: NodeId,
    pub endpoint: String,
}

/// Daemon configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub runtime: RuntimeChoice,
    pub database_url: String,
    pub internal_api_token: String,
    pub listen_addr: String,
    /// URL executors use to call back into this control plane.
    pub control_plane_url: String,
    pub state_dir: PathBuf,
    pub artifact_root: PathBuf,
    pub artifact_inline_max_bytes: u64,
    pub result_truncate_bytes: usize,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub session_idle_timeout: Duration,
    pub session_max_lifetime: Duration,
    pub session_create_deadline: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub execution_grace: Duration,
    pub max_execution_retries: u32,
    pub static_nodes: Vec<StaticNode>,
    pub k8s_namespace: String,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Parse from an explicit variable map (testable).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let runtime = match vars.get("RUNTIME_KIND").map(String::as_str) {
            None | Some("auto") => RuntimeChoice::Auto,
            Some("docker") => RuntimeChoice::Docker,
            Some("kubernetes") => RuntimeChoice::Kubernetes,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "RUNTIME_KIND",
                    reason: format!("expected docker/kubernetes/auto, got {other:?}"),
                })
            }
        };

        let database_url = vars
            .get("DATABASE_URL")
            .cloned()
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let internal_api_token = vars
            .get("INTERNAL_API_TOKEN")
            .cloned()
            .ok_or(ConfigError::Missing("INTERNAL_API_TOKEN"))?;

        let listen_addr =
            vars.get("SBX_LISTEN_ADDR").cloned().unwrap_or_else(|| "0.0.0.0:7070".to_string());
        let control_plane_url = vars
            .get("SBX_CONTROL_PLANE_URL")
            .cloned()
            .unwrap_or_else(|| format!("http://{listen_addr}"));

        let state_dir = vars
            .get("SBX_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/var/lib/sbx"));
        let artifact_root = resolve_artifact_root(vars, &state_dir)?;

        let static_nodes = parse_static_nodes(vars.get("SBX_NODES").map(String::as_str))?;

        Ok(Self {
            runtime,
            database_url,
            internal_api_token,
            listen_addr,
            control_plane_url,
            state_dir,
            artifact_root,
            artifact_inline_max_bytes: parse_u64(vars, "ARTIFACT_INLINE_MAX_BYTES", 10 * 1024 * 1024)?,
            result_truncate_bytes: parse_u64(vars, "RESULT_TRUNCATE_BYTES", 256 * 1024)? as usize,
            default_timeout: secs(vars, "DEFAULT_TIMEOUT_SECONDS", 300)?,
            max_timeout: secs(vars, "MAX_TIMEOUT_SECONDS", 3600)?,
            session_idle_timeout: secs(vars, "SESSION_IDLE_TIMEOUT_SECONDS", 1800)?,
            session_max_lifetime: secs(vars, "SESSION_MAX_LIFETIME_SECONDS", 21600)?,
            session_create_deadline: secs(vars, "SESSION_CREATE_DEADLINE_SECONDS", 30)?,
            heartbeat_interval: secs(vars, "HEARTBEAT_INTERVAL_SECONDS", 5)?,
            heartbeat_timeout: secs(vars, "HEARTBEAT_TIMEOUT_SECONDS", 15)?,
            execution_grace: secs(vars, "EXECUTION_GRACE_SECONDS", 30)?,
            max_execution_retries: parse_u64(vars, "MAX_EXECUTION_RETRIES", 3)? as u32,
            static_nodes,
            k8s_namespace: vars
                .get("SBX_K8S_NAMESPACE")
                .cloned()
                .unwrap_or_else(|| "sandboxes".to_string()),
            log_dir: vars.get("SBX_LOG_DIR").map(PathBuf::from),
        })
    }

    /// Clamp a requested execution timeout into the configured window.
    /// Zero is rejected by validation before this is called.
    pub fn clamp_timeout(&self, requested: Option<u32>) -> u32 {
        let requested = requested.unwrap_or(self.default_timeout.as_secs() as u32);
        requested.min(self.max_timeout.as_secs() as u32)
    }
}

fn parse_u64(vars: &HashMap<String, String>, var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match vars.get(var) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            var,
            reason: format!("expected integer, got {raw:?}"),
        }),
    }
}

fn secs(
    vars: &HashMap<String, String>,
    var: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    parse_u64(vars, var, default).map(Duration::from_secs)
}

/// Resolve the artifact store root from `ARTIFACT_STORE_ENDPOINT` (a path or
/// `file://` URI for the bundled filesystem backend) or `ARTIFACT_STORE_ROOT`.
/// Remote object-store endpoints need a backend this build does not bundle,
/// so they are rejected here rather than half-working later.
fn resolve_artifact_root(
    vars: &HashMap<String, String>,
    state_dir: &std::path::Path,
) -> Result<PathBuf, ConfigError> {
    if let Some(endpoint) = vars.get("ARTIFACT_STORE_ENDPOINT") {
        if endpoint.starts_with("s3://")
            || endpoint.starts_with("http://")
            || endpoint.starts_with("https://")
        {
            return Err(ConfigError::Invalid {
                var: "ARTIFACT_STORE_ENDPOINT",
                reason: format!(
                    "remote object stores are not bundled; use a path or file:// URI, got {endpoint:?}"
                ),
            });
        }
        let path = endpoint.strip_prefix("file://").unwrap_or(endpoint);
        return Ok(PathBuf::from(path));
    }
    Ok(vars
        .get("ARTIFACT_STORE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| state_dir.join("artifacts")))
}

/// Parse `SBX_NODES` as `id=endpoint[,id=endpoint...]`.
fn parse_static_nodes(raw: Option<&str>) -> Result<Vec<StaticNode>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let mut nodes = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((id, endpoint)) = entry.split_once('=') else {
            return Err(ConfigError::Invalid {
                var: "SBX_NODES",
                reason: format!("expected id=endpoint, got {entry:?}"),
            });
        };
        nodes.push(StaticNode {
            id: NodeId::from_string(id.trim()),
            endpoint: endpoint.trim().to_string(),
        });
    }
    Ok(nodes)
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
