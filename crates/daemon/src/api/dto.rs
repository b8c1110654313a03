// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire representations of the entities.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sbx_core::{ArtifactDescriptor, Execution, ResourceLimits, RuntimeNode, Session, Template};
use serde::Serialize;

#[derive(Serialize)]
pub struct SessionCreatedDto {
    pub session_id: String,
    pub status: String,
    pub workspace_uri: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Session> for SessionCreatedDto {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.id.to_string(),
            status: s.status.to_string(),
            workspace_uri: s.workspace_uri.clone(),
            created_at: s.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct SessionDto {
    pub session_id: String,
    pub template_id: String,
    pub status: String,
    pub runtime_kind: String,
    pub runtime_node_id: Option<String>,
    pub workspace_uri: String,
    pub resources: ResourceLimits,
    pub env_vars: BTreeMap<String, String>,
    pub timeout_seconds: u32,
    pub requested_dependencies: Vec<String>,
    pub installed_dependencies: Vec<String>,
    pub dependency_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Session> for SessionDto {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.id.to_string(),
            template_id: s.template_id.to_string(),
            status: s.status.to_string(),
            runtime_kind: s.runtime_kind.to_string(),
            runtime_node_id: s.runtime_node_id.as_ref().map(ToString::to_string),
            workspace_uri: s.workspace_uri.clone(),
            resources: s.limits,
            env_vars: s.env_vars.clone(),
            timeout_seconds: s.timeout_seconds,
            requested_dependencies: s.requested_dependencies.clone(),
            installed_dependencies: s.installed_dependencies.clone(),
            dependency_status: s.dependency_status.to_string(),
            failure_reason: s.failure_reason.clone(),
            last_activity_at: s.last_activity_at,
            created_at: s.created_at,
            updated_at: s.updated_at,
            completed_at: s.completed_at,
        }
    }
}

#[derive(Serialize)]
pub struct SessionListDto {
    pub items: Vec<SessionDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ExecutionSubmittedDto {
    pub execution_id: String,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ExecutionDto {
    pub execution_id: String,
    pub session_id: String,
    pub language: String,
    pub status: String,
    pub exit_code: Option<i32>,
    pub execution_time_seconds: Option<f64>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Execution> for ExecutionDto {
    fn from(e: &Execution) -> Self {
        Self {
            execution_id: e.id.to_string(),
            session_id: e.session_id.to_string(),
            language: e.language.to_string(),
            status: e.status.to_string(),
            exit_code: e.exit_code,
            execution_time_seconds: e.execution_time_seconds,
            retry_count: e.retry_count,
            created_at: e.created_at,
            completed_at: e.completed_at,
        }
    }
}

#[derive(Serialize)]
pub struct ExecutionResultDto {
    pub execution_id: String,
    pub status: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub execution_time_seconds: Option<f64>,
    pub return_value: Option<serde_json::Value>,
    pub metrics: Option<serde_json::Value>,
    pub artifacts: Vec<ArtifactDescriptor>,
}

impl From<&Execution> for ExecutionResultDto {
    fn from(e: &Execution) -> Self {
        Self {
            execution_id: e.id.to_string(),
            status: e.status.to_string(),
            stdout: e.stdout.clone(),
            stderr: e.stderr.clone(),
            exit_code: e.exit_code,
            execution_time_seconds: e.execution_time_seconds,
            return_value: e.return_value.clone(),
            metrics: e.metrics.clone(),
            artifacts: e.artifacts.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct TemplateDto {
    pub template_id: String,
    pub name: String,
    pub image_ref: String,
    pub resources: ResourceLimits,
    pub pre_installed: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Template> for TemplateDto {
    fn from(t: &Template) -> Self {
        Self {
            template_id: t.id.to_string(),
            name: t.name.clone(),
            image_ref: t.image_ref.clone(),
            resources: t.limits,
            pre_installed: t.pre_installed.clone(),
            created_at: t.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct NodeDto {
    pub node_id: String,
    pub kind: String,
    pub endpoint: String,
    pub status: String,
    pub cpu_total_millis: i64,
    pub cpu_used_millis: i64,
    pub mem_total_bytes: i64,
    pub mem_used_bytes: i64,
    pub container_count: i64,
    pub capacity: i64,
    pub cached_images: Vec<String>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub consecutive_failures: i64,
}

impl From<&RuntimeNode> for NodeDto {
    fn from(n: &RuntimeNode) -> Self {
        Self {
            node_id: n.id.to_string(),
            kind: n.kind.to_string(),
            endpoint: n.endpoint.clone(),
            status: n.status.to_string(),
            cpu_total_millis: n.cpu_total_millis,
            cpu_used_millis: n.cpu_used_millis,
            mem_total_bytes: n.mem_total_bytes,
            mem_used_bytes: n.mem_used_bytes,
            container_count: n.container_count,
            capacity: n.capacity,
            cached_images: n.cached_images.clone(),
            last_heartbeat_at: n.last_heartbeat_at,
            consecutive_failures: n.consecutive_failures,
        }
    }
}
