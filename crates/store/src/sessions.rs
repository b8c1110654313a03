// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session repository.
//!
//! Lifecycle transitions are serialized through the database: every write is
//! either guarded by the current status (`WHERE status IN (...)`) or by the
//! `version` column. A `false`/`None` return means the caller lost the race
//! and must re-read before deciding anything.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sbx_core::{
    DependencyStatus, Execution, NodeId, ResourceLimits, RuntimeKind, Session, SessionId,
    SessionStatus, TemplateId,
};
use sqlx::{FromRow, SqlitePool};

use crate::{json, StoreError};

#[derive(FromRow)]
struct SessionRow {
    id: String,
    template_id: String,
    status: String,
    runtime_kind: String,
    runtime_node_id: Option<String>,
    container_handle: Option<String>,
    workspace_uri: String,
    cpu_millis: i64,
    memory_bytes: i64,
    disk_bytes: i64,
    env_vars: String,
    timeout_seconds: i64,
    requested_dependencies: String,
    installed_dependencies: String,
    dependency_status: String,
    failure_reason: Option<String>,
    last_activity_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    version: i64,
}

impl SessionRow {
    fn into_session(self) -> Result<Session, StoreError> {
        let status = SessionStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("session status {:?}", self.status)))?;
        let runtime_kind = RuntimeKind::parse(&self.runtime_kind)
            .ok_or_else(|| StoreError::Corrupt(format!("runtime kind {:?}", self.runtime_kind)))?;
        let dependency_status = DependencyStatus::parse(&self.dependency_status).ok_or_else(
            || StoreError::Corrupt(format!("dependency status {:?}", self.dependency_status)),
        )?;
        let env_vars: BTreeMap<String, String> = json::decode("env_vars", &self.env_vars)?;
        Ok(Session {
            id: SessionId::from_string(self.id),
            template_id: TemplateId::from_string(self.template_id),
            status,
            runtime_kind,
            runtime_node_id: self.runtime_node_id.map(NodeId::from_string),
            container_handle: self.container_handle,
            workspace_uri: self.workspace_uri,
            limits: ResourceLimits {
                cpu_millis: self.cpu_millis,
                memory_bytes: self.memory_bytes,
                disk_bytes: self.disk_bytes,
            },
            env_vars,
            timeout_seconds: self.timeout_seconds as u32,
            requested_dependencies: json::decode(
                "requested_dependencies",
                &self.requested_dependencies,
            )?,
            installed_dependencies: json::decode(
                "installed_dependencies",
                &self.installed_dependencies,
            )?,
            dependency_status,
            failure_reason: self.failure_reason,
            last_activity_at: self.last_activity_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            version: self.version,
        })
    }
}

#[derive(Clone)]
pub struct SessionRepo {
    pool: SqlitePool,
}

impl SessionRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, s: &Session) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions \
             (id, template_id, status, runtime_kind, runtime_node_id, container_handle, \
              workspace_uri, cpu_millis, memory_bytes, disk_bytes, env_vars, timeout_seconds, \
              requested_dependencies, installed_dependencies, dependency_status, failure_reason, \
              last_activity_at, created_at, updated_at, completed_at, version) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(s.id.as_str())
        .bind(s.template_id.as_str())
        .bind(s.status.as_str())
        .bind(s.runtime_kind.as_str())
        .bind(s.runtime_node_id.as_ref().map(|n| n.as_str().to_string()))
        .bind(&s.container_handle)
        .bind(&s.workspace_uri)
        .bind(s.limits.cpu_millis)
        .bind(s.limits.memory_bytes)
        .bind(s.limits.disk_bytes)
        .bind(json::encode(&s.env_vars)?)
        .bind(s.timeout_seconds as i64)
        .bind(json::encode(&s.requested_dependencies)?)
        .bind(json::encode(&s.installed_dependencies)?)
        .bind(s.dependency_status.as_str())
        .bind(&s.failure_reason)
        .bind(s.last_activity_at)
        .bind(s.created_at)
        .bind(s.updated_at)
        .bind(s.completed_at)
        .bind(s.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(SessionRow::into_session).transpose()
    }

    pub async fn find_by_status(&self, status: SessionStatus) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE status = ? ORDER BY created_at",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Sessions that own (or are acquiring) a container.
    pub async fn find_active(&self) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE status IN ('creating', 'running') ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    pub async fn find_by_node(&self, node_id: &NodeId) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE runtime_node_id = ? ORDER BY created_at",
        )
        .bind(node_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Running sessions whose last activity predates `cutoff` (idle sweep).
    pub async fn find_idle_running_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE status = 'running' AND last_activity_at < ?",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Running sessions created before `cutoff` (max-lifetime sweep).
    pub async fn find_running_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE status = 'running' AND created_at < ?",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Keyset-paged listing. The cursor is the last id of the previous page.
    pub async fn list(
        &self,
        status: Option<SessionStatus>,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<Vec<Session>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, SessionRow>(
                    "SELECT * FROM sessions WHERE status = ? AND id > ? ORDER BY id LIMIT ?",
                )
                .bind(status.as_str())
                .bind(cursor.unwrap_or(""))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, SessionRow>(
                    "SELECT * FROM sessions WHERE id > ? ORDER BY id LIMIT ?",
                )
                .bind(cursor.unwrap_or(""))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Version-guarded full-row write. Returns `false` when another writer
    /// advanced the row first; the caller re-reads and reapplies.
    pub async fn update(&self, s: &mut Session, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET \
             status = ?, runtime_node_id = ?, container_handle = ?, env_vars = ?, \
             timeout_seconds = ?, requested_dependencies = ?, installed_dependencies = ?, \
             dependency_status = ?, failure_reason = ?, last_activity_at = ?, updated_at = ?, \
             completed_at = ?, version = version + 1 \
             WHERE id = ? AND version = ?",
        )
        .bind(s.status.as_str())
        .bind(s.runtime_node_id.as_ref().map(|n| n.as_str().to_string()))
        .bind(&s.container_handle)
        .bind(json::encode(&s.env_vars)?)
        .bind(s.timeout_seconds as i64)
        .bind(json::encode(&s.requested_dependencies)?)
        .bind(json::encode(&s.installed_dependencies)?)
        .bind(s.dependency_status.as_str())
        .bind(&s.failure_reason)
        .bind(s.last_activity_at)
        .bind(now)
        .bind(s.completed_at)
        .bind(s.id.as_str())
        .bind(s.version)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            s.version += 1;
            s.updated_at = now;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Bind a freshly created container while the session is still creating.
    pub async fn bind_container(
        &self,
        id: &SessionId,
        node_id: &NodeId,
        handle: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET runtime_node_id = ?, container_handle = ?, updated_at = ?, \
             version = version + 1 \
             WHERE id = ? AND status = 'creating'",
        )
        .bind(node_id.as_str())
        .bind(handle)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `creating → running`, driven by the container-ready callback.
    pub async fn mark_ready(&self, id: &SessionId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'running', last_activity_at = ?, updated_at = ?, \
             version = version + 1 \
             WHERE id = ? AND status = 'creating'",
        )
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `running → creating` when the container is observed gone. Clears the
    /// binding; the workspace URI stays put for the next incarnation.
    pub async fn detach_for_recovery(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'creating', container_handle = NULL, \
             runtime_node_id = NULL, updated_at = ?, version = version + 1 \
             WHERE id = ? AND status = 'running'",
        )
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Drop a stale binding from a session that is already `creating`
    /// (daemon restarted mid-create, or early container exit).
    pub async fn clear_binding(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET container_handle = NULL, runtime_node_id = NULL, \
             updated_at = ?, version = version + 1 \
             WHERE id = ? AND status = 'creating'",
        )
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Terminate an active session. Exactly one concurrent caller observes
    /// `Some`; the losers get `None` and must re-read to distinguish
    /// already-terminal from missing.
    pub async fn terminate(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'terminated', container_handle = NULL, \
             runtime_node_id = NULL, completed_at = ?, updated_at = ?, version = version + 1 \
             WHERE id = ? AND status IN ('creating', 'running')",
        )
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            self.find_by_id(id).await
        } else {
            Ok(None)
        }
    }

    /// Fail an active session, recording the diagnostic.
    pub async fn fail(
        &self,
        id: &SessionId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'failed', container_handle = NULL, \
             runtime_node_id = NULL, failure_reason = ?, completed_at = ?, updated_at = ?, \
             version = version + 1 \
             WHERE id = ? AND status IN ('creating', 'running')",
        )
        .bind(reason)
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record the outcome of the in-container dependency install.
    pub async fn set_dependency_result(
        &self,
        id: &SessionId,
        status: DependencyStatus,
        installed: &[String],
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET dependency_status = ?, installed_dependencies = ?, \
             updated_at = ?, version = version + 1 \
             WHERE id = ? AND status IN ('creating', 'running')",
        )
        .bind(status.as_str())
        .bind(json::encode(&installed.to_vec())?)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Insert an execution row and touch the owning session's
    /// `last_activity_at` in the same transaction.
    pub async fn insert_execution_touch(
        &self,
        execution: &Execution,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO executions \
             (id, session_id, code, language, status, event, timeout_seconds, artifacts, \
              retry_count, created_at, version) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(execution.id.as_str())
        .bind(execution.session_id.as_str())
        .bind(&execution.code)
        .bind(execution.language.as_str())
        .bind(execution.status.as_str())
        .bind(execution.event.as_ref().map(json::encode).transpose()?)
        .bind(execution.timeout_seconds as i64)
        .bind(json::encode(&execution.artifacts)?)
        .bind(execution.retry_count as i64)
        .bind(execution.created_at)
        .bind(execution.version)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE sessions SET last_activity_at = ?, updated_at = ?, version = version + 1 \
             WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(execution.session_id.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn touch_activity(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sessions SET last_activity_at = ?, updated_at = ?, version = version + 1 \
             WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Hard delete; execution rows cascade.
    pub async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
