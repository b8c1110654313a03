// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution repository.
//!
//! Result ingestion is idempotent: only a non-terminal row can advance to a
//! terminal status, so the first callback wins and replays are no-ops. Retry
//! bookkeeping happens in single conditional updates to keep `retry_count`
//! monotone under concurrent watchdogs.

use chrono::{DateTime, Utc};
use sbx_core::{
    ArtifactDescriptor, Execution, ExecutionId, ExecutionResult, ExecutionStatus, Language,
    SessionId,
};
use sqlx::{FromRow, SqlitePool};

use crate::{json, StoreError};

#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    session_id: String,
    code: String,
    language: String,
    status: String,
    event: Option<String>,
    timeout_seconds: i64,
    stdout: Option<String>,
    stderr: Option<String>,
    exit_code: Option<i32>,
    execution_time_seconds: Option<f64>,
    return_value: Option<String>,
    metrics: Option<String>,
    artifacts: String,
    retry_count: i64,
    dispatched_at: Option<DateTime<Utc>>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    version: i64,
}

impl ExecutionRow {
    fn into_execution(self) -> Result<Execution, StoreError> {
        let status = ExecutionStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("execution status {:?}", self.status)))?;
        let language = Language::parse(&self.language)
            .ok_or_else(|| StoreError::Corrupt(format!("language {:?}", self.language)))?;
        let artifacts: Vec<ArtifactDescriptor> = json::decode("artifacts", &self.artifacts)?;
        Ok(Execution {
            id: ExecutionId::from_string(self.id),
            session_id: SessionId::from_string(self.session_id),
            code: self.code,
            language,
            status,
            event: json::decode_opt("event", self.event.as_deref())?,
            timeout_seconds: self.timeout_seconds as u32,
            stdout: self.stdout,
            stderr: self.stderr,
            exit_code: self.exit_code,
            execution_time_seconds: self.execution_time_seconds,
            return_value: json::decode_opt("return_value", self.return_value.as_deref())?,
            metrics: json::decode_opt("metrics", self.metrics.as_deref())?,
            artifacts,
            retry_count: self.retry_count as u32,
            dispatched_at: self.dispatched_at,
            last_heartbeat_at: self.last_heartbeat_at,
            created_at: self.created_at,
            completed_at: self.completed_at,
            version: self.version,
        })
    }
}

/// Outcome of an idempotent result-callback write.
#[derive(Debug, PartialEq)]
pub enum IngestOutcome {
    /// This callback advanced the row to terminal.
    Applied(Box<Execution>),
    /// The row was already terminal; the callback is discarded.
    AlreadyTerminal,
    /// No such execution.
    NotFound,
}

#[derive(Clone)]
pub struct ExecutionRepo {
    pool: SqlitePool,
}

impl ExecutionRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: &ExecutionId) -> Result<Option<Execution>, StoreError> {
        let row = sqlx::query_as::<_, ExecutionRow>("SELECT * FROM executions WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(ExecutionRow::into_execution).transpose()
    }

    pub async fn find_by_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<Execution>, StoreError> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            "SELECT * FROM executions WHERE session_id = ? ORDER BY created_at",
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ExecutionRow::into_execution).collect()
    }

    pub async fn find_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<Execution>, StoreError> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            "SELECT * FROM executions WHERE status = ? ORDER BY created_at",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ExecutionRow::into_execution).collect()
    }

    /// Running executions whose heartbeat went stale before `cutoff`.
    pub async fn find_running_heartbeat_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Execution>, StoreError> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            "SELECT * FROM executions WHERE status = 'running' \
             AND (last_heartbeat_at IS NULL OR last_heartbeat_at < ?)",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ExecutionRow::into_execution).collect()
    }

    /// `pending → running` once the executor acknowledged the dispatch.
    pub async fn mark_running(
        &self,
        id: &ExecutionId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE executions SET status = 'running', dispatched_at = ?, \
             last_heartbeat_at = ?, version = version + 1 \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Heartbeat touch; only meaningful while running.
    pub async fn heartbeat(
        &self,
        id: &ExecutionId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE executions SET last_heartbeat_at = ?, version = version + 1 \
             WHERE id = ? AND status = 'running'",
        )
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Idempotent terminal write keyed by execution id. Advances only
    /// non-terminal rows; the first caller wins.
    pub async fn ingest_result(
        &self,
        id: &ExecutionId,
        result: &ExecutionResult,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, StoreError> {
        if !result.status.is_terminal() {
            return Err(StoreError::Integrity(format!(
                "result status must be terminal, got {}",
                result.status
            )));
        }
        let written = sqlx::query(
            "UPDATE executions SET status = ?, stdout = ?, stderr = ?, exit_code = ?, \
             execution_time_seconds = ?, return_value = ?, metrics = ?, artifacts = ?, \
             completed_at = ?, version = version + 1 \
             WHERE id = ? AND status NOT IN ('completed', 'failed', 'timeout')",
        )
        .bind(result.status.as_str())
        .bind(&result.stdout)
        .bind(&result.stderr)
        .bind(result.exit_code)
        .bind(result.execution_time_seconds)
        .bind(result.return_value.as_ref().map(json::encode).transpose()?)
        .bind(result.metrics.as_ref().map(json::encode).transpose()?)
        .bind(json::encode(&result.artifacts)?)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        if written.rows_affected() == 1 {
            match self.find_by_id(id).await? {
                Some(e) => Ok(IngestOutcome::Applied(Box::new(e))),
                None => Ok(IngestOutcome::NotFound),
            }
        } else if self.find_by_id(id).await?.is_some() {
            Ok(IngestOutcome::AlreadyTerminal)
        } else {
            Ok(IngestOutcome::NotFound)
        }
    }

    /// Classify a live attempt as crashed (heartbeat loss, executor crash,
    /// container loss). No-op for rows already terminal or crashed.
    pub async fn mark_crashed(&self, id: &ExecutionId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE executions SET status = 'crashed', version = version + 1 \
             WHERE id = ? AND status IN ('pending', 'running')",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `crashed → pending` with `retry_count + 1`, only while attempts
    /// remain. Returns the refreshed row when the retry was claimed.
    pub async fn claim_retry(
        &self,
        id: &ExecutionId,
        max_attempts: u32,
    ) -> Result<Option<Execution>, StoreError> {
        let result = sqlx::query(
            "UPDATE executions SET status = 'pending', retry_count = retry_count + 1, \
             dispatched_at = NULL, last_heartbeat_at = NULL, version = version + 1 \
             WHERE id = ? AND status = 'crashed' AND retry_count < ?",
        )
        .bind(id.as_str())
        .bind(max_attempts as i64)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            self.find_by_id(id).await
        } else {
            Ok(None)
        }
    }

    /// Terminally fail a live execution whose session is gone. Unlike
    /// [`give_up`](Self::give_up) this applies from any non-terminal status.
    pub async fn abort(
        &self,
        id: &ExecutionId,
        stderr_note: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE executions SET status = 'failed', stderr = COALESCE(stderr, '') || ?, \
             completed_at = ?, version = version + 1 \
             WHERE id = ? AND status IN ('pending', 'running', 'crashed')",
        )
        .bind(stderr_note)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `crashed → failed` once retries are exhausted.
    pub async fn give_up(
        &self,
        id: &ExecutionId,
        stderr_note: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE executions SET status = 'failed', stderr = COALESCE(stderr, '') || ?, \
             completed_at = ?, version = version + 1 \
             WHERE id = ? AND status = 'crashed'",
        )
        .bind(stderr_note)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Control-plane deadline fired: force a terminal timeout on a live row.
    pub async fn force_timeout(
        &self,
        id: &ExecutionId,
        stderr_note: &str,
        elapsed_seconds: f64,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE executions SET status = 'timeout', stderr = COALESCE(stderr, '') || ?, \
             execution_time_seconds = ?, completed_at = ?, version = version + 1 \
             WHERE id = ? AND status IN ('pending', 'running', 'crashed')",
        )
        .bind(stderr_note)
        .bind(elapsed_seconds)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete(&self, id: &ExecutionId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM executions WHERE id = ?")
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
#[path = "executions_tests.rs"]
mod tests;
