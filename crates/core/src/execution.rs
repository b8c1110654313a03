// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution entity, result payloads, and retry policy.
//!
//! Executions are delivered to the in-container executor at-least-once; the
//! only consistency primitive is the execution id as idempotency key plus
//! monotone terminal transitions enforced by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::SessionId;

crate::define_id! {
    /// Unique identifier for one code-run inside a session.
    pub struct ExecutionId("exec-");
}

/// Languages the in-container executor accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Bash,
}

crate::status_str! {
    Language {
        Python => "python",
        Javascript => "javascript",
        Bash => "bash",
    }
}

/// Execution lifecycle status.
///
/// `Crashed` is a recoverable terminal-of-attempt: the execution manager may
/// re-dispatch it while `retry_count` is below the cap. `Completed`,
/// `Failed`, and `Timeout` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Crashed,
}

crate::status_str! {
    ExecutionStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Timeout => "timeout",
        Crashed => "crashed",
    }
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Timeout
        )
    }
}

/// Classification of a workspace file exposed for download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Artifact,
    Log,
    Output,
}

crate::status_str! {
    ArtifactKind {
        Artifact => "artifact",
        Log => "log",
        Output => "output",
    }
}

/// Descriptor for a file produced by an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// Relative to the session workspace.
    pub path: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub kind: ArtifactKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One code-run inside a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub session_id: SessionId,
    pub code: String,
    pub language: Language,
    pub status: ExecutionStatus,
    /// Event document passed to `handler(event)` as stdin.
    pub event: Option<serde_json::Value>,
    pub timeout_seconds: u32,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub execution_time_seconds: Option<f64>,
    pub return_value: Option<serde_json::Value>,
    pub metrics: Option<serde_json::Value>,
    pub artifacts: Vec<ArtifactDescriptor>,
    pub retry_count: u32,
    /// When the current attempt was handed to the executor; cleared on retry.
    pub dispatched_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency counter; bumped by every store write.
    pub version: i64,
}

impl Execution {
    pub fn new_pending(
        id: ExecutionId,
        session_id: SessionId,
        code: impl Into<String>,
        language: Language,
        event: Option<serde_json::Value>,
        timeout_seconds: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            session_id,
            code: code.into(),
            language,
            status: ExecutionStatus::Pending,
            event,
            timeout_seconds,
            stdout: None,
            stderr: None,
            exit_code: None,
            execution_time_seconds: None,
            return_value: None,
            metrics: None,
            artifacts: Vec::new(),
            retry_count: 0,
            dispatched_at: None,
            last_heartbeat_at: None,
            created_at: now,
            completed_at: None,
            version: 0,
        }
    }
}

/// Terminal result reported by the executor callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub execution_time_seconds: Option<f64>,
    #[serde(default)]
    pub return_value: Option<serde_json::Value>,
    #[serde(default)]
    pub metrics: Option<serde_json::Value>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactDescriptor>,
}

/// Capped exponential backoff for crashed executions.
///
/// `delay(n)` is the wait before attempt `n + 1`:
/// min(max_backoff, base · factor^n).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            max_backoff: Duration::from_secs(10),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, retry_count: u32) -> Duration {
        let exp = self.factor.saturating_pow(retry_count.min(16));
        self.base.saturating_mul(exp).min(self.max_backoff)
    }

    pub fn exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_attempts
    }
}

/// Marker preceding the serialized `handler(event)` return value in stdout.
pub const RESULT_SENTINEL_BEGIN: &str = "===SANDBOX_RESULT===";
/// Marker terminating the serialized return value.
pub const RESULT_SENTINEL_END: &str = "===SANDBOX_RESULT_END===";

/// Extract and parse the sentinel-delimited return value from stdout.
///
/// Returns `None` when the markers are absent or the block is not valid
/// JSON; an execution without a handler return is not an error.
pub fn parse_return_value(stdout: &str) -> Option<serde_json::Value> {
    let start = stdout.find(RESULT_SENTINEL_BEGIN)? + RESULT_SENTINEL_BEGIN.len();
    let rest = &stdout[start..];
    let end = rest.find(RESULT_SENTINEL_END)?;
    serde_json::from_str(rest[..end].trim()).ok()
}

/// Truncate `s` to at most `cap` bytes (on a char boundary), appending a
/// `…[TRUNCATED n bytes]` marker recording how many bytes were dropped.
/// Returns the possibly-truncated string and whether truncation happened.
pub fn truncate_with_marker(s: &str, cap: usize) -> (String, bool) {
    if s.len() <= cap {
        return (s.to_string(), false);
    }
    let mut cut = cap;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    let dropped = s.len() - cut;
    (format!("{}…[TRUNCATED {} bytes]", &s[..cut], dropped), true)
}

#[cfg(test)]
#[path = "execution_tests.rs"]
mod tests;
