// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the in-container executor daemon.
//!
//! Delivery is at-least-once: the caller owns retries, the executor owns
//! idempotency (the execution id is the key).

use async_trait::async_trait;
use sbx_core::{ExecutionId, Language};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor unreachable: {0}")]
    Unreachable(String),

    #[error("executor rejected request: {0}")]
    Rejected(String),
}

/// Body of `POST {executor}/execute`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecuteRequest {
    pub execution_id: ExecutionId,
    pub code: String,
    pub language: Language,
    pub timeout: u32,
    /// Event document delivered to `handler(event)` on stdin.
    pub stdin: Option<serde_json::Value>,
}

/// Control plane → executor operations.
#[async_trait]
pub trait ExecutorClient: Send + Sync + 'static {
    async fn execute(&self, base_url: &str, request: &ExecuteRequest) -> Result<(), ExecutorError>;

    async fn health(&self, base_url: &str) -> Result<(), ExecutorError>;
}

/// reqwest-backed client with bounded deadlines on every call.
pub struct HttpExecutorClient {
    http: reqwest::Client,
    request_timeout: Duration,
}

impl HttpExecutorClient {
    pub fn new(request_timeout: Duration) -> Self {
        Self { http: reqwest::Client::new(), request_timeout }
    }
}

#[async_trait]
impl ExecutorClient for HttpExecutorClient {
    async fn execute(&self, base_url: &str, request: &ExecuteRequest) -> Result<(), ExecutorError> {
        let url = format!("{base_url}/execute");
        let response = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| ExecutorError::Unreachable(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ExecutorError::Rejected(format!("{status}: {}", body.trim())))
        }
    }

    async fn health(&self, base_url: &str) -> Result<(), ExecutorError> {
        let url = format!("{base_url}/health");
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| ExecutorError::Unreachable(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ExecutorError::Rejected(response.status().to_string()))
        }
    }
}

/// Scriptable executor for manager tests: records deliveries, can refuse.
#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeState {
        executed: Vec<(String, ExecuteRequest)>,
        unreachable: bool,
    }

    #[derive(Clone, Default)]
    pub struct FakeExecutor {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_unreachable(&self, unreachable: bool) {
            self.state.lock().unreachable = unreachable;
        }

        /// Requests delivered so far, with the URL they went to.
        pub fn deliveries(&self) -> Vec<(String, ExecuteRequest)> {
            self.state.lock().executed.clone()
        }
    }

    #[async_trait]
    impl ExecutorClient for FakeExecutor {
        async fn execute(
            &self,
            base_url: &str,
            request: &ExecuteRequest,
        ) -> Result<(), ExecutorError> {
            let mut state = self.state.lock();
            if state.unreachable {
                return Err(ExecutorError::Unreachable("connection refused".into()));
            }
            state.executed.push((base_url.to_string(), request.clone()));
            Ok(())
        }

        async fn health(&self, _base_url: &str) -> Result<(), ExecutorError> {
            if self.state.lock().unreachable {
                return Err(ExecutorError::Unreachable("connection refused".into()));
            }
            Ok(())
        }
    }
}
