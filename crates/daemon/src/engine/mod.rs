// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine: the session and execution state machines.
//!
//! Managers orchestrate the entity store, the runtime driver, the artifact
//! store, and the executor client. They own every state transition; the API
//! layer only validates and maps errors.

pub mod executions;
pub mod sessions;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use executions::{ExecutionManager, IngestResponse, ResultPayload, SubmitRequest};
pub use sessions::{CreateSessionRequest, SessionManager, TerminateOutcome};

use std::future::Future;
use std::time::Duration;

use sbx_driver::DriverError;
use sbx_store::{ArtifactError, StoreError};
use thiserror::Error;

/// Bounded retry for transient driver errors (daemon hiccups, API blips).
/// Non-transient errors and the third failure surface immediately.
pub(crate) async fn with_driver_retries<T, F, Fut>(mut op: F) -> Result<T, DriverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DriverError>>,
{
    let mut delay = Duration::from_millis(200);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < 2 => {
                attempt += 1;
                tracing::debug!(error = %e, attempt, "transient driver error, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("{0}")]
    Validation(String),

    #[error("no runtime node with capacity")]
    NoCapacity,

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Errors from execution operations.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("session not found")]
    SessionNotFound,

    #[error("execution not found")]
    NotFound,

    #[error("session not ready: {0}")]
    SessionNotReady(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
