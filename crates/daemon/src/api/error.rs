// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Component error → HTTP mapping.
//!
//! User-visible errors carry a stable `error_code`, a human message, and
//! (when safe) a corrective hint. Stack traces never leave the process.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::engine::{ExecutionError, SessionError};
use sbx_store::{ArtifactError, StoreError};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub hint: Option<&'static str>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error_code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'a str>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into(), hint: None }
    }

    pub fn with_hint(mut self, hint: &'static str) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error_code: self.code, message: &self.message, hint: self.hint };
        (self.status, Json(body)).into_response()
    }
}

fn from_store(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound => ApiError::not_found("resource"),
        StoreError::Unavailable(_) => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            "entity store unavailable",
        )
        .with_hint("retry shortly"),
        StoreError::Integrity(message) => ApiError::conflict(message),
        StoreError::Corrupt(_) => {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error")
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        from_store(e)
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound => ApiError::not_found("session"),
            SessionError::InvalidTemplate(t) => {
                ApiError::validation(format!("unknown template: {t}"))
                    .with_hint("list templates via GET /api/v1/templates")
            }
            SessionError::Validation(message) => ApiError::validation(message),
            SessionError::NoCapacity => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "no_capacity",
                "no runtime node with capacity",
            )
            .with_hint("retry once nodes free up, or register more nodes"),
            SessionError::Driver(e) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "driver_error",
                e.to_string(),
            ),
            SessionError::Store(e) => from_store(e),
            SessionError::Artifact(e) => e.into(),
        }
    }
}

impl From<ExecutionError> for ApiError {
    fn from(e: ExecutionError) -> Self {
        match e {
            ExecutionError::SessionNotFound => ApiError::not_found("session"),
            ExecutionError::NotFound => ApiError::not_found("execution"),
            ExecutionError::SessionNotReady(detail) => {
                ApiError::conflict(format!("session not ready: {detail}"))
                    .with_hint("wait for status=running and dependency_status=ready")
            }
            ExecutionError::Validation(message) => ApiError::validation(message),
            ExecutionError::Driver(e) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "driver_error",
                e.to_string(),
            ),
            ExecutionError::Store(e) => from_store(e),
        }
    }
}

impl From<ArtifactError> for ApiError {
    fn from(e: ArtifactError) -> Self {
        match e {
            ArtifactError::NotFound(path) => ApiError::not_found(&format!("file {path}")),
            ArtifactError::InvalidPath(path) => {
                ApiError::validation(format!("invalid path: {path}"))
            }
            ArtifactError::Io(_) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "artifact_store_error",
                "artifact store error",
            ),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
