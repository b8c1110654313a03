// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Internal endpoints: executor → control plane callbacks.
//!
//! Authenticated by the shared bearer token the container received in
//! `INTERNAL_API_TOKEN`. Result ingestion is idempotent; replays answer 200
//! and are discarded.

use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use sbx_core::{ExecutionId, SessionId};
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, AppState};
use crate::engine::{IngestResponse, ResultPayload};

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/sessions/{id}/container_ready", post(container_ready))
        .route("/sessions/{id}/container_exited", post(container_exited))
        .route(
            "/sessions/{id}/dependency_install_result",
            post(dependency_install_result),
        )
        .route("/executions/{id}/heartbeat", post(execution_heartbeat))
        .route("/executions/{id}/status", post(execution_status))
        .route("/executions/{id}/result", post(execution_result))
        .layer(middleware::from_fn_with_state(state, require_token))
}

/// Bearer-token gate for every internal route.
async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == state.config.internal_api_token);
    if !authorized {
        return ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", "invalid internal token")
            .into_response();
    }
    next.run(request).await
}

async fn container_ready(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.sessions.container_ready(&SessionId::from_string(id)).await?;
    Ok(StatusCode::OK)
}

async fn container_exited(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session_id = SessionId::from_string(id);
    state.sessions.container_exited(&session_id).await?;
    state.executions.crash_running_for_session(&session_id).await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct InstallResultBody {
    success: bool,
    #[serde(default)]
    installed: Vec<String>,
    #[serde(default)]
    log: Option<String>,
}

async fn dependency_install_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<InstallResultBody>,
) -> Result<StatusCode, ApiError> {
    state
        .sessions
        .dependency_install_result(
            &SessionId::from_string(id),
            body.success,
            body.installed,
            body.log,
        )
        .await?;
    Ok(StatusCode::OK)
}

async fn execution_heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.executions.heartbeat(&ExecutionId::from_string(id)).await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
}

async fn execution_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> Result<StatusCode, ApiError> {
    if body.status != "running" {
        return Err(ApiError::validation(format!(
            "status callback only accepts \"running\", got {:?}",
            body.status
        )));
    }
    state.executions.mark_running(&ExecutionId::from_string(id)).await?;
    Ok(StatusCode::OK)
}

async fn execution_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ResultPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state
        .executions
        .ingest_result(&ExecutionId::from_string(id), payload)
        .await?;
    let accepted = match outcome {
        IngestResponse::Applied => "applied",
        IngestResponse::Discarded => "discarded",
    };
    Ok(Json(json!({ "result": accepted })))
}
