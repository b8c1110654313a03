// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Public REST surface under `/api/v1`, plus the aggregate `/health`.

use std::collections::BTreeMap;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use sbx_core::{
    ExecutionId, NodeId, NodeStatus, ResourceLimits, SessionId, SessionStatus, Template, TemplateId,
};
use sbx_store::Fetched;
use serde::Deserialize;
use serde_json::json;

use super::dto::{
    ExecutionDto, ExecutionResultDto, ExecutionSubmittedDto, NodeDto, SessionCreatedDto,
    SessionDto, SessionListDto, TemplateDto,
};
use super::{ApiError, AppState};
use crate::engine::{CreateSessionRequest, SubmitRequest, TerminateOutcome};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/sessions", post(create_session).get(list_sessions))
        .route("/api/v1/sessions/{id}", get(get_session).delete(terminate_session))
        .route("/api/v1/sessions/{id}/execute", post(execute))
        .route("/api/v1/sessions/{id}/files/upload", post(upload_file))
        .route("/api/v1/sessions/{id}/files/{*path}", get(download_file))
        .route("/api/v1/executions/{id}", get(get_execution))
        .route("/api/v1/executions/{id}/status", get(get_execution_status))
        .route("/api/v1/executions/{id}/result", get(get_execution_result))
        .route("/api/v1/templates", post(create_template).get(list_templates))
        .route("/api/v1/templates/{id}", get(get_template).delete(delete_template))
        .route("/api/v1/runtimes", get(list_runtimes))
        .route("/api/v1/runtimes/{id}/health", get(runtime_health))
        .route("/api/v1/runtimes/{id}/metrics", get(runtime_metrics))
        .route("/api/v1/runtimes/{id}/drain", post(drain_runtime))
        .route("/health", get(aggregate_health))
}

// --- sessions ---

#[derive(Deserialize)]
struct CreateSessionBody {
    template_id: String,
    #[serde(default)]
    resources: Option<ResourceLimits>,
    #[serde(default)]
    timeout: Option<u32>,
    #[serde(default)]
    env_vars: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .sessions
        .create(CreateSessionRequest {
            template_id: body.template_id,
            resources: body.resources,
            timeout: body.timeout,
            env_vars: body.env_vars,
            dependencies: body.dependencies,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(SessionCreatedDto::from(&session))))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<SessionListDto>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            SessionStatus::parse(s)
                .ok_or_else(|| ApiError::validation(format!("unknown status: {s}")))
        })
        .transpose()?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let items = state.sessions.list(status, limit, query.cursor.as_deref()).await?;
    let next_cursor =
        (items.len() as i64 == limit).then(|| items[items.len() - 1].id.to_string());
    Ok(Json(SessionListDto {
        items: items.iter().map(SessionDto::from).collect(),
        next_cursor,
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDto>, ApiError> {
    let session = state.sessions.get(&SessionId::from_string(id)).await?;
    Ok(Json(SessionDto::from(&session)))
}

async fn terminate_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.sessions.terminate(&SessionId::from_string(id)).await? {
        TerminateOutcome::Terminated => Ok(StatusCode::NO_CONTENT.into_response()),
        TerminateOutcome::AlreadyTerminal => {
            Err(ApiError::conflict("session is already terminal"))
        }
    }
}

// --- executions ---

#[derive(Deserialize)]
struct ExecuteBody {
    code: String,
    language: String,
    #[serde(default)]
    event: Option<serde_json::Value>,
    #[serde(default)]
    timeout: Option<u32>,
}

async fn execute(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ExecuteBody>,
) -> Result<impl IntoResponse, ApiError> {
    let execution = state
        .executions
        .submit(
            &SessionId::from_string(id),
            SubmitRequest {
                code: body.code,
                language: body.language,
                event: body.event,
                timeout: body.timeout,
            },
        )
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ExecutionSubmittedDto {
            execution_id: execution.id.to_string(),
            status: "submitted",
        }),
    ))
}

async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionDto>, ApiError> {
    let execution = state.executions.get(&ExecutionId::from_string(id)).await?;
    Ok(Json(ExecutionDto::from(&execution)))
}

async fn get_execution_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let execution = state.executions.get(&ExecutionId::from_string(id)).await?;
    Ok(Json(json!({
        "execution_id": execution.id.to_string(),
        "status": execution.status.to_string(),
    })))
}

async fn get_execution_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionResultDto>, ApiError> {
    let execution = state.executions.get(&ExecutionId::from_string(id)).await?;
    if !execution.status.is_terminal() {
        return Err(ApiError::conflict(format!(
            "execution is {}, result not available",
            execution.status
        ))
        .with_hint("poll GET /api/v1/executions/{id}/status until terminal"));
    }
    Ok(Json(ExecutionResultDto::from(&execution)))
}

// --- workspace files ---

async fn upload_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = SessionId::from_string(id);
    state.sessions.get(&session_id).await?;

    let mut uploaded = Vec::new();
    let mut target_path: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("path") => {
                target_path = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::validation(e.to_string()))?,
                );
            }
            Some("file") => {
                let path = target_path
                    .take()
                    .or_else(|| field.file_name().map(ToString::to_string))
                    .ok_or_else(|| ApiError::validation("file field needs a name"))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::validation(format!("upload read failed: {e}")))?;
                let descriptor = state.artifacts.upload(&session_id, &path, &bytes).await?;
                uploaded.push(descriptor);
            }
            _ => {}
        }
    }
    if uploaded.is_empty() {
        return Err(ApiError::validation("multipart body had no file field"));
    }
    Ok((StatusCode::CREATED, Json(uploaded)))
}

async fn download_file(
    State(state): State<AppState>,
    Path((id, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let session_id = SessionId::from_string(id);
    state.sessions.get(&session_id).await?;
    match state.artifacts.download(&session_id, &path).await? {
        Fetched::Inline(bytes) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response()),
        Fetched::Presigned(url) => {
            Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
        }
    }
}

// --- templates ---

#[derive(Deserialize)]
struct TemplateBody {
    name: String,
    image_ref: String,
    #[serde(default)]
    resources: Option<ResourceLimits>,
    #[serde(default)]
    pre_installed: Vec<String>,
    #[serde(default)]
    security_context: Option<serde_json::Value>,
}

async fn create_template(
    State(state): State<AppState>,
    Json(body): Json<TemplateBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.name.is_empty() || body.image_ref.is_empty() {
        return Err(ApiError::validation("name and image_ref are required"));
    }
    let mut template = Template::new(body.name, body.image_ref, state.clock.now_utc());
    if let Some(resources) = body.resources {
        template.limits = template.limits.merged(Some(&resources));
    }
    template.pre_installed = body.pre_installed;
    if let Some(security_context) = body.security_context {
        template.security_context = security_context;
    }
    state.store.templates().insert(&template).await?;
    Ok((StatusCode::CREATED, Json(TemplateDto::from(&template))))
}

async fn list_templates(State(state): State<AppState>) -> Result<Json<Vec<TemplateDto>>, ApiError> {
    let templates = state.store.templates().list().await?;
    Ok(Json(templates.iter().map(TemplateDto::from).collect()))
}

async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TemplateDto>, ApiError> {
    let template = state
        .store
        .templates()
        .find_by_id(&TemplateId::from_string(id))
        .await?
        .ok_or_else(|| ApiError::not_found("template"))?;
    Ok(Json(TemplateDto::from(&template)))
}

async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.templates().delete(&TemplateId::from_string(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- runtime nodes (operator introspection) ---

async fn list_runtimes(State(state): State<AppState>) -> Result<Json<Vec<NodeDto>>, ApiError> {
    let nodes = state.store.nodes().list().await?;
    Ok(Json(nodes.iter().map(NodeDto::from).collect()))
}

async fn runtime_health(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let node = state
        .store
        .nodes()
        .find_by_id(&NodeId::from_string(id))
        .await?
        .ok_or_else(|| ApiError::not_found("runtime node"))?;
    Ok(Json(json!({
        "node_id": node.id.to_string(),
        "status": node.status.to_string(),
        "last_heartbeat_at": node.last_heartbeat_at,
        "consecutive_failures": node.consecutive_failures,
    })))
}

async fn runtime_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<NodeDto>, ApiError> {
    let node = state
        .store
        .nodes()
        .find_by_id(&NodeId::from_string(id))
        .await?
        .ok_or_else(|| ApiError::not_found("runtime node"))?;
    Ok(Json(NodeDto::from(&node)))
}

async fn drain_runtime(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let node_id = NodeId::from_string(id);
    if !state.store.nodes().set_status(&node_id, NodeStatus::Draining).await? {
        return Err(ApiError::not_found("runtime node"));
    }
    state.scheduler.invalidate_cache();
    Ok(StatusCode::NO_CONTENT)
}

// --- aggregate health ---

async fn aggregate_health(State(state): State<AppState>) -> Response {
    let db_ok = state.store.ping().await.is_ok();
    let artifacts_ok = state.artifacts.ping().await.is_ok();
    let online_nodes = state
        .store
        .nodes()
        .list_online()
        .await
        .map(|nodes| nodes.len())
        .unwrap_or(0);

    let ready = db_ok && artifacts_ok && online_nodes > 0;
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let body = json!({
        "ready": ready,
        "checks": {
            "database": db_ok,
            "artifact_store": artifacts_ok,
            "online_nodes": online_nodes,
        },
        "checked_at": Utc::now(),
    });
    (status, Json(body)).into_response()
}
