// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface: public REST under `/api/v1`, executor callbacks under
//! `/internal`. Handlers validate, call a manager, and map errors; no
//! business logic lives here.

pub mod dto;
pub mod error;
pub mod internal;
pub mod public;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use sbx_core::Clock;
use sbx_store::{ArtifactStore, Store};

use crate::engine::{ExecutionManager, SessionManager};
use crate::env::Config;
use crate::scheduler::Scheduler;

pub use error::ApiError;

/// Uploads above this many bytes are refused with 413.
const UPLOAD_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Shared context for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub executions: Arc<ExecutionManager>,
    pub scheduler: Arc<Scheduler>,
    pub store: Store,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<Config>,
}

/// Assemble the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(public::router())
        .nest("/internal", internal::router(state.clone()))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .with_state(state)
}
