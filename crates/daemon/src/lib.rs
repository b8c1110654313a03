// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sbx-daemon: the sandbox control plane.
//!
//! Wires the entity store, artifact store, runtime driver, and executor
//! client into the session/execution managers, the reconciler, and the
//! health probe, and serves the HTTP surface. The binary is `sbxd`.

pub mod api;
pub mod engine;
pub mod env;
pub mod executor;
pub mod lifecycle;
pub mod scheduler;
pub mod startup;

pub use api::{router, AppState};
pub use engine::{
    CreateSessionRequest, ExecutionError, ExecutionManager, IngestResponse, ResultPayload,
    SessionError, SessionManager, SubmitRequest, TerminateOutcome,
};
pub use env::{Config, ConfigError, RuntimeChoice};
pub use executor::{ExecuteRequest, ExecutorClient, ExecutorError, HttpExecutorClient};
#[cfg(any(test, feature = "test-support"))]
pub use executor::fake::FakeExecutor;
pub use lifecycle::{HealthProbe, HttpNodeProber, NodeProber, Reconciler};
pub use scheduler::{Scheduler, SchedulerError};
