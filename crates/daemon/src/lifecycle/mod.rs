// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle: drift repair and background maintenance.
//!
//! The reconciler is the only component allowed to resolve divergence
//! between the entity store (intent) and the container runtime (truth). The
//! health probe keeps the node table honest. The loops module wires both,
//! plus the idle sweep and execution watchdog, onto cancellation-aware
//! timers.

pub mod health;
pub mod loops;
pub mod reconcile;

pub use health::{HealthProbe, HttpNodeProber, NodeProber};
pub use loops::spawn_background_loops;
pub use reconcile::Reconciler;
