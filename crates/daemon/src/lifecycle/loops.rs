// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background maintenance loops.

use std::sync::Arc;
use std::time::Duration;

use sbx_core::Clock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::{ExecutionManager, SessionManager};
use crate::lifecycle::{HealthProbe, Reconciler};

const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
const HEALTH_INTERVAL: Duration = Duration::from_secs(10);
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the reconcile, health-probe, idle-sweep, and execution-watchdog
/// loops. All stop when `cancel` fires.
pub fn spawn_background_loops(
    sessions: Arc<SessionManager>,
    executions: Arc<ExecutionManager>,
    reconciler: Arc<Reconciler>,
    health: Arc<HealthProbe>,
    clock: Arc<dyn Clock>,
    watchdog_interval: Duration,
    cancel: CancellationToken,
) {
    spawn_loop("reconcile", RECONCILE_INTERVAL, cancel.clone(), move || {
        let reconciler = Arc::clone(&reconciler);
        async move {
            let recovered = reconciler.reconcile_once().await;
            if recovered > 0 {
                debug!(recovered, "reconcile pass recovered sessions");
            }
        }
    });

    spawn_loop("health-probe", HEALTH_INTERVAL, cancel.clone(), move || {
        let health = Arc::clone(&health);
        async move { health.probe_once().await }
    });

    {
        let clock = Arc::clone(&clock);
        spawn_loop("idle-sweep", IDLE_SWEEP_INTERVAL, cancel.clone(), move || {
            let sessions = Arc::clone(&sessions);
            let now = clock.now_utc();
            async move {
                if let Err(e) = sessions.idle_sweep(now).await {
                    tracing::warn!(error = %e, "idle sweep failed");
                }
            }
        });
    }

    spawn_loop("execution-watchdog", watchdog_interval, cancel, move || {
        let executions = Arc::clone(&executions);
        let now = clock.now_utc();
        async move {
            if let Err(e) = executions.watchdog_once(now).await {
                tracing::warn!(error = %e, "execution watchdog failed");
            }
        }
    });
}

fn spawn_loop<F, Fut>(name: &'static str, period: Duration, cancel: CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(loop_name = name, "background loop stopped");
                    break;
                }
                _ = interval.tick() => tick().await,
            }
        }
    });
}
