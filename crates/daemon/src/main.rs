// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `sbxd`: sandbox control plane daemon.
//!
//! Startup order matters: configuration, lock file, store, then the
//! reconciler's full sweep *before* the HTTP listener binds, so external
//! requests never observe a half-initialized binding table.

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::time::Duration;

use fs2::FileExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sbx_daemon::env::{
    Config, EXIT_BACKEND_UNAVAILABLE, EXIT_CONFIG_MISSING, EXIT_GENERAL, EXIT_OK,
    EXIT_READINESS_TIMEOUT,
};
use sbx_daemon::lifecycle::spawn_background_loops;
use sbx_daemon::startup;

/// Bound on the startup reconcile sweep; a hung runtime must not keep the
/// daemon from ever serving.
const STARTUP_RECONCILE_DEADLINE: Duration = Duration::from_secs(120);

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("sbxd: {e}");
            return ExitCode::from(EXIT_CONFIG_MISSING as u8);
        }
    };

    let _log_guard = init_tracing(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "tokio runtime init failed");
            return ExitCode::from(EXIT_GENERAL as u8);
        }
    };

    ExitCode::from(runtime.block_on(run(config)) as u8)
}

async fn run(config: Config) -> i32 {
    // Single-instance lock: a second daemon on the same state dir would
    // fight the reconciler.
    if let Err(e) = std::fs::create_dir_all(&config.state_dir) {
        error!(path = %config.state_dir.display(), error = %e, "state dir unavailable");
        return EXIT_GENERAL;
    }
    let lock_path = config.state_dir.join("sbxd.lock");
    let lock_file = match OpenOptions::new().create(true).truncate(false).write(true).open(&lock_path)
    {
        Ok(file) => file,
        Err(e) => {
            error!(path = %lock_path.display(), error = %e, "lock file unavailable");
            return EXIT_GENERAL;
        }
    };
    if lock_file.try_lock_exclusive().is_err() {
        error!(path = %lock_path.display(), "another sbxd instance holds the lock");
        return EXIT_GENERAL;
    }

    let listen_addr = config.listen_addr.clone();
    let daemon = match startup::build(config).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "startup failed");
            return EXIT_BACKEND_UNAVAILABLE;
        }
    };

    // Full drift sweep before accepting traffic.
    info!("startup reconcile sweep");
    match tokio::time::timeout(STARTUP_RECONCILE_DEADLINE, daemon.reconciler.reconcile_once())
        .await
    {
        Ok(recovered) => info!(recovered, "startup reconcile complete"),
        Err(_) => {
            error!("startup reconcile did not finish in time");
            return EXIT_READINESS_TIMEOUT;
        }
    }

    spawn_background_loops(
        daemon.state.sessions.clone(),
        daemon.state.executions.clone(),
        daemon.reconciler.clone(),
        daemon.health.clone(),
        daemon.state.clock.clone(),
        daemon.state.config.heartbeat_interval,
        daemon.cancel.clone(),
    );

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%listen_addr, error = %e, "listener bind failed");
            return EXIT_GENERAL;
        }
    };
    info!(%listen_addr, "control plane listening");

    let cancel = daemon.cancel.clone();
    let app = sbx_daemon::api::router(daemon.state);
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining");
        cancel.cancel();
    });

    if let Err(e) = serve.await {
        error!(error = %e, "server error");
        return EXIT_GENERAL;
    }
    info!("sbxd stopped");
    EXIT_OK
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

/// Stderr logging filtered by `SBX_LOG`; optionally also a non-blocking
/// file appender when `SBX_LOG_DIR` is set.
fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_env("SBX_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sbxd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}
