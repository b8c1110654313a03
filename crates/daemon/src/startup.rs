// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon assembly: driver selection, node registration, manager wiring.

use std::sync::Arc;
use std::time::Duration;

use sbx_core::{Clock, NodeId, RuntimeKind, RuntimeNode, SystemClock};
use sbx_driver::{DockerDriver, KubernetesDriver, RuntimeDriver};
use sbx_store::{ArtifactStore, FsArtifactStore, Store};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::AppState;
use crate::engine::{ExecutionManager, SessionManager};
use crate::env::{Config, RuntimeChoice};
use crate::executor::HttpExecutorClient;
use crate::lifecycle::{HealthProbe, HttpNodeProber, Reconciler};
use crate::scheduler::Scheduler;

/// Advisory defaults for statically registered Docker nodes; the health
/// probe keeps the usage side honest, totals are operator-declared.
const STATIC_NODE_CPU_MILLIS: i64 = 4000;
const STATIC_NODE_MEM_BYTES: i64 = 8 * 1024 * 1024 * 1024;
const STATIC_NODE_CAPACITY: i64 = 20;

/// A Kubernetes cluster registers as one logical node; its real capacity is
/// enforced by the cluster scheduler.
const K8S_NODE_CPU_MILLIS: i64 = 256_000;
const K8S_NODE_MEM_BYTES: i64 = 1024 * 1024 * 1024 * 1024;
const K8S_NODE_CAPACITY: i64 = 500;

const EXECUTOR_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("entity store unavailable: {0}")]
    Store(#[from] sbx_store::StoreError),

    #[error("artifact store unavailable: {0}")]
    Artifacts(#[from] sbx_store::ArtifactError),

    #[error("runtime driver init failed: {0}")]
    Driver(#[from] sbx_driver::DriverError),

    #[error("kubernetes config unavailable: {0}")]
    KubeConfig(String),
}

/// A fully wired daemon, ready to reconcile and serve.
pub struct Daemon {
    pub state: AppState,
    pub reconciler: Arc<Reconciler>,
    pub health: Arc<HealthProbe>,
    pub cancel: CancellationToken,
}

/// Build every component from configuration. No listener is bound here; the
/// caller runs the startup reconcile sweep first, then serves.
pub async fn build(config: Config) -> Result<Daemon, StartupError> {
    let config = Arc::new(config);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = Store::connect(&config.database_url).await?;
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(
        &config.artifact_root,
        config.artifact_inline_max_bytes,
    ));
    artifacts.ping().await?;

    let driver = select_driver(&config).await?;
    register_nodes(&store, &config, driver.kind()).await?;

    let scheduler = Arc::new(Scheduler::new(store.nodes()));
    let executor = Arc::new(HttpExecutorClient::new(EXECUTOR_REQUEST_TIMEOUT));

    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        Arc::clone(&driver),
        Arc::clone(&artifacts),
        Arc::clone(&scheduler),
        Arc::clone(&clock),
        Arc::clone(&config),
    ));
    let executions = Arc::new(ExecutionManager::new(
        store.clone(),
        Arc::clone(&driver),
        Arc::clone(&artifacts),
        executor,
        Arc::clone(&clock),
        Arc::clone(&config),
    ));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        Arc::clone(&driver),
        Arc::clone(&sessions),
        Arc::clone(&executions),
        Arc::clone(&clock),
        Arc::clone(&config),
    ));
    let health = Arc::new(HealthProbe::new(
        store.clone(),
        Arc::new(HttpNodeProber::new()),
        Arc::clone(&reconciler),
        Arc::clone(&clock),
    ));

    Ok(Daemon {
        state: AppState {
            sessions,
            executions,
            scheduler,
            store,
            artifacts,
            clock,
            config,
        },
        reconciler,
        health,
        cancel: CancellationToken::new(),
    })
}

/// Resolve `RUNTIME_KIND`, with `auto` meaning "Kubernetes when in-cluster".
async fn select_driver(config: &Config) -> Result<Arc<dyn RuntimeDriver>, StartupError> {
    let kubernetes = match config.runtime {
        RuntimeChoice::Docker => false,
        RuntimeChoice::Kubernetes => true,
        RuntimeChoice::Auto => std::env::var_os("KUBERNETES_SERVICE_HOST").is_some(),
    };
    if kubernetes {
        info!(namespace = %config.k8s_namespace, "runtime driver: kubernetes");
        let driver = KubernetesDriver::try_default(&config.k8s_namespace).await?;
        Ok(Arc::new(driver))
    } else {
        info!("runtime driver: docker");
        Ok(Arc::new(DockerDriver::new()))
    }
}

/// Register the deployment's nodes: static `SBX_NODES` entries for Docker,
/// one logical cluster node for Kubernetes. Existing rows keep their usage
/// counters; totals and endpoints refresh.
async fn register_nodes(
    store: &Store,
    config: &Config,
    kind: RuntimeKind,
) -> Result<(), StartupError> {
    match kind {
        RuntimeKind::Docker => {
            for static_node in &config.static_nodes {
                let node = RuntimeNode::new(
                    static_node.id.clone(),
                    RuntimeKind::Docker,
                    static_node.endpoint.clone(),
                    STATIC_NODE_CPU_MILLIS,
                    STATIC_NODE_MEM_BYTES,
                    STATIC_NODE_CAPACITY,
                );
                store.nodes().upsert(&node).await?;
                info!(node_id = %node.id, endpoint = %node.endpoint, "registered docker node");
            }
        }
        RuntimeKind::Kubernetes => {
            let kube_config = kube::Config::infer()
                .await
                .map_err(|e| StartupError::KubeConfig(e.to_string()))?;
            let node = RuntimeNode::new(
                NodeId::from_string(format!("node-k8s-{}", config.k8s_namespace)),
                RuntimeKind::Kubernetes,
                kube_config.cluster_url.to_string(),
                K8S_NODE_CPU_MILLIS,
                K8S_NODE_MEM_BYTES,
                K8S_NODE_CAPACITY,
            );
            store.nodes().upsert(&node).await?;
            info!(node_id = %node.id, endpoint = %node.endpoint, "registered kubernetes node");
        }
    }
    Ok(())
}
