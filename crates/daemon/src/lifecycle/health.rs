// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node health probing.
//!
//! Every online node is probed on a fixed cadence with a bounded deadline.
//! Three consecutive failures take the node offline and trigger a targeted
//! reconcile so its sessions relocate. Offline nodes keep being probed and
//! return to rotation on the first success; draining nodes are left alone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sbx_core::{Clock, NodeStatus, RuntimeKind, RuntimeNode};
use sbx_store::Store;
use tracing::{debug, warn};

use super::Reconciler;

const MAX_CONSECUTIVE_FAILURES: i64 = 3;
const PROBE_DEADLINE: Duration = Duration::from_secs(5);

/// Liveness check against one node.
#[async_trait]
pub trait NodeProber: Send + Sync + 'static {
    async fn probe(&self, node: &RuntimeNode) -> bool;
}

/// Health URL for a node endpoint.
///
/// Docker's TCP API answers `/_ping`; a Kubernetes apiserver answers
/// `/livez`; anything else is assumed to expose `/health`. Unix-socket
/// Docker endpoints are local daemons with no HTTP surface to probe.
fn health_url(node: &RuntimeNode) -> Option<String> {
    let endpoint = node.endpoint.trim_end_matches('/');
    if let Some(rest) = endpoint.strip_prefix("tcp://") {
        return Some(format!("http://{rest}/_ping"));
    }
    if endpoint.starts_with("unix://") {
        return None;
    }
    match node.kind {
        RuntimeKind::Kubernetes => Some(format!("{endpoint}/livez")),
        RuntimeKind::Docker => Some(format!("{endpoint}/health")),
    }
}

/// HTTP prober with a per-request deadline.
pub struct HttpNodeProber {
    http: reqwest::Client,
}

impl HttpNodeProber {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }
}

impl Default for HttpNodeProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeProber for HttpNodeProber {
    async fn probe(&self, node: &RuntimeNode) -> bool {
        let Some(url) = health_url(node) else {
            // local unix socket: the daemon either answers docker commands or
            // the drivers will notice; count it healthy
            return true;
        };
        match self.http.get(&url).timeout(PROBE_DEADLINE).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(node_id = %node.id, error = %e, "probe failed");
                false
            }
        }
    }
}

pub struct HealthProbe {
    store: Store,
    prober: Arc<dyn NodeProber>,
    reconciler: Arc<Reconciler>,
    clock: Arc<dyn Clock>,
}

impl HealthProbe {
    pub fn new(
        store: Store,
        prober: Arc<dyn NodeProber>,
        reconciler: Arc<Reconciler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, prober, reconciler, clock }
    }

    /// One probe pass over all non-draining nodes.
    pub async fn probe_once(&self) {
        let nodes = match self.store.nodes().list().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "health probe: store unavailable");
                return;
            }
        };
        for node in nodes.iter().filter(|n| n.status != NodeStatus::Draining) {
            if self.prober.probe(node).await {
                if let Err(e) = self.store.nodes().heartbeat_success(&node.id, self.clock.now_utc()).await
                {
                    warn!(node_id = %node.id, error = %e, "heartbeat record failed");
                }
                continue;
            }

            let failures = match self.store.nodes().heartbeat_failure(&node.id).await {
                Ok(failures) => failures,
                Err(e) => {
                    warn!(node_id = %node.id, error = %e, "heartbeat record failed");
                    continue;
                }
            };
            warn!(node_id = %node.id, failures, "node probe failed");
            if failures >= MAX_CONSECUTIVE_FAILURES && node.status == NodeStatus::Online {
                warn!(node_id = %node.id, "node offline after {failures} consecutive failures");
                if let Err(e) = self.store.nodes().set_status(&node.id, NodeStatus::Offline).await {
                    warn!(node_id = %node.id, error = %e, "offline transition failed");
                    continue;
                }
                self.reconciler.reconcile_node(&node.id).await;
            }
        }
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
