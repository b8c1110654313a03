// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kubernetes runtime driver.
//!
//! Pods are named after the session; the workspace is a per-session PVC so a
//! recreated pod sees the same files. Dependency install runs in an init
//! container. The PVC is retained across pod reincarnations and reclaimed by
//! namespace policy once the session's labels mark it terminal.

mod pod;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Api, DeleteParams, LogParams, PostParams};
use kube::Client;
use sbx_core::{RuntimeKind, RuntimeNode, SessionId};
use tracing::{debug, info};

use crate::spec::{ContainerSpec, EXECUTOR_PORT};
use crate::{ContainerHandle, DriverError, RuntimeDriver};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Kubernetes driver: one pod per live session container.
pub struct KubernetesDriver {
    client: Client,
    namespace: String,
    http: reqwest::Client,
}

impl KubernetesDriver {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self { client, namespace: namespace.into(), http: reqwest::Client::new() }
    }

    /// Connect using the ambient kubeconfig / in-cluster environment.
    pub async fn try_default(namespace: impl Into<String>) -> Result<Self, DriverError> {
        let client = Client::try_default().await.map_err(|e| DriverError::Api(e.to_string()))?;
        Ok(Self::new(client, namespace))
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pvcs(&self) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    async fn pod_ip(&self, pod_name: &str) -> Result<String, DriverError> {
        let pod = self
            .pods()
            .get_opt(pod_name)
            .await
            .map_err(|e| DriverError::Api(e.to_string()))?
            .ok_or_else(|| DriverError::NotFound(pod_name.to_string()))?;
        pod.status
            .and_then(|s| s.pod_ip)
            .ok_or_else(|| DriverError::Api(format!("pod {pod_name} has no ip yet")))
    }
}

/// Derive a DNS-safe pod name from a session id.
fn pod_name(session_id: &SessionId) -> String {
    let sanitized: String = session_id
        .suffix()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    format!("sandbox-{}", sanitized.trim_matches('-'))
}

fn decode(handle: &ContainerHandle) -> Result<(String, String), DriverError> {
    let mut parts = handle.as_str().splitn(3, '|');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("k8s"), Some(namespace), Some(pod)) => Ok((namespace.to_string(), pod.to_string())),
        _ => Err(DriverError::NotFound(format!("bad handle: {handle}"))),
    }
}

fn api_error(e: kube::Error) -> DriverError {
    DriverError::Api(e.to_string())
}

fn is_conflict(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 409)
}

fn is_gone(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 404)
}

#[async_trait]
impl RuntimeDriver for KubernetesDriver {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Kubernetes
    }

    async fn ensure_image(&self, image_ref: &str, node: &RuntimeNode) -> Result<(), DriverError> {
        // The kubelet pulls on pod admission; nothing to do up front.
        debug!(%image_ref, node_id = %node.id, "image pull delegated to kubelet");
        Ok(())
    }

    async fn create_container(
        &self,
        _node: &RuntimeNode,
        spec: &ContainerSpec,
    ) -> Result<ContainerHandle, DriverError> {
        let name = pod_name(&spec.session_id);
        let params = pod::PodParams {
            pod_name: name.clone(),
            namespace: self.namespace.clone(),
            image: spec.image_ref.clone(),
            session_id: spec.session_id.to_string(),
            pvc_name: format!("{name}-ws"),
            cpu_millis: spec.limits.cpu_millis,
            memory_bytes: spec.limits.memory_bytes,
            disk_bytes: spec.limits.disk_bytes,
            env: spec.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            install_specs: if spec.requested_dependencies.is_empty() {
                None
            } else {
                Some(spec.requested_dependencies.clone())
            },
        };

        // The claim survives pod reincarnations; AlreadyExists means a
        // previous incarnation created it.
        let pvc = pod::build_pvc(&params);
        match self.pvcs().create(&PostParams::default(), &pvc).await {
            Ok(_) => {}
            Err(e) if is_conflict(&e) => {
                debug!(pvc = %params.pvc_name, "reusing existing workspace claim");
            }
            Err(e) => return Err(DriverError::CreateFailed(e.to_string())),
        }

        info!(session_id = %spec.session_id, pod = %name, "creating sandbox pod");
        let pod = pod::build_pod(&params);
        self.pods()
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|e| DriverError::CreateFailed(e.to_string()))?;

        Ok(ContainerHandle(format!("k8s|{}|{}", self.namespace, name)))
    }

    async fn wait_ready(
        &self,
        handle: &ContainerHandle,
        deadline: Duration,
    ) -> Result<(), DriverError> {
        let (_, name) = decode(handle)?;
        let started = Instant::now();
        loop {
            if let Ok(ip) = self.pod_ip(&name).await {
                let url = format!("http://{ip}:{EXECUTOR_PORT}/health");
                match self.http.get(&url).timeout(Duration::from_secs(2)).send().await {
                    Ok(resp) if resp.status().is_success() => return Ok(()),
                    Ok(_) | Err(_) => {}
                }
            }
            if started.elapsed() >= deadline {
                return Err(DriverError::ReadyTimeout(handle.to_string()));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn exec_dependency_install(
        &self,
        _handle: &ContainerHandle,
        specs: &[String],
    ) -> Result<(), DriverError> {
        // Installs run in the init container at pod creation; a recovered pod
        // re-runs it because recovery recreates the pod from the same spec.
        debug!(count = specs.len(), "k8s install handled by init container");
        Ok(())
    }

    async fn is_running(&self, handle: &ContainerHandle) -> Result<bool, DriverError> {
        let (_, name) = decode(handle)?;
        let Some(pod) =
            self.pods().get_opt(&name).await.map_err(api_error)?
        else {
            return Ok(false);
        };
        let phase = pod.status.and_then(|s| s.phase).unwrap_or_default();
        Ok(phase == "Running" || phase == "Pending")
    }

    async fn destroy(&self, handle: &ContainerHandle) -> Result<(), DriverError> {
        let (_, name) = decode(handle)?;
        match self.pods().delete(&name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_gone(&e) => {
                debug!(pod = %name, "destroy: already gone");
                Ok(())
            }
            Err(e) => Err(api_error(e)),
        }
    }

    async fn logs(&self, handle: &ContainerHandle, tail: u32) -> Result<String, DriverError> {
        let (_, name) = decode(handle)?;
        let params = LogParams { tail_lines: Some(tail as i64), ..Default::default() };
        self.pods().logs(&name, &params).await.map_err(api_error)
    }

    async fn executor_url(&self, handle: &ContainerHandle) -> Result<String, DriverError> {
        let (_, name) = decode(handle)?;
        let ip = self.pod_ip(&name).await?;
        Ok(format!("http://{ip}:{EXECUTOR_PORT}"))
    }
}

#[cfg(test)]
#[path = "k8s_tests.rs"]
mod tests;
