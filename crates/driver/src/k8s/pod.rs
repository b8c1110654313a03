// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pod and PVC spec construction for Kubernetes sandboxes.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, HTTPGetAction,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, Pod,
    PodSecurityContext, PodSpec, Probe, ResourceRequirements, SeccompProfile, SecurityContext,
    Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::spec::{EXECUTOR_PORT, SANDBOX_GID, SANDBOX_UID};

/// Parameters for building a Kubernetes sandbox pod.
pub(super) struct PodParams {
    pub pod_name: String,
    pub namespace: String,
    pub image: String,
    pub session_id: String,
    pub pvc_name: String,
    pub cpu_millis: i64,
    pub memory_bytes: i64,
    pub disk_bytes: i64,
    pub env: Vec<(String, String)>,
    /// Package specs for the install init container (None = no install).
    pub install_specs: Option<Vec<String>>,
}

/// Build the per-session workspace claim. The claim name is derived from the
/// session, so a recreated pod mounts the same volume.
pub(super) fn build_pvc(params: &PodParams) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(params.pvc_name.clone()),
            namespace: Some(params.namespace.clone()),
            labels: Some(sandbox_labels(&params.session_id)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(
                    [("storage".to_string(), Quantity(params.disk_bytes.to_string()))]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build a sandbox Pod spec.
pub(super) fn build_pod(params: &PodParams) -> Pod {
    let workspace_mount = VolumeMount {
        name: "workspace".to_string(),
        mount_path: "/workspace".to_string(),
        ..Default::default()
    };

    let volumes = vec![
        Volume {
            name: "workspace".to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: params.pvc_name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "tmp".to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some("Memory".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    // Install failures leave a marker instead of a non-zero exit; the in-pod
    // executor reports the outcome to the control plane on startup.
    let init_containers = params.install_specs.as_ref().map(|specs| {
        let quoted: Vec<String> =
            specs.iter().map(|s| format!("'{}'", s.replace('\'', ""))).collect();
        let script = format!(
            "mkdir -p /workspace/.sbx && \
             if pip install --no-cache-dir {} > /workspace/.sbx/install.log 2>&1; \
             then touch /workspace/.sbx/install_ok; \
             else touch /workspace/.sbx/install_failed; fi",
            quoted.join(" ")
        );
        vec![Container {
            name: "install-deps".to_string(),
            image: Some(params.image.clone()),
            command: Some(vec!["sh".to_string(), "-c".to_string(), script]),
            volume_mounts: Some(vec![workspace_mount.clone()]),
            security_context: Some(container_security_context()),
            ..Default::default()
        }]
    });

    let env: Vec<EnvVar> = params
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    let limits: BTreeMap<String, Quantity> = [
        ("cpu".to_string(), Quantity(format!("{}m", params.cpu_millis))),
        ("memory".to_string(), Quantity(params.memory_bytes.to_string())),
    ]
    .into_iter()
    .collect();

    let main_container = Container {
        name: "sandbox".to_string(),
        image: Some(params.image.clone()),
        working_dir: Some("/workspace".to_string()),
        env: Some(env),
        ports: Some(vec![ContainerPort {
            container_port: EXECUTOR_PORT as i32,
            ..Default::default()
        }]),
        volume_mounts: Some(vec![
            workspace_mount,
            VolumeMount {
                name: "tmp".to_string(),
                mount_path: "/tmp".to_string(),
                ..Default::default()
            },
        ]),
        resources: Some(ResourceRequirements { limits: Some(limits), ..Default::default() }),
        security_context: Some(container_security_context()),
        startup_probe: Some(Probe {
            http_get: Some(health_get()),
            failure_threshold: Some(12),
            period_seconds: Some(5),
            ..Default::default()
        }),
        readiness_probe: Some(Probe {
            http_get: Some(health_get()),
            period_seconds: Some(5),
            ..Default::default()
        }),
        ..Default::default()
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(params.pod_name.clone()),
            namespace: Some(params.namespace.clone()),
            labels: Some(sandbox_labels(&params.session_id)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            init_containers,
            containers: vec![main_container],
            volumes: Some(volumes),
            restart_policy: Some("Never".to_string()),
            security_context: Some(PodSecurityContext {
                run_as_user: Some(SANDBOX_UID as i64),
                run_as_group: Some(SANDBOX_GID as i64),
                fs_group: Some(SANDBOX_GID as i64),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn sandbox_labels(session_id: &str) -> BTreeMap<String, String> {
    [
        ("app".to_string(), "sbx-sandbox".to_string()),
        ("sbx.dev/session-id".to_string(), session_id.to_string()),
    ]
    .into_iter()
    .collect()
}

fn container_security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn health_get() -> HTTPGetAction {
    HTTPGetAction {
        path: Some("/health".to_string()),
        port: IntOrString::Int(EXECUTOR_PORT as i32),
        ..Default::default()
    }
}

#[cfg(test)]
#[path = "pod_tests.rs"]
mod tests;
