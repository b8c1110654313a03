// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn params(install: Option<Vec<String>>) -> PodParams {
    PodParams {
        pod_name: "sandbox-abc".to_string(),
        namespace: "sandboxes".to_string(),
        image: "sandbox/python:3.12".to_string(),
        session_id: "sess-abc".to_string(),
        pvc_name: "sandbox-abc-ws".to_string(),
        cpu_millis: 1500,
        memory_bytes: 536870912,
        disk_bytes: 1073741824,
        env: vec![("SESSION_ID".to_string(), "sess-abc".to_string())],
        install_specs: install,
    }
}

#[test]
fn pod_mounts_pvc_workspace_and_tmpfs() {
    let pod = build_pod(&params(None));
    let spec = pod.spec.unwrap();

    let volumes = spec.volumes.unwrap();
    let workspace = volumes.iter().find(|v| v.name == "workspace").unwrap();
    assert_eq!(
        workspace.persistent_volume_claim.as_ref().unwrap().claim_name,
        "sandbox-abc-ws"
    );
    let tmp = volumes.iter().find(|v| v.name == "tmp").unwrap();
    assert_eq!(tmp.empty_dir.as_ref().unwrap().medium.as_deref(), Some("Memory"));

    let container = &spec.containers[0];
    let mounts = container.volume_mounts.as_ref().unwrap();
    assert!(mounts.iter().any(|m| m.name == "workspace" && m.mount_path == "/workspace"));
    assert!(mounts.iter().any(|m| m.name == "tmp" && m.mount_path == "/tmp"));
}

#[test]
fn pod_runs_non_root_with_dropped_caps() {
    let pod = build_pod(&params(None));
    let spec = pod.spec.unwrap();

    let pod_sec = spec.security_context.unwrap();
    assert_eq!(pod_sec.run_as_user, Some(1000));
    assert_eq!(pod_sec.run_as_group, Some(1000));

    let container_sec = spec.containers[0].security_context.as_ref().unwrap();
    assert_eq!(container_sec.allow_privilege_escalation, Some(false));
    assert_eq!(
        container_sec.capabilities.as_ref().unwrap().drop.as_ref().unwrap(),
        &vec!["ALL".to_string()]
    );
    assert_eq!(container_sec.seccomp_profile.as_ref().unwrap().type_, "RuntimeDefault");
}

#[test]
fn pod_limits_follow_session_resources() {
    let pod = build_pod(&params(None));
    let limits = pod.spec.unwrap().containers[0].resources.clone().unwrap().limits.unwrap();
    assert_eq!(limits.get("cpu").unwrap().0, "1500m");
    assert_eq!(limits.get("memory").unwrap().0, "536870912");
}

#[test]
fn install_specs_add_init_container_that_never_fails_the_pod() {
    let pod = build_pod(&params(Some(vec!["numpy==2.0".to_string()])));
    let spec = pod.spec.unwrap();
    let init = &spec.init_containers.unwrap()[0];
    assert_eq!(init.name, "install-deps");
    let script = &init.command.as_ref().unwrap()[2];
    assert!(script.contains("pip install --no-cache-dir 'numpy==2.0'"));
    assert!(script.contains("install_ok"));
    assert!(script.contains("install_failed"));
}

#[test]
fn no_install_specs_means_no_init_container() {
    let pod = build_pod(&params(None));
    assert!(pod.spec.unwrap().init_containers.is_none());
}

#[test]
fn pvc_requests_session_disk() {
    let pvc = build_pvc(&params(None));
    let requests = pvc.spec.unwrap().resources.unwrap().requests.unwrap();
    assert_eq!(requests.get("storage").unwrap().0, "1073741824");
    assert_eq!(pvc.metadata.labels.unwrap().get("sbx.dev/session-id").unwrap(), "sess-abc");
}

#[test]
fn pod_labels_carry_session_id() {
    let pod = build_pod(&params(None));
    let labels = pod.metadata.labels.unwrap();
    assert_eq!(labels.get("app").unwrap(), "sbx-sandbox");
    assert_eq!(labels.get("sbx.dev/session-id").unwrap(), "sess-abc");
}
