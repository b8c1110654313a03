// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn pod_name_is_dns_safe() {
    let id = SessionId::from_string("sess-Ab_9X-qq");
    let name = pod_name(&id);
    assert_eq!(name, "sandbox-ab-9x-qq");
    assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
}

#[test]
fn pod_name_trims_edge_dashes() {
    let id = SessionId::from_string("sess-_abc_");
    assert_eq!(pod_name(&id), "sandbox-abc");
}

#[test]
fn handle_decode_round_trip() {
    let handle = ContainerHandle::from("k8s|sandboxes|sandbox-abc");
    let (namespace, pod) = decode(&handle).unwrap();
    assert_eq!(namespace, "sandboxes");
    assert_eq!(pod, "sandbox-abc");
}

#[test]
fn handle_decode_rejects_docker_handles() {
    assert!(decode(&ContainerHandle::from("docker|tcp://h|name|9100")).is_err());
}
