// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn node() -> RuntimeNode {
    RuntimeNode::new(
        NodeId::from_string("node-a"),
        RuntimeKind::Docker,
        "http://10.0.0.1:2375",
        4000,
        8 * 1024 * 1024 * 1024,
        10,
    )
}

#[test]
fn fresh_node_is_online_and_fits() {
    let n = node();
    assert_eq!(n.status, NodeStatus::Online);
    assert!(n.fits(1000, 512 * 1024 * 1024));
}

#[test]
fn offline_node_never_fits() {
    let mut n = node();
    n.status = NodeStatus::Offline;
    assert!(!n.fits(1, 1));
}

#[test]
fn draining_node_never_fits() {
    let mut n = node();
    n.status = NodeStatus::Draining;
    assert!(!n.fits(1, 1));
}

#[test]
fn residual_cpu_is_enforced() {
    let mut n = node();
    n.cpu_used_millis = 3500;
    assert!(!n.fits(1000, 1));
    assert!(n.fits(500, 1));
}

#[test]
fn residual_memory_is_enforced() {
    let mut n = node();
    n.mem_used_bytes = n.mem_total_bytes - 100;
    assert!(!n.fits(1, 200));
    assert!(n.fits(1, 100));
}

#[test]
fn capacity_cap_is_enforced() {
    let mut n = node();
    n.container_count = 10;
    assert!(!n.fits(1, 1));
}
