// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::Store;
use chrono::Utc;

async fn store() -> Store {
    Store::connect_memory().await.unwrap()
}

fn node(id: &str) -> RuntimeNode {
    RuntimeNode::new(
        NodeId::from_string(id),
        RuntimeKind::Docker,
        format!("http://{id}:2375"),
        4000,
        8 * 1024 * 1024 * 1024,
        10,
    )
}

#[tokio::test]
async fn upsert_and_round_trip() {
    let store = store().await;
    let n = node("node-a");
    store.nodes().upsert(&n).await.unwrap();
    let found = store.nodes().find_by_id(&n.id).await.unwrap().unwrap();
    assert_eq!(found, n);
}

#[tokio::test]
async fn upsert_refreshes_totals_but_keeps_usage() {
    let store = store().await;
    let n = node("node-a");
    store.nodes().upsert(&n).await.unwrap();
    store.nodes().apply_usage_delta(&n.id, 500, 1024, 1).await.unwrap();

    let mut refreshed = node("node-a");
    refreshed.cpu_total_millis = 8000;
    store.nodes().upsert(&refreshed).await.unwrap();

    let found = store.nodes().find_by_id(&n.id).await.unwrap().unwrap();
    assert_eq!(found.cpu_total_millis, 8000);
    assert_eq!(found.cpu_used_millis, 500);
    assert_eq!(found.container_count, 1);
}

#[tokio::test]
async fn usage_delta_floors_at_zero() {
    let store = store().await;
    let n = node("node-a");
    store.nodes().upsert(&n).await.unwrap();
    store.nodes().apply_usage_delta(&n.id, -100, -100, -1).await.unwrap();
    let found = store.nodes().find_by_id(&n.id).await.unwrap().unwrap();
    assert_eq!(found.cpu_used_millis, 0);
    assert_eq!(found.container_count, 0);
}

#[tokio::test]
async fn list_online_excludes_offline_and_draining() {
    let store = store().await;
    store.nodes().upsert(&node("node-a")).await.unwrap();
    store.nodes().upsert(&node("node-b")).await.unwrap();
    store.nodes().upsert(&node("node-c")).await.unwrap();
    store.nodes().set_status(&NodeId::from_string("node-b"), NodeStatus::Offline).await.unwrap();
    store.nodes().set_status(&NodeId::from_string("node-c"), NodeStatus::Draining).await.unwrap();

    let online = store.nodes().list_online().await.unwrap();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].id, "node-a");
}

#[tokio::test]
async fn failure_streak_counts_and_success_resets() {
    let store = store().await;
    let n = node("node-a");
    store.nodes().upsert(&n).await.unwrap();

    assert_eq!(store.nodes().heartbeat_failure(&n.id).await.unwrap(), 1);
    assert_eq!(store.nodes().heartbeat_failure(&n.id).await.unwrap(), 2);
    assert_eq!(store.nodes().heartbeat_failure(&n.id).await.unwrap(), 3);

    store.nodes().set_status(&n.id, NodeStatus::Offline).await.unwrap();
    store.nodes().heartbeat_success(&n.id, Utc::now()).await.unwrap();

    let found = store.nodes().find_by_id(&n.id).await.unwrap().unwrap();
    assert_eq!(found.consecutive_failures, 0);
    assert_eq!(found.status, NodeStatus::Online);
    assert!(found.last_heartbeat_at.is_some());
}

#[tokio::test]
async fn heartbeat_success_does_not_undrain() {
    let store = store().await;
    let n = node("node-a");
    store.nodes().upsert(&n).await.unwrap();
    store.nodes().set_status(&n.id, NodeStatus::Draining).await.unwrap();
    store.nodes().heartbeat_success(&n.id, Utc::now()).await.unwrap();
    let found = store.nodes().find_by_id(&n.id).await.unwrap().unwrap();
    assert_eq!(found.status, NodeStatus::Draining);
}

#[tokio::test]
async fn cached_image_is_recorded_once() {
    let store = store().await;
    let n = node("node-a");
    store.nodes().upsert(&n).await.unwrap();
    store.nodes().add_cached_image(&n.id, "sandbox/python:3.12").await.unwrap();
    store.nodes().add_cached_image(&n.id, "sandbox/python:3.12").await.unwrap();
    let found = store.nodes().find_by_id(&n.id).await.unwrap().unwrap();
    assert_eq!(found.cached_images, vec!["sandbox/python:3.12"]);
}
