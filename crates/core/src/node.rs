// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime node: a place where containers can be created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::RuntimeKind;

crate::define_id! {
    /// Unique identifier for a runtime node.
    pub struct NodeId("node-");
}

/// Node availability as seen by the health probe and the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
    Draining,
}

crate::status_str! {
    NodeStatus {
        Online => "online",
        Offline => "offline",
        Draining => "draining",
    }
}

/// A registered runtime node and its advisory load figures.
///
/// The figures may lag reality; the scheduler's placement is valid (not
/// necessarily optimal) and each node enforces its own hard cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeNode {
    pub id: NodeId,
    pub kind: RuntimeKind,
    pub endpoint: String,
    pub status: NodeStatus,
    pub cpu_total_millis: i64,
    pub cpu_used_millis: i64,
    pub mem_total_bytes: i64,
    pub mem_used_bytes: i64,
    pub container_count: i64,
    pub capacity: i64,
    /// Template images already present on the node.
    pub cached_images: Vec<String>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub consecutive_failures: i64,
}

impl RuntimeNode {
    pub fn new(
        id: NodeId,
        kind: RuntimeKind,
        endpoint: impl Into<String>,
        cpu_total_millis: i64,
        mem_total_bytes: i64,
        capacity: i64,
    ) -> Self {
        Self {
            id,
            kind,
            endpoint: endpoint.into(),
            status: NodeStatus::Online,
            cpu_total_millis,
            cpu_used_millis: 0,
            mem_total_bytes,
            mem_used_bytes: 0,
            container_count: 0,
            capacity,
            cached_images: Vec::new(),
            last_heartbeat_at: None,
            consecutive_failures: 0,
        }
    }

    /// Whether this node can host a container with the given demands.
    pub fn fits(&self, cpu_millis: i64, memory_bytes: i64) -> bool {
        self.status == NodeStatus::Online
            && self.cpu_total_millis - self.cpu_used_millis >= cpu_millis
            && self.mem_total_bytes - self.mem_used_bytes >= memory_bytes
            && self.container_count < self.capacity
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
