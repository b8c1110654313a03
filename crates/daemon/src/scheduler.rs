// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node selection for new sessions.
//!
//! Candidates are filtered hard (online, residual cpu/memory, capacity) and
//! then ranked by a load + template-affinity score. The node list is read
//! through a short TTL cache that is never authoritative: a stale view can
//! produce a suboptimal placement but never an invalid state, because each
//! node enforces its own cap.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sbx_core::{ResourceLimits, RuntimeNode};
use sbx_store::NodeRepo;
use thiserror::Error;

const CACHE_TTL: Duration = Duration::from_secs(5);

const WEIGHT_CPU: f64 = 0.28;
const WEIGHT_MEM: f64 = 0.28;
const WEIGHT_CONTAINERS: f64 = 0.14;
const WEIGHT_AFFINITY: f64 = 0.30;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no runtime node with capacity for this session")]
    NoCapacity,

    #[error(transparent)]
    Store(#[from] sbx_store::StoreError),
}

/// Load + affinity score for a candidate node. Higher is better.
fn score(node: &RuntimeNode, image_ref: &str) -> f64 {
    let frac = |used: i64, total: i64| {
        if total <= 0 {
            1.0
        } else {
            (used as f64 / total as f64).clamp(0.0, 1.0)
        }
    };
    let load = WEIGHT_CPU * (1.0 - frac(node.cpu_used_millis, node.cpu_total_millis))
        + WEIGHT_MEM * (1.0 - frac(node.mem_used_bytes, node.mem_total_bytes))
        + WEIGHT_CONTAINERS * (1.0 - frac(node.container_count, node.capacity));
    let affinity = if node.cached_images.iter().any(|i| i == image_ref) {
        WEIGHT_AFFINITY
    } else {
        0.0
    };
    load + affinity
}

pub struct Scheduler {
    nodes: NodeRepo,
    cache: Mutex<Option<(Instant, Vec<RuntimeNode>)>>,
}

impl Scheduler {
    pub fn new(nodes: NodeRepo) -> Self {
        Self { nodes, cache: Mutex::new(None) }
    }

    /// Pick a node for a session, or fail fast with `NoCapacity`.
    pub async fn schedule(
        &self,
        image_ref: &str,
        limits: &ResourceLimits,
    ) -> Result<RuntimeNode, SchedulerError> {
        let candidates = self.online_nodes().await?;
        pick(&candidates, image_ref, limits).ok_or(SchedulerError::NoCapacity)
    }

    /// Drop the cached node list (tests, and after operator drain).
    pub fn invalidate_cache(&self) {
        *self.cache.lock() = None;
    }

    async fn online_nodes(&self) -> Result<Vec<RuntimeNode>, SchedulerError> {
        {
            let cache = self.cache.lock();
            if let Some((at, nodes)) = cache.as_ref() {
                if at.elapsed() < CACHE_TTL {
                    return Ok(nodes.clone());
                }
            }
        }
        let nodes = self.nodes.list_online().await?;
        *self.cache.lock() = Some((Instant::now(), nodes.clone()));
        Ok(nodes)
    }
}

/// Deterministic ranked selection over a candidate list.
///
/// Ties break by lowest container count, then lexicographic node id, so a
/// given input always yields the same placement.
fn pick(nodes: &[RuntimeNode], image_ref: &str, limits: &ResourceLimits) -> Option<RuntimeNode> {
    nodes
        .iter()
        .filter(|n| n.fits(limits.cpu_millis, limits.memory_bytes))
        .max_by(|a, b| {
            score(a, image_ref)
                .partial_cmp(&score(b, image_ref))
                .unwrap_or(std::cmp::Ordering::Equal)
                // reversed: fewer containers ranks higher, then smaller id
                .then_with(|| b.container_count.cmp(&a.container_count))
                .then_with(|| b.id.as_str().cmp(a.id.as_str()))
        })
        .cloned()
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
