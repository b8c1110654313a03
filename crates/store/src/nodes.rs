// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime node repository.
//!
//! Load figures here are advisory. Placement accounting may briefly drift
//! from the node's own view; the health probe corrects it on its next cycle.

use chrono::{DateTime, Utc};
use sbx_core::{NodeId, NodeStatus, RuntimeKind, RuntimeNode};
use sqlx::{FromRow, SqlitePool};

use crate::{json, StoreError};

#[derive(FromRow)]
struct NodeRow {
    id: String,
    kind: String,
    endpoint: String,
    status: String,
    cpu_total_millis: i64,
    cpu_used_millis: i64,
    mem_total_bytes: i64,
    mem_used_bytes: i64,
    container_count: i64,
    capacity: i64,
    cached_images: String,
    last_heartbeat_at: Option<DateTime<Utc>>,
    consecutive_failures: i64,
}

impl NodeRow {
    fn into_node(self) -> Result<RuntimeNode, StoreError> {
        let kind = RuntimeKind::parse(&self.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("node kind {:?}", self.kind)))?;
        let status = NodeStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("node status {:?}", self.status)))?;
        Ok(RuntimeNode {
            id: NodeId::from_string(self.id),
            kind,
            endpoint: self.endpoint,
            status,
            cpu_total_millis: self.cpu_total_millis,
            cpu_used_millis: self.cpu_used_millis,
            mem_total_bytes: self.mem_total_bytes,
            mem_used_bytes: self.mem_used_bytes,
            container_count: self.container_count,
            capacity: self.capacity,
            cached_images: json::decode("cached_images", &self.cached_images)?,
            last_heartbeat_at: self.last_heartbeat_at,
            consecutive_failures: self.consecutive_failures,
        })
    }
}

#[derive(Clone)]
pub struct NodeRepo {
    pool: SqlitePool,
}

impl NodeRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register or refresh a node. Registration happens at startup (static
    /// for Docker, discovered for Kubernetes); totals and endpoint win over
    /// the stored row, usage counters are preserved.
    pub async fn upsert(&self, node: &RuntimeNode) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO runtime_nodes \
             (id, kind, endpoint, status, cpu_total_millis, cpu_used_millis, mem_total_bytes, \
              mem_used_bytes, container_count, capacity, cached_images, last_heartbeat_at, \
              consecutive_failures) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
               kind = excluded.kind, endpoint = excluded.endpoint, \
               cpu_total_millis = excluded.cpu_total_millis, \
               mem_total_bytes = excluded.mem_total_bytes, \
               capacity = excluded.capacity, cached_images = excluded.cached_images",
        )
        .bind(node.id.as_str())
        .bind(node.kind.as_str())
        .bind(&node.endpoint)
        .bind(node.status.as_str())
        .bind(node.cpu_total_millis)
        .bind(node.cpu_used_millis)
        .bind(node.mem_total_bytes)
        .bind(node.mem_used_bytes)
        .bind(node.container_count)
        .bind(node.capacity)
        .bind(json::encode(&node.cached_images)?)
        .bind(node.last_heartbeat_at)
        .bind(node.consecutive_failures)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: &NodeId) -> Result<Option<RuntimeNode>, StoreError> {
        let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM runtime_nodes WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(NodeRow::into_node).transpose()
    }

    pub async fn list(&self) -> Result<Vec<RuntimeNode>, StoreError> {
        let rows = sqlx::query_as::<_, NodeRow>("SELECT * FROM runtime_nodes ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(NodeRow::into_node).collect()
    }

    pub async fn list_online(&self) -> Result<Vec<RuntimeNode>, StoreError> {
        let rows = sqlx::query_as::<_, NodeRow>(
            "SELECT * FROM runtime_nodes WHERE status = 'online' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(NodeRow::into_node).collect()
    }

    /// Operator / health-probe status change.
    pub async fn set_status(&self, id: &NodeId, status: NodeStatus) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE runtime_nodes SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Successful probe: reset the failure streak, stamp the heartbeat, and
    /// bring an offline node back online.
    pub async fn heartbeat_success(
        &self,
        id: &NodeId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE runtime_nodes SET consecutive_failures = 0, last_heartbeat_at = ?, \
             status = CASE WHEN status = 'offline' THEN 'online' ELSE status END \
             WHERE id = ?",
        )
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Failed probe: bump the failure streak and return the new value.
    pub async fn heartbeat_failure(&self, id: &NodeId) -> Result<i64, StoreError> {
        sqlx::query(
            "UPDATE runtime_nodes SET consecutive_failures = consecutive_failures + 1 \
             WHERE id = ?",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        let failures: i64 =
            sqlx::query_scalar("SELECT consecutive_failures FROM runtime_nodes WHERE id = ?")
                .bind(id.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(failures)
    }

    /// Advisory accounting after a placement (positive deltas) or a
    /// container teardown (negative deltas). Floors at zero.
    pub async fn apply_usage_delta(
        &self,
        id: &NodeId,
        cpu_millis: i64,
        memory_bytes: i64,
        containers: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE runtime_nodes SET \
             cpu_used_millis = MAX(0, cpu_used_millis + ?), \
             mem_used_bytes = MAX(0, mem_used_bytes + ?), \
             container_count = MAX(0, container_count + ?) \
             WHERE id = ?",
        )
        .bind(cpu_millis)
        .bind(memory_bytes)
        .bind(containers)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that a template image is now cached on the node.
    pub async fn add_cached_image(&self, id: &NodeId, image_ref: &str) -> Result<(), StoreError> {
        let Some(mut node) = self.find_by_id(id).await? else {
            return Err(StoreError::NotFound);
        };
        if node.cached_images.iter().any(|i| i == image_ref) {
            return Ok(());
        }
        node.cached_images.push(image_ref.to_string());
        sqlx::query("UPDATE runtime_nodes SET cached_images = ? WHERE id = ?")
            .bind(json::encode(&node.cached_images)?)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &NodeId) -> Result<(), StoreError> {
        sqlx::query("UPDATE sessions SET runtime_node_id = NULL WHERE runtime_node_id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM runtime_nodes WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "nodes_tests.rs"]
mod tests;
