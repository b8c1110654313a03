// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Template repository.

use chrono::{DateTime, Utc};
use sbx_core::{ResourceLimits, Template, TemplateId};
use sqlx::{FromRow, SqlitePool};

use crate::{json, StoreError};

#[derive(FromRow)]
struct TemplateRow {
    id: String,
    name: String,
    image_ref: String,
    cpu_millis: i64,
    memory_bytes: i64,
    disk_bytes: i64,
    pre_installed: String,
    security_context: String,
    created_at: DateTime<Utc>,
}

impl TemplateRow {
    fn into_template(self) -> Result<Template, StoreError> {
        Ok(Template {
            id: TemplateId::from_string(self.id),
            name: self.name,
            image_ref: self.image_ref,
            limits: ResourceLimits {
                cpu_millis: self.cpu_millis,
                memory_bytes: self.memory_bytes,
                disk_bytes: self.disk_bytes,
            },
            pre_installed: json::decode("pre_installed", &self.pre_installed)?,
            security_context: json::decode("security_context", &self.security_context)?,
            created_at: self.created_at,
        })
    }
}

#[derive(Clone)]
pub struct TemplateRepo {
    pool: SqlitePool,
}

impl TemplateRepo {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, template: &Template) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO templates \
             (id, name, image_ref, cpu_millis, memory_bytes, disk_bytes, pre_installed, \
              security_context, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(template.id.as_str())
        .bind(&template.name)
        .bind(&template.image_ref)
        .bind(template.limits.cpu_millis)
        .bind(template.limits.memory_bytes)
        .bind(template.limits.disk_bytes)
        .bind(json::encode(&template.pre_installed)?)
        .bind(json::encode(&template.security_context)?)
        .bind(template.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: &TemplateId) -> Result<Option<Template>, StoreError> {
        let row = sqlx::query_as::<_, TemplateRow>("SELECT * FROM templates WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TemplateRow::into_template).transpose()
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Template>, StoreError> {
        let row = sqlx::query_as::<_, TemplateRow>("SELECT * FROM templates WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TemplateRow::into_template).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Template>, StoreError> {
        let rows = sqlx::query_as::<_, TemplateRow>("SELECT * FROM templates ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TemplateRow::into_template).collect()
    }

    /// Delete a template unless a non-terminal session still references it.
    ///
    /// The reference check and the delete run in one transaction so a session
    /// created in between cannot observe a vanished template.
    pub async fn delete(&self, id: &TemplateId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions \
             WHERE template_id = ? AND status IN ('creating', 'running')",
        )
        .bind(id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        if active > 0 {
            return Err(StoreError::Integrity(format!(
                "template {id} is referenced by {active} active session(s)"
            )));
        }
        let result = sqlx::query("DELETE FROM templates WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "templates_tests.rs"]
mod tests;
