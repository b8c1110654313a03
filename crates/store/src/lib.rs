// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sbx-store: durability for the control plane.
//!
//! The entity store is SQLite behind typed repositories; it exclusively owns
//! all rows, and state-machine writes go through conditional updates (status
//! guards plus a `version` column) so that concurrent transitions race in the
//! database instead of in process memory. The artifact store is a capability
//! trait with a filesystem backend.

pub mod artifact;
pub mod error;
pub(crate) mod json;
pub mod executions;
pub mod nodes;
pub mod sessions;
pub mod templates;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

pub use artifact::{ArtifactError, ArtifactStore, Fetched, FsArtifactStore};
pub use error::StoreError;
pub use executions::{ExecutionRepo, IngestOutcome};
pub use nodes::NodeRepo;
pub use sessions::SessionRepo;
pub use templates::TemplateRepo;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Handle to the entity store: one pool shared by all repositories.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to the DSN from `DATABASE_URL` and run pending migrations.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(dsn)
            .map_err(|e| StoreError::Unavailable(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("connect failed: {e}")))?;
        Self::with_pool(pool).await
    }

    /// In-memory store for tests. A single connection keeps every query on
    /// the same in-memory database.
    pub async fn connect_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("connect failed: {e}")))?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))?;
        tracing::debug!("entity store ready, migrations applied");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn templates(&self) -> TemplateRepo {
        TemplateRepo::new(self.pool.clone())
    }

    pub fn sessions(&self) -> SessionRepo {
        SessionRepo::new(self.pool.clone())
    }

    pub fn executions(&self) -> ExecutionRepo {
        ExecutionRepo::new(self.pool.clone())
    }

    pub fn nodes(&self) -> NodeRepo {
        NodeRepo::new(self.pool.clone())
    }

    /// Cheap liveness check for the aggregate health endpoint.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
