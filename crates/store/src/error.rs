// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Entity store error kinds.

use thiserror::Error;

/// Errors surfaced by the repositories.
///
/// `Unavailable` is transient; callers retry with bounded backoff.
/// `Integrity` is fatal for the request that caused it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity store unavailable: {0}")]
    Unavailable(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("not found")]
    NotFound,

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) => {
                if db.is_unique_violation()
                    || db.is_foreign_key_violation()
                    || db.is_check_violation()
                {
                    StoreError::Integrity(db.to_string())
                } else {
                    StoreError::Unavailable(db.to_string())
                }
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(e.to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}
