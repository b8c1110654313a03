// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Artifact store: workspace files keyed by session.
//!
//! The filesystem backend doubles as the Docker workspace root, so an upload
//! is immediately visible inside the container at `/workspace`. Everything
//! for a session lives under `sessions/{session_id}/` and is deleted
//! wholesale when the session terminates.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use sbx_core::{ArtifactDescriptor, ArtifactKind, SessionId};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from artifact operations.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact path: {0}")]
    InvalidPath(String),

    #[error("artifact store error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a download is delivered: small files inline, large files by URL.
#[derive(Debug)]
pub enum Fetched {
    Inline(Vec<u8>),
    Presigned(String),
}

/// Upload/download of workspace files keyed by session.
#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Mountable URI of the session's workspace prefix. Computed, never
    /// stored; the session row keeps its own copy for its whole life.
    fn workspace_uri(&self, session_id: &SessionId) -> String;

    async fn upload(
        &self,
        session_id: &SessionId,
        relative_path: &str,
        bytes: &[u8],
    ) -> Result<ArtifactDescriptor, ArtifactError>;

    async fn download(
        &self,
        session_id: &SessionId,
        relative_path: &str,
    ) -> Result<Fetched, ArtifactError>;

    async fn list(&self, session_id: &SessionId) -> Result<Vec<ArtifactDescriptor>, ArtifactError>;

    /// Idempotent: deleting an absent prefix succeeds.
    async fn delete_all(&self, session_id: &SessionId) -> Result<(), ArtifactError>;

    /// Cheap liveness check for the aggregate health endpoint.
    async fn ping(&self) -> Result<(), ArtifactError>;
}

/// Filesystem-backed artifact store.
pub struct FsArtifactStore {
    root: PathBuf,
    inline_max_bytes: u64,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>, inline_max_bytes: u64) -> Self {
        Self { root: root.into(), inline_max_bytes }
    }

    /// Workspace directory for a session; also what the Docker driver mounts.
    pub fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.root.join("sessions").join(session_id.as_str())
    }

    fn resolve(&self, session_id: &SessionId, relative_path: &str) -> Result<PathBuf, ArtifactError> {
        let rel = Path::new(relative_path);
        if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(ArtifactError::InvalidPath(relative_path.to_string()));
        }
        Ok(self.session_dir(session_id).join(rel))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    fn workspace_uri(&self, session_id: &SessionId) -> String {
        self.session_dir(session_id).display().to_string()
    }

    async fn upload(
        &self,
        session_id: &SessionId,
        relative_path: &str,
        bytes: &[u8],
    ) -> Result<ArtifactDescriptor, ArtifactError> {
        let target = self.resolve(session_id, relative_path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        let checksum = format!("{:x}", Sha256::digest(bytes));
        Ok(ArtifactDescriptor {
            path: relative_path.to_string(),
            size_bytes: bytes.len() as u64,
            mime_type: guess_mime(relative_path).to_string(),
            kind: ArtifactKind::Artifact,
            checksum: Some(checksum),
            created_at: Utc::now(),
        })
    }

    async fn download(
        &self,
        session_id: &SessionId,
        relative_path: &str,
    ) -> Result<Fetched, ArtifactError> {
        let target = self.resolve(session_id, relative_path)?;
        let meta = match tokio::fs::metadata(&target).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound(relative_path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if meta.len() > self.inline_max_bytes {
            return Ok(Fetched::Presigned(format!("file://{}", target.display())));
        }
        Ok(Fetched::Inline(tokio::fs::read(&target).await?))
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<ArtifactDescriptor>, ArtifactError> {
        let base = self.session_dir(session_id);
        let mut out = Vec::new();
        let mut stack = vec![base.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    stack.push(path);
                    continue;
                }
                let rel = path
                    .strip_prefix(&base)
                    .map_err(|_| ArtifactError::InvalidPath(path.display().to_string()))?
                    .to_string_lossy()
                    .into_owned();
                let created_at = meta
                    .modified()
                    .map(chrono::DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                out.push(ArtifactDescriptor {
                    mime_type: guess_mime(&rel).to_string(),
                    path: rel,
                    size_bytes: meta.len(),
                    kind: ArtifactKind::Artifact,
                    checksum: None,
                    created_at,
                });
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn delete_all(&self, session_id: &SessionId) -> Result<(), ArtifactError> {
        match tokio::fs::remove_dir_all(self.session_dir(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ping(&self) -> Result<(), ArtifactError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}

fn guess_mime(path: &str) -> &'static str {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("json") => "application/json",
        Some("txt") | Some("log") => "text/plain",
        Some("csv") => "text/csv",
        Some("html") => "text/html",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("py") => "text/x-python",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
#[path = "artifact_tests.rs"]
mod tests;
