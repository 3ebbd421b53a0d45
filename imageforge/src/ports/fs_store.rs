//! Artifact store backed by a local directory.

use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::ArtifactStore;
use crate::errors::RemoteError;

/// Stores objects as files below a root directory.
///
/// Keys map to relative paths (`status/<id>.json`). Keys that would escape
/// the root are rejected.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Creates a store rooted at `root`. The directory need not exist yet.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes a JSON document under `key`, creating parent directories.
    pub async fn write_json(&self, key: &str, value: &Value) -> Result<(), RemoteError> {
        let path = self.resolve("store.write_json", key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("store.write_json", key, &e))?;
        }
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| RemoteError::fatal("store.write_json", e.to_string()))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| io_error("store.write_json", key, &e))
    }

    fn resolve(&self, operation: &str, key: &str) -> Result<PathBuf, RemoteError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(RemoteError::fatal(operation, format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(operation: &str, key: &str, error: &std::io::Error) -> RemoteError {
    let message = format!("{key}: {error}");
    match error.kind() {
        ErrorKind::NotFound => RemoteError::not_found(operation, message),
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            RemoteError::transient(operation, message)
        }
        _ => RemoteError::fatal(operation, message),
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        let path = self.resolve("store.exists", key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error("store.exists", key, &e))
    }

    async fn read_json(&self, key: &str) -> Result<Option<Value>, RemoteError> {
        let path = self.resolve("store.read_json", key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("store.read_json", key, &e)),
        };
        let value = serde_json::from_slice(&bytes)
            .map_err(|e| RemoteError::fatal("store.read_json", format!("{key}: {e}")))?;
        Ok(Some(value))
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        let path = self.resolve("store.delete", key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "Deleted object");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("store.delete", key, &e)),
        }
    }
}
