//! Artifact store port.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::RemoteError;

/// Durable object storage for status blobs and finished artifacts.
///
/// Artifacts are uploaded by the compute resource itself; the orchestrator
/// only checks for them, reads status blobs and deletes what it owns.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Returns true if an object exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, RemoteError>;

    /// Reads and parses a JSON object. Returns `Ok(None)` when absent.
    async fn read_json(&self, key: &str) -> Result<Option<Value>, RemoteError>;

    /// Deletes an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<(), RemoteError>;
}
