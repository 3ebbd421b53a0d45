//! Status reconstruction from the durable status blob.
//!
//! After a restart the registry is empty but remote builds keep writing their
//! status blobs. A status query for an unknown id falls back to this module,
//! which synthesizes a best-effort snapshot from the blob alone. The log
//! history is not recoverable.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::StorageLayout;
use crate::core::{artifact_name, BuildSnapshot, BuildStatus, StatusBlob};
use crate::ports::ArtifactStore;
use crate::retry::RetryExecutor;
use crate::utils::parse_iso8601;
use crate::validation::validate_output_name;

const MAX_BUILD_ID_LEN: usize = 64;

/// Rebuilds build snapshots from status blobs.
pub struct StatusReconciler {
    store: Arc<dyn ArtifactStore>,
    layout: StorageLayout,
    default_output_name: String,
    retry: RetryExecutor,
}

impl std::fmt::Debug for StatusReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReconciler")
            .field("layout", &self.layout)
            .field("default_output_name", &self.default_output_name)
            .finish_non_exhaustive()
    }
}

impl StatusReconciler {
    /// Creates a reconciler reading from `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        layout: StorageLayout,
        default_output_name: impl Into<String>,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            store,
            layout,
            default_output_name: default_output_name.into(),
            retry,
        }
    }

    /// Reads the status blob for `id` and synthesizes a snapshot.
    ///
    /// Returns `None` if the id is malformed, no blob exists, or the blob
    /// cannot be read or parsed.
    pub async fn reconcile(&self, id: &str) -> Option<BuildSnapshot> {
        if !is_plausible_build_id(id) {
            debug!(build_id = %id.escape_debug(), "Rejected malformed build id");
            return None;
        }

        let key = self.layout.status_key(id);
        let value = match self.retry.run("store.read_json", || self.store.read_json(&key)).await {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(e) => {
                warn!(build_id = %id, error = %e, "Failed to read status blob for reconciliation");
                return None;
            }
        };

        let blob = match StatusBlob::from_value(value) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(build_id = %id, error = %e, "Ignoring malformed status blob");
                return None;
            }
        };

        debug!(build_id = %id, stage = %blob.stage, progress = blob.progress, "Reconciled build from status blob");
        Some(self.synthesize(id, &blob))
    }

    /// Builds the snapshot for a blob without touching the store.
    #[must_use]
    pub fn synthesize(&self, id: &str, blob: &StatusBlob) -> BuildSnapshot {
        let status = if blob.stage.eq_ignore_ascii_case("complete") {
            BuildStatus::Complete
        } else if blob.reports_failure() {
            BuildStatus::Failed
        } else {
            BuildStatus::Running
        };

        let (artifact, key) = if status == BuildStatus::Complete {
            let output_name = blob
                .output_name
                .as_deref()
                .filter(|name| validate_output_name(name).is_ok());
            let name = artifact_name(output_name, &self.default_output_name, id);
            let key = self.layout.artifact_key(&name);
            (Some(name), Some(key))
        } else {
            (None, None)
        };

        let error = (status == BuildStatus::Failed).then(|| {
            if blob.message.is_empty() {
                format!("Build failed at stage '{}'", blob.stage)
            } else {
                blob.message.clone()
            }
        });

        BuildSnapshot {
            id: id.to_string(),
            status,
            progress: blob.progress,
            stage: blob.stage.clone(),
            resource_handle: None,
            artifact_name: artifact,
            artifact_key: key,
            log: Vec::new(),
            created: None,
            updated: parse_iso8601(&blob.timestamp),
            estimated_completion: None,
            error,
            reconciled: true,
        }
    }
}

fn is_plausible_build_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_BUILD_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}
