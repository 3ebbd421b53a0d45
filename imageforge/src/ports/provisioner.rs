//! Compute provisioner port and the structured startup payload.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{BuildConfig, BuildOptions, ResourceHandle, ResourceState};
use crate::errors::RemoteError;

/// Observed state of a compute resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    /// False once the resource has been deleted.
    pub exists: bool,
    /// Lifecycle state reported by the provider.
    pub state: ResourceState,
}

impl ResourceStatus {
    /// A resource that exists in the given state.
    #[must_use]
    pub fn in_state(state: ResourceState) -> Self {
        Self { exists: true, state }
    }

    /// A resource that no longer exists.
    #[must_use]
    pub fn gone() -> Self {
        Self {
            exists: false,
            state: ResourceState::Terminated,
        }
    }
}

/// Errors decoding a [`ProvisionPayload`].
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The transport encoding is not valid base64.
    #[error("Invalid payload encoding: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded bytes are not a valid payload document.
    #[error("Invalid payload document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Typed startup payload handed to a compute resource.
///
/// The remote side parses this document itself. It carries only validated,
/// whitelisted values and is never spliced into a command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionPayload {
    /// Payload schema version.
    pub version: u32,
    /// Build id.
    pub job_id: String,
    /// Selected components.
    pub components: Vec<String>,
    /// Selected variants.
    pub variants: Vec<String>,
    /// Feature flags.
    pub options: BuildOptions,
    /// User-chosen output name, echoed back in status blobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
    /// Artifact base name the remote side uploads under.
    pub artifact_name: String,
    /// Store key the remote side writes status blobs to.
    pub status_key: String,
    /// Store key the remote side uploads the artifact to.
    pub artifact_key: String,
}

impl ProvisionPayload {
    /// Current payload schema version.
    pub const VERSION: u32 = 1;

    /// Builds a payload from a validated configuration.
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        config: &BuildConfig,
        artifact_name: impl Into<String>,
        status_key: impl Into<String>,
        artifact_key: impl Into<String>,
    ) -> Self {
        Self {
            version: Self::VERSION,
            job_id: job_id.into(),
            components: config.components.clone(),
            variants: config.variants.clone(),
            options: config.options,
            output_name: config.output_name.clone(),
            artifact_name: artifact_name.into(),
            status_key: status_key.into(),
            artifact_key: artifact_key.into(),
        }
    }

    /// Serializes to JSON and wraps it in base64 for metadata transport.
    pub fn encode(&self) -> Result<String, PayloadError> {
        let json = serde_json::to_vec(self)?;
        Ok(BASE64.encode(json))
    }

    /// Reverses [`ProvisionPayload::encode`].
    pub fn decode(encoded: &str) -> Result<Self, PayloadError> {
        let bytes = BASE64.decode(encoded.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Creates, inspects and destroys ephemeral compute resources.
///
/// `get_state` and `destroy` must be idempotent. `create` is called once per
/// build but may be retried after a transient failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ComputeProvisioner: Send + Sync {
    /// Creates a resource that runs the build described by `payload`.
    async fn create(&self, job_id: &str, payload: &ProvisionPayload) -> Result<ResourceHandle, RemoteError>;

    /// Returns the resource's current state.
    async fn get_state(&self, handle: &ResourceHandle) -> Result<ResourceStatus, RemoteError>;

    /// Destroys the resource. Destroying a missing resource succeeds.
    async fn destroy(&self, handle: &ResourceHandle) -> Result<(), RemoteError>;
}
