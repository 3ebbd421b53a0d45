//! Ports to the infrastructure the orchestrator drives.
//!
//! The orchestrator depends only on the [`ComputeProvisioner`] and
//! [`ArtifactStore`] traits. Concrete adapters live next to them; in-memory
//! fakes for tests live in [`crate::testing`].

mod fs_store;
#[cfg(feature = "http")]
mod http_store;
mod provisioner;
mod store;

pub use fs_store::FsArtifactStore;
#[cfg(feature = "http")]
pub use http_store::HttpArtifactStore;
pub use provisioner::{ComputeProvisioner, PayloadError, ProvisionPayload, ResourceStatus};
pub use store::ArtifactStore;

#[cfg(test)]
pub use provisioner::MockComputeProvisioner;
#[cfg(test)]
pub use store::MockArtifactStore;
