//! Core types for imageforge.
//!
//! This module contains the fundamental types used throughout the orchestrator:
//! - `BuildStatus` and `ResourceState` enums
//! - `Build`, the registry entity, and its `BuildSnapshot`
//! - `StatusBlob`, the progress record written by the remote side

mod blob;
mod build;
mod status;

pub use blob::StatusBlob;
pub use build::{
    artifact_name, Build, BuildAccepted, BuildConfig, BuildOptions, BuildSnapshot, LogEntry,
    ResourceHandle, ID_PREFIX_LEN,
};
pub use status::{BuildStatus, ResourceState};
