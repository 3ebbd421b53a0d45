//! # Imageforge
//!
//! Orchestrates long-running image builds on ephemeral compute.
//!
//! A client submits a build request naming catalog components and variants.
//! Imageforge validates it, provisions a compute resource that runs the build
//! out of process, and tracks it to a verified artifact or a recorded failure:
//!
//! - **Admission**: strict request validation and a hard concurrency limit
//! - **Tracking**: status-blob polling with a time-based fallback, stall and
//!   timeout detection
//! - **Verification**: a build is only complete once its artifact exists
//! - **Cleanup**: compute resources are destroyed on every terminal path
//! - **Reconciliation**: builds unknown to this process are recovered from
//!   their status blob
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use imageforge::prelude::*;
//!
//! let orchestrator = BuildOrchestrator::new(config, provisioner, store)?;
//! let accepted = orchestrator.start_build(&request)?;
//! let snapshot = orchestrator.get_build_status(&accepted.id).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod estimate;
pub mod events;
pub mod observability;
pub mod orchestrator;
pub mod ports;
pub mod reconciler;
pub mod registry;
pub mod retry;
pub mod testing;
pub mod utils;
pub mod validation;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{Catalog, OrchestratorConfig, StorageLayout};
    pub use crate::core::{
        BuildAccepted, BuildConfig, BuildSnapshot, BuildStatus, ResourceHandle,
        ResourceState, StatusBlob,
    };
    pub use crate::errors::{
        BuildFailure, ConfigError, OrchestratorError, RemoteError, ValidationError,
    };
    pub use crate::events::{BuildEvent, BuildEventType, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LoggingConfig};
    pub use crate::orchestrator::{BuildOrchestrator, BuildOrchestratorBuilder};
    pub use crate::ports::{ArtifactStore, ComputeProvisioner, FsArtifactStore, ProvisionPayload, ResourceStatus};
    pub use crate::retry::{RetryConfig, RetryExecutor};
    pub use crate::validation::validate_request;
}
