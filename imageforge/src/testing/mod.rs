//! Testing utilities for orchestrator users.
//!
//! This module provides:
//! - a scriptable in-memory compute provisioner
//! - an in-memory artifact store with failure injection
//! - request and configuration fixtures

mod fixtures;
mod provisioner;
mod store;

pub use fixtures::{fast_config, request, sample_catalog, status_blob};
pub use provisioner::FakeProvisioner;
pub use store::InMemoryArtifactStore;
