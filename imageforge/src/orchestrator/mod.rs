//! The build orchestrator.
//!
//! [`BuildOrchestrator::start_build`] validates a request, registers the
//! build and spawns a pipeline task that provisions a compute resource,
//! polls it to completion and releases it. Everything after registration
//! happens asynchronously and is observed through
//! [`BuildOrchestrator::get_build_status`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use imageforge::config::OrchestratorConfig;
//! use imageforge::orchestrator::BuildOrchestrator;
//! use imageforge::testing::{FakeProvisioner, InMemoryArtifactStore};
//!
//! # async fn demo() -> Result<(), imageforge::errors::OrchestratorError> {
//! let orchestrator = BuildOrchestrator::new(
//!     OrchestratorConfig::default(),
//!     Arc::new(FakeProvisioner::new()),
//!     Arc::new(InMemoryArtifactStore::new()),
//! )?;
//!
//! let accepted = orchestrator.start_build(&serde_json::json!({"components": ["base"]}))?;
//! let status = orchestrator.get_build_status(&accepted.id).await;
//! # let _ = status;
//! # Ok(())
//! # }
//! ```

mod pipeline;
mod progress;

#[cfg(test)]
mod integration_tests;

pub use progress::{heuristic_stage, ProgressTracker, HEURISTIC_CAP, STALL_EXEMPT_PROGRESS};

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::cancellation::CancellationToken;
use crate::config::OrchestratorConfig;
use crate::core::{Build, BuildAccepted, BuildSnapshot, BuildStatus};
use crate::errors::OrchestratorError;
use crate::estimate::estimate_minutes;
use crate::events::{BuildEvent, BuildEventType, EventSink, NoOpEventSink};
use crate::observability::build_span;
use crate::ports::{ArtifactStore, ComputeProvisioner};
use crate::reconciler::StatusReconciler;
use crate::registry::BuildRegistry;
use crate::retry::RetryExecutor;
use crate::utils::{generate_build_id, now_utc};
use crate::validation::{validate_request, RequestLimits};

/// State shared between the orchestrator handle and its pipeline tasks.
struct Inner {
    config: OrchestratorConfig,
    limits: RequestLimits,
    registry: BuildRegistry,
    provisioner: Arc<dyn ComputeProvisioner>,
    store: Arc<dyn ArtifactStore>,
    events: Arc<dyn EventSink>,
    retry: RetryExecutor,
    reconciler: StatusReconciler,
    shutdown: CancellationToken,
    cancels: Mutex<HashMap<String, Arc<CancellationToken>>>,
}

impl Inner {
    fn emit(&self, event_type: BuildEventType, build_id: &str, data: Value) {
        self.events
            .try_emit(BuildEvent::new(event_type, build_id).with_data(data));
    }

    fn sweep(&self) -> usize {
        let evicted = self.registry.evict_expired(self.config.build_ttl(), now_utc());
        if evicted > 0 {
            info!(evicted, "Swept expired builds");
        }
        evicted
    }
}

/// Builder for [`BuildOrchestrator`].
pub struct BuildOrchestratorBuilder {
    config: OrchestratorConfig,
    provisioner: Arc<dyn ComputeProvisioner>,
    store: Arc<dyn ArtifactStore>,
    events: Arc<dyn EventSink>,
}

impl BuildOrchestratorBuilder {
    /// Sets the sink that receives lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Validates the configuration and creates the orchestrator.
    pub fn build(self) -> Result<BuildOrchestrator, OrchestratorError> {
        self.config.validate()?;

        let retry = RetryExecutor::new(self.config.retry.clone());
        let reconciler = StatusReconciler::new(
            self.store.clone(),
            self.config.storage.clone(),
            self.config.default_output_name.clone(),
            retry.clone(),
        );

        let inner = Inner {
            limits: RequestLimits::from(&self.config),
            registry: BuildRegistry::new(self.config.max_builds_in_memory),
            provisioner: self.provisioner,
            store: self.store,
            events: self.events,
            retry,
            reconciler,
            shutdown: CancellationToken::new(),
            cancels: Mutex::new(HashMap::new()),
            config: self.config,
        };
        Ok(BuildOrchestrator { inner: Arc::new(inner) })
    }
}

/// Accepts build requests and drives each build to a terminal state.
///
/// Cloning is cheap; clones share the same registry and tasks.
#[derive(Clone)]
pub struct BuildOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BuildOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOrchestrator")
            .field("builds", &self.inner.registry.len())
            .field("active", &self.inner.registry.active_count())
            .field("shutdown", &self.inner.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl BuildOrchestrator {
    /// Creates an orchestrator with no event sink.
    pub fn new(
        config: OrchestratorConfig,
        provisioner: Arc<dyn ComputeProvisioner>,
        store: Arc<dyn ArtifactStore>,
    ) -> Result<Self, OrchestratorError> {
        Self::builder(config, provisioner, store).build()
    }

    /// Starts building an orchestrator.
    #[must_use]
    pub fn builder(
        config: OrchestratorConfig,
        provisioner: Arc<dyn ComputeProvisioner>,
        store: Arc<dyn ArtifactStore>,
    ) -> BuildOrchestratorBuilder {
        BuildOrchestratorBuilder {
            config,
            provisioner,
            store,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Validates and registers a build, then starts its pipeline.
    ///
    /// Returns as soon as the build is queued. Only validation and capacity
    /// problems are reported here; later failures land in the build's
    /// `error` field. Must be called from within a Tokio runtime.
    pub fn start_build(&self, request: &Value) -> Result<BuildAccepted, OrchestratorError> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(OrchestratorError::ShuttingDown);
        }

        let config = validate_request(request, &inner.config.catalog, &inner.limits).inspect_err(|e| {
            debug!(code = e.code(), error = %e, "Rejected build request");
        })?;
        let minutes = estimate_minutes(&config, &inner.config.catalog, &inner.config.estimate);

        let id = generate_build_id();
        let build = Build::new(id.clone(), config, minutes, inner.config.max_log_entries);
        if let Err(e) = inner.registry.try_register(build, inner.config.max_concurrent_builds) {
            warn!(error = %e, "Build rejected");
            return Err(e);
        }

        let cancel = Arc::new(CancellationToken::new());
        inner.cancels.lock().insert(id.clone(), cancel.clone());

        info!(build_id = %id, estimated_minutes = minutes, "Build queued");
        inner.emit(BuildEventType::Queued, &id, json!({ "estimatedMinutes": minutes }));

        tokio::spawn(pipeline::run(inner.clone(), id.clone(), cancel).instrument(build_span(&id)));

        Ok(BuildAccepted {
            id,
            status: BuildStatus::Queued,
            estimated_minutes: minutes,
        })
    }

    /// Returns the current state of a build.
    ///
    /// Unknown ids fall back to the status blob in the artifact store, so
    /// builds started before a restart stay visible.
    pub async fn get_build_status(&self, id: &str) -> Option<BuildSnapshot> {
        if let Some(snapshot) = self.inner.registry.snapshot(id) {
            return Some(snapshot);
        }
        self.inner.reconciler.reconcile(id).await
    }

    /// Requests cancellation of a build that has not finished.
    ///
    /// The pipeline stops at its next suspension point, marks the build
    /// failed and destroys its compute resource. After [`shutdown`] no
    /// pipeline is left to do that, so cancellation is refused.
    ///
    /// [`shutdown`]: BuildOrchestrator::shutdown
    pub fn cancel_build(&self, id: &str, reason: impl Into<String>) -> Result<(), OrchestratorError> {
        let reason = reason.into();
        let status = self
            .inner
            .registry
            .with_build(id, Build::status)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        if status.is_terminal() {
            return Err(OrchestratorError::InvalidState {
                id: id.to_string(),
                status: status.to_string(),
                message: "build has already finished".to_string(),
            });
        }

        if self.inner.shutdown.is_cancelled() {
            return Err(OrchestratorError::ShuttingDown);
        }

        let Some(token) = self.inner.cancels.lock().get(id).cloned() else {
            return Err(OrchestratorError::InvalidState {
                id: id.to_string(),
                status: status.to_string(),
                message: "build has no running pipeline".to_string(),
            });
        };
        token.cancel(reason.clone());

        info!(build_id = %id, reason = %reason, "Build cancellation requested");
        Ok(())
    }

    /// Stops accepting builds and detaches every pipeline.
    ///
    /// Builds keep their current state and remote resources are left
    /// running; a restarted process can reconcile them from the store.
    pub fn shutdown(&self) {
        if self.inner.shutdown.cancel("orchestrator shutdown") {
            info!(active = self.inner.registry.active_count(), "Orchestrator shutting down");
        }
    }

    /// Returns true once [`BuildOrchestrator::shutdown`] was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Returns snapshots of every registered build, oldest first.
    #[must_use]
    pub fn list_builds(&self) -> Vec<BuildSnapshot> {
        self.inner.registry.list()
    }

    /// Number of queued, provisioning or running builds.
    #[must_use]
    pub fn active_build_count(&self) -> usize {
        self.inner.registry.active_count()
    }

    /// Removes terminal builds older than the configured TTL.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep()
    }

    /// Spawns the periodic TTL sweep. The task ends on shutdown.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.sweep_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.sweep();
                    }
                }
            }
            debug!("Build sweeper stopped");
        })
    }
}
