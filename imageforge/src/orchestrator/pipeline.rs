//! The per-build pipeline task.
//!
//! `queued -> provisioning -> running -> complete | failed`. The task owns
//! every mutation of its build after registration. Failures are collected
//! into a [`BuildFailure`] and applied once, after best-effort cleanup.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::progress::ProgressTracker;
use super::Inner;
use crate::cancellation::CancellationToken;
use crate::core::{Build, BuildConfig, BuildStatus, LogEntry, ResourceHandle, StatusBlob};
use crate::errors::{BuildFailure, RemoteError};
use crate::events::BuildEventType;
use crate::ports::ProvisionPayload;

/// How a pipeline ended.
#[derive(Debug)]
enum Exit {
    Completed,
    Failed(BuildFailure),
    /// The orchestrator shut down; the build is left as-is.
    Detached,
}

/// What made the pipeline check for the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompletionTrigger {
    StatusBlob,
    ResourceStopped,
}

pub(super) async fn run(inner: Arc<Inner>, id: String, cancel: Arc<CancellationToken>) {
    let Some((config, estimated_minutes)) =
        inner.registry.with_build(&id, |b| (b.config().clone(), b.estimated_minutes()))
    else {
        inner.cancels.lock().remove(&id);
        return;
    };

    let artifact_name = crate::core::artifact_name(
        config.output_name.as_deref(),
        &inner.config.default_output_name,
        &id,
    );
    let pipeline = Pipeline {
        inner: &inner,
        id: &id,
        cancel: &cancel,
        status_key: inner.config.storage.status_key(&id),
        artifact_key: inner.config.storage.artifact_key(&artifact_name),
        artifact_name,
        estimate: Duration::from_secs(u64::from(estimated_minutes) * 60),
        handle: None,
        deadline: None,
    };
    pipeline.execute(&config).await;

    inner.cancels.lock().remove(&id);
}

struct Pipeline<'a> {
    inner: &'a Inner,
    id: &'a str,
    cancel: &'a CancellationToken,
    artifact_name: String,
    artifact_key: String,
    status_key: String,
    estimate: Duration,
    handle: Option<ResourceHandle>,
    /// Absolute running deadline, set once the build is running.
    deadline: Option<Instant>,
}

impl Pipeline<'_> {
    async fn execute(mut self, config: &BuildConfig) {
        match self.drive(config).await {
            Exit::Completed => {}
            Exit::Failed(failure) => self.fail(failure).await,
            Exit::Detached => {
                info!("Pipeline detached; build left for reconciliation");
            }
        }
    }

    async fn drive(&mut self, config: &BuildConfig) -> Exit {
        let inner = self.inner;
        let id = self.id;

        if let Some(reason) = self.cancel_reason() {
            return Exit::Failed(BuildFailure::Cancelled(reason));
        }

        let started = self
            .update(|b| {
                let moved = b.transition(BuildStatus::Provisioning, 10, "provisioning");
                if moved {
                    b.push_log("Provisioning compute resource");
                }
                moved
            })
            .unwrap_or(false);
        if !started {
            return Exit::Detached;
        }
        info!("Provisioning compute resource");
        self.emit(BuildEventType::Provisioning, json!({ "progress": 10 }));

        let payload = ProvisionPayload::new(
            id,
            config,
            self.artifact_name.clone(),
            self.status_key.clone(),
            self.artifact_key.clone(),
        );
        let create = inner
            .retry
            .run("provisioner.create", || inner.provisioner.create(id, &payload));
        let created = tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => return Exit::Detached,
            result = create => result,
        };
        let handle = match created {
            Ok(handle) => handle,
            Err(e) => return Exit::Failed(BuildFailure::Provisioning(e)),
        };

        self.handle = Some(handle.clone());
        self.update(|b| {
            b.set_resource_handle(handle.clone());
            b.push_log(format!("Compute resource {handle} created"));
        });
        info!(resource = %handle, "Compute resource created");

        if let Some(reason) = self.cancel_reason() {
            return Exit::Failed(BuildFailure::Cancelled(reason));
        }

        self.update(|b| {
            if b.transition(BuildStatus::Running, 20, "initializing") {
                b.push_log("Build running");
            }
        });
        self.emit(BuildEventType::Running, json!({ "resourceHandle": handle.as_str() }));

        self.poll_until_done().await
    }

    async fn poll_until_done(&mut self) -> Exit {
        let inner = self.inner;
        let started = Instant::now();
        let limit = inner.config.build_timeout();
        let deadline = started + limit;
        self.deadline = Some(deadline);

        let mut tracker = ProgressTracker::new(
            started,
            self.estimate,
            inner.config.stalled_threshold(),
            self.current_progress(),
            "initializing",
        );
        let mut ticker = tokio::time::interval(inner.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = inner.shutdown.cancelled() => return Exit::Detached,
                () = self.cancel.cancelled() => {
                    return Exit::Failed(BuildFailure::Cancelled(self.cancel_reason().unwrap_or_default()));
                }
                () = tokio::time::sleep_until(deadline) => {
                    return Exit::Failed(BuildFailure::Timeout { limit });
                }
                _ = ticker.tick() => {}
            }

            if let Some(exit) = self.poll_once(&mut tracker).await {
                return exit;
            }
        }
    }

    /// One observation of the resource and the status blob.
    async fn poll_once(&mut self, tracker: &mut ProgressTracker) -> Option<Exit> {
        let inner = self.inner;
        let Some(handle) = self.handle.clone() else {
            return Some(Exit::Failed(BuildFailure::ResourceVanished));
        };

        let status = match inner
            .retry
            .run("provisioner.get_state", || inner.provisioner.get_state(&handle))
            .await
        {
            Ok(status) => status,
            Err(e) if e.is_not_found() => return Some(Exit::Failed(BuildFailure::ResourceVanished)),
            Err(e) => {
                warn!(error = %e, "Resource state query failed; skipping poll");
                return None;
            }
        };
        if !status.exists {
            return Some(Exit::Failed(BuildFailure::ResourceVanished));
        }

        let now = Instant::now();
        if let Some(blob) = self.read_blob().await {
            if blob.reports_failure() {
                let message = if blob.message.is_empty() {
                    "remote build reported failure".to_string()
                } else {
                    blob.message.clone()
                };
                return Some(Exit::Failed(BuildFailure::RemoteReported {
                    stage: blob.stage.clone(),
                    message,
                }));
            }

            let entry = tracker.observe_blob(&blob, now);
            // 100 is reserved for a verified artifact.
            self.apply_progress(tracker, blob.progress.min(99), &blob.stage, entry, now);

            if blob.reports_complete() {
                return Some(self.finalize(CompletionTrigger::StatusBlob).await);
            }
        } else if !tracker.blob_seen() {
            let (progress, stage) = tracker.heuristic(now);
            self.apply_progress(tracker, progress, stage, None, now);
        }

        if status.state.is_terminal() {
            debug!(state = %status.state, "Compute resource reached a terminal state");
            return Some(self.finalize(CompletionTrigger::ResourceStopped).await);
        }

        tracker.stalled_for(now).map(|idle| {
            Exit::Failed(BuildFailure::Stalled {
                stage: tracker.stage().to_string(),
                progress: tracker.progress(),
                minutes: idle.as_secs() / 60,
            })
        })
    }

    /// Reads the status blob. Missing, unreadable and malformed blobs are
    /// all treated as absent.
    async fn read_blob(&self) -> Option<StatusBlob> {
        let inner = self.inner;
        let key = &self.status_key;
        let value = match inner.retry.run("store.read_json", || inner.store.read_json(key)).await {
            Ok(value) => value?,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read status blob");
                return None;
            }
        };
        match StatusBlob::from_value(value) {
            Ok(blob) => Some(blob),
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring malformed status blob");
                None
            }
        }
    }

    fn apply_progress(
        &self,
        tracker: &mut ProgressTracker,
        progress: u8,
        stage: &str,
        entry: Option<LogEntry>,
        now: Instant,
    ) {
        let result = self.update(|b| {
            if let Some(entry) = entry {
                b.push_log_at(entry.timestamp, entry.message);
            }
            let changed = b.record_progress(progress, stage);
            (changed, b.progress())
        });

        if let Some((changed, current)) = result {
            tracker.record(current, stage, now);
            if changed {
                debug!(progress = current, stage, "Progress updated");
                self.emit(BuildEventType::Progress, json!({ "progress": current, "stage": stage }));
            }
        }
    }

    /// Verifies the artifact and completes the build.
    async fn finalize(&mut self, trigger: CompletionTrigger) -> Exit {
        let inner = self.inner;
        let key = self.artifact_key.clone();
        let deadline = self.deadline.unwrap_or_else(|| Instant::now() + inner.config.build_timeout());
        let timeout = || {
            Exit::Failed(BuildFailure::Timeout {
                limit: inner.config.build_timeout(),
            })
        };

        // Retries inside the poll may have run past the deadline.
        if Instant::now() >= deadline {
            return timeout();
        }

        let mut present = match self.artifact_exists(&key).await {
            Ok(present) => present,
            Err(e) => return Exit::Failed(BuildFailure::Verification(e)),
        };

        if !present {
            let grace = inner.config.artifact_grace_period();
            self.log(format!(
                "Artifact '{key}' not visible yet; re-checking in {}s",
                grace.as_secs()
            ));
            tokio::select! {
                biased;
                () = inner.shutdown.cancelled() => return Exit::Detached,
                () = self.cancel.cancelled() => {
                    return Exit::Failed(BuildFailure::Cancelled(self.cancel_reason().unwrap_or_default()));
                }
                () = tokio::time::sleep_until(deadline) => return timeout(),
                () = tokio::time::sleep(grace) => {}
            }
            present = match self.artifact_exists(&key).await {
                Ok(present) => present,
                Err(e) => return Exit::Failed(BuildFailure::Verification(e)),
            };
        }

        if !present {
            return Exit::Failed(match trigger {
                CompletionTrigger::StatusBlob => BuildFailure::ArtifactMissing { key },
                CompletionTrigger::ResourceStopped => BuildFailure::StoppedWithoutArtifact { key },
            });
        }

        self.cleanup_after_success().await;

        let name = self.artifact_name.clone();
        let completed = self.update(|b| b.complete(name, key.clone())).unwrap_or(false);
        if completed {
            info!(artifact = %key, "Build complete");
            self.emit(
                BuildEventType::Completed,
                json!({ "artifactName": self.artifact_name, "artifactKey": key }),
            );
        }
        Exit::Completed
    }

    async fn artifact_exists(&self, key: &str) -> Result<bool, RemoteError> {
        let inner = self.inner;
        inner.retry.run("store.exists", || inner.store.exists(key)).await
    }

    async fn cleanup_after_success(&mut self) {
        let inner = self.inner;
        let key = &self.status_key;
        if let Err(e) = inner.retry.run("store.delete", || inner.store.delete(key)).await {
            warn!(key = %key, error = %e, "Failed to delete status blob");
            self.log(format!("Failed to delete status blob: {e}"));
            self.emit(BuildEventType::CleanupFailed, json!({ "key": key, "error": e.to_string() }));
        }

        if inner.config.auto_cleanup {
            if let Some(handle) = self.handle.take() {
                self.destroy_resource(&handle).await;
            }
        }
    }

    async fn fail(&mut self, failure: BuildFailure) {
        let message = failure.to_string();
        warn!(error = %message, "Build failed");

        if let Some(handle) = self.handle.take() {
            self.destroy_resource(&handle).await;
        }

        let failed = self.update(|b| b.fail(message.clone())).unwrap_or(false);
        if failed {
            self.emit(BuildEventType::Failed, json!({ "error": message }));
        }
    }

    /// Destroys the resource. Failures are logged and never escalated.
    async fn destroy_resource(&self, handle: &ResourceHandle) {
        let inner = self.inner;
        match inner
            .retry
            .run("provisioner.destroy", || inner.provisioner.destroy(handle))
            .await
        {
            Ok(()) => {
                info!(resource = %handle, "Compute resource destroyed");
                self.log(format!("Compute resource {handle} destroyed"));
            }
            Err(e) => {
                warn!(resource = %handle, error = %e, "Failed to destroy compute resource");
                self.log(format!("Failed to destroy compute resource {handle}: {e}"));
                self.emit(
                    BuildEventType::CleanupFailed,
                    json!({ "resourceHandle": handle.as_str(), "error": e.to_string() }),
                );
            }
        }
    }

    fn cancel_reason(&self) -> Option<String> {
        if self.cancel.is_cancelled() {
            Some(self.cancel.reason().unwrap_or_default())
        } else {
            None
        }
    }

    fn current_progress(&self) -> u8 {
        self.inner.registry.with_build(self.id, Build::progress).unwrap_or(0)
    }

    fn update<R>(&self, f: impl FnOnce(&mut Build) -> R) -> Option<R> {
        self.inner.registry.update(self.id, f)
    }

    fn log(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|b| b.push_log(message));
    }

    fn emit(&self, event_type: BuildEventType, data: serde_json::Value) {
        self.inner.emit(event_type, self.id, data);
    }
}
