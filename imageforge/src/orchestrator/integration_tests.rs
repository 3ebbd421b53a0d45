//! End-to-end tests of the orchestrator against in-memory fakes.
//!
//! All tests run on a paused clock; sleeping in the test body lets the
//! runtime jump straight to the next pipeline timer.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::BuildOrchestrator;
use crate::config::OrchestratorConfig;
use crate::core::{BuildSnapshot, BuildStatus, ResourceState};
use crate::errors::{OrchestratorError, RemoteError};
use crate::events::{BuildEventType, CollectingEventSink};
use crate::testing::{fast_config, request, status_blob, FakeProvisioner, InMemoryArtifactStore};

struct Harness {
    orchestrator: BuildOrchestrator,
    provisioner: Arc<FakeProvisioner>,
    store: Arc<InMemoryArtifactStore>,
    events: Arc<CollectingEventSink>,
}

impl Harness {
    fn new(config: OrchestratorConfig) -> Self {
        let provisioner = Arc::new(FakeProvisioner::new());
        let store = Arc::new(InMemoryArtifactStore::new());
        let events = Arc::new(CollectingEventSink::new());
        let orchestrator = BuildOrchestrator::builder(config, provisioner.clone(), store.clone())
            .with_event_sink(events.clone())
            .build()
            .unwrap();
        Self {
            orchestrator,
            provisioner,
            store,
            events,
        }
    }

    fn start(&self, components: &[&str], output_name: Option<&str>) -> String {
        self.orchestrator
            .start_build(&request(components, output_name))
            .unwrap()
            .id
    }

    async fn snapshot(&self, id: &str) -> BuildSnapshot {
        self.orchestrator.get_build_status(id).await.unwrap()
    }

    /// Sleeps in poll-sized steps until the build reaches `status`.
    async fn wait_for(&self, id: &str, status: BuildStatus, within: Duration) -> BuildSnapshot {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let snapshot = self.snapshot(id).await;
            if snapshot.status == status {
                return snapshot;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "build {id} did not reach {status} within {within:?}; last: {snapshot:?}"
            );
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    async fn wait_running(&self, id: &str) -> BuildSnapshot {
        self.wait_for(id, BuildStatus::Running, Duration::from_secs(60)).await
    }

    fn status_key(&self, id: &str) -> String {
        self.orchestrator.config().storage.status_key(id)
    }

    fn artifact_key(&self, name: &str) -> String {
        self.orchestrator.config().storage.artifact_key(name)
    }
}

fn prefix(id: &str) -> &str {
    &id[..8]
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_demo_build() {
    let h = Harness::new(fast_config().with_max_concurrent_builds(1));

    let accepted = h
        .orchestrator
        .start_build(&json!({"components": ["a", "b"], "outputName": "demo-1"}))
        .unwrap();
    assert_eq!(accepted.status, BuildStatus::Queued);
    assert!(accepted.estimated_minutes >= 1);
    let id = accepted.id;

    // K=1: a second build is refused while the first is active.
    let err = h.orchestrator.start_build(&request(&["a"], None)).unwrap_err();
    assert!(matches!(err, OrchestratorError::Capacity { active: 1, limit: 1 }));

    let running = h.wait_running(&id).await;
    assert_eq!(running.resource_handle, Some(FakeProvisioner::handle_for(&id)));
    assert!(running.progress >= 20);

    let payload = h.provisioner.payload_for(&id).unwrap();
    assert_eq!(payload.components, vec!["a", "b"]);
    assert_eq!(payload.output_name.as_deref(), Some("demo-1"));

    let name = format!("demo-1-{}", prefix(&id));
    h.store.put_artifact(h.artifact_key(&name));
    h.store.put_json(h.status_key(&id), status_blob("complete", 100, "Upload finished"));

    let done = h.wait_for(&id, BuildStatus::Complete, Duration::from_secs(60)).await;
    assert_eq!(done.artifact_name.as_deref(), Some(name.as_str()));
    assert_eq!(done.artifact_key, Some(h.artifact_key(&name)));
    assert_eq!(done.progress, 100);
    assert_eq!(done.error, None);
    assert!(done.log.iter().any(|e| e.message == "Upload finished"));

    assert!(h.provisioner.was_destroyed(&id));
    assert_eq!(h.store.deleted(), vec![h.status_key(&id)]);
    assert_eq!(h.orchestrator.active_build_count(), 0);

    let types = h.events.types_for(&id);
    assert_eq!(
        &types[..3],
        &[BuildEventType::Queued, BuildEventType::Provisioning, BuildEventType::Running]
    );
    assert_eq!(types.last(), Some(&BuildEventType::Completed));

    // Capacity is free again.
    assert!(h.orchestrator.start_build(&request(&["a"], None)).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_capacity_limit_does_not_grow_registry() {
    let h = Harness::new(fast_config().with_max_concurrent_builds(3));
    for _ in 0..3 {
        h.start(&["a"], None);
    }

    let err = h.orchestrator.start_build(&request(&["b"], None)).unwrap_err();
    assert_eq!(err.code(), "CAPACITY_EXCEEDED");
    assert_eq!(h.orchestrator.list_builds().len(), 3);
    assert_eq!(h.orchestrator.active_build_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_output_names_never_register() {
    let h = Harness::new(fast_config());
    for name in ["../etc", "a/b/c", "x\\y", "%2e%2e%2f", "abc\u{7}"] {
        let err = h
            .orchestrator
            .start_build(&request(&["a"], Some(name)))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)), "{name}");
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.orchestrator.list_builds().is_empty());
    assert_eq!(h.provisioner.create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_completion_claim_without_artifact_fails() {
    let h = Harness::new(fast_config());
    let id = h.start(&["a"], None);
    h.wait_running(&id).await;

    h.store.put_json(h.status_key(&id), status_blob("complete", 100, "done"));

    // Still running during the grace period.
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_ne!(h.snapshot(&id).await.status, BuildStatus::Complete);

    let failed = h.wait_for(&id, BuildStatus::Failed, Duration::from_secs(120)).await;
    let error = failed.error.unwrap();
    assert!(error.contains("marked complete"), "{error}");
    assert!(error.contains("missing"), "{error}");
    assert_eq!(failed.artifact_name, None);
    assert!(h.provisioner.was_destroyed(&id));
}

#[tokio::test(start_paused = true)]
async fn test_artifact_appearing_within_grace_period_completes() {
    let h = Harness::new(fast_config());
    let id = h.start(&["a"], Some("late upload"));
    h.wait_running(&id).await;

    h.store.put_json(h.status_key(&id), status_blob("complete", 100, "done"));
    tokio::time::sleep(Duration::from_secs(15)).await;
    let name = format!("late-upload-{}", prefix(&id));
    h.store.put_artifact(h.artifact_key(&name));

    let done = h.wait_for(&id, BuildStatus::Complete, Duration::from_secs(120)).await;
    assert_eq!(done.artifact_name, Some(name));
}

#[tokio::test(start_paused = true)]
async fn test_static_progress_stalls() {
    let h = Harness::new(fast_config().with_stalled_threshold_minutes(30));
    let id = h.start(&["a"], None);
    h.store.put_json(h.status_key(&id), status_blob("downloading", 40, "Pulling images"));
    h.wait_running(&id).await;

    tokio::time::sleep(Duration::from_secs(20 * 60)).await;
    let snapshot = h.snapshot(&id).await;
    assert_eq!(snapshot.status, BuildStatus::Running);
    assert_eq!(snapshot.progress, 40);

    let failed = h.wait_for(&id, BuildStatus::Failed, Duration::from_secs(20 * 60)).await;
    let error = failed.error.unwrap();
    assert!(error.contains("stalled"), "{error}");
    assert!(error.contains("downloading"), "{error}");
    assert!(h.provisioner.was_destroyed(&id));
}

#[tokio::test(start_paused = true)]
async fn test_late_blob_progress_below_estimate_is_not_a_stall() {
    let h = Harness::new(fast_config().with_stalled_threshold_minutes(30));
    let id = h.start(&["a"], None);
    h.wait_running(&id).await;

    // The time-based estimate reaches its cap before the remote reports.
    tokio::time::sleep(Duration::from_secs(20 * 60)).await;
    assert_eq!(h.snapshot(&id).await.progress, super::HEURISTIC_CAP);

    for progress in [30, 40, 50, 60, 70, 80] {
        h.store.put_json(h.status_key(&id), status_blob("installing images", progress, "working"));
        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
    }

    let snapshot = h.snapshot(&id).await;
    assert_eq!(snapshot.status, BuildStatus::Running, "{:?}", snapshot.error);
    assert_eq!(snapshot.progress, super::HEURISTIC_CAP);

    // Once the remote stops moving the stall clock runs again.
    let failed = h.wait_for(&id, BuildStatus::Failed, Duration::from_secs(40 * 60)).await;
    assert!(failed.error.unwrap().contains("stalled"));
}

#[tokio::test(start_paused = true)]
async fn test_progress_never_decreases() {
    let h = Harness::new(fast_config());
    let id = h.start(&["a"], None);
    h.wait_running(&id).await;

    let mut observed = Vec::new();
    for (progress, stage) in [(50, "installing images"), (30, "downloading"), (45, "installing images"), (70, "assembling artifact")] {
        h.store.put_json(h.status_key(&id), status_blob(stage, progress, stage));
        tokio::time::sleep(Duration::from_secs(20)).await;
        observed.push(h.snapshot(&id).await.progress);
    }

    assert_eq!(observed, vec![50, 50, 50, 70]);
    assert!(observed.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test(start_paused = true)]
async fn test_heuristic_progress_before_first_blob() {
    let h = Harness::new(fast_config());
    let id = h.start(&["a"], None);
    h.wait_running(&id).await;

    // Estimate is 16 minutes; well past it the heuristic stays capped.
    tokio::time::sleep(Duration::from_secs(8 * 60)).await;
    let midway = h.snapshot(&id).await;
    assert!(midway.progress > 20 && midway.progress < 85, "{}", midway.progress);

    tokio::time::sleep(Duration::from_secs(12 * 60)).await;
    let late = h.snapshot(&id).await;
    assert_eq!(late.progress, super::HEURISTIC_CAP);
    assert_eq!(late.status, BuildStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn test_resource_stop_with_artifact_completes() {
    let h = Harness::new(fast_config());
    let id = h.start(&["a"], None);
    h.wait_running(&id).await;

    let name = format!("custom-image-{}", prefix(&id));
    h.store.put_artifact(h.artifact_key(&name));
    h.provisioner.set_state(&id, ResourceState::Stopped);

    let done = h.wait_for(&id, BuildStatus::Complete, Duration::from_secs(60)).await;
    assert_eq!(done.artifact_name, Some(name));
}

#[tokio::test(start_paused = true)]
async fn test_resource_stop_without_artifact_fails() {
    let h = Harness::new(fast_config());
    let id = h.start(&["a"], None);
    h.wait_running(&id).await;

    h.provisioner.set_state(&id, ResourceState::Terminated);

    let failed = h.wait_for(&id, BuildStatus::Failed, Duration::from_secs(120)).await;
    assert!(failed.error.unwrap().contains("no artifact found"));
}

#[tokio::test(start_paused = true)]
async fn test_remote_reported_failure() {
    let h = Harness::new(fast_config());
    let id = h.start(&["a"], None);
    h.wait_running(&id).await;

    h.store.put_json(
        h.status_key(&id),
        json!({"stage": "failed", "progress": 35, "message": "disk full", "timestamp": "2024-01-01T00:00:00Z"}),
    );

    let failed = h.wait_for(&id, BuildStatus::Failed, Duration::from_secs(60)).await;
    assert!(failed.error.unwrap().contains("disk full"));
    assert!(h.provisioner.was_destroyed(&id));
    // The blob is kept so a restarted process can still report the failure.
    assert!(h.store.contains(&h.status_key(&id)));
}

#[tokio::test(start_paused = true)]
async fn test_resource_vanishing_is_fatal() {
    let h = Harness::new(fast_config());
    let id = h.start(&["a"], None);
    h.wait_running(&id).await;

    h.provisioner.vanish(&id);
    let failed = h.wait_for(&id, BuildStatus::Failed, Duration::from_secs(60)).await;
    assert!(failed.error.unwrap().contains("vanished"));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_distinct_from_stall() {
    let config = fast_config()
        .with_build_timeout_hours(0.5)
        .with_stalled_threshold_minutes(600);
    let h = Harness::new(config);
    let id = h.start(&["a"], None);
    h.wait_running(&id).await;

    let failed = h.wait_for(&id, BuildStatus::Failed, Duration::from_secs(3600)).await;
    let error = failed.error.unwrap();
    assert!(error.contains("maximum duration"), "{error}");
    assert!(!error.contains("stalled"));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cuts_grace_period_short() {
    let config = fast_config()
        .with_build_timeout_hours(0.5)
        .with_stalled_threshold_minutes(600)
        .with_artifact_grace_period_secs(3600);
    let h = Harness::new(config);
    let id = h.start(&["a"], None);
    h.wait_running(&id).await;
    let running_at = tokio::time::Instant::now();

    tokio::time::sleep(Duration::from_secs(25 * 60)).await;
    h.store.put_json(h.status_key(&id), status_blob("complete", 100, "done"));

    let failed = h.wait_for(&id, BuildStatus::Failed, Duration::from_secs(10 * 60)).await;
    assert!(failed.error.unwrap().contains("maximum duration"));
    assert!(running_at.elapsed() <= Duration::from_secs(31 * 60));

    // An artifact landing after the deadline does not revive the build.
    h.store.put_artifact(h.artifact_key(&format!("custom-image-{}", prefix(&id))));
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(h.snapshot(&id).await.status, BuildStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_provisioning_errors() {
    let h = Harness::new(fast_config());

    h.provisioner
        .fail_next_create(RemoteError::fatal("provisioner.create", "quota exceeded"));
    let fatal = h.start(&["a"], None);
    let failed = h.wait_for(&fatal, BuildStatus::Failed, Duration::from_secs(60)).await;
    assert!(failed.error.unwrap().contains("quota exceeded"));
    assert_eq!(h.provisioner.create_calls(), 1);

    h.provisioner
        .fail_next_create(RemoteError::from_status("provisioner.create", 503, "busy"));
    let retried = h.start(&["a"], None);
    h.wait_running(&retried).await;
    assert_eq!(h.provisioner.create_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_state_query_failure_skips_tick() {
    let h = Harness::new(fast_config());
    let id = h.start(&["a"], None);
    h.wait_running(&id).await;

    for _ in 0..3 {
        h.provisioner
            .fail_next_get_state(RemoteError::transient("provisioner.get_state", "reset"));
    }
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.snapshot(&id).await.status, BuildStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_build() {
    let h = Harness::new(fast_config());
    let id = h.start(&["a"], None);
    h.wait_running(&id).await;

    h.orchestrator.cancel_build(&id, "operator request").unwrap();
    let failed = h.wait_for(&id, BuildStatus::Failed, Duration::from_secs(10)).await;
    assert_eq!(failed.error.as_deref(), Some("Build cancelled: operator request"));
    assert!(h.provisioner.was_destroyed(&id));

    assert!(matches!(
        h.orchestrator.cancel_build(&id, "again"),
        Err(OrchestratorError::InvalidState { .. })
    ));
    assert!(matches!(
        h.orchestrator.cancel_build("missing", "x"),
        Err(OrchestratorError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_detaches_without_touching_builds() {
    let h = Harness::new(fast_config());
    let id = h.start(&["a"], None);
    h.wait_running(&id).await;

    h.orchestrator.shutdown();
    assert!(h.orchestrator.is_shut_down());
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(h.snapshot(&id).await.status, BuildStatus::Running);
    assert!(h.provisioner.destroyed().is_empty());
    assert!(matches!(
        h.orchestrator.start_build(&request(&["a"], None)),
        Err(OrchestratorError::ShuttingDown)
    ));

    // No pipeline is left to release the resource, so cancelling is refused.
    assert!(matches!(
        h.orchestrator.cancel_build(&id, "late"),
        Err(OrchestratorError::ShuttingDown)
    ));
    assert_eq!(h.snapshot(&id).await.status, BuildStatus::Running);
    assert!(!h.provisioner.was_destroyed(&id));
}

#[tokio::test(start_paused = true)]
async fn test_reconciles_unknown_build_from_blob() {
    let h = Harness::new(fast_config());
    let id = "5c8a2f10-1111-4222-8333-444455556666";
    h.store.put_json(
        h.status_key(id),
        json!({"stage": "complete", "progress": 100, "message": "done", "output_name": "demo-1"}),
    );

    let snapshot = h.orchestrator.get_build_status(id).await.unwrap();
    assert_eq!(snapshot.status, BuildStatus::Complete);
    assert_eq!(snapshot.artifact_name.as_deref(), Some("demo-1-5c8a2f10"));
    assert!(snapshot.reconciled);

    assert!(h.orchestrator.get_build_status("00000000-0000-4000-8000-000000000000").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_auto_cleanup_disabled_keeps_resource() {
    let h = Harness::new(fast_config().with_auto_cleanup(false));
    let id = h.start(&["a"], None);
    h.wait_running(&id).await;

    h.store.put_artifact(h.artifact_key(&format!("custom-image-{}", prefix(&id))));
    h.store.put_json(h.status_key(&id), status_blob("complete", 100, "done"));

    h.wait_for(&id, BuildStatus::Complete, Duration::from_secs(60)).await;
    assert!(!h.provisioner.was_destroyed(&id));
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_failure_does_not_change_outcome() {
    let h = Harness::new(fast_config());
    let id = h.start(&["a"], None);
    h.wait_running(&id).await;

    for _ in 0..3 {
        h.provisioner
            .fail_next_destroy(RemoteError::transient("provisioner.destroy", "timeout"));
    }
    h.store.put_artifact(h.artifact_key(&format!("custom-image-{}", prefix(&id))));
    h.store.put_json(h.status_key(&id), status_blob("complete", 100, "done"));

    let done = h.wait_for(&id, BuildStatus::Complete, Duration::from_secs(60)).await;
    assert!(done.log.iter().any(|e| e.message.starts_with("Failed to destroy")));
    assert_eq!(h.events.events_of_type(BuildEventType::CleanupFailed).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_stops_on_shutdown() {
    let h = Harness::new(fast_config());
    let sweeper = h.orchestrator.spawn_sweeper();
    tokio::time::sleep(Duration::from_secs(7200)).await;
    assert!(!sweeper.is_finished());

    h.orchestrator.shutdown();
    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .unwrap()
        .unwrap();
}
