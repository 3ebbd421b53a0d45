//! The build entity and its externally visible snapshot.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use super::BuildStatus;
use crate::utils::{id_prefix, now_utc, Timestamp};

/// Length of the id prefix embedded in artifact names.
pub const ID_PREFIX_LEN: usize = 8;

/// Opaque reference to a provisioned compute resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceHandle(String);

impl ResourceHandle {
    /// Wraps a provider-specific resource name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the provider-specific name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Boolean feature flags a client may toggle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    /// Install and enable an SSH server.
    pub ssh_server: bool,
    /// Install a container runtime and preload the selected variants.
    pub docker_runtime: bool,
    /// Log the default user in on the console.
    pub auto_login: bool,
    /// Compress the output image.
    pub compress: bool,
}

impl BuildOptions {
    /// Flag names accepted in the `options` object.
    pub const FLAGS: [&'static str; 4] = ["sshServer", "dockerRuntime", "autoLogin", "compress"];

    /// Sets a flag by its request name. Returns false for unknown names.
    pub fn set(&mut self, name: &str, value: bool) -> bool {
        let slot = match name {
            "sshServer" => &mut self.ssh_server,
            "dockerRuntime" => &mut self.docker_runtime,
            "autoLogin" => &mut self.auto_login,
            "compress" => &mut self.compress,
            _ => return false,
        };
        *slot = value;
        true
    }
}

/// A validated build request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    /// Selected component names, in request order.
    pub components: Vec<String>,
    /// Selected variant names (`name:tag`).
    #[serde(default)]
    pub variants: Vec<String>,
    /// Feature flags.
    #[serde(default)]
    pub options: BuildOptions,
    /// User-chosen output name, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

/// Computes the artifact name for a build.
///
/// The name is the output name (or `default_name`) with spaces replaced by
/// `-`, followed by the first [`ID_PREFIX_LEN`] characters of the id.
#[must_use]
pub fn artifact_name(output_name: Option<&str>, default_name: &str, id: &str) -> String {
    let base = output_name.unwrap_or(default_name).replace(' ', "-");
    format!("{base}-{}", id_prefix(id))
}

/// A timestamped log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the message was produced (ISO 8601).
    pub timestamp: String,
    /// The message.
    pub message: String,
}

/// Response returned by `start_build`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildAccepted {
    /// The new build id.
    pub id: String,
    /// Always `queued`.
    pub status: BuildStatus,
    /// Advisory duration.
    pub estimated_minutes: u32,
}

/// Point-in-time view of a build returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSnapshot {
    /// Build id.
    pub id: String,
    /// Lifecycle status.
    pub status: BuildStatus,
    /// Progress percentage.
    pub progress: u8,
    /// Current activity label.
    pub stage: String,
    /// Compute resource, once provisioned.
    pub resource_handle: Option<ResourceHandle>,
    /// Artifact name, once complete.
    pub artifact_name: Option<String>,
    /// Store key of the verified artifact.
    pub artifact_key: Option<String>,
    /// Log lines in order.
    pub log: Vec<LogEntry>,
    /// Creation time.
    pub created: Option<Timestamp>,
    /// Last mutation time.
    pub updated: Option<Timestamp>,
    /// Advisory completion time.
    pub estimated_completion: Option<Timestamp>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when synthesized from the status blob instead of the registry.
    #[serde(default)]
    pub reconciled: bool,
}

/// A build tracked by the registry.
///
/// Mutators are no-ops once the build is terminal.
#[derive(Debug, Clone)]
pub struct Build {
    id: String,
    config: BuildConfig,
    status: BuildStatus,
    progress: u8,
    stage: String,
    resource_handle: Option<ResourceHandle>,
    artifact_name: Option<String>,
    artifact_key: Option<String>,
    log: VecDeque<LogEntry>,
    max_log_entries: usize,
    created: Timestamp,
    updated: Timestamp,
    estimated_minutes: u32,
    error: Option<String>,
}

impl Build {
    /// Creates a queued build.
    #[must_use]
    pub fn new(id: impl Into<String>, config: BuildConfig, estimated_minutes: u32, max_log_entries: usize) -> Self {
        let now = now_utc();
        let mut build = Self {
            id: id.into(),
            config,
            status: BuildStatus::Queued,
            progress: 0,
            stage: "queued".to_string(),
            resource_handle: None,
            artifact_name: None,
            artifact_key: None,
            log: VecDeque::new(),
            max_log_entries: max_log_entries.max(1),
            created: now,
            updated: now,
            estimated_minutes,
            error: None,
        };
        build.push_log("Build queued");
        build
    }

    /// Returns the build id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the validated request.
    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Returns the status.
    #[must_use]
    pub fn status(&self) -> BuildStatus {
        self.status
    }

    /// Returns the progress percentage.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Returns the current stage label.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Returns the compute resource handle.
    #[must_use]
    pub fn resource_handle(&self) -> Option<&ResourceHandle> {
        self.resource_handle.as_ref()
    }

    /// Returns the failure description.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns the creation time.
    #[must_use]
    pub fn created(&self) -> Timestamp {
        self.created
    }

    /// Returns the last mutation time.
    #[must_use]
    pub fn updated(&self) -> Timestamp {
        self.updated
    }

    /// Returns the advisory duration in minutes.
    #[must_use]
    pub fn estimated_minutes(&self) -> u32 {
        self.estimated_minutes
    }

    /// Returns the advisory completion time.
    #[must_use]
    pub fn estimated_completion(&self) -> Timestamp {
        self.created + chrono::Duration::minutes(i64::from(self.estimated_minutes))
    }

    /// Returns true if the build is complete or failed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves to a non-terminal status, raising progress to at least `progress`.
    ///
    /// Returns false if the lifecycle order does not allow the move.
    pub fn transition(&mut self, next: BuildStatus, progress: u8, stage: impl Into<String>) -> bool {
        if next.is_terminal() || !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.progress = self.progress.max(progress.min(100));
        self.stage = stage.into();
        self.touch();
        true
    }

    /// Records observed progress. Progress never decreases.
    ///
    /// Returns true if the progress value changed.
    pub fn record_progress(&mut self, progress: u8, stage: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let next = self.progress.max(progress.min(100));
        let changed = next != self.progress;
        self.progress = next;
        self.stage = stage.into();
        self.touch();
        changed
    }

    /// Attaches the compute resource.
    pub fn set_resource_handle(&mut self, handle: ResourceHandle) {
        if self.is_terminal() {
            return;
        }
        self.resource_handle = Some(handle);
        self.touch();
    }

    /// Appends a log line stamped with the current time.
    pub fn push_log(&mut self, message: impl Into<String>) {
        self.push_log_at(crate::utils::iso_timestamp(), message);
    }

    /// Appends a log line with an explicit timestamp.
    pub fn push_log_at(&mut self, timestamp: impl Into<String>, message: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        if self.log.len() >= self.max_log_entries {
            self.log.pop_front();
        }
        self.log.push_back(LogEntry {
            timestamp: timestamp.into(),
            message: message.into(),
        });
        self.touch();
    }

    /// Returns the most recent log line.
    #[must_use]
    pub fn last_log(&self) -> Option<&LogEntry> {
        self.log.back()
    }

    /// Marks the build complete with its verified artifact.
    pub fn complete(&mut self, artifact_name: impl Into<String>, artifact_key: impl Into<String>) -> bool {
        if !self.status.can_transition_to(BuildStatus::Complete) {
            return false;
        }
        self.push_log("Build complete");
        self.status = BuildStatus::Complete;
        self.progress = 100;
        self.stage = "complete".to_string();
        self.artifact_name = Some(artifact_name.into());
        self.artifact_key = Some(artifact_key.into());
        self.touch();
        true
    }

    /// Marks the build failed.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let error = error.into();
        self.push_log(format!("Build failed: {error}"));
        self.status = BuildStatus::Failed;
        self.error = Some(error);
        self.touch();
        true
    }

    /// Returns a serializable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> BuildSnapshot {
        BuildSnapshot {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            stage: self.stage.clone(),
            resource_handle: self.resource_handle.clone(),
            artifact_name: self.artifact_name.clone(),
            artifact_key: self.artifact_key.clone(),
            log: self.log.iter().cloned().collect(),
            created: Some(self.created),
            updated: Some(self.updated),
            estimated_completion: Some(self.estimated_completion()),
            error: self.error.clone(),
            reconciled: false,
        }
    }

    fn touch(&mut self) {
        self.updated = now_utc();
    }
}
