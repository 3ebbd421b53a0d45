//! Build lifecycle events.
//!
//! The orchestrator reports every lifecycle step to an [`EventSink`]. Sinks
//! must never block the pipeline; the default is [`NoOpEventSink`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of build lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildEventType {
    /// The build was accepted and registered.
    #[serde(rename = "build.queued")]
    Queued,
    /// Resource creation started.
    #[serde(rename = "build.provisioning")]
    Provisioning,
    /// The resource exists and polling started.
    #[serde(rename = "build.running")]
    Running,
    /// Observed progress changed.
    #[serde(rename = "build.progress")]
    Progress,
    /// The artifact was verified and the build completed.
    #[serde(rename = "build.completed")]
    Completed,
    /// The build failed.
    #[serde(rename = "build.failed")]
    Failed,
    /// Cleanup of a remote resource or blob failed.
    #[serde(rename = "build.cleanup_failed")]
    CleanupFailed,
}

impl BuildEventType {
    /// Returns the dotted event name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "build.queued",
            Self::Provisioning => "build.provisioning",
            Self::Running => "build.running",
            Self::Progress => "build.progress",
            Self::Completed => "build.completed",
            Self::Failed => "build.failed",
            Self::CleanupFailed => "build.cleanup_failed",
        }
    }
}

impl fmt::Display for BuildEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildEvent {
    /// Event kind.
    #[serde(rename = "type")]
    pub event_type: BuildEventType,
    /// Build the event concerns.
    pub build_id: String,
    /// When the event was produced (ISO 8601).
    pub timestamp: String,
    /// Event-specific fields.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl BuildEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(event_type: BuildEventType, build_id: impl Into<String>) -> Self {
        Self {
            event_type,
            build_id: build_id.into(),
            timestamp: crate::utils::iso_timestamp(),
            data: serde_json::Value::Null,
        }
    }

    /// Attaches event data.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
