//! Build status and compute resource state enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Accepted and waiting for its pipeline to start.
    Queued,
    /// A compute resource is being created.
    Provisioning,
    /// The remote side is building; the orchestrator is polling.
    Running,
    /// The artifact was verified in the store.
    Complete,
    /// The build ended without a verified artifact.
    Failed,
}

impl Default for BuildStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl BuildStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Returns true if the build counts against the concurrency limit.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if moving to `next` respects the lifecycle order.
    ///
    /// Any non-terminal status may fail; otherwise statuses only move forward
    /// through `queued -> provisioning -> running -> complete`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Self::Failed) => true,
            (Self::Queued, Self::Provisioning)
            | (Self::Provisioning, Self::Running)
            | (Self::Running, Self::Complete) => true,
            _ => false,
        }
    }
}

/// State of a compute resource as reported by the provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Being created.
    Provisioning,
    /// Created, booting.
    Staging,
    /// Executing its startup payload.
    Running,
    /// Shutting down.
    Stopping,
    /// Shut down; the remote side does this itself when finished.
    Stopped,
    /// Suspended by the platform.
    Suspended,
    /// Deleted or terminated.
    Terminated,
    /// Reported a state this crate does not model.
    Unknown,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Provisioning => "provisioning",
            Self::Staging => "staging",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Suspended => "suspended",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

impl ResourceState {
    /// Returns true if the resource has finished executing.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Terminated)
    }

    /// Parses a provider-specific state label, case-insensitively.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "provisioning" | "pending" | "creating" => Self::Provisioning,
            "staging" | "starting" => Self::Staging,
            "running" => Self::Running,
            "stopping" | "shutting-down" | "suspending" => Self::Stopping,
            "stopped" => Self::Stopped,
            "suspended" => Self::Suspended,
            "terminated" | "deleted" => Self::Terminated,
            _ => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_status_display() {
        assert_eq!(BuildStatus::Queued.to_string(), "queued");
        assert_eq!(BuildStatus::Provisioning.to_string(), "provisioning");
        assert_eq!(BuildStatus::Complete.to_string(), "complete");
    }

    #[test]
    fn test_build_status_is_terminal() {
        assert!(BuildStatus::Complete.is_terminal());
        assert!(BuildStatus::Failed.is_terminal());
        assert!(!BuildStatus::Queued.is_terminal());
        assert!(!BuildStatus::Running.is_terminal());
    }

    #[test]
    fn test_build_status_transitions() {
        assert!(BuildStatus::Queued.can_transition_to(BuildStatus::Provisioning));
        assert!(BuildStatus::Provisioning.can_transition_to(BuildStatus::Running));
        assert!(BuildStatus::Running.can_transition_to(BuildStatus::Complete));
        assert!(BuildStatus::Queued.can_transition_to(BuildStatus::Failed));

        assert!(!BuildStatus::Queued.can_transition_to(BuildStatus::Running));
        assert!(!BuildStatus::Running.can_transition_to(BuildStatus::Provisioning));
        assert!(!BuildStatus::Complete.can_transition_to(BuildStatus::Failed));
        assert!(!BuildStatus::Failed.can_transition_to(BuildStatus::Complete));
    }

    #[test]
    fn test_build_status_serialize() {
        let json = serde_json::to_string(&BuildStatus::Provisioning).unwrap();
        assert_eq!(json, r#""provisioning""#);

        let deserialized: BuildStatus = serde_json::from_str(r#""failed""#).unwrap();
        assert_eq!(deserialized, BuildStatus::Failed);
    }

    #[test]
    fn test_resource_state_from_label() {
        assert_eq!(ResourceState::from_label("RUNNING"), ResourceState::Running);
        assert_eq!(ResourceState::from_label("TERMINATED"), ResourceState::Terminated);
        assert_eq!(ResourceState::from_label("weird"), ResourceState::Unknown);
        assert!(ResourceState::Stopped.is_terminal());
        assert!(!ResourceState::Stopping.is_terminal());
    }
}
