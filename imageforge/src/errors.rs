//! Error types for the imageforge orchestrator.
//!
//! Validation and capacity errors surface synchronously from
//! [`crate::orchestrator::BuildOrchestrator::start_build`]. Everything that
//! goes wrong after a build is accepted is captured as a [`BuildFailure`] and
//! only becomes visible through the build's `error` field.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// The main error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The build request failed validation.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The concurrency limit was reached.
    #[error("Build capacity reached: {active} of {limit} builds already active")]
    Capacity {
        /// Builds currently queued, provisioning or running.
        active: usize,
        /// Configured concurrency limit.
        limit: usize,
    },

    /// No build with the given id is known.
    #[error("Build not found: {0}")]
    NotFound(String),

    /// The build exists but cannot accept the requested operation.
    #[error("Build {id} is {status}: {message}")]
    InvalidState {
        /// Build id.
        id: String,
        /// Current status.
        status: String,
        /// What was attempted.
        message: String,
    },

    /// The orchestrator no longer accepts builds.
    #[error("Orchestrator is shutting down")]
    ShuttingDown,

    /// Configuration error.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl OrchestratorError {
    /// Returns a stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.code(),
            Self::Capacity { .. } => "CAPACITY_EXCEEDED",
            Self::NotFound(_) => "BUILD_NOT_FOUND",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Converts to a dictionary representation suitable for an API body.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Self::Capacity { active, limit } = self {
            map.insert("active".to_string(), serde_json::json!(active));
            map.insert("limit".to_string(), serde_json::json!(limit));
        }
        map
    }
}

/// Reasons a build request is rejected before registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The request body is not a JSON object.
    #[error("Build request must be a JSON object")]
    NotAnObject,

    /// The `components` field is absent.
    #[error("Missing required field 'components'")]
    MissingComponents,

    /// A field has the wrong JSON type.
    #[error("Field '{field}' must be {expected}")]
    WrongType {
        /// Field name.
        field: String,
        /// Expected JSON type.
        expected: &'static str,
    },

    /// The `components` list is empty.
    #[error("At least one component must be selected")]
    EmptyComponents,

    /// A list exceeds its configured maximum.
    #[error("Too many {field}: {count} exceeds the maximum of {max}")]
    TooMany {
        /// Field name.
        field: String,
        /// Submitted length.
        count: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A name does not match the safe-character pattern.
    #[error("Invalid {kind} name '{name}': only {allowed} are allowed")]
    InvalidName {
        /// `component` or `variant`.
        kind: &'static str,
        /// The offending name, escaped for display.
        name: String,
        /// Description of the allowed pattern.
        allowed: &'static str,
    },

    /// A name is well-formed but not offered by the catalog.
    #[error("Unknown {kind} '{name}'")]
    NotWhitelisted {
        /// `component` or `variant`.
        kind: &'static str,
        /// The unknown name.
        name: String,
    },

    /// A name appears more than once.
    #[error("Duplicate {kind} '{name}'")]
    Duplicate {
        /// `component` or `variant`.
        kind: &'static str,
        /// The repeated name.
        name: String,
    },

    /// An option flag is unknown or not boolean.
    #[error("Invalid option '{name}': {reason}")]
    InvalidOption {
        /// Option name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The output name is unsafe or malformed.
    #[error("Invalid output name: {0}")]
    OutputName(#[from] OutputNameError),
}

impl ValidationError {
    /// Returns a stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAnObject | Self::WrongType { .. } => "INVALID_REQUEST",
            Self::MissingComponents | Self::EmptyComponents => "NO_COMPONENTS",
            Self::TooMany { .. } => "LIMIT_EXCEEDED",
            Self::InvalidName { .. } => "INVALID_NAME",
            Self::NotWhitelisted { .. } => "UNKNOWN_NAME",
            Self::Duplicate { .. } => "DUPLICATE_NAME",
            Self::InvalidOption { .. } => "INVALID_OPTION",
            Self::OutputName(_) => "INVALID_OUTPUT_NAME",
        }
    }
}

/// Reasons a user-chosen output name is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputNameError {
    /// Length outside the accepted range.
    #[error("length {len} is outside {min}..={max} characters")]
    Length {
        /// Character count.
        len: usize,
        /// Minimum length.
        min: usize,
        /// Maximum length.
        max: usize,
    },

    /// Contains `..`, a path separator or an encoded form of either.
    #[error("path traversal sequences are not allowed")]
    PathTraversal,

    /// Contains a null byte.
    #[error("null bytes are not allowed")]
    NullByte,

    /// Contains control or other non-printable characters.
    #[error("non-printable characters are not allowed")]
    NonPrintable,

    /// Uses a reserved device name.
    #[error("'{0}' is a reserved device name")]
    ReservedName(String),

    /// Contains a run of three or more special characters.
    #[error("runs of 3 or more special characters are not allowed")]
    SpecialCharacterRun,

    /// Contains a character outside the allowed set.
    #[error("character {0:?} is not allowed")]
    ForbiddenCharacter(char),

    /// Starts or ends with whitespace.
    #[error("leading or trailing whitespace is not allowed")]
    Whitespace,
}

/// Classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Network reset, timeout, throttling or a 5xx-class response.
    Transient,
    /// The remote refused the request permanently.
    Fatal,
    /// The remote object does not exist.
    NotFound,
}

/// Error returned by provisioner and artifact store adapters.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed ({kind:?}{}): {message}", .status_code.map(|c| format!(", status {c}")).unwrap_or_default())]
pub struct RemoteError {
    /// Classification used by the retry executor.
    pub kind: RemoteErrorKind,
    /// The remote operation, e.g. `provisioner.create`.
    pub operation: String,
    /// Human-readable detail.
    pub message: String,
    /// HTTP-style status code if the remote reported one.
    pub status_code: Option<u16>,
}

impl RemoteError {
    /// Status codes treated as transient.
    pub const TRANSIENT_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

    /// Creates a transient error.
    #[must_use]
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transient, operation, message)
    }

    /// Creates a fatal error.
    #[must_use]
    pub fn fatal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Fatal, operation, message)
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, operation, message)
    }

    /// Classifies an HTTP-style status code.
    #[must_use]
    pub fn from_status(operation: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        let kind = if status_code == 404 {
            RemoteErrorKind::NotFound
        } else if Self::TRANSIENT_STATUS_CODES.contains(&status_code) {
            RemoteErrorKind::Transient
        } else {
            RemoteErrorKind::Fatal
        };
        Self {
            status_code: Some(status_code),
            ..Self::new(kind, operation, message)
        }
    }

    fn new(kind: RemoteErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation: operation.into(),
            message: message.into(),
            status_code: None,
        }
    }

    /// Returns true if this error is a not-found response.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == RemoteErrorKind::NotFound
    }
}

/// Errors that can be classified as worth retrying.
pub trait Retryable {
    /// Returns true if the same call may succeed when repeated.
    fn is_retryable(&self) -> bool;
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        self.kind == RemoteErrorKind::Transient
    }
}

/// Why an accepted build ended in `failed`.
#[derive(Debug, Clone, Error)]
pub enum BuildFailure {
    /// Resource creation failed after retries.
    #[error("Failed to provision compute resource: {0}")]
    Provisioning(RemoteError),

    /// The resource disappeared while the build was running.
    #[error("Compute resource vanished while build was running")]
    ResourceVanished,

    /// Progress did not change for too long.
    #[error("Build stalled at stage '{stage}' ({progress}%): no progress for {minutes} minutes")]
    Stalled {
        /// Last observed stage.
        stage: String,
        /// Last observed progress.
        progress: u8,
        /// Minutes without change.
        minutes: u64,
    },

    /// The absolute build deadline passed.
    #[error("Build exceeded the maximum duration of {} hours", .limit.as_secs_f64() / 3600.0)]
    Timeout {
        /// Configured limit.
        limit: Duration,
    },

    /// Completion was reported but the artifact is absent.
    #[error("Build marked complete but artifact '{key}' is missing")]
    ArtifactMissing {
        /// Expected artifact key.
        key: String,
    },

    /// The resource shut down without producing the artifact.
    #[error("Compute resource stopped but no artifact found at '{key}' - build likely failed")]
    StoppedWithoutArtifact {
        /// Expected artifact key.
        key: String,
    },

    /// The remote side reported a failure through its status blob.
    #[error("Build failed at stage '{stage}': {message}")]
    RemoteReported {
        /// Stage label from the blob.
        stage: String,
        /// Message from the blob.
        message: String,
    },

    /// The build was cancelled by request.
    #[error("Build cancelled: {0}")]
    Cancelled(String),

    /// An artifact check could not be completed.
    #[error("Could not verify artifact: {0}")]
    Verification(RemoteError),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid JSON for the schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range or inconsistent.
    #[error("Invalid config value for '{field}': {message}")]
    Invalid {
        /// Field name.
        field: String,
        /// What is wrong.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}
