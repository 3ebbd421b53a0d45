//! Status blob written by the remote side.

use serde::{Deserialize, Serialize};

/// Progress record the remote build writes to the artifact store.
///
/// The orchestrator treats it as a hint: progress is clamped to 0..=100 and
/// never allowed to move a build's progress backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBlob {
    /// Stage label, e.g. `installing images` or `complete`.
    pub stage: String,
    /// Progress percentage.
    #[serde(deserialize_with = "deserialize_progress")]
    pub progress: u8,
    /// Latest message.
    #[serde(default)]
    pub message: String,
    /// When the blob was written (ISO 8601).
    #[serde(default)]
    pub timestamp: String,
    /// Output name echoed from the provisioning payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

impl StatusBlob {
    /// Parses a blob from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Returns true if the remote side reports completion.
    #[must_use]
    pub fn reports_complete(&self) -> bool {
        self.progress >= 100 || self.stage.eq_ignore_ascii_case("complete")
    }

    /// Returns true if the remote side reports failure.
    #[must_use]
    pub fn reports_failure(&self) -> bool {
        self.stage.eq_ignore_ascii_case("failed") || self.stage.eq_ignore_ascii_case("error")
    }
}

fn deserialize_progress<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    if raw.is_nan() {
        return Ok(0);
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(raw.clamp(0.0, 100.0) as u8)
}
