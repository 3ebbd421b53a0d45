//! Progress bookkeeping for the polling loop.

use std::time::Duration;
use tokio::time::Instant;

use crate::core::{LogEntry, StatusBlob};

/// Highest progress the time-based estimate may report.
pub const HEURISTIC_CAP: u8 = 85;

/// Builds at or above this progress are never declared stalled.
pub const STALL_EXEMPT_PROGRESS: u8 = 95;

/// Stage label for a time-based completion percentage.
#[must_use]
pub fn heuristic_stage(percent: f64) -> &'static str {
    match percent {
        p if p < 20.0 => "initializing",
        p if p < 40.0 => "downloading",
        p if p < 60.0 => "installing images",
        p if p < 80.0 => "assembling artifact",
        p if p < 90.0 => "uploading",
        _ => "finalizing",
    }
}

/// Tracks what the polling loop has seen for one build.
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    estimate: Duration,
    stall_threshold: Duration,
    progress: u8,
    stage: String,
    last_change: Instant,
    blob_seen: bool,
    last_blob_progress: Option<u8>,
    last_message: Option<(String, String)>,
}

impl ProgressTracker {
    /// Starts tracking at `now` with the build's current progress.
    #[must_use]
    pub fn new(now: Instant, estimate: Duration, stall_threshold: Duration, progress: u8, stage: impl Into<String>) -> Self {
        Self {
            started: now,
            estimate: estimate.max(Duration::from_secs(1)),
            stall_threshold,
            progress,
            stage: stage.into(),
            last_change: now,
            blob_seen: false,
            last_blob_progress: None,
            last_message: None,
        }
    }

    /// Returns true once any status blob has been observed.
    #[must_use]
    pub fn blob_seen(&self) -> bool {
        self.blob_seen
    }

    /// Returns the last recorded stage.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Returns the last recorded progress.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Time-based progress and stage for a build with no status blob yet.
    #[must_use]
    pub fn heuristic(&self, now: Instant) -> (u8, &'static str) {
        let elapsed = now.saturating_duration_since(self.started);
        let percent = elapsed.as_secs_f64() / self.estimate.as_secs_f64() * 100.0;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let progress = percent.min(f64::from(HEURISTIC_CAP)).max(0.0) as u8;
        (progress, heuristic_stage(percent))
    }

    /// Notes a blob and returns its message if it has not been logged yet.
    ///
    /// A change in the progress the blob reports resets the stall clock,
    /// even when the displayed progress is already higher.
    pub fn observe_blob(&mut self, blob: &StatusBlob, now: Instant) -> Option<LogEntry> {
        self.blob_seen = true;
        if self.last_blob_progress != Some(blob.progress) {
            self.last_blob_progress = Some(blob.progress);
            self.last_change = now;
        }
        if blob.message.is_empty() {
            return None;
        }
        let seen = (blob.timestamp.clone(), blob.message.clone());
        if self.last_message.as_ref() == Some(&seen) {
            return None;
        }
        self.last_message = Some(seen);
        let timestamp = if blob.timestamp.is_empty() {
            crate::utils::iso_timestamp()
        } else {
            blob.timestamp.clone()
        };
        Some(LogEntry {
            timestamp,
            message: blob.message.clone(),
        })
    }

    /// Records the build's progress after an update. Resets the stall clock
    /// when the value changed.
    pub fn record(&mut self, progress: u8, stage: &str, now: Instant) {
        if progress != self.progress {
            self.progress = progress;
            self.last_change = now;
        }
        self.stage = stage.to_string();
    }

    /// Returns how long progress has been static, if that exceeds the
    /// stall threshold.
    #[must_use]
    pub fn stalled_for(&self, now: Instant) -> Option<Duration> {
        if self.progress >= STALL_EXEMPT_PROGRESS {
            return None;
        }
        let idle = now.saturating_duration_since(self.last_change);
        (idle > self.stall_threshold).then_some(idle)
    }
}
