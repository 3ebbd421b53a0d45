//! Orchestrator configuration.
//!
//! Every field has a serde default so a config file only needs to name the
//! values it changes:
//!
//! ```
//! use imageforge::config::OrchestratorConfig;
//!
//! let config = OrchestratorConfig::from_json_str(r#"{"max_concurrent_builds": 2}"#).unwrap();
//! assert_eq!(config.max_concurrent_builds, 2);
//! assert_eq!(config.poll_interval_secs, 10);
//! ```

mod catalog;

pub use catalog::{Catalog, VariantSpec};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::estimate::EstimateConfig;
use crate::observability::LoggingConfig;
use crate::retry::RetryConfig;

/// Upper bound for hour-valued settings (one year).
pub const MAX_HOURS: f64 = 8760.0;

/// Object-key layout inside the artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    /// Prefix of status blob keys.
    #[serde(default = "default_status_prefix")]
    pub status_prefix: String,
    /// Prefix of artifact keys.
    #[serde(default = "default_artifact_prefix")]
    pub artifact_prefix: String,
    /// Artifact file extension, without the dot.
    #[serde(default = "default_artifact_extension")]
    pub artifact_extension: String,
}

fn default_status_prefix() -> String {
    "status/".to_string()
}

fn default_artifact_prefix() -> String {
    "images/".to_string()
}

fn default_artifact_extension() -> String {
    "iso".to_string()
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            status_prefix: default_status_prefix(),
            artifact_prefix: default_artifact_prefix(),
            artifact_extension: default_artifact_extension(),
        }
    }
}

impl StorageLayout {
    /// Key of the status blob for a build.
    #[must_use]
    pub fn status_key(&self, build_id: &str) -> String {
        format!("{}{build_id}.json", self.status_prefix)
    }

    /// Key of the artifact with the given name.
    #[must_use]
    pub fn artifact_key(&self, artifact_name: &str) -> String {
        format!("{}{artifact_name}.{}", self.artifact_prefix, self.artifact_extension)
    }
}

/// Configuration for the build orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum simultaneously non-terminal builds (K).
    #[serde(default = "default_max_concurrent_builds")]
    pub max_concurrent_builds: usize,
    /// Maximum builds held in memory (M).
    #[serde(default = "default_max_builds_in_memory")]
    pub max_builds_in_memory: usize,
    /// Terminal builds older than this are swept.
    #[serde(default = "default_build_ttl_hours")]
    pub build_ttl_hours: f64,
    /// How often the TTL sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Delay between polls of a running build.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Minutes without progress change before a build is declared stalled.
    #[serde(default = "default_stalled_threshold_minutes")]
    pub stalled_threshold_minutes: u64,
    /// Upper bound on the running phase.
    #[serde(default = "default_build_timeout_hours")]
    pub build_timeout_hours: f64,
    /// Wait before re-checking a missing artifact.
    #[serde(default = "default_artifact_grace_period_secs")]
    pub artifact_grace_period_secs: u64,
    /// Destroy the compute resource after a successful build.
    #[serde(default = "default_auto_cleanup")]
    pub auto_cleanup: bool,
    /// Maximum components per request.
    #[serde(default = "default_max_components")]
    pub max_components: usize,
    /// Maximum variants per request.
    #[serde(default = "default_max_variants")]
    pub max_variants: usize,
    /// Maximum log lines kept per build.
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,
    /// Artifact base name when the request has no output name.
    #[serde(default = "default_output_name")]
    pub default_output_name: String,
    /// Whitelist of components and variants.
    #[serde(default)]
    pub catalog: Catalog,
    /// Estimation coefficients.
    #[serde(default)]
    pub estimate: EstimateConfig,
    /// Retry policy for remote calls.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Artifact store key layout.
    #[serde(default)]
    pub storage: StorageLayout,
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_max_concurrent_builds() -> usize {
    3
}

fn default_max_builds_in_memory() -> usize {
    100
}

fn default_build_ttl_hours() -> f64 {
    24.0
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_stalled_threshold_minutes() -> u64 {
    30
}

fn default_build_timeout_hours() -> f64 {
    4.0
}

fn default_artifact_grace_period_secs() -> u64 {
    30
}

fn default_auto_cleanup() -> bool {
    true
}

fn default_max_components() -> usize {
    200
}

fn default_max_variants() -> usize {
    20
}

fn default_max_log_entries() -> usize {
    500
}

fn default_output_name() -> String {
    "custom-image".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_builds: default_max_concurrent_builds(),
            max_builds_in_memory: default_max_builds_in_memory(),
            build_ttl_hours: default_build_ttl_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            stalled_threshold_minutes: default_stalled_threshold_minutes(),
            build_timeout_hours: default_build_timeout_hours(),
            artifact_grace_period_secs: default_artifact_grace_period_secs(),
            auto_cleanup: default_auto_cleanup(),
            max_components: default_max_components(),
            max_variants: default_max_variants(),
            max_log_entries: default_max_log_entries(),
            default_output_name: default_output_name(),
            catalog: Catalog::default(),
            estimate: EstimateConfig::default(),
            retry: RetryConfig::default(),
            storage: StorageLayout::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Checks ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_builds == 0 {
            return Err(ConfigError::invalid("max_concurrent_builds", "must be at least 1"));
        }
        if self.max_builds_in_memory < self.max_concurrent_builds {
            return Err(ConfigError::invalid(
                "max_builds_in_memory",
                format!(
                    "must be at least max_concurrent_builds ({})",
                    self.max_concurrent_builds
                ),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::invalid("poll_interval_secs", "must be at least 1"));
        }
        if self.stalled_threshold_minutes == 0 {
            return Err(ConfigError::invalid("stalled_threshold_minutes", "must be at least 1"));
        }
        validate_hours("build_timeout_hours", self.build_timeout_hours)?;
        validate_hours("build_ttl_hours", self.build_ttl_hours)?;
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.max_log_entries == 0 {
            return Err(ConfigError::invalid("max_log_entries", "must be at least 1"));
        }
        crate::validation::validate_output_name(&self.default_output_name)
            .map_err(|e| ConfigError::invalid("default_output_name", e.to_string()))?;
        Ok(())
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_max_concurrent_builds(mut self, limit: usize) -> Self {
        self.max_concurrent_builds = limit;
        self
    }

    /// Sets the in-memory build bound.
    #[must_use]
    pub fn with_max_builds_in_memory(mut self, limit: usize) -> Self {
        self.max_builds_in_memory = limit;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    /// Sets the stall threshold.
    #[must_use]
    pub fn with_stalled_threshold_minutes(mut self, minutes: u64) -> Self {
        self.stalled_threshold_minutes = minutes;
        self
    }

    /// Sets the build timeout.
    #[must_use]
    pub fn with_build_timeout_hours(mut self, hours: f64) -> Self {
        self.build_timeout_hours = hours;
        self
    }

    /// Sets the artifact grace period.
    #[must_use]
    pub fn with_artifact_grace_period_secs(mut self, secs: u64) -> Self {
        self.artifact_grace_period_secs = secs;
        self
    }

    /// Sets whether successful builds release their resource.
    #[must_use]
    pub fn with_auto_cleanup(mut self, enabled: bool) -> Self {
        self.auto_cleanup = enabled;
        self
    }

    /// Sets the catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Gets the poll interval as Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Gets the stall threshold as Duration.
    #[must_use]
    pub fn stalled_threshold(&self) -> Duration {
        Duration::from_secs(self.stalled_threshold_minutes * 60)
    }

    /// Gets the build timeout as Duration.
    #[must_use]
    pub fn build_timeout(&self) -> Duration {
        hours_to_duration(self.build_timeout_hours)
    }

    /// Gets the artifact grace period as Duration.
    #[must_use]
    pub fn artifact_grace_period(&self) -> Duration {
        Duration::from_secs(self.artifact_grace_period_secs)
    }

    /// Gets the build TTL as Duration.
    #[must_use]
    pub fn build_ttl(&self) -> Duration {
        hours_to_duration(self.build_ttl_hours)
    }

    /// Gets the sweep interval as Duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn validate_hours(field: &str, hours: f64) -> Result<(), ConfigError> {
    if !(hours.is_finite() && hours > 0.0) {
        return Err(ConfigError::invalid(field, "must be a positive number"));
    }
    if hours > MAX_HOURS {
        return Err(ConfigError::invalid(field, format!("must not exceed {MAX_HOURS} hours")));
    }
    Ok(())
}

/// Converts hours to a duration, clamped to `0..=MAX_HOURS` so unvalidated
/// values never overflow.
fn hours_to_duration(hours: f64) -> Duration {
    let hours = if hours.is_nan() { 0.0 } else { hours.clamp(0.0, MAX_HOURS) };
    Duration::from_secs_f64(hours * 3600.0)
}
