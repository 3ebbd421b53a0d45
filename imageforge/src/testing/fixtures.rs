//! Request and configuration fixtures.

use serde_json::{json, Value};

use crate::config::{Catalog, OrchestratorConfig};
use crate::retry::{JitterStrategy, RetryConfig};

/// Catalog with components `a`, `b`, `base` and variant `redis:7`.
#[must_use]
pub fn sample_catalog() -> Catalog {
    Catalog::empty()
        .with_component("a")
        .with_component("b")
        .with_component("base")
        .with_variant("redis:7", 0.1)
}

/// Default configuration over [`sample_catalog`] with deterministic retries.
#[must_use]
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_catalog(sample_catalog())
        .with_retry(
            RetryConfig::new()
                .with_max_attempts(3)
                .with_base_delay_ms(100)
                .with_max_delay_ms(1_000)
                .with_jitter(JitterStrategy::None),
        )
}

/// A build request for the given components and optional output name.
#[must_use]
pub fn request(components: &[&str], output_name: Option<&str>) -> Value {
    let mut request = json!({ "components": components });
    if let Some(name) = output_name {
        request["outputName"] = json!(name);
    }
    request
}

/// A status blob as the remote side writes it.
#[must_use]
pub fn status_blob(stage: &str, progress: u8, message: &str) -> Value {
    json!({
        "stage": stage,
        "progress": progress,
        "message": message,
        "timestamp": crate::utils::iso_timestamp(),
    })
}
