//! Advisory build-duration model.
//!
//! The estimate only feeds the client-facing ETA and the time-based progress
//! fallback used before the remote side writes its first status blob.

use serde::{Deserialize, Serialize};

use crate::config::Catalog;
use crate::core::BuildConfig;

/// Coefficients of the additive duration model, in minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateConfig {
    /// Fixed cost of every build.
    #[serde(default = "default_base_minutes")]
    pub base_minutes: f64,
    /// Cost per selected component.
    #[serde(default = "default_per_component_minutes")]
    pub per_component_minutes: f64,
    /// Cost per selected variant.
    #[serde(default = "default_per_variant_minutes")]
    pub per_variant_minutes: f64,
    /// Cost per gigabyte of selected variants.
    #[serde(default = "default_per_gb_minutes")]
    pub per_gb_minutes: f64,
}

fn default_base_minutes() -> f64 {
    15.0
}

fn default_per_component_minutes() -> f64 {
    0.5
}

fn default_per_variant_minutes() -> f64 {
    2.0
}

fn default_per_gb_minutes() -> f64 {
    1.5
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            base_minutes: default_base_minutes(),
            per_component_minutes: default_per_component_minutes(),
            per_variant_minutes: default_per_variant_minutes(),
            per_gb_minutes: default_per_gb_minutes(),
        }
    }
}

/// Estimates the build duration in whole minutes, rounded up.
///
/// Variants missing from the catalog contribute their fixed cost only.
#[must_use]
pub fn estimate_minutes(config: &BuildConfig, catalog: &Catalog, model: &EstimateConfig) -> u32 {
    let size_gb: f64 = config
        .variants
        .iter()
        .filter_map(|name| catalog.variant(name))
        .map(|spec| spec.size_gb.max(0.0))
        .sum();

    #[allow(clippy::cast_precision_loss)]
    let total = model.base_minutes
        + model.per_component_minutes * config.components.len() as f64
        + model.per_variant_minutes * config.variants.len() as f64
        + model.per_gb_minutes * size_gb;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let minutes = total.max(1.0).ceil() as u32;
    minutes
}
