//! Server-side whitelist of selectable components and variants.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A selectable variant (a container image preloaded into the artifact).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSpec {
    /// Approximate download size in gigabytes, used for estimation.
    #[serde(default)]
    pub size_gb: f64,
    /// Short description shown to clients.
    #[serde(default)]
    pub description: String,
}

impl VariantSpec {
    /// Creates a variant spec with the given size.
    #[must_use]
    pub fn new(size_gb: f64) -> Self {
        Self {
            size_gb,
            description: String::new(),
        }
    }
}

/// The whitelist every request is checked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Component names.
    #[serde(default)]
    pub components: BTreeSet<String>,
    /// Variant names (`name:tag`) and their metadata.
    #[serde(default)]
    pub variants: BTreeMap<String, VariantSpec>,
}

impl Default for Catalog {
    fn default() -> Self {
        let components = [
            "base",
            "networking",
            "ssh",
            "docker",
            "desktop",
            "dev-tools",
            "monitoring",
            "firmware",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let variants = [
            ("nginx:latest", 0.2),
            ("postgres:16", 0.4),
            ("redis:7", 0.1),
            ("python:3.12-slim", 0.15),
            ("node:20-alpine", 0.05),
        ]
        .into_iter()
        .map(|(name, size)| (name.to_string(), VariantSpec::new(size)))
        .collect();

        Self { components, variants }
    }
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            components: BTreeSet::new(),
            variants: BTreeMap::new(),
        }
    }

    /// Adds a component.
    #[must_use]
    pub fn with_component(mut self, name: impl Into<String>) -> Self {
        self.components.insert(name.into());
        self
    }

    /// Adds a variant.
    #[must_use]
    pub fn with_variant(mut self, name: impl Into<String>, size_gb: f64) -> Self {
        self.variants.insert(name.into(), VariantSpec::new(size_gb));
        self
    }

    /// Returns true if the component is offered.
    #[must_use]
    pub fn has_component(&self, name: &str) -> bool {
        self.components.contains(name)
    }

    /// Returns the variant spec if offered.
    #[must_use]
    pub fn variant(&self, name: &str) -> Option<&VariantSpec> {
        self.variants.get(name)
    }
}
