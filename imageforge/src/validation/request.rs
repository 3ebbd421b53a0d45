//! Build-request validation.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::LazyLock;

use super::output_name::validate_output_name;
use crate::config::{Catalog, OrchestratorConfig};
use crate::core::{BuildConfig, BuildOptions};
use crate::errors::ValidationError;

const MAX_COMPONENT_NAME_LEN: usize = 64;
const MAX_VARIANT_NAME_LEN: usize = 256;
const MAX_DISPLAYED_NAME_LEN: usize = 64;

const COMPONENT_ALLOWED: &str = "lowercase letters, digits and hyphens";
const VARIANT_ALLOWED: &str = "'name:tag' with lowercase names and [A-Za-z0-9._-] tags";

static COMPONENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("component pattern compiles"));

static VARIANT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9._/-]*:[A-Za-z0-9][A-Za-z0-9._-]*$").expect("variant pattern compiles")
});

/// List-size limits applied before any per-item work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    /// Maximum number of components.
    pub max_components: usize,
    /// Maximum number of variants.
    pub max_variants: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for RequestLimits {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_components: config.max_components,
            max_variants: config.max_variants,
        }
    }
}

/// Checks a component name against the safe-character pattern.
pub fn validate_component_name(name: &str) -> Result<(), ValidationError> {
    if name.len() > MAX_COMPONENT_NAME_LEN || !COMPONENT_PATTERN.is_match(name) {
        return Err(ValidationError::InvalidName {
            kind: "component",
            name: display_name(name),
            allowed: COMPONENT_ALLOWED,
        });
    }
    Ok(())
}

/// Checks a variant name against the `name:tag` pattern.
pub fn validate_variant_name(name: &str) -> Result<(), ValidationError> {
    if name.len() > MAX_VARIANT_NAME_LEN || name.contains("..") || !VARIANT_PATTERN.is_match(name) {
        return Err(ValidationError::InvalidName {
            kind: "variant",
            name: display_name(name),
            allowed: VARIANT_ALLOWED,
        });
    }
    Ok(())
}

/// Validates an untyped build request and returns the typed configuration.
///
/// Every name must pass its pattern and be present in `catalog`; nothing
/// outside the catalog is ever returned.
pub fn validate_request(
    request: &Value,
    catalog: &Catalog,
    limits: &RequestLimits,
) -> Result<BuildConfig, ValidationError> {
    let object = request.as_object().ok_or(ValidationError::NotAnObject)?;

    let components = match object.get("components") {
        None | Some(Value::Null) => return Err(ValidationError::MissingComponents),
        Some(value) => string_list(value, "components", limits.max_components)?,
    };
    if components.is_empty() {
        return Err(ValidationError::EmptyComponents);
    }

    let variants = match object.get("variants") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => string_list(value, "variants", limits.max_variants)?,
    };

    let mut seen = HashSet::with_capacity(components.len());
    for name in &components {
        validate_component_name(name)?;
        if !catalog.has_component(name) {
            return Err(ValidationError::NotWhitelisted {
                kind: "component",
                name: display_name(name),
            });
        }
        if !seen.insert(name.as_str()) {
            return Err(ValidationError::Duplicate {
                kind: "component",
                name: name.clone(),
            });
        }
    }

    let mut seen = HashSet::with_capacity(variants.len());
    for name in &variants {
        validate_variant_name(name)?;
        if catalog.variant(name).is_none() {
            return Err(ValidationError::NotWhitelisted {
                kind: "variant",
                name: display_name(name),
            });
        }
        if !seen.insert(name.as_str()) {
            return Err(ValidationError::Duplicate {
                kind: "variant",
                name: name.clone(),
            });
        }
    }

    let options = match object.get("options") {
        None | Some(Value::Null) => BuildOptions::default(),
        Some(Value::Object(map)) => parse_options(map)?,
        Some(_) => {
            return Err(ValidationError::WrongType {
                field: "options".to_string(),
                expected: "an object of boolean flags",
            })
        }
    };

    let output_name = match object.get("outputName") {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) => {
            validate_output_name(name)?;
            Some(name.clone())
        }
        Some(_) => {
            return Err(ValidationError::WrongType {
                field: "outputName".to_string(),
                expected: "a string",
            })
        }
    };

    Ok(BuildConfig {
        components,
        variants,
        options,
        output_name,
    })
}

/// Extracts a list of strings, enforcing `max` before looking at any element.
fn string_list(value: &Value, field: &str, max: usize) -> Result<Vec<String>, ValidationError> {
    let wrong_type = || ValidationError::WrongType {
        field: field.to_string(),
        expected: "an array of strings",
    };

    let items = value.as_array().ok_or_else(wrong_type)?;
    if items.len() > max {
        return Err(ValidationError::TooMany {
            field: field.to_string(),
            count: items.len(),
            max,
        });
    }

    items
        .iter()
        .map(|item| item.as_str().map(str::to_string).ok_or_else(wrong_type))
        .collect()
}

fn parse_options(map: &Map<String, Value>) -> Result<BuildOptions, ValidationError> {
    let mut options = BuildOptions::default();
    for (name, value) in map {
        let Some(flag) = value.as_bool() else {
            return Err(ValidationError::InvalidOption {
                name: display_name(name),
                reason: "must be a boolean".to_string(),
            });
        };
        if !options.set(name, flag) {
            return Err(ValidationError::InvalidOption {
                name: display_name(name),
                reason: format!("unknown option, expected one of {}", BuildOptions::FLAGS.join(", ")),
            });
        }
    }
    Ok(options)
}

/// Escapes and truncates a user-supplied name for error messages.
fn display_name(name: &str) -> String {
    let truncated: String = name.chars().take(MAX_DISPLAYED_NAME_LEN).collect();
    truncated.escape_debug().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn catalog() -> Catalog {
        Catalog::empty()
            .with_component("a")
            .with_component("b")
            .with_component("dev-tools")
            .with_variant("redis:7", 0.1)
            .with_variant("library/nginx:1.25", 0.2)
    }

    fn validate(request: Value) -> Result<BuildConfig, ValidationError> {
        validate_request(&request, &catalog(), &RequestLimits::default())
    }

    #[test]
    fn test_minimal_request() {
        let config = validate(json!({"components": ["a", "b"]})).unwrap();
        assert_eq!(config.components, vec!["a", "b"]);
        assert!(config.variants.is_empty());
        assert_eq!(config.options, BuildOptions::default());
        assert_eq!(config.output_name, None);
    }

    #[test]
    fn test_full_request() {
        let config = validate(json!({
            "components": ["dev-tools"],
            "variants": ["redis:7", "library/nginx:1.25"],
            "options": {"sshServer": true, "compress": false},
            "outputName": "demo-1"
        }))
        .unwrap();
        assert_eq!(config.variants.len(), 2);
        assert!(config.options.ssh_server);
        assert!(!config.options.compress);
        assert_eq!(config.output_name.as_deref(), Some("demo-1"));
    }

    #[test]
    fn test_structural_errors() {
        assert_eq!(validate(json!([1, 2])), Err(ValidationError::NotAnObject));
        assert_eq!(validate(json!({})), Err(ValidationError::MissingComponents));
        assert_eq!(validate(json!({"components": []})), Err(ValidationError::EmptyComponents));
        assert!(matches!(
            validate(json!({"components": "a"})),
            Err(ValidationError::WrongType { .. })
        ));
        assert!(matches!(
            validate(json!({"components": ["a", 3]})),
            Err(ValidationError::WrongType { .. })
        ));
        assert!(matches!(
            validate(json!({"components": ["a"], "variants": {"redis": "7"}})),
            Err(ValidationError::WrongType { .. })
        ));
        assert!(matches!(
            validate(json!({"components": ["a"], "outputName": 12})),
            Err(ValidationError::WrongType { .. })
        ));
    }

    #[test]
    fn test_limits_checked_before_items() {
        let limits = RequestLimits {
            max_components: 2,
            max_variants: 1,
        };
        // Items are invalid too; the length error wins.
        let err = validate_request(&json!({"components": [1, 2, 3]}), &catalog(), &limits).unwrap_err();
        assert_eq!(
            err,
            ValidationError::TooMany {
                field: "components".to_string(),
                count: 3,
                max: 2
            }
        );

        let err = validate_request(
            &json!({"components": ["a"], "variants": ["x", "y"]}),
            &catalog(),
            &limits,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::TooMany { count: 2, max: 1, .. }));
    }

    #[test]
    fn test_unsafe_names_rejected() {
        for name in ["A", "-a", "a b", "a;rm -rf", "../a", "a$(x)"] {
            assert!(
                matches!(
                    validate(json!({"components": [name]})),
                    Err(ValidationError::InvalidName { kind: "component", .. })
                ),
                "{name} should be rejected"
            );
        }
        for name in ["redis", "redis:", ":7", "Redis:7", "redis:7;ls", "a/../b:1"] {
            assert!(
                matches!(
                    validate(json!({"components": ["a"], "variants": [name]})),
                    Err(ValidationError::InvalidName { kind: "variant", .. })
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_whitelist_enforced() {
        assert!(matches!(
            validate(json!({"components": ["c"]})),
            Err(ValidationError::NotWhitelisted { kind: "component", .. })
        ));
        assert!(matches!(
            validate(json!({"components": ["a"], "variants": ["redis:6"]})),
            Err(ValidationError::NotWhitelisted { kind: "variant", .. })
        ));
    }

    #[test]
    fn test_duplicates_rejected() {
        assert!(matches!(
            validate(json!({"components": ["a", "b", "a"]})),
            Err(ValidationError::Duplicate { kind: "component", .. })
        ));
        assert!(matches!(
            validate(json!({"components": ["a"], "variants": ["redis:7", "redis:7"]})),
            Err(ValidationError::Duplicate { kind: "variant", .. })
        ));
    }

    #[test]
    fn test_options_validation() {
        assert!(matches!(
            validate(json!({"components": ["a"], "options": {"rootShell": true}})),
            Err(ValidationError::InvalidOption { .. })
        ));
        assert!(matches!(
            validate(json!({"components": ["a"], "options": {"sshServer": "yes"}})),
            Err(ValidationError::InvalidOption { .. })
        ));
        assert!(matches!(
            validate(json!({"components": ["a"], "options": [true]})),
            Err(ValidationError::WrongType { .. })
        ));
    }

    #[test]
    fn test_output_name_errors_surface() {
        let err = validate(json!({"components": ["a"], "outputName": "%2e%2e%2fetc"})).unwrap_err();
        assert_eq!(err.code(), "INVALID_OUTPUT_NAME");
    }

    #[test]
    fn test_display_name_is_escaped_and_truncated() {
        let long = "x".repeat(500);
        assert_eq!(display_name(&long).len(), MAX_DISPLAYED_NAME_LEN);
        assert_eq!(display_name("a\nb"), "a\\nb");
    }
}
