//! Input validation for build requests.
//!
//! Requests arrive as untyped JSON so each structural problem can be reported
//! precisely. Only values that pass every check, including the catalog
//! whitelist, end up in a [`crate::core::BuildConfig`].

mod output_name;
mod request;

pub use output_name::{percent_decode, validate_output_name, MAX_OUTPUT_NAME_LEN, MIN_OUTPUT_NAME_LEN};
pub use request::{validate_component_name, validate_request, validate_variant_name, RequestLimits};
