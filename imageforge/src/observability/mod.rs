//! Logging setup and per-build tracing spans.

mod tracing;

pub use self::tracing::{build_span, init_tracing, LogFormat, LoggingConfig, DEFAULT_FILTER};
