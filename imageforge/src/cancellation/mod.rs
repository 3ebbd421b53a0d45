//! Cooperative cancellation for build pipelines.
//!
//! Each pipeline task waits on two tokens: its own, cancelled by
//! `cancel_build`, and the orchestrator-wide shutdown token.

mod token;

pub use token::CancellationToken;
