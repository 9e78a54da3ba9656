//! Internal telemetry for the pub/sub engine.
//!
//! Structured logging setup and in-process delivery counters.

pub mod metrics;
pub mod tracing_setup;

pub use metrics::*;
pub use tracing_setup::*;
