//! Logging and metrics initialization shared by conveyor binaries and tests.

pub mod metrics;
pub mod tracing;
