//! Configuration and process-wide instrumentation.

/// Query metrics collector.
pub mod metrics;
/// TOML configuration with hot reloading.
pub mod toml_config;
