//! API request handlers.
//!
//! This module contains all HTTP request handlers organized by functionality.

/// Agent listing handlers.
pub mod agents;
/// Health, readiness and liveness probes.
pub mod health;
/// Query metrics handlers.
pub mod metrics;
/// Research query handler (SSE or collected JSON).
pub mod query;
