//! HTTP API Handlers and Routes
//!
//! The REST layer in front of [`ResearchCoordinator`](crate::research::ResearchCoordinator),
//! built on the Axum web framework.
//!
//! # Module Structure
//!
//! - [`api::handlers`](crate::api::handlers) - Request handlers for each endpoint
//! - [`api::routes`](crate::api::routes) - Route definitions and the OpenAPI document
//!
//! # API Endpoints
//!
//! ## Query (`/api/query`)
//! - `POST /api/query` - Run a research query. Responds with a server-sent
//!   event stream (`delta`* then one `final` or `error`), or with the collected
//!   terminal event when the body sets `"stream": false`
//!
//! ## Agents (`/api/agents`)
//! - `GET /api/agents` - List registered retrieval agents
//!
//! ## Metrics (`/api/metrics`)
//! - `GET /api/metrics` - Response times, success rate, strategy and agent usage
//! - `POST /api/metrics/reset` - Clear the counters
//!
//! ## Health
//! - `GET /health` - Dependency checks (knowledge base, generation backend)
//! - `GET /readiness` - Readiness probe
//! - `GET /liveness` - Liveness probe
//!
//! # OpenAPI Documentation
//!
//! The OpenAPI document is served at `/api-docs/openapi.json`.

/// Request and response handlers for all API endpoints.
pub mod handlers;
/// Router configuration and route definitions.
pub mod routes;
