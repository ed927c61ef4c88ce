//! Query Handling
//!
//! Ties the pipeline together: one query goes through the planner, the
//! orchestrator (retrieval rounds and the quality gate), fusion and the
//! synthesis streamer, and comes back as a single event stream.
//!
//! # Usage
//!
//! ```ignore
//! use futures::StreamExt;
//! use taxrag::research::ResearchCoordinator;
//! use taxrag::types::Query;
//!
//! let coordinator = ResearchCoordinator::new(registry, llm, config.pipeline.clone());
//! let deadline = coordinator.default_deadline();
//!
//! let mut events = coordinator.handle_query(Query::new("section 1031 boot"), deadline);
//! while let Some(event) = events.next().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! ```

/// Per-query pipeline driver.
pub mod coordinator;

pub use coordinator::ResearchCoordinator;
