//! Webhook-driven blockchain indexing service
//!
//! Users register indexing jobs against their own PostgreSQL databases. Each
//! job owns a subscription at an upstream webhook provider; signed deliveries
//! are validated, routed by event category and written idempotently into the
//! user's database. A scheduler starts pending jobs with backoff and recovers
//! jobs left behind by a crashed process.

pub mod adapters;
pub mod api;
pub mod config;
pub mod core;
pub mod domain;
pub mod infrastructure;
pub mod metrics;
pub mod services;

// Re-export commonly used types
pub use config::IndexerConfig;
pub use core::{IndexerError, IndexerResult};
pub use infrastructure::ServiceContainer;
