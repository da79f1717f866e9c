//! modelmux: Multi-provider inference request scheduler.
//!
//! This library provides priority-queued request scheduling across
//! interchangeable model providers, with distributed rate limiting,
//! health tracking, response caching, cost-aware routing, and failover.

// Core modules
pub mod cache;
pub mod cli;
pub mod config;
pub mod cost;
pub mod error;
pub mod events;
pub mod metrics;
pub mod optimizer;
pub mod provider;
pub mod ratelimit;
pub mod scheduler;
pub mod selector;

// Re-export commonly used error types
pub use error::{ProviderError, SchedulerError, StoreError};

// Re-export the primary API surface
pub use scheduler::{PriorityTier, Scheduler, SubmitOutcome, SubmitRequest};
