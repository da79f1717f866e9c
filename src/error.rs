//! Error types for modelmux operations.
//!
//! Defines error types for the major subsystems:
//! - Scheduling and request lifecycle
//! - Provider call execution
//! - The shared rate-limit counter store

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;

/// Errors returned by a provider call.
///
/// All variants are transient from the scheduler's point of view and drive
/// the retry/failover path.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider call failed: {0}")]
    RequestFailed(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("provider API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("failed to parse provider response: {0}")]
    ParseError(String),
}

/// Errors from the shared rate-limit counter store.
///
/// Store failures are never surfaced to callers directly; the
/// [`RateLimiter`](crate::ratelimit::RateLimiter) applies the configured
/// fail-open or fail-closed policy instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store connection failed: {0}")]
    ConnectionFailed(String),

    #[error("counter store operation failed: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Errors surfaced by the scheduler itself.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No provider supports the requested model and is not down.
    /// Surfaced immediately at submission time, never retried.
    #[error("no provider available for model '{model}'")]
    NoProviderAvailable { model: String },

    /// A request exhausted its retry budget. Terminal.
    #[error("request {request_id} exhausted {max_retries} retries: {last_error}")]
    MaxRetriesExceeded {
        request_id: Uuid,
        max_retries: u32,
        last_error: String,
    },

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));

        let err = ProviderError::ApiError {
            code: 502,
            message: "bad gateway".to_string(),
        };
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("bad gateway"));
    }

    #[test]
    fn test_scheduler_error_display() {
        let err = SchedulerError::NoProviderAvailable {
            model: "gpt-4".to_string(),
        };
        assert!(err.to_string().contains("gpt-4"));

        let err = SchedulerError::MaxRetriesExceeded {
            request_id: Uuid::new_v4(),
            max_retries: 3,
            last_error: "connection reset".to_string(),
        };
        assert!(err.to_string().contains("3"));
        assert!(err.to_string().contains("connection reset"));
    }
}
