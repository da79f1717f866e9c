//! Scheduler configuration.
//!
//! This module provides configuration for the scheduler core and its
//! background loops: tick intervals, retry limits, budget constraints,
//! cache behavior, the fail-open policy for the counter store, and the
//! tunable provider-scoring weights.

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Tunable weights for provider scoring.
///
/// The defaults reproduce the stock scoring behavior; the qualitative
/// contract (healthier, cheaper, less-loaded providers outrank the
/// alternative) must hold for any values chosen here.
#[derive(Debug, Clone)]
pub struct ScoringWeights {
    /// Multiplier applied to healthy providers.
    pub healthy: f64,
    /// Multiplier applied to degraded providers.
    pub degraded: f64,
    /// Rate-limit headroom normalizer (remaining / rate_norm, capped at 1).
    pub rate_norm: f64,
    /// Queue-length normalizer (1 - depth / queue_norm, floored at 0).
    pub queue_norm: f64,
    /// Cap on the inverse-cost factor.
    pub cost_cap: f64,
    /// Floor for provider priority weights when the optimizer
    /// de-prioritizes an expensive provider. Never zero.
    pub min_priority_weight: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            healthy: 1.0,
            degraded: 0.7,
            rate_norm: 100.0,
            queue_norm: 100.0,
            cost_cap: 10.0,
            min_priority_weight: 0.1,
        }
    }
}

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    // Tick intervals
    /// How often the dispatch loop runs.
    pub dispatch_interval: Duration,
    /// How often providers are health-probed.
    pub health_interval: Duration,
    /// How often metrics are rolled up into a snapshot.
    pub metrics_interval: Duration,
    /// How often the cost optimizer pass runs.
    pub optimizer_interval: Duration,

    // Request lifecycle
    /// Maximum retry attempts before a request fails terminally.
    pub max_retries: u32,
    /// Timeout applied to each individual provider call.
    pub call_timeout: Duration,
    /// Timeout applied to each health probe.
    pub probe_timeout: Duration,
    /// Consecutive probe failures before a provider is marked down.
    pub probe_down_after: u32,

    // Budget
    /// Monthly spending budget in dollars.
    pub monthly_budget: f64,
    /// Budget utilization above which the optimizer intervenes.
    pub alert_threshold: f64,
    /// Factor the optimizer multiplies the cache TTL by (must be > 1).
    pub ttl_raise_factor: f64,
    /// A provider is de-prioritized when its spend exceeds this multiple
    /// of the average provider spend.
    pub deprioritize_ratio: f64,

    // Cache
    /// Base time-to-live for cached responses.
    pub cache_ttl: Duration,
    /// Maximum number of cached responses.
    pub cache_capacity: usize,

    // Counter store
    /// Redis connection URL for the shared counter store.
    pub redis_url: String,
    /// Admit requests when the counter store is unreachable.
    ///
    /// Fail-open trades strict rate-limit correctness for availability;
    /// every degraded-mode admission is logged.
    pub fail_open: bool,

    // Events
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,

    /// Provider scoring weights.
    pub weights: ScoringWeights,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_secs(1),
            health_interval: Duration::from_secs(30),
            metrics_interval: Duration::from_secs(10),
            optimizer_interval: Duration::from_secs(300),
            max_retries: 3,
            call_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
            probe_down_after: 3,
            monthly_budget: 100.0,
            alert_threshold: 0.8,
            ttl_raise_factor: 2.0,
            deprioritize_ratio: 1.5,
            cache_ttl: Duration::from_secs(3600),
            cache_capacity: 10_000,
            redis_url: "redis://localhost:6379".to_string(),
            fail_open: true,
            event_capacity: 256,
            weights: ScoringWeights::default(),
        }
    }
}

impl SchedulerConfig {
    /// Creates a configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// Recognized variables: `MODELMUX_REDIS_URL`, `MODELMUX_MONTHLY_BUDGET`,
    /// `MODELMUX_MAX_RETRIES`, `MODELMUX_FAIL_OPEN`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(url) = env::var("MODELMUX_REDIS_URL") {
            config.redis_url = url;
        }

        if let Ok(budget) = env::var("MODELMUX_MONTHLY_BUDGET") {
            config.monthly_budget =
                budget.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "MODELMUX_MONTHLY_BUDGET".to_string(),
                    message: format!("'{}' is not a valid dollar amount", budget),
                })?;
        }

        if let Ok(retries) = env::var("MODELMUX_MAX_RETRIES") {
            config.max_retries =
                retries.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "MODELMUX_MAX_RETRIES".to_string(),
                    message: format!("'{}' is not a valid retry count", retries),
                })?;
        }

        if let Ok(fail_open) = env::var("MODELMUX_FAIL_OPEN") {
            config.fail_open =
                fail_open.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "MODELMUX_FAIL_OPEN".to_string(),
                    message: format!("'{}' is not a boolean", fail_open),
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the dispatch interval.
    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }

    /// Sets the maximum retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the monthly budget in dollars.
    pub fn with_monthly_budget(mut self, budget: f64) -> Self {
        self.monthly_budget = budget;
        self
    }

    /// Sets the base cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the fail-open policy for counter-store outages.
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// Sets the Redis URL for the shared counter store.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Sets the scoring weights.
    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "dispatch_interval must be non-zero".to_string(),
            ));
        }
        if self.monthly_budget <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "monthly_budget must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.alert_threshold) || self.alert_threshold == 0.0 {
            return Err(ConfigError::ValidationFailed(
                "alert_threshold must be within (0, 1]".to_string(),
            ));
        }
        if self.ttl_raise_factor <= 1.0 {
            return Err(ConfigError::ValidationFailed(
                "ttl_raise_factor must be greater than 1".to_string(),
            ));
        }
        if self.weights.min_priority_weight <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "min_priority_weight must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.dispatch_interval, Duration::from_secs(1));
        assert_eq!(config.health_interval, Duration::from_secs(30));
        assert_eq!(config.optimizer_interval, Duration::from_secs(300));
        assert!(config.fail_open);
    }

    #[test]
    fn test_config_builder() {
        let config = SchedulerConfig::default()
            .with_max_retries(5)
            .with_monthly_budget(250.0)
            .with_fail_open(false)
            .with_redis_url("redis://cluster:6380");

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.monthly_budget, 250.0);
        assert!(!config.fail_open);
        assert_eq!(config.redis_url, "redis://cluster:6380");
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let config = SchedulerConfig::default().with_monthly_budget(0.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_validate_rejects_ttl_factor_below_one() {
        let mut config = SchedulerConfig::default();
        config.ttl_raise_factor = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_weights() {
        let weights = ScoringWeights::default();
        assert_eq!(weights.healthy, 1.0);
        assert_eq!(weights.degraded, 0.7);
        assert_eq!(weights.cost_cap, 10.0);
        assert!(weights.min_priority_weight > 0.0);
    }
}
