//! Distributed rate limiting over a shared counter store.
//!
//! Every scheduler instance increments per-provider counters keyed by
//! rolling window (minute, hour, day) in a shared store, so the ceilings
//! hold across the whole fleet rather than per process. Admission is
//! increment-then-compare: the counter may overshoot a rejected request
//! by one, which is accepted in exchange for a single round trip.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::provider::ProviderConfig;

/// Rolling rate-limit windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    /// All windows, from shortest to longest.
    pub const ALL: [Window; 3] = [Window::Minute, Window::Hour, Window::Day];

    /// Window length in seconds, used as the counter expiry.
    pub fn secs(&self) -> u64 {
        match self {
            Window::Minute => 60,
            Window::Hour => 3_600,
            Window::Day => 86_400,
        }
    }

    /// Key suffix for this window.
    pub fn label(&self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }

    /// The ceiling this window enforces for the given provider.
    pub fn ceiling(&self, config: &ProviderConfig) -> u64 {
        match self {
            Window::Minute => config.ceilings.per_minute,
            Window::Hour => config.ceilings.per_hour,
            Window::Day => config.ceilings.per_day,
        }
    }
}

fn counter_key(provider_id: &str, window: Window) -> String {
    format!("rl:{}:{}", provider_id, window.label())
}

/// Shared counter primitive backing the rate limiter.
///
/// Implementations must make `incr_with_expiry` atomic per key so
/// concurrent scheduler instances never lose increments.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increments a counter, setting its expiry when the
    /// counter is created. Returns the post-increment value.
    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<u64, StoreError>;

    /// Reads a counter without modifying it. Missing counters read as 0.
    async fn get(&self, key: &str) -> Result<u64, StoreError>;
}

/// Redis-backed counter store shared across scheduler instances.
pub struct RedisCounterStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
}

impl RedisCounterStore {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis })
    }

    /// Creates a store from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<u64, StoreError> {
        let mut conn = self.redis.clone();
        let count: u64 = conn.incr(key, 1u64).await?;

        // A count of 1 means this increment created the key, so it owns
        // setting the expiry. EXPIRE via raw command keeps this portable
        // across redis crate versions.
        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl_secs)
                .query_async::<_, ()>(&mut conn)
                .await?;
        }

        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.redis.clone();
        let count: Option<u64> = conn.get(key).await?;
        Ok(count.unwrap_or(0))
    }
}

/// In-process counter store for tests and single-instance deployments.
///
/// Counters expire lazily on access, mirroring the Redis expiry behavior
/// closely enough for admission decisions.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, (u64, Instant)>>,
}

impl MemoryCounterStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<u64, StoreError> {
        let mut counters = self.counters.lock().await;
        let now = Instant::now();
        let entry = counters.entry(key.to_string()).or_insert((0, now + Duration::from_secs(ttl_secs)));
        if now >= entry.1 {
            *entry = (0, now + Duration::from_secs(ttl_secs));
        }
        entry.0 += 1;
        Ok(entry.0)
    }

    async fn get(&self, key: &str) -> Result<u64, StoreError> {
        let counters = self.counters.lock().await;
        Ok(match counters.get(key) {
            Some((count, expiry)) if Instant::now() < *expiry => *count,
            _ => 0,
        })
    }
}

/// Admission control over the shared counter store.
///
/// A request is admitted only when every window has headroom and the
/// provider's local in-flight count is below its concurrency ceiling.
/// When the store is unreachable the configured policy decides:
/// fail-open admits (and logs), fail-closed rejects.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    fail_open: bool,
}

impl RateLimiter {
    /// Creates a rate limiter over the given store.
    pub fn new(store: Arc<dyn CounterStore>, fail_open: bool) -> Self {
        Self { store, fail_open }
    }

    /// Decides whether one more request may be dispatched to the provider.
    ///
    /// The concurrency check runs first so a saturated provider never
    /// consumes window counters for a request that cannot dispatch anyway.
    pub async fn admit(&self, config: &ProviderConfig, in_flight: usize) -> bool {
        if in_flight >= config.max_concurrent {
            return false;
        }

        for window in Window::ALL {
            let key = counter_key(&config.id, window);
            match self.store.incr_with_expiry(&key, window.secs()).await {
                Ok(count) => {
                    if count > window.ceiling(config) {
                        tracing::debug!(
                            provider = %config.id,
                            window = window.label(),
                            count,
                            ceiling = window.ceiling(config),
                            "Rate ceiling reached"
                        );
                        return false;
                    }
                }
                Err(e) => {
                    if self.fail_open {
                        tracing::warn!(
                            provider = %config.id,
                            window = window.label(),
                            error = %e,
                            "Counter store unreachable, admitting (fail-open)"
                        );
                        return true;
                    }
                    tracing::warn!(
                        provider = %config.id,
                        window = window.label(),
                        error = %e,
                        "Counter store unreachable, rejecting (fail-closed)"
                    );
                    return false;
                }
            }
        }

        true
    }

    /// Remaining request headroom for the provider, the minimum across
    /// all windows. Fail-open reports the full minute ceiling so scoring
    /// degrades gracefully during a store outage.
    pub async fn remaining(&self, config: &ProviderConfig) -> u64 {
        let mut remaining = u64::MAX;

        for window in Window::ALL {
            let key = counter_key(&config.id, window);
            let used = match self.store.get(&key).await {
                Ok(count) => count,
                Err(e) => {
                    tracing::debug!(
                        provider = %config.id,
                        error = %e,
                        "Counter store unreachable while reading headroom"
                    );
                    return if self.fail_open {
                        config.ceilings.per_minute
                    } else {
                        0
                    };
                }
            };
            remaining = remaining.min(window.ceiling(config).saturating_sub(used));
        }

        remaining
    }
}
