//! In-process metrics aggregation.
//!
//! Collects request-level counters and latency sums, and periodically
//! rolls them up into a [`MetricsSnapshot`] alongside the live queue and
//! in-flight depths supplied by the dispatch loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Thread-safe aggregator for scheduler activity.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    cache_hits: AtomicU64,
    total_latency_ms: AtomicU64,
    total_wait_ms: AtomicU64,
    queue_depths: RwLock<HashMap<String, usize>>,
    in_flight: RwLock<HashMap<String, usize>>,
}

/// Point-in-time rollup of scheduler activity.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Requests completed by a provider call.
    pub completed: u64,
    /// Requests that failed terminally.
    pub failed: u64,
    /// Retry attempts across all requests.
    pub retried: u64,
    /// Requests served from cache.
    pub cache_hits: u64,
    /// Mean provider call latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Mean queue wait in milliseconds, submission to dispatch.
    pub avg_wait_ms: f64,
    /// Terminal failures over all finished requests.
    pub error_rate: f64,
    /// Queue depth per provider at rollup time.
    pub queue_depths: HashMap<String, usize>,
    /// In-flight count per provider at rollup time.
    pub in_flight: HashMap<String, usize>,
    /// When the snapshot was taken.
    pub generated_at: DateTime<Utc>,
}

impl MetricsAggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed provider call.
    pub fn record_completion(&self, latency_ms: u64, wait_ms: u64) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::SeqCst);
        self.total_wait_ms.fetch_add(wait_ms, Ordering::SeqCst);
    }

    /// Records a terminal failure.
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    /// Records one retry attempt.
    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a cache hit.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::SeqCst);
    }

    /// Replaces the live depth views with the dispatch loop's current state.
    pub fn set_depths(
        &self,
        queue_depths: HashMap<String, usize>,
        in_flight: HashMap<String, usize>,
    ) {
        *self
            .queue_depths
            .write()
            .expect("queue_depths lock poisoned") = queue_depths;
        *self.in_flight.write().expect("in_flight lock poisoned") = in_flight;
    }

    /// Takes a snapshot of everything recorded so far.
    pub fn rollup(&self) -> MetricsSnapshot {
        let completed = self.completed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let finished = completed + failed;

        let avg_latency_ms = if completed > 0 {
            self.total_latency_ms.load(Ordering::SeqCst) as f64 / completed as f64
        } else {
            0.0
        };
        let avg_wait_ms = if completed > 0 {
            self.total_wait_ms.load(Ordering::SeqCst) as f64 / completed as f64
        } else {
            0.0
        };
        let error_rate = if finished > 0 {
            failed as f64 / finished as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            completed,
            failed,
            retried: self.retried.load(Ordering::SeqCst),
            cache_hits: self.cache_hits.load(Ordering::SeqCst),
            avg_latency_ms,
            avg_wait_ms,
            error_rate,
            queue_depths: self
                .queue_depths
                .read()
                .expect("queue_depths lock poisoned")
                .clone(),
            in_flight: self
                .in_flight
                .read()
                .expect("in_flight lock poisoned")
                .clone(),
            generated_at: Utc::now(),
        }
    }
}
