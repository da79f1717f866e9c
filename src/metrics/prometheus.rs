//! Prometheus metrics registration and export.
//!
//! Defines all Prometheus metrics exposed by modelmux and provides
//! functions for initializing, registering, and exporting them.

use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all modelmux metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total requests processed, labeled by provider and outcome.
pub static REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Provider call latency in seconds, labeled by provider.
pub static CALL_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Queued requests per provider.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Dispatched but not yet completed requests per provider.
pub static IN_FLIGHT: OnceLock<GaugeVec> = OnceLock::new();

/// Total responses served from the cache.
pub static CACHE_HITS: OnceLock<Counter> = OnceLock::new();

/// Total cache lookups that missed.
pub static CACHE_MISSES: OnceLock<Counter> = OnceLock::new();

/// Accumulated spend in dollars, labeled by provider.
pub static COST_DOLLARS: OnceLock<CounterVec> = OnceLock::new();

/// Total retry attempts, labeled by provider.
pub static RETRIES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at application startup. Subsequent calls leave the
/// already-initialized statics untouched.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically
/// due to duplicate metric names.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let requests_total = CounterVec::new(
        Opts::new("modelmux_requests_total", "Total requests processed"),
        &["provider", "outcome"],
    )?;

    let call_latency = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "modelmux_call_latency_seconds",
            "Provider call latency in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["provider"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("modelmux_queue_depth", "Queued requests per provider"),
        &["provider"],
    )?;

    let in_flight = GaugeVec::new(
        Opts::new("modelmux_in_flight", "In-flight requests per provider"),
        &["provider"],
    )?;

    let cache_hits = Counter::new(
        "modelmux_cache_hits_total",
        "Total responses served from the cache",
    )?;

    let cache_misses = Counter::new(
        "modelmux_cache_misses_total",
        "Total cache lookups that missed",
    )?;

    let cost_dollars = CounterVec::new(
        Opts::new("modelmux_cost_dollars", "Accumulated spend in dollars"),
        &["provider"],
    )?;

    let retries_total = CounterVec::new(
        Opts::new("modelmux_retries_total", "Total retry attempts"),
        &["provider"],
    )?;

    registry.register(Box::new(requests_total.clone()))?;
    registry.register(Box::new(call_latency.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(in_flight.clone()))?;
    registry.register(Box::new(cache_hits.clone()))?;
    registry.register(Box::new(cache_misses.clone()))?;
    registry.register(Box::new(cost_dollars.clone()))?;
    registry.register(Box::new(retries_total.clone()))?;

    // Store metrics in static variables.
    // If any of these fail, metrics were already initialized (idempotent).
    let _ = REGISTRY.set(registry);
    let _ = REQUESTS_TOTAL.set(requests_total);
    let _ = CALL_LATENCY.set(call_latency);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = IN_FLIGHT.set(in_flight);
    let _ = CACHE_HITS.set(cache_hits);
    let _ = CACHE_MISSES.set(cache_misses);
    let _ = COST_DOLLARS.set(cost_dollars);
    let _ = RETRIES_TOTAL.set(retries_total);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent() {
        let _ = init_metrics();
        let _ = init_metrics();
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_init() {
        let _ = init_metrics();

        if let Some(counter) = REQUESTS_TOTAL.get() {
            counter.with_label_values(&["openai", "completed"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.is_empty());
        assert!(!metrics.starts_with("# Error"));
    }
}
