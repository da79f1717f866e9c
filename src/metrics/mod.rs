//! Metrics collection and export.

pub mod aggregator;
pub mod prometheus;

pub use aggregator::{MetricsAggregator, MetricsSnapshot};
pub use prometheus::{export_metrics, init_metrics};
