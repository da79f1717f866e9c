//! Budget-pressure response.
//!
//! When month-to-date spend crosses the alert threshold the optimizer
//! emits a cost alert, stretches the cache TTL to shed provider calls,
//! and halves the priority weight of providers spending well above the
//! fleet average. Weights are floored so an expensive provider remains
//! selectable when it is the only one left.

use std::sync::Arc;

use crate::cache::ResponseCache;
use crate::cost::CostTracker;
use crate::events::{AlertLevel, EventBus, SchedulerEvent};
use crate::provider::ProviderRegistry;

/// Periodic cost optimization pass.
#[derive(Debug, Clone)]
pub struct CostOptimizer {
    /// Budget utilization above which the pass intervenes.
    threshold: f64,
    /// Factor applied to the cache TTL multiplier per intervention.
    ttl_raise_factor: f64,
    /// Spend-over-average ratio above which a provider is de-prioritized.
    deprioritize_ratio: f64,
    /// Floor for de-prioritized weights.
    min_weight: f64,
}

impl CostOptimizer {
    /// Creates an optimizer.
    pub fn new(threshold: f64, ttl_raise_factor: f64, deprioritize_ratio: f64, min_weight: f64) -> Self {
        Self {
            threshold,
            ttl_raise_factor,
            deprioritize_ratio,
            min_weight,
        }
    }

    /// Runs one optimization pass. Returns whether it intervened.
    pub fn run_once(
        &self,
        costs: &CostTracker,
        cache: &Arc<ResponseCache>,
        registry: &ProviderRegistry,
        events: &EventBus,
    ) -> bool {
        let snapshot = costs.snapshot();
        if snapshot.budget_utilization <= self.threshold {
            return false;
        }

        let level = if snapshot.budget_utilization >= 1.0 {
            AlertLevel::Critical
        } else {
            AlertLevel::Warning
        };
        events.emit(SchedulerEvent::CostAlert {
            level,
            utilization: snapshot.budget_utilization,
            projected_monthly: snapshot.projected_monthly,
        });
        tracing::warn!(
            utilization = snapshot.budget_utilization,
            projected_monthly = snapshot.projected_monthly,
            "Budget utilization over threshold, applying cost controls"
        );

        cache.raise_ttl(self.ttl_raise_factor);

        let average = costs.average_provider_cost();
        if average > 0.0 {
            for provider in registry.iter() {
                let spent = costs.provider_spent(&provider.config.id);
                if spent > self.deprioritize_ratio * average {
                    let current = provider.priority_weight();
                    let lowered = (current * 0.5).max(self.min_weight);
                    provider.set_priority_weight(lowered);
                    tracing::info!(
                        provider = %provider.config.id,
                        spent = spent,
                        average = average,
                        weight = lowered,
                        "De-prioritized expensive provider"
                    );
                }
            }
        }

        true
    }
}
