//! Cost- and load-aware provider selection.
//!
//! Every candidate provider gets a score combining health, rate-limit
//! headroom, queue depth, in-flight load, per-request cost, and its
//! priority weight. The highest score wins; registration order breaks
//! ties so selection is deterministic for identical inputs.

use std::sync::Arc;

use crate::config::ScoringWeights;
use crate::error::SchedulerError;
use crate::provider::{HealthState, ProviderHandle};

/// Scheduler-side load figures for one candidate provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateView {
    /// Current queue depth for this provider.
    pub queue_len: usize,
    /// Requests currently dispatched and not yet completed.
    pub in_flight: usize,
    /// Remaining rate-limit headroom across all windows.
    pub rate_remaining: u64,
}

/// Scores and selects providers.
#[derive(Debug, Clone)]
pub struct ProviderSelector {
    weights: ScoringWeights,
}

impl ProviderSelector {
    /// Creates a selector with the given weights.
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    /// Scores one provider against its current load.
    ///
    /// Down and paused providers always score 0 and are never selected.
    /// Each factor lands in [0, 1] except the cost factor (capped) and
    /// the priority weight, so relative order follows the qualitative
    /// contract: healthier, less loaded, cheaper wins.
    pub fn score(&self, provider: &ProviderHandle, view: &CandidateView) -> f64 {
        let health_weight = match provider.effective_health() {
            HealthState::Healthy => self.weights.healthy,
            HealthState::Degraded => self.weights.degraded,
            HealthState::Down => return 0.0,
        };

        let rate_factor = (view.rate_remaining as f64 / self.weights.rate_norm).min(1.0);
        let queue_factor = (1.0 - view.queue_len as f64 / self.weights.queue_norm).max(0.0);

        let max_concurrent = provider.config.max_concurrent.max(1) as f64;
        let load_factor = (1.0 - view.in_flight as f64 / max_concurrent).max(0.0);

        let cost_factor =
            (1.0 / (provider.config.cost_per_request + 0.001)).min(self.weights.cost_cap);

        100.0
            * health_weight
            * rate_factor
            * queue_factor
            * load_factor
            * cost_factor
            * provider.priority_weight()
    }

    /// Picks the best provider among candidates for a model.
    ///
    /// Candidates must be supplied in registration order; the first of
    /// any equally-scored set wins. A fleet where every candidate scores
    /// 0 from load alone (exhausted rate headroom, full queue) still
    /// accepts work: the first non-down candidate takes it and the
    /// request queues until dispatch admits it. Errors only when no
    /// candidate is up.
    pub fn select(
        &self,
        model: &str,
        candidates: &[(Arc<ProviderHandle>, CandidateView)],
    ) -> Result<String, SchedulerError> {
        let mut best: Option<(&Arc<ProviderHandle>, f64)> = None;

        for (provider, view) in candidates {
            let score = self.score(provider, view);
            if score <= 0.0 {
                continue;
            }
            tracing::trace!(
                provider = %provider.config.id,
                model = model,
                score = score,
                "Scored candidate"
            );
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((provider, score)),
            }
        }

        if let Some((provider, _)) = best {
            return Ok(provider.config.id.clone());
        }

        // Saturation is not unavailability. Rate exhaustion and deep
        // queues zero the score but the dispatch loop's admit gate is
        // what actually holds the work back.
        candidates
            .iter()
            .find(|(provider, _)| provider.effective_health() != HealthState::Down)
            .map(|(provider, _)| provider.config.id.clone())
            .ok_or_else(|| SchedulerError::NoProviderAvailable {
                model: model.to_string(),
            })
    }
}
