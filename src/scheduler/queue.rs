//! Per-provider priority queues.
//!
//! Each provider has its own queue ordered by effective tier, FIFO
//! within a tier. The backing structure is a `VecDeque` kept sorted by
//! tier descending, so push is an ordered insert and pop scans from the
//! front for the first dispatch-ready entry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::request::{PriorityTier, Request};

/// FIFO-within-tier priority queue for a single provider.
#[derive(Debug, Default)]
pub struct ProviderQueue {
    entries: std::collections::VecDeque<Request>,
}

impl ProviderQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues at the back of the request's tier band.
    pub fn push(&mut self, request: Request) {
        let tier = request.effective_tier;
        let position = self
            .entries
            .iter()
            .position(|r| r.effective_tier < tier)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, request);
    }

    /// Enqueues at the front of the request's tier band.
    ///
    /// Used for backoff re-entries: the request keeps its place ahead of
    /// later arrivals at the same (already demoted) tier.
    pub fn push_front_of_tier(&mut self, request: Request) {
        let tier = request.effective_tier;
        let position = self
            .entries
            .iter()
            .position(|r| r.effective_tier <= tier)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, request);
    }

    /// Removes and returns the highest-priority entry that may dispatch
    /// at `now`. Entries still under backoff are skipped, not reordered.
    pub fn pop_ready(&mut self, now: DateTime<Utc>) -> Option<Request> {
        let position = self.entries.iter().position(|r| r.is_ready(now))?;
        self.entries.remove(position)
    }

    /// Whether any entry may dispatch at `now`.
    pub fn has_ready(&self, now: DateTime<Utc>) -> bool {
        self.entries.iter().any(|r| r.is_ready(now))
    }

    /// Queue depth, including entries under backoff.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Depth per tier, for status reporting.
    pub fn depth_by_tier(&self) -> HashMap<PriorityTier, usize> {
        let mut by_tier = HashMap::new();
        for request in &self.entries {
            *by_tier.entry(request.effective_tier).or_insert(0) += 1;
        }
        by_tier
    }
}

/// Point-in-time queue state for one provider.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    /// Provider id.
    pub provider: String,
    /// Total queued requests.
    pub depth: usize,
    /// Dispatched requests not yet completed.
    pub in_flight: usize,
    /// Queued requests per tier.
    pub by_tier: HashMap<PriorityTier, usize>,
}
