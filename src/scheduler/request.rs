//! Request model and retry bookkeeping.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::CallParams;

/// Priority tier for a request. Higher tiers dispatch first; within a
/// tier dispatch is FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityTier {
    /// The next tier down, saturating at [`PriorityTier::Low`].
    pub fn demoted(&self) -> Self {
        match self {
            PriorityTier::Critical => PriorityTier::High,
            PriorityTier::High => PriorityTier::Medium,
            PriorityTier::Medium | PriorityTier::Low => PriorityTier::Low,
        }
    }
}

impl std::fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriorityTier::Low => write!(f, "low"),
            PriorityTier::Medium => write!(f, "medium"),
            PriorityTier::High => write!(f, "high"),
            PriorityTier::Critical => write!(f, "critical"),
        }
    }
}

/// A request as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Session the request belongs to.
    pub session_id: String,
    /// User who issued the request.
    pub user_id: String,
    /// Model to service the request with.
    pub model: String,
    /// Prompt text.
    pub prompt: String,
    /// Priority tier.
    pub tier: PriorityTier,
    /// Generation parameters, forwarded opaquely to the provider.
    #[serde(default)]
    pub params: CallParams,
    /// Arbitrary caller metadata, carried through untouched.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SubmitRequest {
    /// Creates a medium-priority request.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            session_id: String::new(),
            user_id: String::new(),
            model: model.into(),
            prompt: prompt.into(),
            tier: PriorityTier::Medium,
            params: CallParams::default(),
            metadata: HashMap::new(),
        }
    }

    /// Sets the priority tier.
    pub fn with_tier(mut self, tier: PriorityTier) -> Self {
        self.tier = tier;
        self
    }

    /// Sets the session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Sets the user id.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Sets the generation parameters.
    pub fn with_params(mut self, params: CallParams) -> Self {
        self.params = params;
        self
    }

    /// Attaches a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A scheduled request as tracked by the dispatch loop.
#[derive(Debug, Clone)]
pub struct Request {
    /// Unique request id, assigned at submission.
    pub id: Uuid,
    /// The original submission.
    pub submit: SubmitRequest,
    /// Provider the request is currently assigned to.
    pub provider: String,
    /// Tier used for ordering. Starts at the submitted tier and is
    /// demoted one step when the request re-enters the queue on backoff.
    pub effective_tier: PriorityTier,
    /// Estimated cost in dollars for the assigned provider.
    pub estimated_cost: f64,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Attempts so far that ended in failure.
    pub retries: u32,
    /// Earliest dispatch time while backing off.
    pub not_before: Option<DateTime<Utc>>,
}

impl Request {
    /// Wraps a submission for scheduling.
    pub fn new(
        submit: SubmitRequest,
        provider: impl Into<String>,
        estimated_cost: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let effective_tier = submit.tier;
        Self {
            id: Uuid::new_v4(),
            submit,
            provider: provider.into(),
            effective_tier,
            estimated_cost,
            created_at: now,
            retries: 0,
            not_before: None,
        }
    }

    /// Records a failed attempt.
    pub fn increment_retries(&mut self) {
        self.retries += 1;
    }

    /// Whether the request still has retry budget.
    pub fn should_retry(&self, max_retries: u32) -> bool {
        self.retries < max_retries
    }

    /// Exponential backoff for the current retry count: 2^retries seconds.
    pub fn backoff_delay(&self) -> Duration {
        Duration::from_secs(1u64 << self.retries.min(16))
    }

    /// Applies backoff relative to `now` and demotes the effective tier
    /// one step so fresh work at the original tier is not starved.
    pub fn apply_backoff(&mut self, now: DateTime<Utc>) {
        let delay = chrono::Duration::from_std(self.backoff_delay())
            .unwrap_or_else(|_| chrono::Duration::seconds(1));
        self.not_before = Some(now + delay);
        self.effective_tier = self.effective_tier.demoted();
    }

    /// Whether the request may dispatch at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.not_before {
            Some(not_before) => now >= not_before,
            None => true,
        }
    }
}
