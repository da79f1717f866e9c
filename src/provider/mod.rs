//! Provider descriptors, the opaque call capability, and the registry.
//!
//! A provider is an interchangeable external endpoint capable of servicing
//! requests for one or more models. Static configuration (ceilings, cost,
//! supported models) lives in [`ProviderConfig`]; the mutable runtime state
//! (health, pause override, priority weight) lives behind a
//! [`ProviderHandle`] and is only touched by the health checker, the cost
//! optimizer, and the administrative pause/resume surface.

pub mod health;
pub mod http;

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

pub use health::HealthChecker;
pub use http::HttpProviderClient;

/// Rate-limit ceilings for a provider across the three rolling windows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateCeilings {
    pub per_minute: u64,
    pub per_hour: u64,
    pub per_day: u64,
}

impl Default for RateCeilings {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 3_000,
            per_day: 50_000,
        }
    }
}

/// Static configuration for a provider, fixed at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider identifier.
    pub id: String,
    /// Endpoint descriptor, informational only.
    pub endpoint: String,
    /// Models this provider can service.
    pub models: Vec<String>,
    /// Rolling-window request ceilings.
    #[serde(default)]
    pub ceilings: RateCeilings,
    /// Maximum concurrent in-flight requests.
    pub max_concurrent: usize,
    /// Estimated cost per request in dollars.
    pub cost_per_request: f64,
    /// Initial scheduling priority weight.
    #[serde(default = "default_priority_weight")]
    pub priority_weight: f64,
}

fn default_priority_weight() -> f64 {
    1.0
}

impl ProviderConfig {
    /// Creates a provider configuration with defaults suitable for tests.
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            models: Vec::new(),
            ceilings: RateCeilings::default(),
            max_concurrent: 10,
            cost_per_request: 0.002,
            priority_weight: 1.0,
        }
    }

    /// Adds a supported model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.models.push(model.into());
        self
    }

    /// Sets the rolling-window ceilings.
    pub fn with_ceilings(mut self, ceilings: RateCeilings) -> Self {
        self.ceilings = ceilings;
        self
    }

    /// Sets the concurrency ceiling.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Sets the estimated cost per request in dollars.
    pub fn with_cost_per_request(mut self, cost: f64) -> Self {
        self.cost_per_request = cost;
        self
    }

    /// Sets the initial priority weight.
    pub fn with_priority_weight(mut self, weight: f64) -> Self {
        self.priority_weight = weight;
        self
    }

    /// Returns whether this provider can service the given model.
    pub fn supports_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

/// Tri-state provider liveness classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Down,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Down => write!(f, "down"),
        }
    }
}

/// Generation parameters forwarded opaquely to the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// A successful provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
    /// Generated content.
    pub content: String,
    /// Total tokens consumed by the call.
    pub tokens_used: u32,
}

/// The opaque provider capability.
///
/// The scheduler never sees the real provider API; it only knows how to
/// fire a call and how to probe liveness.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Executes a generation call.
    async fn call(
        &self,
        prompt: &str,
        model: &str,
        params: &CallParams,
    ) -> Result<CallResponse, ProviderError>;

    /// Cheap liveness probe.
    ///
    /// Adapters with a dedicated liveness endpoint should override this;
    /// the default assumes the provider is reachable.
    async fn ping(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Mutable runtime state for a registered provider.
#[derive(Debug)]
struct ProviderState {
    health: HealthState,
    paused: bool,
    priority_weight: f64,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

/// A registered provider: static config, call capability, runtime state.
pub struct ProviderHandle {
    /// Static configuration.
    pub config: ProviderConfig,
    /// The call capability.
    pub client: Arc<dyn ProviderClient>,
    state: RwLock<ProviderState>,
}

impl ProviderHandle {
    fn new(config: ProviderConfig, client: Arc<dyn ProviderClient>) -> Self {
        let priority_weight = config.priority_weight;
        Self {
            config,
            client,
            state: RwLock::new(ProviderState {
                health: HealthState::Healthy,
                paused: false,
                priority_weight,
                consecutive_failures: 0,
                consecutive_successes: 0,
            }),
        }
    }

    /// Probe-derived health, ignoring the pause override.
    pub fn health(&self) -> HealthState {
        self.state.read().expect("provider state lock poisoned").health
    }

    /// Health as the scheduler sees it: a paused provider is down
    /// regardless of probe results.
    pub fn effective_health(&self) -> HealthState {
        let state = self.state.read().expect("provider state lock poisoned");
        if state.paused {
            HealthState::Down
        } else {
            state.health
        }
    }

    /// Returns whether the provider is administratively paused.
    pub fn is_paused(&self) -> bool {
        self.state.read().expect("provider state lock poisoned").paused
    }

    /// Current scheduling priority weight.
    pub fn priority_weight(&self) -> f64 {
        self.state
            .read()
            .expect("provider state lock poisoned")
            .priority_weight
    }

    /// Overrides the priority weight (cost optimizer only).
    pub fn set_priority_weight(&self, weight: f64) {
        let mut state = self.state.write().expect("provider state lock poisoned");
        state.priority_weight = weight;
    }

    /// Administratively forces the provider down.
    pub fn pause(&self) {
        let mut state = self.state.write().expect("provider state lock poisoned");
        state.paused = true;
    }

    /// Lifts the pause override and forces the provider healthy.
    pub fn resume(&self) {
        let mut state = self.state.write().expect("provider state lock poisoned");
        state.paused = false;
        state.health = HealthState::Healthy;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
    }

    /// Records a probe result and returns the resulting health state.
    ///
    /// First failure demotes to degraded, `down_after` consecutive
    /// failures demote to down, two consecutive successes restore healthy.
    pub(crate) fn record_probe(&self, ok: bool, down_after: u32) -> HealthState {
        let mut state = self.state.write().expect("provider state lock poisoned");
        if ok {
            state.consecutive_failures = 0;
            state.consecutive_successes += 1;
            if state.health != HealthState::Healthy && state.consecutive_successes >= 2 {
                state.health = HealthState::Healthy;
            }
        } else {
            state.consecutive_successes = 0;
            state.consecutive_failures += 1;
            state.health = if state.consecutive_failures >= down_after {
                HealthState::Down
            } else {
                HealthState::Degraded
            };
        }
        state.health
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("config", &self.config)
            .field("health", &self.health())
            .field("paused", &self.is_paused())
            .finish()
    }
}

/// Ordered collection of registered providers.
///
/// Registration order is preserved and used as the deterministic
/// tie-breaker during selection.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<ProviderHandle>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider. Order of registration is significant.
    pub fn register(&mut self, config: ProviderConfig, client: Arc<dyn ProviderClient>) {
        self.providers.push(Arc::new(ProviderHandle::new(config, client)));
    }

    /// Looks up a provider by id.
    pub fn get(&self, id: &str) -> Option<&Arc<ProviderHandle>> {
        self.providers.iter().find(|p| p.config.id == id)
    }

    /// Iterates providers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProviderHandle>> {
        self.providers.iter()
    }

    /// Iterates providers supporting the given model, in registration order.
    pub fn supporting<'a>(
        &'a self,
        model: &'a str,
    ) -> impl Iterator<Item = &'a Arc<ProviderHandle>> {
        self.providers
            .iter()
            .filter(move |p| p.config.supports_model(model))
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
