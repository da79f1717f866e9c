//! Periodic provider liveness probing.
//!
//! Probes every registered provider concurrently and folds the results
//! into each provider's health state. Paused providers are skipped so
//! an administrative pause cannot be undone by a passing probe.

use std::time::Duration;

use futures::future::join_all;

use super::{HealthState, ProviderRegistry};

/// Probes provider liveness and updates health classifications.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    /// Consecutive failures before a provider is marked down.
    down_after: u32,
    /// Timeout applied to each probe.
    probe_timeout: Duration,
}

impl HealthChecker {
    /// Creates a health checker.
    pub fn new(down_after: u32, probe_timeout: Duration) -> Self {
        Self {
            down_after: down_after.max(1),
            probe_timeout,
        }
    }

    /// Probes all providers in the registry, concurrently.
    pub async fn probe_all(&self, registry: &ProviderRegistry) {
        let probes = registry
            .iter()
            .filter(|p| !p.is_paused())
            .map(|provider| async move {
                let before = provider.health();
                let ok = tokio::time::timeout(self.probe_timeout, provider.client.ping())
                    .await
                    .map(|r| r.is_ok())
                    .unwrap_or(false);
                let after = provider.record_probe(ok, self.down_after);

                if after != before {
                    match after {
                        HealthState::Healthy => tracing::info!(
                            provider = %provider.config.id,
                            "Provider recovered"
                        ),
                        HealthState::Degraded => tracing::warn!(
                            provider = %provider.config.id,
                            "Provider degraded"
                        ),
                        HealthState::Down => tracing::error!(
                            provider = %provider.config.id,
                            "Provider marked down"
                        ),
                    }
                }
            });

        join_all(probes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::{CallParams, CallResponse, ProviderClient, ProviderConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    struct ProbeClient {
        healthy: AtomicBool,
        probes: AtomicU32,
    }

    impl ProbeClient {
        fn new(healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                healthy: AtomicBool::new(healthy),
                probes: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ProviderClient for ProbeClient {
        async fn call(
            &self,
            _prompt: &str,
            _model: &str,
            _params: &CallParams,
        ) -> Result<CallResponse, ProviderError> {
            unimplemented!("probe-only client")
        }

        async fn ping(&self) -> Result<(), ProviderError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ProviderError::RequestFailed("unreachable".to_string()))
            }
        }
    }

    fn registry_with(client: Arc<ProbeClient>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(
            ProviderConfig::new("probe", "https://probe.example").with_model("gpt-4"),
            client,
        );
        registry
    }

    #[tokio::test]
    async fn test_failing_probes_degrade_then_down() {
        let client = ProbeClient::new(false);
        let registry = registry_with(client);
        let checker = HealthChecker::new(3, Duration::from_secs(1));
        let handle = registry.get("probe").expect("registered");

        checker.probe_all(&registry).await;
        assert_eq!(handle.health(), HealthState::Degraded);

        checker.probe_all(&registry).await;
        checker.probe_all(&registry).await;
        assert_eq!(handle.health(), HealthState::Down);
    }

    #[tokio::test]
    async fn test_recovery_needs_two_successes() {
        let client = ProbeClient::new(false);
        let registry = registry_with(client.clone());
        let checker = HealthChecker::new(1, Duration::from_secs(1));
        let handle = registry.get("probe").expect("registered");

        checker.probe_all(&registry).await;
        assert_eq!(handle.health(), HealthState::Down);

        client.healthy.store(true, Ordering::SeqCst);
        checker.probe_all(&registry).await;
        assert_eq!(handle.health(), HealthState::Down);

        checker.probe_all(&registry).await;
        assert_eq!(handle.health(), HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_paused_providers_are_not_probed() {
        let client = ProbeClient::new(true);
        let registry = registry_with(client.clone());
        let checker = HealthChecker::new(3, Duration::from_secs(1));

        registry.get("probe").expect("registered").pause();
        checker.probe_all(&registry).await;

        assert_eq!(client.probes.load(Ordering::SeqCst), 0);
    }
}
