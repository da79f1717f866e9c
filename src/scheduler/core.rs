//! The scheduler core: submission, dispatch, retry, and failover.
//!
//! Submission checks the response cache, picks a provider, and enqueues.
//! A tick-driven dispatch loop drains completed call outcomes, requeues
//! failures with backoff or moves them to an alternate provider, then
//! dispatches ready work up to each provider's concurrency and rate
//! ceilings. All time-dependent behavior flows through the `now`
//! parameter of [`Scheduler::tick`], so tests drive the clock directly.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::queue::{ProviderQueue, QueueStatus};
use super::request::{Request, SubmitRequest};
use crate::cache::ResponseCache;
use crate::config::SchedulerConfig;
use crate::cost::{CostSnapshot, CostTracker};
use crate::error::{ProviderError, SchedulerError};
use crate::events::{EventBus, ResponseSource, SchedulerEvent};
use crate::metrics::prometheus as prom;
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::provider::{CallResponse, HealthChecker, HealthState, ProviderRegistry};
use crate::ratelimit::{CounterStore, RateLimiter};
use crate::selector::{CandidateView, ProviderSelector};

/// Result of submitting a request.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Served from the cache without queueing.
    Completed {
        request_id: Uuid,
        response: CallResponse,
    },
    /// Accepted and queued for dispatch.
    Queued {
        request_id: Uuid,
        provider: String,
    },
}

/// One finished provider call, reported back to the dispatch loop.
struct CallOutcome {
    request: Request,
    result: Result<CallResponse, ProviderError>,
    latency_ms: u64,
    wait_ms: u64,
}

/// Queues and in-flight tracking, guarded by one lock so a tick sees a
/// consistent view.
struct DispatchState {
    queues: HashMap<String, ProviderQueue>,
    in_flight: HashMap<String, HashSet<Uuid>>,
}

/// Multi-provider request scheduler.
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<ProviderRegistry>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    costs: Arc<CostTracker>,
    selector: ProviderSelector,
    events: EventBus,
    aggregator: Arc<MetricsAggregator>,
    state: Mutex<DispatchState>,
    outcomes_tx: mpsc::UnboundedSender<CallOutcome>,
    outcomes_rx: Mutex<mpsc::UnboundedReceiver<CallOutcome>>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Scheduler {
    /// Creates a scheduler over the given providers and counter store.
    pub fn new(
        config: SchedulerConfig,
        registry: ProviderRegistry,
        store: Arc<dyn CounterStore>,
    ) -> Result<Arc<Self>, SchedulerError> {
        config.validate()?;

        let mut queues = HashMap::new();
        let mut in_flight = HashMap::new();
        for provider in registry.iter() {
            queues.insert(provider.config.id.clone(), ProviderQueue::new());
            in_flight.insert(provider.config.id.clone(), HashSet::new());
        }

        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(4);

        Ok(Arc::new(Self {
            limiter: Arc::new(RateLimiter::new(store, config.fail_open)),
            cache: Arc::new(ResponseCache::new(config.cache_capacity, config.cache_ttl)),
            costs: Arc::new(CostTracker::new(config.monthly_budget)),
            selector: ProviderSelector::new(config.weights.clone()),
            events: EventBus::new(config.event_capacity),
            aggregator: Arc::new(MetricsAggregator::new()),
            registry: Arc::new(registry),
            state: Mutex::new(DispatchState { queues, in_flight }),
            outcomes_rx: Mutex::new(outcomes_rx),
            outcomes_tx,
            shutdown_tx,
            tasks: StdMutex::new(Vec::new()),
            running: AtomicBool::new(false),
            config,
        }))
    }

    /// Submits a request.
    ///
    /// A cache hit completes immediately without consuming queue space or
    /// rate-limit headroom. Otherwise the best-scoring provider for the
    /// model is chosen and the request queued on it.
    pub async fn submit(&self, submit: SubmitRequest) -> Result<SubmitOutcome, SchedulerError> {
        if let Some(response) = self.cache.get(&submit.prompt, &submit.model) {
            let request_id = Uuid::new_v4();
            self.aggregator.record_cache_hit();
            if let Some(counter) = prom::CACHE_HITS.get() {
                counter.inc();
            }
            self.events.emit(SchedulerEvent::RequestCompleted {
                request_id,
                response: response.clone(),
                source: ResponseSource::Cache,
            });
            return Ok(SubmitOutcome::Completed {
                request_id,
                response,
            });
        }
        if let Some(counter) = prom::CACHE_MISSES.get() {
            counter.inc();
        }

        let mut state = self.state.lock().await;
        let provider_id = self.select_provider(&state, &submit.model, None).await?;
        let provider = self
            .registry
            .get(&provider_id)
            .ok_or_else(|| SchedulerError::UnknownProvider(provider_id.clone()))?;

        let request = Request::new(
            submit,
            &provider_id,
            provider.config.cost_per_request,
            Utc::now(),
        );
        let request_id = request.id;
        let estimated_cost = request.estimated_cost;

        state
            .queues
            .get_mut(&provider_id)
            .ok_or_else(|| SchedulerError::UnknownProvider(provider_id.clone()))?
            .push(request);
        drop(state);

        tracing::debug!(
            request_id = %request_id,
            provider = %provider_id,
            "Request queued"
        );
        self.events.emit(SchedulerEvent::RequestQueued {
            request_id,
            provider: provider_id.clone(),
            estimated_cost,
        });

        Ok(SubmitOutcome::Queued {
            request_id,
            provider: provider_id,
        })
    }

    /// Scores candidates for a model and returns the winner's id.
    ///
    /// `exclude` removes the provider a request just failed on, so
    /// failover never bounces straight back.
    async fn select_provider(
        &self,
        state: &DispatchState,
        model: &str,
        exclude: Option<&str>,
    ) -> Result<String, SchedulerError> {
        let mut candidates = Vec::new();
        for provider in self.registry.supporting(model) {
            if exclude == Some(provider.config.id.as_str()) {
                continue;
            }
            let view = CandidateView {
                queue_len: state
                    .queues
                    .get(&provider.config.id)
                    .map(ProviderQueue::len)
                    .unwrap_or(0),
                in_flight: state
                    .in_flight
                    .get(&provider.config.id)
                    .map(HashSet::len)
                    .unwrap_or(0),
                rate_remaining: self.limiter.remaining(&provider.config).await,
            };
            candidates.push((provider.clone(), view));
        }

        self.selector.select(model, &candidates)
    }

    /// Runs one dispatch pass at the given instant.
    ///
    /// Outcomes from finished calls are folded in first so their
    /// concurrency slots free up within the same tick.
    pub async fn tick(&self, now: DateTime<Utc>) {
        self.drain_outcomes(now).await;
        self.dispatch(now).await;
        self.publish_depths().await;
    }

    async fn drain_outcomes(&self, now: DateTime<Utc>) {
        let mut outcomes = Vec::new();
        {
            let mut rx = self.outcomes_rx.lock().await;
            while let Ok(outcome) = rx.try_recv() {
                outcomes.push(outcome);
            }
        }

        for outcome in outcomes {
            let mut state = self.state.lock().await;
            if let Some(in_flight) = state.in_flight.get_mut(&outcome.request.provider) {
                in_flight.remove(&outcome.request.id);
            }

            match outcome.result {
                Ok(response) => {
                    drop(state);
                    self.complete(outcome.request, response, outcome.latency_ms, outcome.wait_ms);
                }
                Err(error) => {
                    self.handle_failure(&mut state, outcome.request, error, now)
                        .await;
                }
            }
        }
    }

    fn complete(&self, request: Request, response: CallResponse, latency_ms: u64, wait_ms: u64) {
        self.cache
            .insert(&request.submit.prompt, &request.submit.model, response.clone());
        self.costs.record(
            &request.provider,
            &request.submit.model,
            request.estimated_cost,
        );
        self.aggregator.record_completion(latency_ms, wait_ms);

        if let Some(counter) = prom::REQUESTS_TOTAL.get() {
            counter
                .with_label_values(&[&request.provider, "completed"])
                .inc();
        }
        if let Some(histogram) = prom::CALL_LATENCY.get() {
            histogram
                .with_label_values(&[&request.provider])
                .observe(latency_ms as f64 / 1000.0);
        }
        if let Some(counter) = prom::COST_DOLLARS.get() {
            counter
                .with_label_values(&[&request.provider])
                .inc_by(request.estimated_cost);
        }

        tracing::info!(
            request_id = %request.id,
            provider = %request.provider,
            latency_ms = latency_ms,
            "Request completed"
        );
        self.events.emit(SchedulerEvent::RequestCompleted {
            request_id: request.id,
            response,
            source: ResponseSource::Provider,
        });
    }

    async fn handle_failure(
        &self,
        state: &mut DispatchState,
        mut request: Request,
        error: ProviderError,
        now: DateTime<Utc>,
    ) {
        request.increment_retries();

        if !request.should_retry(self.config.max_retries) {
            self.aggregator.record_failure();
            if let Some(counter) = prom::REQUESTS_TOTAL.get() {
                counter
                    .with_label_values(&[&request.provider, "failed"])
                    .inc();
            }
            let terminal = SchedulerError::MaxRetriesExceeded {
                request_id: request.id,
                max_retries: self.config.max_retries,
                last_error: error.to_string(),
            };
            tracing::error!(
                request_id = %request.id,
                provider = %request.provider,
                error = %terminal,
                "Request failed terminally"
            );
            self.events.emit(SchedulerEvent::RequestFailed {
                request_id: request.id,
                error: terminal.to_string(),
            });
            return;
        }

        self.aggregator.record_retry();
        if let Some(counter) = prom::RETRIES_TOTAL.get() {
            counter.with_label_values(&[&request.provider]).inc();
        }

        let failed_provider = request.provider.clone();
        match self
            .select_provider(state, &request.submit.model, Some(&failed_provider))
            .await
        {
            Ok(alternate) => {
                // Failover dispatches immediately, no backoff.
                tracing::warn!(
                    request_id = %request.id,
                    from = %failed_provider,
                    to = %alternate,
                    error = %error,
                    "Failing over to alternate provider"
                );
                request.not_before = None;
                request.estimated_cost = self
                    .registry
                    .get(&alternate)
                    .map(|p| p.config.cost_per_request)
                    .unwrap_or(request.estimated_cost);
                request.provider = alternate.clone();
                if let Some(queue) = state.queues.get_mut(&alternate) {
                    queue.push_front_of_tier(request);
                }
            }
            Err(_) => {
                // No alternate: back off on the same provider, one tier down.
                request.apply_backoff(now);
                tracing::warn!(
                    request_id = %request.id,
                    provider = %failed_provider,
                    retries = request.retries,
                    error = %error,
                    "Backing off for retry"
                );
                if let Some(queue) = state.queues.get_mut(&failed_provider) {
                    queue.push_front_of_tier(request);
                }
            }
        }
    }

    async fn dispatch(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;

        for provider in self.registry.iter() {
            if provider.effective_health() == HealthState::Down {
                continue;
            }
            let id = provider.config.id.as_str();

            // Drain ready work until the queue, the concurrency ceiling,
            // or a rate window says stop.
            loop {
                let has_ready = state
                    .queues
                    .get(id)
                    .map(|q| q.has_ready(now))
                    .unwrap_or(false);
                if !has_ready {
                    break;
                }

                let in_flight = state.in_flight.get(id).map(HashSet::len).unwrap_or(0);
                if !self.limiter.admit(&provider.config, in_flight).await {
                    break;
                }

                let Some(request) = state.queues.get_mut(id).and_then(|q| q.pop_ready(now))
                else {
                    break;
                };
                if let Some(set) = state.in_flight.get_mut(id) {
                    set.insert(request.id);
                }

                self.spawn_call(provider.client.clone(), request, now);
            }
        }
    }

    fn spawn_call(
        &self,
        client: Arc<dyn crate::provider::ProviderClient>,
        request: Request,
        now: DateTime<Utc>,
    ) {
        let wait_ms = (now - request.created_at).num_milliseconds().max(0) as u64;
        let timeout = self.config.call_timeout;
        let tx = self.outcomes_tx.clone();

        tracing::debug!(
            request_id = %request.id,
            provider = %request.provider,
            wait_ms = wait_ms,
            "Dispatching request"
        );

        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let result = match tokio::time::timeout(
                timeout,
                client.call(&request.submit.prompt, &request.submit.model, &request.submit.params),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(timeout)),
            };
            let latency_ms = started.elapsed().as_millis() as u64;

            // The receiver only disappears on shutdown.
            let _ = tx.send(CallOutcome {
                request,
                result,
                latency_ms,
                wait_ms,
            });
        });
    }

    async fn publish_depths(&self) {
        let state = self.state.lock().await;
        let queue_depths: HashMap<String, usize> = state
            .queues
            .iter()
            .map(|(id, q)| (id.clone(), q.len()))
            .collect();
        let in_flight: HashMap<String, usize> = state
            .in_flight
            .iter()
            .map(|(id, set)| (id.clone(), set.len()))
            .collect();
        drop(state);

        if let Some(gauge) = prom::QUEUE_DEPTH.get() {
            for (id, depth) in &queue_depths {
                gauge.with_label_values(&[id]).set(*depth as f64);
            }
        }
        if let Some(gauge) = prom::IN_FLIGHT.get() {
            for (id, count) in &in_flight {
                gauge.with_label_values(&[id]).set(*count as f64);
            }
        }
        self.aggregator.set_depths(queue_depths, in_flight);
    }

    /// Starts the background loops: dispatch, health probing, metrics
    /// rollup, and the cost optimizer.
    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let mut tasks = self.tasks.lock().expect("task list lock poisoned");

        {
            let scheduler = self.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(scheduler.config.dispatch_interval);
                loop {
                    tokio::select! {
                        _ = interval.tick() => scheduler.tick(Utc::now()).await,
                        _ = shutdown.recv() => break,
                    }
                }
                tracing::debug!("Dispatch loop stopped");
            }));
        }

        {
            let scheduler = self.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            let checker = HealthChecker::new(
                self.config.probe_down_after,
                self.config.probe_timeout,
            );
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(scheduler.config.health_interval);
                loop {
                    tokio::select! {
                        _ = interval.tick() => checker.probe_all(&scheduler.registry).await,
                        _ = shutdown.recv() => break,
                    }
                }
                tracing::debug!("Health loop stopped");
            }));
        }

        {
            let scheduler = self.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(scheduler.config.metrics_interval);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let snapshot = scheduler.aggregator.rollup();
                            tracing::debug!(
                                completed = snapshot.completed,
                                failed = snapshot.failed,
                                cache_hits = snapshot.cache_hits,
                                error_rate = snapshot.error_rate,
                                "Metrics rollup"
                            );
                        }
                        _ = shutdown.recv() => break,
                    }
                }
                tracing::debug!("Metrics loop stopped");
            }));
        }

        {
            let scheduler = self.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            let optimizer = crate::optimizer::CostOptimizer::new(
                self.config.alert_threshold,
                self.config.ttl_raise_factor,
                self.config.deprioritize_ratio,
                self.config.weights.min_priority_weight,
            );
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(scheduler.config.optimizer_interval);
                // The first interval tick fires immediately; skip it so the
                // optimizer only ever sees a full interval of spend.
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            optimizer.run_once(
                                &scheduler.costs,
                                &scheduler.cache,
                                &scheduler.registry,
                                &scheduler.events,
                            );
                        }
                        _ = shutdown.recv() => break,
                    }
                }
                tracing::debug!("Optimizer loop stopped");
            }));
        }

        tracing::info!(
            providers = self.registry.len(),
            "Scheduler started"
        );
        Ok(())
    }

    /// Stops the background loops and waits for them to exit.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        let _ = self.shutdown_tx.send(());
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().expect("task list lock poisoned");
            guard.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }

    /// Administratively pauses a provider. Queued work stays queued and
    /// dispatches elsewhere only through failover.
    pub fn pause_provider(&self, id: &str) -> Result<(), SchedulerError> {
        let provider = self
            .registry
            .get(id)
            .ok_or_else(|| SchedulerError::UnknownProvider(id.to_string()))?;
        provider.pause();
        tracing::info!(provider = id, "Provider paused");
        Ok(())
    }

    /// Lifts a pause and returns the provider to healthy.
    pub fn resume_provider(&self, id: &str) -> Result<(), SchedulerError> {
        let provider = self
            .registry
            .get(id)
            .ok_or_else(|| SchedulerError::UnknownProvider(id.to_string()))?;
        provider.resume();
        tracing::info!(provider = id, "Provider resumed");
        Ok(())
    }

    /// Queue status for one provider, or all providers in registration
    /// order when `provider` is `None`.
    pub async fn get_queue_status(&self, provider: Option<&str>) -> Vec<QueueStatus> {
        let state = self.state.lock().await;
        self.registry
            .iter()
            .filter(|p| provider.map_or(true, |id| p.config.id == id))
            .map(|p| {
                let queue = state.queues.get(&p.config.id);
                QueueStatus {
                    provider: p.config.id.clone(),
                    depth: queue.map(ProviderQueue::len).unwrap_or(0),
                    in_flight: state
                        .in_flight
                        .get(&p.config.id)
                        .map(HashSet::len)
                        .unwrap_or(0),
                    by_tier: queue.map(ProviderQueue::depth_by_tier).unwrap_or_default(),
                }
            })
            .collect()
    }

    /// Current metrics rollup.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.aggregator.rollup()
    }

    /// Current spend breakdown.
    pub fn get_costs(&self) -> CostSnapshot {
        self.costs.snapshot()
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// The response cache, exposed for the optimizer and tests.
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// The provider registry.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CallParams, ProviderClient, ProviderConfig};
    use crate::ratelimit::MemoryCounterStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct MockClient {
        calls: AtomicU32,
        fail: AtomicBool,
    }

    impl MockClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail: AtomicBool::new(false),
            })
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderClient for MockClient {
        async fn call(
            &self,
            prompt: &str,
            _model: &str,
            _params: &CallParams,
        ) -> Result<CallResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ProviderError::RequestFailed("mock failure".to_string()));
            }
            Ok(CallResponse {
                content: format!("echo: {}", prompt),
                tokens_used: 5,
            })
        }
    }

    fn scheduler_with(
        configs: Vec<ProviderConfig>,
        clients: Vec<Arc<MockClient>>,
    ) -> Arc<Scheduler> {
        let mut registry = ProviderRegistry::new();
        for (config, client) in configs.into_iter().zip(clients) {
            registry.register(config, client);
        }
        Scheduler::new(
            SchedulerConfig::default(),
            registry,
            Arc::new(MemoryCounterStore::new()),
        )
        .expect("valid config")
    }

    async fn settle(scheduler: &Scheduler) {
        // Let spawned call tasks run, then fold in their outcomes.
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.tick(Utc::now()).await;
    }

    #[tokio::test]
    async fn test_submit_queues_and_tick_dispatches() {
        let client = MockClient::new();
        let scheduler = scheduler_with(
            vec![ProviderConfig::new("mock", "https://mock.example").with_model("gpt-4")],
            vec![client.clone()],
        );

        let outcome = scheduler
            .submit(SubmitRequest::new("gpt-4", "hello"))
            .await
            .expect("submit should succeed");
        assert!(matches!(outcome, SubmitOutcome::Queued { ref provider, .. } if provider == "mock"));

        scheduler.tick(Utc::now()).await;
        settle(&scheduler).await;

        assert_eq!(client.call_count(), 1);
        let metrics = scheduler.get_metrics();
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.failed, 0);
    }

    #[tokio::test]
    async fn test_second_identical_submit_hits_cache() {
        let client = MockClient::new();
        let scheduler = scheduler_with(
            vec![ProviderConfig::new("mock", "https://mock.example").with_model("gpt-4")],
            vec![client.clone()],
        );

        scheduler
            .submit(SubmitRequest::new("gpt-4", "hello"))
            .await
            .expect("submit should succeed");
        scheduler.tick(Utc::now()).await;
        settle(&scheduler).await;

        let outcome = scheduler
            .submit(SubmitRequest::new("gpt-4", "hello"))
            .await
            .expect("submit should succeed");
        match outcome {
            SubmitOutcome::Completed { response, .. } => {
                assert_eq!(response.content, "echo: hello");
            }
            other => panic!("expected cache completion, got {:?}", other),
        }
        assert_eq!(client.call_count(), 1);
        assert_eq!(scheduler.get_metrics().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_submit_fails_when_no_provider_supports_model() {
        let scheduler = scheduler_with(
            vec![ProviderConfig::new("mock", "https://mock.example").with_model("gpt-4")],
            vec![MockClient::new()],
        );

        let result = scheduler.submit(SubmitRequest::new("unknown-model", "hi")).await;
        assert!(matches!(
            result,
            Err(SchedulerError::NoProviderAvailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_paused_provider_rejects_submission() {
        let scheduler = scheduler_with(
            vec![ProviderConfig::new("mock", "https://mock.example").with_model("gpt-4")],
            vec![MockClient::new()],
        );

        scheduler.pause_provider("mock").expect("provider exists");
        let result = scheduler.submit(SubmitRequest::new("gpt-4", "hi")).await;
        assert!(matches!(
            result,
            Err(SchedulerError::NoProviderAvailable { .. })
        ));

        scheduler.resume_provider("mock").expect("provider exists");
        assert!(scheduler.submit(SubmitRequest::new("gpt-4", "hi")).await.is_ok());
    }

    #[tokio::test]
    async fn test_failover_to_alternate_provider() {
        let failing = MockClient::new();
        failing.fail.store(true, Ordering::SeqCst);
        let backup = MockClient::new();

        let scheduler = scheduler_with(
            vec![
                // Registered first, so it wins the initial selection.
                ProviderConfig::new("primary", "https://a.example")
                    .with_model("gpt-4")
                    .with_cost_per_request(0.001),
                ProviderConfig::new("backup", "https://b.example")
                    .with_model("gpt-4")
                    .with_cost_per_request(0.01),
            ],
            vec![failing.clone(), backup.clone()],
        );

        scheduler
            .submit(SubmitRequest::new("gpt-4", "hello"))
            .await
            .expect("submit should succeed");

        // Dispatch to primary, fail, fail over, dispatch to backup.
        scheduler.tick(Utc::now()).await;
        settle(&scheduler).await;
        settle(&scheduler).await;

        assert_eq!(failing.call_count(), 1);
        assert_eq!(backup.call_count(), 1);
        assert_eq!(scheduler.get_metrics().completed, 1);
        assert_eq!(scheduler.get_metrics().retried, 1);
    }

    #[tokio::test]
    async fn test_retries_exhaust_to_terminal_failure() {
        let failing = MockClient::new();
        failing.fail.store(true, Ordering::SeqCst);

        let scheduler = scheduler_with(
            vec![ProviderConfig::new("mock", "https://mock.example").with_model("gpt-4")],
            vec![failing.clone()],
        );
        let mut rx = scheduler.subscribe();

        scheduler
            .submit(SubmitRequest::new("gpt-4", "hello"))
            .await
            .expect("submit should succeed");

        // Drive the clock far enough past every backoff window.
        let mut now = Utc::now();
        for _ in 0..8 {
            scheduler.tick(now).await;
            tokio::time::sleep(Duration::from_millis(30)).await;
            now += chrono::Duration::seconds(60);
        }

        let metrics = scheduler.get_metrics();
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.completed, 0);
        assert_eq!(failing.call_count(), 3);

        let mut saw_failure = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SchedulerEvent::RequestFailed { .. }) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_queue_status_reports_depth() {
        let scheduler = scheduler_with(
            vec![ProviderConfig::new("mock", "https://mock.example").with_model("gpt-4")],
            vec![MockClient::new()],
        );

        for i in 0..3 {
            scheduler
                .submit(SubmitRequest::new("gpt-4", format!("prompt {}", i)))
                .await
                .expect("submit should succeed");
        }

        let status = scheduler.get_queue_status(Some("mock")).await;
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].depth, 3);
        assert_eq!(status[0].in_flight, 0);
    }

    #[tokio::test]
    async fn test_start_twice_errors() {
        let scheduler = scheduler_with(
            vec![ProviderConfig::new("mock", "https://mock.example").with_model("gpt-4")],
            vec![MockClient::new()],
        );

        scheduler.start().expect("first start");
        assert!(matches!(
            scheduler.start(),
            Err(SchedulerError::AlreadyRunning)
        ));
        scheduler.shutdown().await.expect("shutdown");
        assert!(matches!(
            scheduler.shutdown().await,
            Err(SchedulerError::NotRunning)
        ));
    }
}
