//! Typed lifecycle events for scheduler observers.
//!
//! Callers subscribe to a bounded broadcast channel and receive request
//! lifecycle and budget events. Delivery is non-blocking: slow subscribers
//! lag and drop the oldest events rather than stalling the dispatch loop.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::provider::CallResponse;

/// Where a completed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    /// Served from the response cache without a provider call.
    Cache,
    /// Served by a live provider call.
    Provider,
}

impl std::fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseSource::Cache => write!(f, "cache"),
            ResponseSource::Provider => write!(f, "provider"),
        }
    }
}

/// Severity of a budget alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Utilization crossed the alert threshold.
    Warning,
    /// The monthly budget is exhausted.
    Critical,
}

/// A scheduler lifecycle event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// A request passed the cache check and was enqueued on a provider.
    RequestQueued {
        request_id: Uuid,
        provider: String,
        estimated_cost: f64,
    },
    /// A request completed, either from cache or from a provider.
    RequestCompleted {
        request_id: Uuid,
        response: CallResponse,
        source: ResponseSource,
    },
    /// A request failed terminally after exhausting retries.
    RequestFailed { request_id: Uuid, error: String },
    /// Budget utilization crossed the configured threshold.
    CostAlert {
        level: AlertLevel,
        utilization: f64,
        projected_monthly: f64,
    },
}

/// Broadcast bus for scheduler events.
///
/// Thin wrapper over `tokio::sync::broadcast` so emission never fails or
/// blocks when nobody is listening.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    /// Creates a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribes to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    /// Emits an event to all subscribers.
    ///
    /// A send error only means there are no subscribers; it is ignored.
    pub fn emit(&self, event: SchedulerEvent) {
        tracing::trace!(event = ?event, "Emitting scheduler event");
        let _ = self.tx.send(event);
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_source_display() {
        assert_eq!(ResponseSource::Cache.to_string(), "cache");
        assert_eq!(ResponseSource::Provider.to_string(), "provider");
    }

    #[test]
    fn test_emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.emit(SchedulerEvent::RequestFailed {
            request_id: Uuid::new_v4(),
            error: "boom".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let id = Uuid::new_v4();
        bus.emit(SchedulerEvent::RequestQueued {
            request_id: id,
            provider: "openai".to_string(),
            estimated_cost: 0.002,
        });

        match rx.recv().await.expect("event should arrive") {
            SchedulerEvent::RequestQueued {
                request_id,
                provider,
                ..
            } => {
                assert_eq!(request_id, id);
                assert_eq!(provider, "openai");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_event_serialization() {
        let event = SchedulerEvent::CostAlert {
            level: AlertLevel::Warning,
            utilization: 0.85,
            projected_monthly: 120.0,
        };
        let json = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(json["type"], "cost_alert");
        assert_eq!(json["level"], "warning");
    }
}
