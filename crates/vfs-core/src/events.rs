//! Publish event types, envelope schema, and event bus.
//!
//! The publish worker and the publish manager emit [`ServerEvent`]s into a
//! single broadcast channel. Consumers (cache flushers, search indexers,
//! audit logs) subscribe independently and receive [`EventEnvelope`]s.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

// ============================================================================
// Event Envelope
// ============================================================================

/// Actor metadata for event attribution.
#[derive(Debug, Clone, Serialize)]
pub struct EventActor {
    /// Actor type: `"system"` or `"user"`.
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EventActor {
    /// System actor (publish worker, upgrades).
    pub fn system() -> Self {
        Self {
            kind: "system".to_string(),
            id: None,
            name: None,
        }
    }

    /// User actor.
    pub fn user(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            kind: "user".to_string(),
            id: Some(id.into()),
            name,
        }
    }
}

/// Optional emission context for events.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    /// Who caused the event. Defaults to the system actor.
    pub actor: Option<EventActor>,
    /// Correlation ID for tracing related events (usually the publish job id).
    pub correlation_id: Option<Uuid>,
}

/// Versioned event envelope.
///
/// `event_type` uses dot-namespaced names (`"publish.completed"`); the
/// `payload` carries the domain event.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// UUIDv7, so envelopes sort by emission time.
    pub event_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub actor: EventActor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub payload_version: u32,
    pub payload: ServerEvent,
}

impl EventEnvelope {
    /// Envelope with the system actor.
    pub fn new(event: ServerEvent) -> Self {
        Self::with_context(event, EventContext::default())
    }

    pub fn with_context(event: ServerEvent, ctx: EventContext) -> Self {
        Self {
            event_id: crate::uuid_utils::new_v7(),
            event_type: event.namespaced_event_type().to_string(),
            occurred_at: Utc::now(),
            actor: ctx.actor.unwrap_or_else(EventActor::system),
            entity_type: event.entity_type().map(String::from),
            entity_id: event.entity_id().map(|id| id.to_string()),
            correlation_id: ctx.correlation_id,
            payload_version: 1,
            payload: event,
        }
    }
}

// ============================================================================
// Server Event
// ============================================================================

/// Publish lifecycle events, serialized with a `type` tag.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A publish job entered the queue.
    PublishQueued { job_id: Uuid, user_name: String },
    /// The worker picked up a publish job.
    PublishStarted { job_id: Uuid },
    /// A publish committed and recorded a history entry.
    PublishCompleted {
        job_id: Uuid,
        history_id: Uuid,
        resource_count: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    /// A publish job failed; nothing was committed.
    PublishFailed { job_id: Uuid, error: String },
    /// Retention removed old history entries.
    HistoryPurged { removed: u64 },
}

impl ServerEvent {
    /// Short event name.
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::PublishQueued { .. } => "PublishQueued",
            ServerEvent::PublishStarted { .. } => "PublishStarted",
            ServerEvent::PublishCompleted { .. } => "PublishCompleted",
            ServerEvent::PublishFailed { .. } => "PublishFailed",
            ServerEvent::HistoryPurged { .. } => "HistoryPurged",
        }
    }

    /// Namespaced event type for the envelope.
    pub fn namespaced_event_type(&self) -> &'static str {
        match self {
            ServerEvent::PublishQueued { .. } => "publish.queued",
            ServerEvent::PublishStarted { .. } => "publish.started",
            ServerEvent::PublishCompleted { .. } => "publish.completed",
            ServerEvent::PublishFailed { .. } => "publish.failed",
            ServerEvent::HistoryPurged { .. } => "history.purged",
        }
    }

    pub fn entity_type(&self) -> Option<&'static str> {
        match self {
            ServerEvent::HistoryPurged { .. } => None,
            _ => Some("publish_job"),
        }
    }

    pub fn entity_id(&self) -> Option<Uuid> {
        match self {
            ServerEvent::PublishQueued { job_id, .. }
            | ServerEvent::PublishStarted { job_id }
            | ServerEvent::PublishCompleted { job_id, .. }
            | ServerEvent::PublishFailed { job_id, .. } => Some(*job_id),
            ServerEvent::HistoryPurged { .. } => None,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based event bus.
///
/// Slow receivers that fall behind get a `Lagged` error and miss events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit with the system actor. Dropped silently without subscribers.
    pub fn emit(&self, event: ServerEvent) {
        self.send(EventEnvelope::new(event));
    }

    pub fn emit_with_context(&self, event: ServerEvent, ctx: EventContext) {
        self.send(EventEnvelope::with_context(event, ctx));
    }

    fn send(&self, envelope: EventEnvelope) {
        tracing::debug!(
            subsystem = "core",
            component = "event_bus",
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();

        bus.emit(ServerEvent::HistoryPurged { removed: 2 });

        let envelope = rx.recv().await.unwrap();
        assert!(matches!(
            envelope.payload,
            ServerEvent::HistoryPurged { removed: 2 }
        ));
        assert_eq!(envelope.event_type, "history.purged");
        assert_eq!(envelope.payload_version, 1);
        assert_eq!(envelope.actor.kind, "system");
        assert!(envelope.entity_type.is_none());
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::new(32);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let job_id = Uuid::new_v4();
        bus.emit(ServerEvent::PublishStarted { job_id });

        for rx in [&mut rx1, &mut rx2] {
            let envelope = rx.recv().await.unwrap();
            assert_eq!(envelope.event_type, "publish.started");
            assert_eq!(envelope.entity_id, Some(job_id.to_string()));
        }
    }

    #[test]
    fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::new(4);
        bus.emit(ServerEvent::HistoryPurged { removed: 0 });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_event_bus_lagged_receiver() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for removed in 0..5 {
            bus.emit(ServerEvent::HistoryPurged { removed });
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[test]
    fn test_publish_completed_json() {
        let event = ServerEvent::PublishCompleted {
            job_id: Uuid::nil(),
            history_id: Uuid::nil(),
            resource_count: 3,
            duration_ms: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"PublishCompleted""#));
        assert!(json.contains(r#""resource_count":3"#));
        assert!(!json.contains("duration_ms"));
    }

    #[test]
    fn test_namespaced_event_types() {
        let id = Uuid::nil();
        let cases = [
            (
                ServerEvent::PublishQueued {
                    job_id: id,
                    user_name: String::new(),
                },
                "publish.queued",
            ),
            (ServerEvent::PublishStarted { job_id: id }, "publish.started"),
            (
                ServerEvent::PublishFailed {
                    job_id: id,
                    error: String::new(),
                },
                "publish.failed",
            ),
            (ServerEvent::HistoryPurged { removed: 1 }, "history.purged"),
        ];
        for (event, expected) in cases {
            assert_eq!(event.namespaced_event_type(), expected);
        }
    }

    #[test]
    fn test_envelope_with_context() {
        let correlation = Uuid::new_v4();
        let envelope = EventEnvelope::with_context(
            ServerEvent::PublishStarted { job_id: Uuid::nil() },
            EventContext {
                actor: Some(EventActor::user("42", Some("editor".to_string()))),
                correlation_id: Some(correlation),
            },
        );
        assert_eq!(envelope.actor.kind, "user");
        assert_eq!(envelope.correlation_id, Some(correlation));
        assert_eq!(envelope.entity_type.as_deref(), Some("publish_job"));
        assert_eq!(envelope.event_id.get_version_num(), 7);
    }
}
