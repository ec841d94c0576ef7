use serde::Serialize;
use tokio::sync::broadcast;

/// Domain events emitted by the storage engine for external delivery
/// (notification fan-out, audit logging).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    ContentCreated {
        hash: String,
        size: i64,
    },
    ContentDeleted {
        hash: String,
    },
    FileCreated {
        id: String,
        owner_id: String,
        hash: String,
    },
    FileDeleted {
        id: String,
        owner_id: String,
        hash: String,
    },
}

/// Broadcast bus for domain events.
///
/// Constructed once at bootstrap and injected through `AppState`; consumers
/// subscribe for delivery to external systems. Emission is best-effort: with
/// no subscribers the event is dropped, never an error.
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: DomainEvent) {
        tracing::debug!(?event, "domain event");
        let _ = self.tx.send(event);
    }
}
