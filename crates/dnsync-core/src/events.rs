//! Domain events
//!
//! Every observable state change is published on the [`EventBus`] as a
//! [`DomainEvent`]. Consumers (API layer, dashboards, the daemon's log
//! task) subscribe; the core never knows who is listening.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::config::OperationMode;
use crate::record::{DnsRecord, OrphanState};

/// Counts reported at the end of every reconciliation cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub created: usize,
    pub updated: usize,
    pub up_to_date: usize,
    pub deleted: usize,
    /// Tracked records currently pending cleanup
    pub orphaned: usize,
    pub errors: usize,
}

impl CycleSummary {
    /// Whether the cycle touched the provider at all
    pub fn has_changes(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }
}

/// Events published by the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DomainEvent {
    RecordCreated {
        record: DnsRecord,
    },

    RecordUpdated {
        record: DnsRecord,
        previous: DnsRecord,
    },

    RecordDeleted {
        record: DnsRecord,
    },

    /// Provider record cache reloaded from the provider
    RecordsRefreshed {
        count: usize,
    },

    /// Orphan set after a cycle or forced cleanup
    OrphanedUpdated {
        orphans: Vec<OrphanState>,
    },

    OperationModeChanged {
        previous: Option<OperationMode>,
        current: OperationMode,
    },

    CycleCompleted {
        summary: CycleSummary,
    },
}

impl DomainEvent {
    /// Stable event name, as exposed to subscribers
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::RecordCreated { .. } => "record-created",
            DomainEvent::RecordUpdated { .. } => "record-updated",
            DomainEvent::RecordDeleted { .. } => "record-deleted",
            DomainEvent::RecordsRefreshed { .. } => "records-refreshed",
            DomainEvent::OrphanedUpdated { .. } => "orphaned-updated",
            DomainEvent::OperationModeChanged { .. } => "operation-mode-changed",
            DomainEvent::CycleCompleted { .. } => "cycle-completed",
        }
    }
}

/// Broadcast channel for [`DomainEvent`]s.
///
/// Cloning is cheap; all clones publish to the same subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is fine.
    pub fn emit(&self, event: DomainEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            trace!(event = name, "No event subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_every_subscriber() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(DomainEvent::RecordsRefreshed { count: 3 });

        assert_eq!(a.recv().await.unwrap(), DomainEvent::RecordsRefreshed { count: 3 });
        assert_eq!(b.recv().await.unwrap(), DomainEvent::RecordsRefreshed { count: 3 });
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(8);
        bus.emit(DomainEvent::CycleCompleted {
            summary: CycleSummary::default(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = DomainEvent::OperationModeChanged {
            previous: Some(OperationMode::Proxy),
            current: OperationMode::Direct,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "operation-mode-changed");
        assert_eq!(json["current"], "direct");
        assert_eq!(event.name(), "operation-mode-changed");
    }
}
