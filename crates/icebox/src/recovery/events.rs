//! Operation lifecycle events.
//!
//! Published over a broadcast channel, fire-and-forget: a lagging or absent
//! subscriber never blocks or fails the operation that emitted the event.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

use crate::model::{OperationDocument, OperationKey, Progress};

/// Where in its lifecycle an operation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationPhase {
    Starting,
    BatchCompleted,
    Finalizing,
    Completed,
}

/// A progress notification for one operation.
#[derive(Debug, Clone)]
pub struct OperationEvent {
    pub key: OperationKey,
    pub phase: OperationPhase,
    pub progress: Progress,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Present on terminal events of group-scoped operations.
    pub group_title: Option<String>,
}

impl OperationEvent {
    /// Snapshot an operation document into an event for the given phase.
    pub fn snapshot(doc: &OperationDocument, phase: OperationPhase) -> Self {
        Self {
            key: doc.key.clone(),
            phase,
            progress: doc.progress(),
            started_at: doc.started_at,
            last_activity_at: doc.last_activity_at,
            completed_at: doc.completed_at,
            group_title: doc.group_title.clone(),
        }
    }
}

/// Fire-and-forget publisher for operation events.
#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<OperationEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. A send error only means nobody is listening.
    pub fn publish(&self, event: OperationEvent) {
        trace!(key = %event.key, phase = ?event.phase, "Operation event");
        let _ = self.tx.send(event);
    }
}
