//! Batched ingestion pipeline.
//!
//! The coordinator turns raw transport messages into persisted records:
//! enrich headers, classify failures into groups, apply the body policy,
//! then hand the assembled entry to the batch assembler. Per-message errors
//! degrade that message, never the pipeline.

mod assembler;
mod worker;

pub(crate) use assembler::Assembler;
pub(crate) use worker::WriterPool;

use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use icebox_core::emit;
use icebox_core::metrics::events::{IngestOutcome, IngestionFlowChanged, MessageIngested};

use crate::backend::{Backend, FailureEnvelope};
use crate::body::BodyStore;
use crate::config::RetentionConfig;
use crate::enrich::{Enricher, endpoint_snapshots, run_enrichers};
use crate::error::{AssemblerClosedSnafu, IngestError, IngestionPausedSnafu};
use crate::model::{
    BodyRef, EndpointSnapshot, FailureReason, Headers, IngestedRecord, MessageKind, MetadataValue,
    ProcessingAttempt, record_id,
};
use crate::recovery::{FailureGrouper, derive_groups};

/// Why a message was put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageIntent {
    Send,
    Publish,
    Reply,
}

impl MessageIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageIntent::Send => "send",
            MessageIntent::Publish => "publish",
            MessageIntent::Reply => "reply",
        }
    }
}

/// One message as delivered by the transport.
///
/// A message with a `failure` arrived on the error path; without one it is
/// an audit observation of successful processing. Sending and receiving
/// endpoint identity travels in `headers` (`OriginatingEndpoint` /
/// `ProcessingEndpoint` plus their host ids); the endpoint identity
/// enricher lifts it into metadata and known-endpoint snapshots.
#[derive(Debug, Clone)]
pub struct RawTransportMessage {
    pub message_id: String,
    pub headers: Headers,
    pub content_type: String,
    pub body: Bytes,
    pub intent: MessageIntent,
    pub failure: Option<FailureReason>,
}

/// A fully-prepared entry awaiting batch commit.
#[derive(Debug, Clone)]
pub struct IngestEntry {
    pub record: IngestedRecord,
    pub failure: Option<FailureEnvelope>,
    pub snapshots: Vec<EndpointSnapshot>,
}

/// Admission state published to producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    Accepting,
    Paused,
}

/// The ingestion coordinator.
pub struct IngestCoordinator {
    backend: Arc<dyn Backend>,
    body_store: BodyStore,
    enrichers: Vec<Box<dyn Enricher>>,
    groupers: Vec<Box<dyn FailureGrouper>>,
    retention: RetentionConfig,
    entry_tx: mpsc::Sender<IngestEntry>,
    flow_tx: watch::Sender<FlowControl>,
}

impl IngestCoordinator {
    pub fn new(
        backend: Arc<dyn Backend>,
        body_store: BodyStore,
        enrichers: Vec<Box<dyn Enricher>>,
        groupers: Vec<Box<dyn FailureGrouper>>,
        retention: RetentionConfig,
        entry_tx: mpsc::Sender<IngestEntry>,
    ) -> Self {
        let (flow_tx, _) = watch::channel(FlowControl::Accepting);
        Self {
            backend,
            body_store,
            enrichers,
            groupers,
            retention,
            entry_tx,
            flow_tx,
        }
    }

    /// Subscribe to the pause/resume signal.
    pub fn flow(&self) -> watch::Receiver<FlowControl> {
        self.flow_tx.subscribe()
    }

    /// Re-publish the flow signal from the capacity gate. Called after each
    /// capacity refresh; only state changes are broadcast.
    pub fn refresh_flow(&self) {
        let flow = if self.backend.can_ingest_more() {
            FlowControl::Accepting
        } else {
            FlowControl::Paused
        };

        let changed = self.flow_tx.send_if_modified(|current| {
            if *current == flow {
                return false;
            }
            *current = flow;
            true
        });

        if changed {
            let accepting = flow == FlowControl::Accepting;
            debug!(accepting, "Ingestion flow changed");
            emit!(IngestionFlowChanged { accepting });
        }
    }

    /// Ingest one transport message.
    ///
    /// Blocks (awaits queue capacity) when the inbound queue is full rather
    /// than dropping. Returns `IngestionPaused` without submitting anything
    /// while the capacity gate is closed.
    pub async fn ingest(&self, message: RawTransportMessage) -> Result<(), IngestError> {
        let started = Instant::now();

        if !self.backend.can_ingest_more() {
            emit!(MessageIngested {
                outcome: IngestOutcome::Skipped,
                duration: started.elapsed(),
            });
            return IngestionPausedSnafu.fail();
        }

        let result = self.prepare_and_submit(message).await;

        let outcome = match &result {
            Ok(()) => IngestOutcome::Success,
            Err(_) => IngestOutcome::Failed,
        };
        emit!(MessageIngested {
            outcome,
            duration: started.elapsed(),
        });

        result
    }

    async fn prepare_and_submit(&self, message: RawTransportMessage) -> Result<(), IngestError> {
        let now = Utc::now();
        let kind = if message.failure.is_some() {
            MessageKind::Failed
        } else {
            MessageKind::Processed
        };
        let ttl = match kind {
            MessageKind::Processed => self.retention.audit_ttl(),
            MessageKind::Failed => self.retention.error_ttl(),
        };
        let expires_at = now + ttl;
        let id = record_id(&message.message_id, kind);

        let mut metadata = run_enrichers(&self.enrichers, &message.headers);
        metadata.insert(
            "MessageIntent".to_string(),
            MetadataValue::String(message.intent.as_str().to_string()),
        );

        let snapshots = endpoint_snapshots(&message.headers, now);

        // A body store failure degrades to NotStored; the record still lands.
        let body = match self
            .body_store
            .store(id, &message.content_type, message.body, expires_at)
            .await
        {
            Ok(body_ref) => body_ref,
            Err(e) => {
                warn!(message_id = %message.message_id, "Body store failed, continuing without body: {e}");
                BodyRef::NotStored
            }
        };

        let failure = match message.failure {
            Some(reason) => {
                let groups = derive_groups(&self.groupers, &reason, now);
                let mut group_ids = Vec::with_capacity(groups.len());
                for group in groups {
                    group_ids.push(group.id);
                    // Group upsert failures lose freshness, not the attempt
                    if let Err(e) = self.backend.upsert_group(group).await {
                        warn!(message_id = %message.message_id, "Group upsert failed: {e}");
                    }
                }

                Some(FailureEnvelope {
                    message_id: message.message_id.clone(),
                    attempt: ProcessingAttempt {
                        metadata: metadata.clone(),
                        reason,
                        attempted_at: now,
                    },
                    group_ids,
                    expires_at,
                })
            }
            None => None,
        };

        let entry = IngestEntry {
            record: IngestedRecord {
                id,
                message_id: message.message_id,
                kind,
                headers: message.headers,
                metadata,
                body,
                recorded_at: now,
                expires_at,
            },
            failure,
            snapshots,
        };

        self.entry_tx
            .send(entry)
            .await
            .map_err(|_| AssemblerClosedSnafu.build())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::BodyStoreConfig;
    use crate::enrich::default_enrichers;
    use crate::model::MetadataBag;
    use crate::recovery::default_groupers;

    /// Minimal prepared entry for assembler/writer tests.
    pub(crate) fn entry(message_id: &str) -> IngestEntry {
        let now = Utc::now();
        IngestEntry {
            record: IngestedRecord {
                id: record_id(message_id, MessageKind::Processed),
                message_id: message_id.to_string(),
                kind: MessageKind::Processed,
                headers: Headers::new(),
                metadata: MetadataBag::new(),
                body: BodyRef::NotStored,
                recorded_at: now,
                expires_at: now + chrono::TimeDelta::days(30),
            },
            failure: None,
            snapshots: Vec::new(),
        }
    }

    fn coordinator(
        backend: Arc<MemoryBackend>,
    ) -> (IngestCoordinator, mpsc::Receiver<IngestEntry>) {
        let (entry_tx, entry_rx) = mpsc::channel(16);
        let body_store = BodyStore::new(backend.clone(), BodyStoreConfig::default());
        let coordinator = IngestCoordinator::new(
            backend,
            body_store,
            default_enrichers(),
            default_groupers(),
            RetentionConfig::default(),
            entry_tx,
        );
        (coordinator, entry_rx)
    }

    fn audit_message(message_id: &str) -> RawTransportMessage {
        RawTransportMessage {
            message_id: message_id.to_string(),
            headers: Headers::new(),
            content_type: "application/json".to_string(),
            body: Bytes::from_static(b"{\"ok\":true}"),
            intent: MessageIntent::Send,
            failure: None,
        }
    }

    fn failed_message(message_id: &str) -> RawTransportMessage {
        RawTransportMessage {
            failure: Some(FailureReason {
                exception_type: "TimeoutException".into(),
                message: "timed out".into(),
                stack_trace: None,
                queue_address: "orders".into(),
                endpoint: "sales".into(),
            }),
            ..audit_message(message_id)
        }
    }

    #[tokio::test]
    async fn test_audit_message_submitted_inline_body() {
        let backend = Arc::new(MemoryBackend::new(0));
        let (coordinator, mut entries) = coordinator(backend);

        coordinator.ingest(audit_message("msg-1")).await.unwrap();

        let entry = entries.recv().await.unwrap();
        assert_eq!(entry.record.kind, MessageKind::Processed);
        assert!(entry.failure.is_none());
        assert!(matches!(entry.record.body, BodyRef::Inline { .. }));
        assert_eq!(
            entry.record.metadata["MessageIntent"].as_str(),
            Some("send")
        );
    }

    #[tokio::test]
    async fn test_failed_message_carries_envelope_and_groups() {
        let backend = Arc::new(MemoryBackend::new(0));
        let (coordinator, mut entries) = coordinator(backend.clone());

        coordinator.ingest(failed_message("msg-1")).await.unwrap();

        let entry = entries.recv().await.unwrap();
        assert_eq!(entry.record.kind, MessageKind::Failed);
        let envelope = entry.failure.unwrap();
        // Exception grouper + queue grouper
        assert_eq!(envelope.group_ids.len(), 2);
        for gid in &envelope.group_ids {
            assert!(backend.group(*gid).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_closed_gate_submits_nothing() {
        let backend = Arc::new(MemoryBackend::new(0));
        backend.set_accepting(false);
        let (coordinator, mut entries) = coordinator(backend);

        let err = coordinator.ingest(audit_message("msg-1")).await.unwrap_err();
        assert!(matches!(err, IngestError::IngestionPaused));
        assert!(entries.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_flow_signal_follows_capacity_gate() {
        let backend = Arc::new(MemoryBackend::new(0));
        let (coordinator, _entries) = coordinator(backend.clone());
        let flow = coordinator.flow();
        assert_eq!(*flow.borrow(), FlowControl::Accepting);

        backend.set_accepting(false);
        coordinator.refresh_flow();
        assert_eq!(*flow.borrow(), FlowControl::Paused);

        backend.set_accepting(true);
        coordinator.refresh_flow();
        assert_eq!(*flow.borrow(), FlowControl::Accepting);
    }

    #[tokio::test]
    async fn test_distinct_ids_for_audit_and_error_observations() {
        let backend = Arc::new(MemoryBackend::new(0));
        let (coordinator, mut entries) = coordinator(backend);

        coordinator.ingest(audit_message("msg-1")).await.unwrap();
        coordinator.ingest(failed_message("msg-1")).await.unwrap();

        let a = entries.recv().await.unwrap();
        let b = entries.recv().await.unwrap();
        assert_ne!(a.record.id, b.record.id);
    }
}
