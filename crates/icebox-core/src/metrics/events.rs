//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the ingestion
//! pipeline or the recoverability engine. Events implement the
//! `InternalEvent` trait which emits the corresponding Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Outcome of ingesting a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Success,
    Skipped,
    Failed,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Success => "success",
            IngestOutcome::Skipped => "skipped",
            IngestOutcome::Failed => "failed",
        }
    }
}

/// Event emitted for each message passing through the ingestion coordinator.
pub struct MessageIngested {
    pub outcome: IngestOutcome,
    pub duration: Duration,
}

impl InternalEvent for MessageIngested {
    fn emit(self) {
        trace!(outcome = self.outcome.as_str(), "Message ingested");
        counter!("icebox_messages_ingested_total", "outcome" => self.outcome.as_str()).increment(1);
        histogram!("icebox_message_ingest_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a batch is committed to the backend.
pub struct BatchCommitted {
    pub size: usize,
    pub capacity: usize,
    pub duration: Duration,
}

impl InternalEvent for BatchCommitted {
    fn emit(self) {
        trace!(size = self.size, "Batch committed");
        counter!("icebox_batches_committed_total").increment(1);
        histogram!("icebox_batch_commit_duration_seconds").record(self.duration.as_secs_f64());
        if self.capacity > 0 {
            histogram!("icebox_batch_fullness_ratio")
                .record(self.size as f64 / self.capacity as f64);
        }
    }
}

/// Event emitted when a batch commit exhausts its retries.
pub struct BatchFailed {
    pub size: usize,
}

impl InternalEvent for BatchFailed {
    fn emit(self) {
        trace!(size = self.size, "Batch failed");
        counter!("icebox_batches_failed_total").increment(1);
    }
}

/// Event carrying the current consecutive-batch-failure count.
///
/// Reset to zero on any batch success; external alerting watches this gauge.
pub struct ConsecutiveBatchFailures {
    pub count: u64,
}

impl InternalEvent for ConsecutiveBatchFailures {
    fn emit(self) {
        gauge!("icebox_consecutive_batch_failures").set(self.count as f64);
    }
}

/// Event emitted when the capacity gate flips admission on or off.
pub struct IngestionFlowChanged {
    pub accepting: bool,
}

impl InternalEvent for IngestionFlowChanged {
    fn emit(self) {
        trace!(accepting = self.accepting, "Ingestion flow changed");
        gauge!("icebox_ingestion_accepting").set(if self.accepting { 1.0 } else { 0.0 });
        if !self.accepting {
            counter!("icebox_ingestion_paused_total").increment(1);
        }
    }
}

/// How a message body was handled by the body store policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyDisposition {
    Inline,
    Stored,
    NotStored,
}

impl BodyDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyDisposition::Inline => "inline",
            BodyDisposition::Stored => "stored",
            BodyDisposition::NotStored => "not_stored",
        }
    }
}

/// Event emitted for each body store policy decision.
pub struct BodyHandled {
    pub disposition: BodyDisposition,
    pub bytes: u64,
}

impl InternalEvent for BodyHandled {
    fn emit(self) {
        counter!("icebox_bodies_handled_total", "disposition" => self.disposition.as_str())
            .increment(1);
        counter!("icebox_body_bytes_total", "disposition" => self.disposition.as_str())
            .increment(self.bytes);
    }
}

/// Event emitted when retry commands are issued for a page of failures.
pub struct RetriesIssued {
    pub count: u64,
}

impl InternalEvent for RetriesIssued {
    fn emit(self) {
        trace!(count = self.count, "Retries issued");
        counter!("icebox_retries_issued_total").increment(self.count);
    }
}

/// Event emitted when a recoverability operation completes one batch.
pub struct OperationBatchCompleted {
    pub kind: &'static str,
}

impl InternalEvent for OperationBatchCompleted {
    fn emit(self) {
        counter!("icebox_operation_batches_total", "kind" => self.kind).increment(1);
    }
}

/// Event emitted when a recoverability operation reaches its terminal state.
pub struct OperationCompleted {
    pub kind: &'static str,
    pub duration: Duration,
}

impl InternalEvent for OperationCompleted {
    fn emit(self) {
        trace!(kind = self.kind, "Operation completed");
        counter!("icebox_operations_completed_total", "kind" => self.kind).increment(1);
        histogram!("icebox_operation_duration_seconds", "kind" => self.kind)
            .record(self.duration.as_secs_f64());
    }
}
