//! Long-running recoverability operations and their progress state.
//!
//! Operations are stateful documents persisted after every transition so a
//! process restart resumes from the last completed batch rather than from
//! zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a long-running recoverability operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Retry,
    Archive,
    Unarchive,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Retry => "retry",
            OperationKind::Archive => "archive",
            OperationKind::Unarchive => "unarchive",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key of an operation: `{kind}/{request_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey {
    pub kind: OperationKind,
    pub request_id: String,
}

impl OperationKey {
    pub fn new(kind: OperationKind, request_id: impl Into<String>) -> Self {
        Self {
            kind,
            request_id: request_id.into(),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.request_id)
    }
}

/// State of a long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    #[default]
    Started,
    Progressing,
    Finalizing,
    Completed,
}

/// Progress snapshot of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub percentage: f64,
    pub total: usize,
    pub processed: usize,
    pub remaining: usize,
}

/// Persisted state of one retry/archive/unarchive operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDocument {
    pub key: OperationKey,
    pub state: OperationState,
    pub total: usize,
    pub processed: usize,
    pub current_batch: usize,
    pub total_batches: usize,
    /// Human-readable name of the targeted group, when group-scoped.
    #[serde(default)]
    pub group_title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl OperationDocument {
    pub fn new(
        key: OperationKey,
        total: usize,
        batch_size: usize,
        group_title: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            state: OperationState::Started,
            total,
            processed: 0,
            current_batch: 0,
            total_batches: total.div_ceil(batch_size.max(1)),
            group_title,
            started_at: now,
            last_activity_at: now,
            completed_at: None,
        }
    }

    /// Record the completion of one batch of `count` messages.
    pub fn record_batch(&mut self, count: usize) {
        self.processed += count;
        self.current_batch += 1;
        self.state = OperationState::Progressing;
        self.last_activity_at = Utc::now();
    }

    /// Enter the finalizing state, covering any last partial batch.
    pub fn begin_finalizing(&mut self) {
        self.processed = self.total;
        self.state = OperationState::Finalizing;
        self.last_activity_at = Utc::now();
    }

    /// Enter the terminal state.
    pub fn complete(&mut self) {
        let now = Utc::now();
        self.state = OperationState::Completed;
        self.processed = self.total;
        self.last_activity_at = now;
        self.completed_at = Some(now);
    }

    pub fn is_completed(&self) -> bool {
        self.state == OperationState::Completed
    }

    /// Progress snapshot.
    ///
    /// Never reports 100% before the terminal state, even if `processed`
    /// momentarily equals `total` mid-batch.
    pub fn progress(&self) -> Progress {
        let percentage = if self.state == OperationState::Completed {
            100.0
        } else if self.total == 0 {
            0.0
        } else {
            let raw = self.processed as f64 / self.total as f64 * 100.0;
            ((raw * 100.0).round() / 100.0).min(99.99)
        };

        Progress {
            percentage,
            total: self.total,
            processed: self.processed,
            remaining: self.total.saturating_sub(self.processed),
        }
    }
}
