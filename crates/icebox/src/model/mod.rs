//! Persisted entities of the audit/error store.
//!
//! Every entity id is deterministically derivable from its natural key
//! (message id, or `{operation_kind}/{request_id}`) so that re-processing
//! the same input is an idempotent upsert. Every persisted entity carries an
//! explicit `expires_at` honored by the backend's retention sweep.

mod operation;

pub use operation::{OperationDocument, OperationKey, OperationKind, OperationState, Progress};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Ordered header map with unique keys.
pub type Headers = IndexMap<String, String>;

/// Metadata bag attached to records and processing attempts.
pub type MetadataBag = HashMap<String, MetadataValue>;

/// Maximum processing attempts retained per failure record; oldest dropped.
pub const MAX_RETAINED_ATTEMPTS: usize = 10;

/// Namespace for deterministic v5 ids derived from natural keys.
const ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x1c, 0xeb, 0x0f, 0x5e, 0x9a, 0x3d, 0x4b, 0x21, 0x8f, 0x6a, 0x2e, 0x7c, 0x51, 0x04, 0xd9, 0x88,
]);

/// A typed metadata value derived by an enricher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    List(Vec<String>),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            MetadataValue::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Whether a message was observed on the audit path or the error path.
///
/// Part of the natural key: the same transport message id yields distinct
/// record ids for its processed and failed observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Processed,
    Failed,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Processed => "processed",
            MessageKind::Failed => "failed",
        }
    }
}

/// Deterministic record id from transport message id and direction.
pub fn record_id(message_id: &str, kind: MessageKind) -> Uuid {
    Uuid::new_v5(
        &ID_NAMESPACE,
        format!("{}/{}", kind.as_str(), message_id).as_bytes(),
    )
}

/// Deterministic group id from group type and name.
pub fn group_id(group_type: &str, group_name: &str) -> Uuid {
    Uuid::new_v5(
        &ID_NAMESPACE,
        format!("group/{group_type}/{group_name}").as_bytes(),
    )
}

/// Deterministic endpoint snapshot id from endpoint name and host id.
pub fn endpoint_id(name: &str, host_id: &str) -> Uuid {
    Uuid::new_v5(&ID_NAMESPACE, format!("endpoint/{name}/{host_id}").as_bytes())
}

/// How a message payload was persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BodyRef {
    /// The payload exceeded the size limit and was dropped.
    NotStored,
    /// Small text payload embedded in the record itself.
    Inline { text: String },
    /// Out-of-line payload referenced by url.
    Stored {
        url: String,
        size: usize,
        content_type: String,
    },
}

/// One observed message, immutable once committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedRecord {
    pub id: Uuid,
    pub message_id: String,
    pub kind: MessageKind,
    pub headers: Headers,
    pub metadata: MetadataBag,
    pub body: BodyRef,
    pub recorded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Summary of why a processing attempt failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    pub exception_type: String,
    pub message: String,
    #[serde(default)]
    pub stack_trace: Option<String>,
    /// Queue the message failed in.
    pub queue_address: String,
    /// Logical endpoint that failed to process the message.
    pub endpoint: String,
}

/// One failed processing attempt of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingAttempt {
    pub metadata: MetadataBag,
    pub reason: FailureReason,
    pub attempted_at: DateTime<Utc>,
}

/// Remediation status of a failed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    Unresolved,
    RetryIssued,
    Resolved,
    Archived,
}

/// Aggregates the processing attempts of one logical message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: Uuid,
    pub message_id: String,
    /// Attempts ordered by `attempted_at` ascending, capped at
    /// [`MAX_RETAINED_ATTEMPTS`].
    pub attempts: Vec<ProcessingAttempt>,
    pub status: FailureStatus,
    /// Marker for a staged retry; replaced when a fresh retry is issued.
    #[serde(default)]
    pub pending_retry_id: Option<Uuid>,
    /// Groups this record has been classified into.
    #[serde(default)]
    pub group_ids: Vec<Uuid>,
    pub expires_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(message_id: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        let message_id = message_id.into();
        Self {
            id: record_id(&message_id, MessageKind::Failed),
            message_id,
            attempts: Vec::new(),
            status: FailureStatus::Unresolved,
            pending_retry_id: None,
            group_ids: Vec::new(),
            expires_at,
        }
    }

    /// Merge a new attempt into the record.
    ///
    /// Attempts are kept ordered by attempt time, de-duplicated by exact
    /// attempt timestamp, and capped at [`MAX_RETAINED_ATTEMPTS`] with the
    /// oldest dropped. Returns true if the attempt was added.
    pub fn merge_attempt(&mut self, attempt: ProcessingAttempt) -> bool {
        if self
            .attempts
            .iter()
            .any(|a| a.attempted_at == attempt.attempted_at)
        {
            return false;
        }

        let pos = self
            .attempts
            .partition_point(|a| a.attempted_at <= attempt.attempted_at);
        self.attempts.insert(pos, attempt);

        while self.attempts.len() > MAX_RETAINED_ATTEMPTS {
            self.attempts.remove(0);
        }

        // A fresh attempt reopens the record
        self.status = FailureStatus::Unresolved;
        true
    }

    /// The most recent processing attempt, if any.
    pub fn last_attempt(&self) -> Option<&ProcessingAttempt> {
        self.attempts.last()
    }

    /// Record membership of a failure group. Returns true if newly added.
    pub fn add_group(&mut self, group: Uuid) -> bool {
        if self.group_ids.contains(&group) {
            return false;
        }
        self.group_ids.push(group);
        true
    }
}

/// A derived classification bucket for failed messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureGroup {
    pub id: Uuid,
    pub group_type: String,
    pub title: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Number of distinct failure records classified into this group.
    pub count: usize,
}

impl FailureGroup {
    pub fn new(group_type: impl Into<String>, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        let group_type = group_type.into();
        let title = title.into();
        Self {
            id: group_id(&group_type, &title),
            group_type,
            title,
            first_seen: now,
            last_seen: now,
            count: 0,
        }
    }
}

/// A known endpoint observed while enriching message headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    pub id: Uuid,
    pub name: String,
    pub host_id: String,
    pub last_seen: DateTime<Utc>,
}

impl EndpointSnapshot {
    pub fn new(name: impl Into<String>, host_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        let name = name.into();
        let host_id = host_id.into();
        Self {
            id: endpoint_id(&name, &host_id),
            name,
            host_id,
            last_seen: now,
        }
    }
}

/// A message payload held out-of-line by the body store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyEntry {
    pub id: Uuid,
    pub content_type: String,
    pub size: usize,
    /// UTF-8 text payload, when the content decoded cleanly.
    #[serde(default)]
    pub text: Option<String>,
    /// Raw payload for binary content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(with = "body_bytes")]
    pub binary: Option<Bytes>,
    pub expires_at: DateTime<Utc>,
}

mod body_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Bytes>, ser: S) -> Result<S::Ok, S::Error> {
        value.as_ref().map(|b| b.as_ref()).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Bytes>, D::Error> {
        Ok(Option::<Vec<u8>>::deserialize(de)?.map(Bytes::from))
    }
}
