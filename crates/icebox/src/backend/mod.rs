//! The contract any storage engine must satisfy.
//!
//! Ingestion and recoverability never branch on the backend type; they talk
//! to these traits only. Concrete document/relational engines live outside
//! this crate; [`MemoryBackend`] is the in-process reference implementation.

mod memory;

pub use memory::MemoryBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::BackendError;
use crate::model::{
    BodyEntry, EndpointSnapshot, FailureGroup, FailureRecord, FailureStatus, IngestedRecord,
    OperationDocument, OperationKey, ProcessingAttempt,
};

/// A failure observation buffered for commit: one new processing attempt of
/// a logical message, plus the groups derived from it.
#[derive(Debug, Clone)]
pub struct FailureEnvelope {
    pub message_id: String,
    pub attempt: ProcessingAttempt,
    pub group_ids: Vec<Uuid>,
    pub expires_at: DateTime<Utc>,
}

/// Which failure records a query selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureScope {
    All,
    Endpoint(String),
    QueueAddress(String),
    Group(Uuid),
}

/// A failure query: scope plus the status the records must be in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureQuery {
    pub scope: FailureScope,
    pub status: FailureStatus,
}

impl FailureQuery {
    pub fn unresolved(scope: FailureScope) -> Self {
        Self {
            scope,
            status: FailureStatus::Unresolved,
        }
    }

    pub fn archived(scope: FailureScope) -> Self {
        Self {
            scope,
            status: FailureStatus::Archived,
        }
    }
}

/// A fixed-size page of a query result.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl PageRequest {
    pub fn first(size: usize) -> Self {
        Self { page: 0, size }
    }
}

/// Result of staging a message for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResult {
    /// The message was staged; any previous pending retry was superseded.
    Staged,
    /// A retry is already issued for this message; not double-retried.
    AlreadyIssued,
    /// The message is not in a retryable state (resolved or archived).
    NotRetryable,
}

/// A transient, single-writer buffer of pending writes committed together.
///
/// Commit has idempotent upsert semantics keyed by deterministic id: either
/// all buffered entities are durably persisted, or for backends without
/// cross-kind atomic batches the commit is applied per entity kind and the
/// caller retries with backoff before reporting the batch failed.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Buffer an ingested record.
    fn record_message(&mut self, record: IngestedRecord);

    /// Buffer a failure attempt to merge into its failure record.
    fn record_failure_attempt(&mut self, envelope: FailureEnvelope);

    /// Buffer a known-endpoint snapshot.
    fn record_snapshot(&mut self, snapshot: EndpointSnapshot);

    /// Number of buffered entities.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Durably persist all buffered entities.
    async fn commit(self: Box<Self>) -> Result<(), BackendError>;
}

/// The minimal interface any storage engine must implement.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Start a transaction-like unit of work.
    async fn begin_unit_of_work(
        &self,
        batch_size_hint: usize,
    ) -> Result<Box<dyn UnitOfWork>, BackendError>;

    /// Whether ingestion may continue. Must be cheap: reads a cached value
    /// recomputed by [`Backend::refresh_capacity`] on a fixed interval.
    fn can_ingest_more(&self) -> bool;

    /// Recompute the cached capacity value. Called periodically by the
    /// engine, never from the ingestion hot path.
    async fn refresh_capacity(&self) -> Result<(), BackendError>;

    // ---- Fetch paths ----

    async fn record(&self, id: Uuid) -> Result<Option<IngestedRecord>, BackendError>;

    async fn failure(&self, message_id: &str) -> Result<Option<FailureRecord>, BackendError>;

    async fn body(&self, id: Uuid) -> Result<Option<BodyEntry>, BackendError>;

    async fn group(&self, id: Uuid) -> Result<Option<FailureGroup>, BackendError>;

    /// Store an out-of-line body entry.
    async fn store_body(&self, entry: BodyEntry) -> Result<(), BackendError>;

    // ---- Failure queries ----

    /// Message ids of failures matching the query, paged; ordered by last
    /// attempt time ascending for stable pagination.
    async fn query_failure_ids(
        &self,
        query: &FailureQuery,
        page: PageRequest,
    ) -> Result<Vec<String>, BackendError>;

    async fn count_failures(&self, query: &FailureQuery) -> Result<usize, BackendError>;

    // ---- Recoverability mutations ----

    /// Stage a message for retry: supersede any pending retry marker and
    /// mark the record `RetryIssued`.
    async fn stage_retry(
        &self,
        message_id: &str,
        retry_id: Uuid,
    ) -> Result<StageResult, BackendError>;

    /// Flip the status of the given failures. Returns how many were updated.
    async fn set_failure_statuses(
        &self,
        message_ids: &[String],
        status: FailureStatus,
    ) -> Result<usize, BackendError>;

    /// Idempotent group upsert: inserts the group if missing, refreshes
    /// `last_seen` otherwise.
    async fn upsert_group(&self, group: FailureGroup) -> Result<(), BackendError>;

    // ---- Operation documents ----

    async fn load_operation(
        &self,
        key: &OperationKey,
    ) -> Result<Option<OperationDocument>, BackendError>;

    async fn store_operation(&self, doc: &OperationDocument) -> Result<(), BackendError>;

    // ---- Retention ----

    /// Remove entities whose TTL elapsed. Returns how many were purged.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, BackendError>;
}
