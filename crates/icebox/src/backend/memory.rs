//! In-memory reference backend.
//!
//! Commits are atomic per entity kind under a write lock, which satisfies the
//! contract's "all or retried" guarantee without partial-commit handling.
//! Used by tests and the in-memory deployment mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::{BackendError, EntityNotFoundSnafu};
use crate::model::{
    BodyEntry, EndpointSnapshot, FailureGroup, FailureRecord, FailureStatus, IngestedRecord,
    MessageKind, OperationDocument, OperationKey,
};

use super::{
    Backend, FailureEnvelope, FailureQuery, FailureScope, PageRequest, StageResult, UnitOfWork,
};

#[derive(Default)]
struct Inner {
    records: RwLock<HashMap<Uuid, IngestedRecord>>,
    failures: RwLock<HashMap<String, FailureRecord>>,
    groups: RwLock<HashMap<Uuid, FailureGroup>>,
    endpoints: RwLock<HashMap<Uuid, EndpointSnapshot>>,
    bodies: RwLock<HashMap<Uuid, BodyEntry>>,
    operations: RwLock<HashMap<String, OperationDocument>>,
    accepting: AtomicBool,
}

/// In-memory storage backend.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
    /// Capacity ceiling on stored record count (0 = unlimited).
    max_records: usize,
}

impl MemoryBackend {
    pub fn new(max_records: usize) -> Self {
        let inner = Inner {
            accepting: AtomicBool::new(true),
            ..Inner::default()
        };
        Self {
            inner: Arc::new(inner),
            max_records,
        }
    }

    /// Number of stored ingested records.
    pub fn record_count(&self) -> usize {
        self.inner.records.read().unwrap().len()
    }

    /// Number of stored failure records.
    pub fn failure_count(&self) -> usize {
        self.inner.failures.read().unwrap().len()
    }

    /// Force the capacity gate for tests.
    pub fn set_accepting(&self, accepting: bool) {
        self.inner.accepting.store(accepting, Ordering::Release);
    }

    fn matches(failure: &FailureRecord, query: &FailureQuery) -> bool {
        if failure.status != query.status {
            return false;
        }
        match &query.scope {
            FailureScope::All => true,
            FailureScope::Endpoint(endpoint) => failure
                .last_attempt()
                .is_some_and(|a| a.reason.endpoint == *endpoint),
            FailureScope::QueueAddress(queue) => failure
                .last_attempt()
                .is_some_and(|a| a.reason.queue_address == *queue),
            FailureScope::Group(id) => failure.group_ids.contains(id),
        }
    }
}

struct MemoryUnitOfWork {
    inner: Arc<Inner>,
    records: Vec<IngestedRecord>,
    failures: Vec<FailureEnvelope>,
    snapshots: Vec<EndpointSnapshot>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    fn record_message(&mut self, record: IngestedRecord) {
        self.records.push(record);
    }

    fn record_failure_attempt(&mut self, envelope: FailureEnvelope) {
        self.failures.push(envelope);
    }

    fn record_snapshot(&mut self, snapshot: EndpointSnapshot) {
        self.snapshots.push(snapshot);
    }

    fn len(&self) -> usize {
        self.records.len() + self.failures.len() + self.snapshots.len()
    }

    async fn commit(self: Box<Self>) -> Result<(), BackendError> {
        let Self {
            inner,
            records,
            failures,
            snapshots,
        } = *self;

        {
            let mut failure_map = inner.failures.write().unwrap();
            let mut groups = inner.groups.write().unwrap();

            for envelope in failures {
                let record = failure_map
                    .entry(envelope.message_id.clone())
                    .or_insert_with(|| {
                        FailureRecord::new(envelope.message_id.clone(), envelope.expires_at)
                    });
                record.merge_attempt(envelope.attempt);
                record.expires_at = record.expires_at.max(envelope.expires_at);

                for gid in envelope.group_ids {
                    // First membership of this record grows the group
                    if record.add_group(gid)
                        && let Some(group) = groups.get_mut(&gid)
                    {
                        group.count += 1;
                    }
                }
            }

            // Upsert-by-id: re-delivery of the same record is last-write-wins.
            // A processed observation of a retried message resolves its failure.
            let mut record_map = inner.records.write().unwrap();
            for record in records {
                if record.kind == MessageKind::Processed
                    && let Some(failure) = failure_map.get_mut(&record.message_id)
                    && failure.status == FailureStatus::RetryIssued
                {
                    debug!(message_id = %record.message_id, "Retried message processed, resolving failure");
                    failure.status = FailureStatus::Resolved;
                    failure.pending_retry_id = None;
                }
                record_map.insert(record.id, record);
            }
        }

        let mut endpoints = inner.endpoints.write().unwrap();
        for snapshot in snapshots {
            endpoints
                .entry(snapshot.id)
                .and_modify(|existing| {
                    existing.last_seen = existing.last_seen.max(snapshot.last_seen);
                })
                .or_insert(snapshot);
        }

        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn begin_unit_of_work(
        &self,
        batch_size_hint: usize,
    ) -> Result<Box<dyn UnitOfWork>, BackendError> {
        Ok(Box::new(MemoryUnitOfWork {
            inner: self.inner.clone(),
            records: Vec::with_capacity(batch_size_hint),
            failures: Vec::new(),
            snapshots: Vec::new(),
        }))
    }

    fn can_ingest_more(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    async fn refresh_capacity(&self) -> Result<(), BackendError> {
        let accepting =
            self.max_records == 0 || self.inner.records.read().unwrap().len() < self.max_records;
        self.inner.accepting.store(accepting, Ordering::Release);
        Ok(())
    }

    async fn record(&self, id: Uuid) -> Result<Option<IngestedRecord>, BackendError> {
        Ok(self.inner.records.read().unwrap().get(&id).cloned())
    }

    async fn failure(&self, message_id: &str) -> Result<Option<FailureRecord>, BackendError> {
        Ok(self.inner.failures.read().unwrap().get(message_id).cloned())
    }

    async fn body(&self, id: Uuid) -> Result<Option<BodyEntry>, BackendError> {
        Ok(self.inner.bodies.read().unwrap().get(&id).cloned())
    }

    async fn group(&self, id: Uuid) -> Result<Option<FailureGroup>, BackendError> {
        Ok(self.inner.groups.read().unwrap().get(&id).cloned())
    }

    async fn store_body(&self, entry: BodyEntry) -> Result<(), BackendError> {
        self.inner.bodies.write().unwrap().insert(entry.id, entry);
        Ok(())
    }

    async fn query_failure_ids(
        &self,
        query: &FailureQuery,
        page: PageRequest,
    ) -> Result<Vec<String>, BackendError> {
        let failures = self.inner.failures.read().unwrap();
        let mut matching: Vec<&FailureRecord> = failures
            .values()
            .filter(|f| Self::matches(f, query))
            .collect();
        matching.sort_by(|a, b| {
            let at = a.last_attempt().map(|x| x.attempted_at);
            let bt = b.last_attempt().map(|x| x.attempted_at);
            at.cmp(&bt).then_with(|| a.message_id.cmp(&b.message_id))
        });

        Ok(matching
            .into_iter()
            .skip(page.page * page.size)
            .take(page.size)
            .map(|f| f.message_id.clone())
            .collect())
    }

    async fn count_failures(&self, query: &FailureQuery) -> Result<usize, BackendError> {
        let failures = self.inner.failures.read().unwrap();
        Ok(failures.values().filter(|f| Self::matches(f, query)).count())
    }

    async fn stage_retry(
        &self,
        message_id: &str,
        retry_id: Uuid,
    ) -> Result<StageResult, BackendError> {
        let mut failures = self.inner.failures.write().unwrap();
        let Some(failure) = failures.get_mut(message_id) else {
            return EntityNotFoundSnafu {
                entity: "failure",
                id: message_id.to_string(),
            }
            .fail();
        };

        match failure.status {
            FailureStatus::RetryIssued => Ok(StageResult::AlreadyIssued),
            FailureStatus::Resolved | FailureStatus::Archived => Ok(StageResult::NotRetryable),
            FailureStatus::Unresolved => {
                failure.pending_retry_id = Some(retry_id);
                failure.status = FailureStatus::RetryIssued;
                Ok(StageResult::Staged)
            }
        }
    }

    async fn set_failure_statuses(
        &self,
        message_ids: &[String],
        status: FailureStatus,
    ) -> Result<usize, BackendError> {
        let mut failures = self.inner.failures.write().unwrap();
        let mut updated = 0;
        for id in message_ids {
            if let Some(failure) = failures.get_mut(id) {
                failure.status = status;
                if status == FailureStatus::Archived {
                    failure.pending_retry_id = None;
                }
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn upsert_group(&self, group: FailureGroup) -> Result<(), BackendError> {
        let mut groups = self.inner.groups.write().unwrap();
        groups
            .entry(group.id)
            .and_modify(|existing| {
                existing.last_seen = existing.last_seen.max(group.last_seen);
            })
            .or_insert(group);
        Ok(())
    }

    async fn load_operation(
        &self,
        key: &OperationKey,
    ) -> Result<Option<OperationDocument>, BackendError> {
        Ok(self
            .inner
            .operations
            .read()
            .unwrap()
            .get(&key.to_string())
            .cloned())
    }

    async fn store_operation(&self, doc: &OperationDocument) -> Result<(), BackendError> {
        self.inner
            .operations
            .write()
            .unwrap()
            .insert(doc.key.to_string(), doc.clone());
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, BackendError> {
        let mut purged = 0;

        let mut records = self.inner.records.write().unwrap();
        let before = records.len();
        records.retain(|_, r| r.expires_at > now);
        purged += before - records.len();
        drop(records);

        let mut failures = self.inner.failures.write().unwrap();
        let before = failures.len();
        failures.retain(|_, f| f.expires_at > now);
        purged += before - failures.len();
        drop(failures);

        let mut bodies = self.inner.bodies.write().unwrap();
        let before = bodies.len();
        bodies.retain(|_, b| b.expires_at > now);
        purged += before - bodies.len();

        if purged > 0 {
            debug!(purged, "Retention sweep removed expired entities");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BodyRef, FailureReason, MetadataBag, ProcessingAttempt, record_id};
    use chrono::TimeDelta;

    fn make_record(message_id: &str) -> IngestedRecord {
        let now = Utc::now();
        IngestedRecord {
            id: record_id(message_id, MessageKind::Processed),
            message_id: message_id.to_string(),
            kind: MessageKind::Processed,
            headers: Default::default(),
            metadata: MetadataBag::new(),
            body: BodyRef::NotStored,
            recorded_at: now,
            expires_at: now + TimeDelta::days(30),
        }
    }

    fn make_envelope(message_id: &str, offset_secs: i64) -> FailureEnvelope {
        let now = Utc::now();
        FailureEnvelope {
            message_id: message_id.to_string(),
            attempt: ProcessingAttempt {
                metadata: MetadataBag::new(),
                reason: FailureReason {
                    exception_type: "TimeoutException".into(),
                    message: "timed out".into(),
                    stack_trace: None,
                    queue_address: "orders".into(),
                    endpoint: "sales".into(),
                },
                attempted_at: now + TimeDelta::seconds(offset_secs),
            },
            group_ids: Vec::new(),
            expires_at: now + TimeDelta::days(45),
        }
    }

    #[tokio::test]
    async fn test_commit_upsert_is_idempotent() {
        let backend = MemoryBackend::new(0);

        for _ in 0..2 {
            let mut uow = backend.begin_unit_of_work(1).await.unwrap();
            uow.record_message(make_record("msg-1"));
            uow.commit().await.unwrap();
        }

        assert_eq!(backend.record_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_merge_across_commits() {
        let backend = MemoryBackend::new(0);

        for i in 0..3 {
            let mut uow = backend.begin_unit_of_work(1).await.unwrap();
            uow.record_failure_attempt(make_envelope("msg-1", i));
            uow.commit().await.unwrap();
        }

        let failure = backend.failure("msg-1").await.unwrap().unwrap();
        assert_eq!(failure.attempts.len(), 3);
    }

    #[tokio::test]
    async fn test_capacity_gate_refresh() {
        let backend = MemoryBackend::new(2);
        assert!(backend.can_ingest_more());

        let mut uow = backend.begin_unit_of_work(2).await.unwrap();
        uow.record_message(make_record("msg-1"));
        uow.record_message(make_record("msg-2"));
        uow.commit().await.unwrap();

        // Gate is cached: still open until refreshed
        assert!(backend.can_ingest_more());
        backend.refresh_capacity().await.unwrap();
        assert!(!backend.can_ingest_more());
    }

    #[tokio::test]
    async fn test_stage_retry_supersedes_pending() {
        let backend = MemoryBackend::new(0);
        let mut uow = backend.begin_unit_of_work(1).await.unwrap();
        uow.record_failure_attempt(make_envelope("msg-1", 0));
        uow.commit().await.unwrap();

        let first = Uuid::new_v4();
        assert_eq!(
            backend.stage_retry("msg-1", first).await.unwrap(),
            StageResult::Staged
        );
        // Second issue is skipped while a retry is in flight
        assert_eq!(
            backend.stage_retry("msg-1", Uuid::new_v4()).await.unwrap(),
            StageResult::AlreadyIssued
        );

        let failure = backend.failure("msg-1").await.unwrap().unwrap();
        assert_eq!(failure.pending_retry_id, Some(first));
    }

    #[tokio::test]
    async fn test_stage_retry_unknown_message_is_not_found() {
        let backend = MemoryBackend::new(0);
        let err = backend.stage_retry("nope", Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_processed_message_resolves_issued_retry() {
        let backend = MemoryBackend::new(0);
        let mut uow = backend.begin_unit_of_work(1).await.unwrap();
        uow.record_failure_attempt(make_envelope("msg-1", 0));
        uow.commit().await.unwrap();
        backend.stage_retry("msg-1", Uuid::new_v4()).await.unwrap();

        let mut uow = backend.begin_unit_of_work(1).await.unwrap();
        uow.record_message(make_record("msg-1"));
        uow.commit().await.unwrap();

        let failure = backend.failure("msg-1").await.unwrap().unwrap();
        assert_eq!(failure.status, FailureStatus::Resolved);
        assert!(failure.pending_retry_id.is_none());
    }

    #[tokio::test]
    async fn test_query_pagination_ordered_by_attempt_time() {
        let backend = MemoryBackend::new(0);
        let mut uow = backend.begin_unit_of_work(3).await.unwrap();
        uow.record_failure_attempt(make_envelope("msg-c", 3));
        uow.record_failure_attempt(make_envelope("msg-a", 1));
        uow.record_failure_attempt(make_envelope("msg-b", 2));
        uow.commit().await.unwrap();

        let query = FailureQuery::unresolved(FailureScope::All);
        let first = backend
            .query_failure_ids(&query, PageRequest { page: 0, size: 2 })
            .await
            .unwrap();
        assert_eq!(first, vec!["msg-a", "msg-b"]);

        let second = backend
            .query_failure_ids(&query, PageRequest { page: 1, size: 2 })
            .await
            .unwrap();
        assert_eq!(second, vec!["msg-c"]);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let backend = MemoryBackend::new(0);
        let mut record = make_record("msg-1");
        record.expires_at = Utc::now() - TimeDelta::seconds(1);

        let mut uow = backend.begin_unit_of_work(1).await.unwrap();
        uow.record_message(record);
        uow.commit().await.unwrap();

        let purged = backend.purge_expired(Utc::now()).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(backend.record_count(), 0);
    }
}
