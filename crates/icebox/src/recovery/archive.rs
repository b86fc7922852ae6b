//! Group archive and unarchive operations.
//!
//! Status flips run in batches with the operation document persisted after
//! every batch, so a crash resumes from the last completed batch instead of
//! restarting. The operation key is `{kind}/{group_id}`; only one operation
//! per key runs at a time.

use chrono::Utc;
use snafu::ResultExt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use icebox_core::emit;
use icebox_core::metrics::events::{OperationBatchCompleted, OperationCompleted};

use crate::backend::{Backend, FailureQuery, FailureScope, PageRequest};
use crate::error::{RecoverabilityError, RecoveryBackendSnafu, RecoveryNotFoundSnafu};
use crate::model::{FailureStatus, OperationDocument, OperationKey, OperationKind};

use super::events::{EventPublisher, OperationEvent, OperationPhase};
use super::operations::InFlightOperations;

/// Runs archive and unarchive operations over failure groups.
pub struct ArchiveEngine {
    backend: Arc<dyn Backend>,
    in_flight: InFlightOperations,
    events: EventPublisher,
    batch_size: usize,
}

impl ArchiveEngine {
    pub fn new(
        backend: Arc<dyn Backend>,
        in_flight: InFlightOperations,
        events: EventPublisher,
        batch_size: usize,
    ) -> Self {
        Self {
            backend,
            in_flight,
            events,
            batch_size: batch_size.max(1),
        }
    }

    /// Archive every unresolved failure in the group.
    pub async fn archive(
        &self,
        group_id: Uuid,
    ) -> Result<OperationDocument, RecoverabilityError> {
        self.run(group_id, OperationKind::Archive).await
    }

    /// Move every archived failure in the group back to unresolved.
    pub async fn unarchive(
        &self,
        group_id: Uuid,
    ) -> Result<OperationDocument, RecoverabilityError> {
        self.run(group_id, OperationKind::Unarchive).await
    }

    async fn run(
        &self,
        group_id: Uuid,
        kind: OperationKind,
    ) -> Result<OperationDocument, RecoverabilityError> {
        let key = OperationKey::new(kind, group_id.to_string());
        let _ticket = self.in_flight.try_claim(&key)?;

        let group = self
            .backend
            .group(group_id)
            .await
            .context(RecoveryBackendSnafu)?
            .ok_or_else(|| {
                RecoveryNotFoundSnafu {
                    entity: "group",
                    id: group_id.to_string(),
                }
                .build()
            })?;

        let (query, target_status) = match kind {
            OperationKind::Archive => (
                FailureQuery::unresolved(FailureScope::Group(group_id)),
                FailureStatus::Archived,
            ),
            OperationKind::Unarchive => (
                FailureQuery::archived(FailureScope::Group(group_id)),
                FailureStatus::Unresolved,
            ),
            OperationKind::Retry => unreachable!("retry runs through the retry engine"),
        };

        let mut doc = self.load_or_start(&key, &query, group.title.clone()).await?;
        self.persist(&doc).await?;
        self.events
            .publish(OperationEvent::snapshot(&doc, OperationPhase::Starting));

        // Each flip removes records from the query's result set, so page
        // zero always holds the next batch.
        loop {
            let page = self
                .backend
                .query_failure_ids(&query, PageRequest::first(self.batch_size))
                .await
                .context(RecoveryBackendSnafu)?;
            if page.is_empty() {
                break;
            }

            let updated = self
                .backend
                .set_failure_statuses(&page, target_status)
                .await
                .context(RecoveryBackendSnafu)?;

            doc.record_batch(updated);
            self.persist(&doc).await?;
            self.events
                .publish(OperationEvent::snapshot(&doc, OperationPhase::BatchCompleted));
            emit!(OperationBatchCompleted {
                kind: kind.as_str()
            });
            debug!(key = %doc.key, updated, processed = doc.processed, "Batch flipped");
        }

        doc.begin_finalizing();
        self.persist(&doc).await?;
        self.events
            .publish(OperationEvent::snapshot(&doc, OperationPhase::Finalizing));

        doc.complete();
        self.persist(&doc).await?;
        self.events
            .publish(OperationEvent::snapshot(&doc, OperationPhase::Completed));

        emit!(OperationCompleted {
            kind: kind.as_str(),
            duration: (Utc::now() - doc.started_at).to_std().unwrap_or_default(),
        });
        info!(
            key = %doc.key,
            group = %group.title,
            processed = doc.processed,
            "Operation completed"
        );
        Ok(doc)
    }

    /// Resume an interrupted operation with the same key, or start fresh.
    async fn load_or_start(
        &self,
        key: &OperationKey,
        query: &FailureQuery,
        group_title: String,
    ) -> Result<OperationDocument, RecoverabilityError> {
        if let Some(existing) = self
            .backend
            .load_operation(key)
            .await
            .context(RecoveryBackendSnafu)?
            && !existing.is_completed()
        {
            info!(key = %key, processed = existing.processed, "Resuming interrupted operation");
            return Ok(existing);
        }

        let total = self
            .backend
            .count_failures(query)
            .await
            .context(RecoveryBackendSnafu)?;
        Ok(OperationDocument::new(
            key.clone(),
            total,
            self.batch_size,
            Some(group_title),
        ))
    }

    async fn persist(&self, doc: &OperationDocument) -> Result<(), RecoverabilityError> {
        self.backend
            .store_operation(doc)
            .await
            .context(RecoveryBackendSnafu)
    }
}
