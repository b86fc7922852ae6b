//! Retry issuance.
//!
//! A retry request targets one message, an explicit id list, or a failure
//! query. Each selected failure is staged (its pending retry marker replaced
//! and its status flipped to `RetryIssued`), then the retry command is
//! forwarded to the transport through a [`RetryDispatcher`]. Query targets
//! page through the backend at a fixed page size; staging removes records
//! from the unresolved result set, so the engine re-reads page zero until it
//! comes back empty. Coverage is at-least-once across a changing result set.

use async_trait::async_trait;
use chrono::Utc;
use snafu::{IntoError, ResultExt};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use icebox_core::emit;
use icebox_core::metrics::events::{OperationCompleted, RetriesIssued};

use crate::backend::{Backend, FailureQuery, FailureScope, PageRequest, StageResult};
use crate::error::{
    GroupArchivingSnafu, RecoverabilityError, RecoveryBackendSnafu, RecoveryNotFoundSnafu,
};
use crate::model::{OperationDocument, OperationKey, OperationKind};

use super::events::{EventPublisher, OperationEvent, OperationPhase};
use super::operations::InFlightOperations;

/// What a retry request selects.
#[derive(Debug, Clone)]
pub enum RetryTarget {
    /// One message by id.
    Message(String),
    /// An explicit list of message ids.
    Messages(Vec<String>),
    /// Every unresolved failure matching a scope.
    Query(FailureScope),
}

/// Lifecycle of a retry request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    Requested,
    Staging,
    Forwarding,
    Completed,
}

/// A staged retry handed to the transport.
#[derive(Debug, Clone)]
pub struct RetryCommand {
    pub retry_id: Uuid,
    pub message_id: String,
}

/// The transport collaborator that re-sends staged messages.
#[async_trait]
pub trait RetryDispatcher: Send + Sync {
    async fn dispatch(&self, command: RetryCommand) -> Result<(), RecoverabilityError>;
}

/// Dispatcher for the in-memory deployment mode: logs the command instead
/// of forwarding it to a transport.
pub struct LoggingDispatcher;

#[async_trait]
impl RetryDispatcher for LoggingDispatcher {
    async fn dispatch(&self, command: RetryCommand) -> Result<(), RecoverabilityError> {
        info!(
            message_id = %command.message_id,
            retry_id = %command.retry_id,
            "Retry command (no transport configured)"
        );
        Ok(())
    }
}

/// Outcome summary of one retry request.
#[derive(Debug, Clone, Default)]
pub struct RetrySummary {
    pub staged: usize,
    pub dispatched: usize,
    /// Failures skipped because a retry was already issued or the record
    /// is no longer retryable.
    pub skipped: usize,
    pub dispatch_failures: usize,
}

/// Issues retries against the backend and the transport.
pub struct RetryEngine {
    backend: Arc<dyn Backend>,
    dispatcher: Arc<dyn RetryDispatcher>,
    in_flight: InFlightOperations,
    events: EventPublisher,
    page_size: usize,
}

impl RetryEngine {
    pub fn new(
        backend: Arc<dyn Backend>,
        dispatcher: Arc<dyn RetryDispatcher>,
        in_flight: InFlightOperations,
        events: EventPublisher,
        page_size: usize,
    ) -> Self {
        Self {
            backend,
            dispatcher,
            in_flight,
            events,
            page_size: page_size.max(1),
        }
    }

    /// Run one retry request to completion.
    pub async fn retry(
        &self,
        request_id: impl Into<String>,
        target: RetryTarget,
    ) -> Result<RetrySummary, RecoverabilityError> {
        let request_id = request_id.into();
        let key = OperationKey::new(OperationKind::Retry, request_id);

        // Retrying a group that is mid-archive would race the status flips
        if let RetryTarget::Query(FailureScope::Group(group_id)) = &target
            && self.in_flight.is_archiving(*group_id)
        {
            return GroupArchivingSnafu {
                group_id: group_id.to_string(),
            }
            .fail();
        }

        // One group-scoped retry per group at a time, whatever the request id
        let _group_ticket = match &target {
            RetryTarget::Query(FailureScope::Group(group_id)) => Some(
                self.in_flight
                    .try_claim(&OperationKey::new(OperationKind::Retry, group_id.to_string()))?,
            ),
            _ => None,
        };

        let _ticket = self.in_flight.try_claim(&key)?;
        debug!(key = %key, phase = ?RetryPhase::Requested, "Retry requested");

        let (total, group_title) = self.measure(&target).await?;
        let mut doc = self.load_or_start(&key, total, group_title).await?;
        self.persist(&doc).await?;
        self.events
            .publish(OperationEvent::snapshot(&doc, OperationPhase::Starting));

        let mut summary = RetrySummary::default();
        debug!(key = %key, phase = ?RetryPhase::Staging, total, "Staging retries");

        match target {
            RetryTarget::Message(id) => {
                self.stage_explicit(&[id], &mut summary).await?;
                doc.record_batch(1);
                self.persist(&doc).await?;
            }
            RetryTarget::Messages(ids) => {
                self.stage_explicit(&ids, &mut summary).await?;
                doc.record_batch(ids.len());
                self.persist(&doc).await?;
            }
            RetryTarget::Query(scope) => {
                self.stage_query(scope, &mut doc, &mut summary).await?;
            }
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
            kind: OperationKind::Retry.as_str(),
            duration: (Utc::now() - doc.started_at).to_std().unwrap_or_default(),
        });
        info!(
            key = %doc.key,
            phase = ?RetryPhase::Completed,
            staged = summary.staged,
            skipped = summary.skipped,
            "Retry request completed"
        );
        Ok(summary)
    }

    /// Total selected and, for group targets, the group title.
    async fn measure(
        &self,
        target: &RetryTarget,
    ) -> Result<(usize, Option<String>), RecoverabilityError> {
        match target {
            RetryTarget::Message(_) => Ok((1, None)),
            RetryTarget::Messages(ids) => Ok((ids.len(), None)),
            RetryTarget::Query(scope) => {
                let group_title = match scope {
                    FailureScope::Group(group_id) => {
                        let group = self
                            .backend
                            .group(*group_id)
                            .await
                            .context(RecoveryBackendSnafu)?
                            .ok_or_else(|| {
                                RecoveryNotFoundSnafu {
                                    entity: "group",
                                    id: group_id.to_string(),
                                }
                                .build()
                            })?;
                        Some(group.title)
                    }
                    _ => None,
                };
                let total = self
                    .backend
                    .count_failures(&FailureQuery::unresolved(scope.clone()))
                    .await
                    .context(RecoveryBackendSnafu)?;
                Ok((total, group_title))
            }
        }
    }

    /// Stage and dispatch an explicit id list. Unknown ids are surfaced.
    async fn stage_explicit(
        &self,
        message_ids: &[String],
        summary: &mut RetrySummary,
    ) -> Result<(), RecoverabilityError> {
        let mut commands = Vec::new();
        for message_id in message_ids {
            let retry_id = Uuid::new_v4();
            let staged = self
                .backend
                .stage_retry(message_id, retry_id)
                .await
                .map_err(|e| {
                    if e.is_not_found() {
                        RecoveryNotFoundSnafu {
                            entity: "failure",
                            id: message_id.clone(),
                        }
                        .build()
                    } else {
                        RecoveryBackendSnafu.into_error(e)
                    }
                })?;

            match staged {
                StageResult::Staged => {
                    summary.staged += 1;
                    commands.push(RetryCommand {
                        retry_id,
                        message_id: message_id.clone(),
                    });
                }
                StageResult::AlreadyIssued | StageResult::NotRetryable => {
                    debug!(%message_id, ?staged, "Retry skipped");
                    summary.skipped += 1;
                }
            }
        }

        self.forward(commands, summary).await;
        Ok(())
    }

    /// Stage and dispatch everything a query selects, page by page.
    async fn stage_query(
        &self,
        scope: FailureScope,
        doc: &mut OperationDocument,
        summary: &mut RetrySummary,
    ) -> Result<(), RecoverabilityError> {
        let query = FailureQuery::unresolved(scope);

        loop {
            // Staging flips records out of the unresolved set, so page zero
            // always holds the next unstaged slice.
            let page = self
                .backend
                .query_failure_ids(&query, PageRequest::first(self.page_size))
                .await
                .context(RecoveryBackendSnafu)?;
            if page.is_empty() {
                break;
            }

            let mut commands = Vec::with_capacity(page.len());
            for message_id in &page {
                let retry_id = Uuid::new_v4();
                match self.backend.stage_retry(message_id, retry_id).await {
                    Ok(StageResult::Staged) => {
                        summary.staged += 1;
                        commands.push(RetryCommand {
                            retry_id,
                            message_id: message_id.clone(),
                        });
                    }
                    Ok(_) => summary.skipped += 1,
                    // The record can vanish between query and stage
                    Err(e) if e.is_not_found() => summary.skipped += 1,
                    Err(e) => return Err(e).context(RecoveryBackendSnafu),
                }
            }

            let count = page.len();
            self.forward(commands, summary).await;

            doc.record_batch(count);
            self.persist(doc).await?;
            self.events
                .publish(OperationEvent::snapshot(doc, OperationPhase::BatchCompleted));
        }

        Ok(())
    }

    /// Forward staged commands to the transport. A dispatch failure leaves
    /// the record `RetryIssued` for a later sweep; it never fails the
    /// request.
    async fn forward(&self, commands: Vec<RetryCommand>, summary: &mut RetrySummary) {
        if commands.is_empty() {
            return;
        }

        let count = commands.len() as u64;
        debug!(phase = ?RetryPhase::Forwarding, count, "Forwarding staged retries");
        for command in commands {
            let message_id = command.message_id.clone();
            match self.dispatcher.dispatch(command).await {
                Ok(()) => summary.dispatched += 1,
                Err(e) => {
                    warn!(%message_id, "Retry dispatch failed: {e}");
                    summary.dispatch_failures += 1;
                }
            }
        }
        emit!(RetriesIssued { count });
    }

    /// Resume an interrupted request with the same key, or start fresh.
    /// Staging is idempotent, so re-running the remainder is safe.
    async fn load_or_start(
        &self,
        key: &OperationKey,
        total: usize,
        group_title: Option<String>,
    ) -> Result<OperationDocument, RecoverabilityError> {
        if let Some(existing) = self
            .backend
            .load_operation(key)
            .await
            .context(RecoveryBackendSnafu)?
            && !existing.is_completed()
        {
            info!(key = %key, processed = existing.processed, "Resuming interrupted retry request");
            return Ok(existing);
        }

        Ok(OperationDocument::new(
            key.clone(),
            total,
            self.page_size,
            group_title,
        ))
    }

    async fn persist(&self, doc: &OperationDocument) -> Result<(), RecoverabilityError> {
        self.backend
            .store_operation(doc)
            .await
            .context(RecoveryBackendSnafu)
    }
}
