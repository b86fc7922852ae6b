//! Integration tests for icebox

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use icebox::backend::{Backend, FailureQuery, FailureScope};
use icebox::config::Config;
use icebox::engine::Engine;
use icebox::ingest::{MessageIntent, RawTransportMessage};
use icebox::model::{FailureReason, FailureStatus, Headers, MessageKind, record_id};
use icebox::recovery::{LoggingDispatcher, OperationPhase, RetryTarget};
use icebox::MemoryBackend;

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
            stack_trace: Some("at Orders.Handler.Handle()".into()),
            queue_address: "orders".into(),
            endpoint: "sales".into(),
        }),
        ..audit_message(message_id)
    }
}

fn engine_with(
    config: &Config,
    backend: Arc<MemoryBackend>,
) -> (Engine, CancellationToken) {
    let shutdown = CancellationToken::new();
    let engine = Engine::new(
        config,
        backend,
        Arc::new(LoggingDispatcher),
        shutdown.clone(),
    );
    (engine, shutdown)
}

mod ingestion_tests {
    use super::*;

    #[tokio::test]
    async fn test_ten_thousand_messages_stored_exactly_once() {
        let config = Config::default();
        assert_eq!(config.ingestion.batch_size, 1024);
        assert_eq!(config.ingestion.batch_timeout_ms, 500);
        assert_eq!(config.ingestion.writers, 4);

        let backend = Arc::new(MemoryBackend::new(0));
        let (engine, shutdown) = engine_with(&config, backend.clone());
        let coordinator = engine.coordinator();

        for i in 0..10_000 {
            coordinator
                .ingest(audit_message(&format!("msg-{i:05}")))
                .await
                .unwrap();
        }

        shutdown.cancel();
        engine.run().await;

        assert_eq!(backend.record_count(), 10_000);
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new(0));
        let (engine, shutdown) = engine_with(&Config::default(), backend.clone());
        let coordinator = engine.coordinator();

        for _ in 0..3 {
            coordinator.ingest(audit_message("msg-1")).await.unwrap();
        }

        shutdown.cancel();
        engine.run().await;

        assert_eq!(backend.record_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_gate_stores_nothing() {
        let backend = Arc::new(MemoryBackend::new(0));
        backend.set_accepting(false);
        let (engine, shutdown) = engine_with(&Config::default(), backend.clone());
        let coordinator = engine.coordinator();

        for i in 0..10 {
            assert!(coordinator.ingest(audit_message(&format!("msg-{i}"))).await.is_err());
        }

        shutdown.cancel();
        engine.run().await;

        assert_eq!(backend.record_count(), 0);
    }

    #[tokio::test]
    async fn test_audit_and_error_paths_coexist() {
        let backend = Arc::new(MemoryBackend::new(0));
        let (engine, shutdown) = engine_with(&Config::default(), backend.clone());
        let coordinator = engine.coordinator();

        coordinator.ingest(audit_message("msg-1")).await.unwrap();
        coordinator.ingest(failed_message("msg-1")).await.unwrap();

        shutdown.cancel();
        engine.run().await;

        // Distinct records per direction, one failure record
        assert_eq!(backend.record_count(), 2);
        assert_eq!(backend.failure_count(), 1);
        let failure = backend.failure("msg-1").await.unwrap().unwrap();
        assert_eq!(failure.status, FailureStatus::Unresolved);
        assert!(!failure.group_ids.is_empty());
    }
}

mod enrichment_tests {
    use super::*;

    #[tokio::test]
    async fn test_saga_precedence_survives_the_full_pipeline() {
        let backend = Arc::new(MemoryBackend::new(0));
        let (engine, shutdown) = engine_with(&Config::default(), backend.clone());
        let coordinator = engine.coordinator();

        let mut message = audit_message("msg-1");
        message.headers.insert(
            "SagaStateChanges".into(),
            "saga-1:Updated;saga-1:New;saga-2:Updated;saga-2:Completed".into(),
        );
        coordinator.ingest(message).await.unwrap();

        shutdown.cancel();
        engine.run().await;

        let record = backend
            .record(record_id("msg-1", MessageKind::Processed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            record.metadata["InvokedSagas"].as_list(),
            Some(&["saga-1:New".to_string(), "saga-2:Completed".to_string()][..])
        );
    }

    #[tokio::test]
    async fn test_attempts_capped_at_ten() {
        let backend = Arc::new(MemoryBackend::new(0));
        let (engine, shutdown) = engine_with(&Config::default(), backend.clone());
        let coordinator = engine.coordinator();

        for _ in 0..11 {
            coordinator.ingest(failed_message("msg-1")).await.unwrap();
            // Attempts are de-duplicated by timestamp; space them out
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        shutdown.cancel();
        engine.run().await;

        let failure = backend.failure("msg-1").await.unwrap().unwrap();
        assert_eq!(failure.attempts.len(), 10);
    }
}

mod recovery_tests {
    use super::*;

    async fn seed(backend: &Arc<MemoryBackend>, config: &Config, count: usize) {
        let (engine, shutdown) = engine_with(config, backend.clone());
        let coordinator = engine.coordinator();
        for i in 0..count {
            coordinator
                .ingest(failed_message(&format!("msg-{i:04}")))
                .await
                .unwrap();
        }
        shutdown.cancel();
        engine.run().await;
    }

    #[tokio::test]
    async fn test_retry_then_successful_processing_resolves() {
        let config = Config::default();
        let backend = Arc::new(MemoryBackend::new(0));
        seed(&backend, &config, 3).await;

        let (engine, shutdown) = engine_with(&config, backend.clone());
        let summary = engine
            .retry_engine()
            .retry("req-1", RetryTarget::Query(FailureScope::All))
            .await
            .unwrap();
        assert_eq!(summary.staged, 3);

        let failure = backend.failure("msg-0000").await.unwrap().unwrap();
        assert_eq!(failure.status, FailureStatus::RetryIssued);

        // The retried message comes back around on the audit path
        let coordinator = engine.coordinator();
        coordinator.ingest(audit_message("msg-0000")).await.unwrap();
        shutdown.cancel();
        engine.run().await;

        let failure = backend.failure("msg-0000").await.unwrap().unwrap();
        assert_eq!(failure.status, FailureStatus::Resolved);
        assert!(failure.pending_retry_id.is_none());
    }

    #[tokio::test]
    async fn test_archive_group_with_monotonic_events() {
        let mut config = Config::default();
        config.recoverability.archive_batch_size = 4;
        let backend = Arc::new(MemoryBackend::new(0));
        seed(&backend, &config, 10).await;

        let (engine, shutdown) = engine_with(&config, backend.clone());
        let mut events = engine.subscribe_events();

        let failure = backend.failure("msg-0000").await.unwrap().unwrap();
        let group_id = failure.group_ids[0];

        let doc = engine.archive_engine().archive(group_id).await.unwrap();
        assert_eq!(doc.processed, 10);
        assert_eq!(doc.progress().percentage, 100.0);

        let archived = backend
            .count_failures(&FailureQuery::archived(FailureScope::Group(group_id)))
            .await
            .unwrap();
        assert_eq!(archived, 10);

        let mut last = 0.0;
        let mut saw_completed = false;
        while let Ok(event) = events.try_recv() {
            assert!(event.progress.percentage >= last);
            last = event.progress.percentage;
            if event.phase == OperationPhase::Completed {
                saw_completed = true;
                assert!(event.group_title.is_some());
            }
        }
        assert!(saw_completed);

        shutdown.cancel();
        engine.run().await;
    }

    #[tokio::test]
    async fn test_archived_failures_are_not_retryable() {
        let config = Config::default();
        let backend = Arc::new(MemoryBackend::new(0));
        seed(&backend, &config, 2).await;

        let (engine, shutdown) = engine_with(&config, backend.clone());
        let failure = backend.failure("msg-0000").await.unwrap().unwrap();
        let group_id = failure.group_ids[0];
        engine.archive_engine().archive(group_id).await.unwrap();

        let summary = engine
            .retry_engine()
            .retry(
                "req-1",
                RetryTarget::Messages(vec!["msg-0000".into(), "msg-0001".into()]),
            )
            .await
            .unwrap();
        assert_eq!(summary.staged, 0);
        assert_eq!(summary.skipped, 2);

        shutdown.cancel();
        engine.run().await;
    }
}
