//! Batch writer pool.
//!
//! A fixed pool of workers pulls assembled batches from the shared handoff
//! queue and commits each through a backend unit of work. Transient commit
//! failures retry with exponential backoff before the batch counts as
//! failed. Workers run until the handoff queue is closed and drained, so
//! graceful shutdown is driven by the assembler closing the channel.

use snafu::ResultExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use icebox_core::emit;
use icebox_core::metrics::events::{BatchCommitted, BatchFailed, ConsecutiveBatchFailures};

use crate::backend::Backend;
use crate::config::IngestionConfig;
use crate::error::{CommitRetriesExhaustedSnafu, IngestError};
use crate::ingest::IngestEntry;

/// Consecutive batch-failure counter shared by the pool.
///
/// Reset on any successful commit; the current value is exported as a gauge
/// for external alerting.
#[derive(Default)]
pub(crate) struct BatchFailureCounter {
    consecutive: AtomicU64,
}

impl BatchFailureCounter {
    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::Relaxed);
        emit!(ConsecutiveBatchFailures { count: 0 });
    }

    pub fn record_failure(&self) -> u64 {
        let count = self.consecutive.fetch_add(1, Ordering::Relaxed) + 1;
        emit!(ConsecutiveBatchFailures { count });
        count
    }
}

/// The writer pool; finished when the handoff queue closes.
pub(crate) struct WriterPool {
    workers: JoinSet<()>,
}

impl WriterPool {
    pub fn spawn(
        backend: Arc<dyn Backend>,
        batch_rx: mpsc::Receiver<Vec<IngestEntry>>,
        config: &IngestionConfig,
    ) -> Self {
        let batch_rx = Arc::new(Mutex::new(batch_rx));
        let failures = Arc::new(BatchFailureCounter::default());
        let mut workers = JoinSet::new();

        for worker in 0..config.writers {
            workers.spawn(run_writer(
                worker,
                backend.clone(),
                batch_rx.clone(),
                config.clone(),
                failures.clone(),
            ));
        }

        Self { workers }
    }

    /// Wait for every worker to drain and exit.
    pub async fn finish(mut self) {
        while self.workers.join_next().await.is_some() {}
    }
}

async fn run_writer(
    worker: usize,
    backend: Arc<dyn Backend>,
    batch_rx: Arc<Mutex<mpsc::Receiver<Vec<IngestEntry>>>>,
    config: IngestionConfig,
    failures: Arc<BatchFailureCounter>,
) {
    loop {
        // Hold the lock only while waiting for the next batch, never across
        // a commit.
        let batch = { batch_rx.lock().await.recv().await };
        let Some(batch) = batch else {
            debug!(worker, "Handoff queue closed, writer exiting");
            break;
        };

        let size = batch.len();
        match commit_with_retry(&*backend, batch, &config).await {
            Ok(()) => {
                failures.record_success();
            }
            Err(e) => {
                let consecutive = failures.record_failure();
                error!(worker, size, consecutive, "Batch commit failed: {e}");
                emit!(BatchFailed { size });
            }
        }
    }
}

/// Commit one batch, retrying transient backend failures with exponential
/// backoff up to the configured attempt limit.
async fn commit_with_retry(
    backend: &dyn Backend,
    batch: Vec<IngestEntry>,
    config: &IngestionConfig,
) -> Result<(), IngestError> {
    let capacity = config.batch_size;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let started = Instant::now();

        match commit_once(backend, &batch).await {
            Ok(()) => {
                emit!(BatchCommitted {
                    size: batch.len(),
                    capacity,
                    duration: started.elapsed(),
                });
                return Ok(());
            }
            Err(source) if source.is_transient() && attempt < config.commit_retry_limit => {
                let delay = config.commit_retry_base() * 2u32.saturating_pow(attempt - 1);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient commit failure, retrying: {source}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(source) => {
                return Err(source).context(CommitRetriesExhaustedSnafu { attempts: attempt });
            }
        }
    }
}

async fn commit_once(
    backend: &dyn Backend,
    batch: &[IngestEntry],
) -> Result<(), crate::error::BackendError> {
    let mut uow = backend.begin_unit_of_work(batch.len()).await?;

    for entry in batch {
        uow.record_message(entry.record.clone());
        if let Some(envelope) = &entry.failure {
            uow.record_failure_attempt(envelope.clone());
        }
        for snapshot in &entry.snapshots {
            uow.record_snapshot(snapshot.clone());
        }
    }

    uow.commit().await
}
