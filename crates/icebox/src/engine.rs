//! Engine composition.
//!
//! Wires the ingestion pipeline (assembler, writer pool, coordinator), the
//! recoverability engines, and the background capacity/retention loops under
//! one cancellation token. Cancelling the token drains the pipeline: the
//! assembler flushes its final partial batch and closes the handoff queue,
//! and the writers exit after committing everything handed off.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::body::BodyStore;
use crate::config::Config;
use crate::enrich::default_enrichers;
use crate::ingest::{Assembler, IngestCoordinator, WriterPool};
use crate::recovery::{
    ArchiveEngine, EventPublisher, InFlightOperations, OperationEvent, RetryDispatcher,
    RetryEngine, default_groupers,
};

/// The assembled audit/error store engine.
pub struct Engine {
    coordinator: Arc<IngestCoordinator>,
    retry: Arc<RetryEngine>,
    archive: Arc<ArchiveEngine>,
    events: EventPublisher,
    assembler: Assembler,
    writers: WriterPool,
    background: JoinSet<()>,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(
        config: &Config,
        backend: Arc<dyn Backend>,
        dispatcher: Arc<dyn RetryDispatcher>,
        shutdown: CancellationToken,
    ) -> Self {
        let (assembler, batch_rx) = Assembler::spawn(&config.ingestion, shutdown.clone());
        let writers = WriterPool::spawn(backend.clone(), batch_rx, &config.ingestion);

        let coordinator = Arc::new(IngestCoordinator::new(
            backend.clone(),
            BodyStore::new(backend.clone(), config.body.clone()),
            default_enrichers(),
            default_groupers(),
            config.retention.clone(),
            assembler.tx.clone(),
        ));

        let events = EventPublisher::new(config.recoverability.event_channel_capacity);
        let in_flight = InFlightOperations::new();
        let retry = Arc::new(RetryEngine::new(
            backend.clone(),
            dispatcher,
            in_flight.clone(),
            events.clone(),
            config.recoverability.retry_page_size,
        ));
        let archive = Arc::new(ArchiveEngine::new(
            backend.clone(),
            in_flight,
            events.clone(),
            config.recoverability.archive_batch_size,
        ));

        let mut background = JoinSet::new();
        background.spawn(run_capacity_refresher(
            backend.clone(),
            coordinator.clone(),
            config.capacity.check_interval(),
            shutdown.clone(),
        ));
        background.spawn(run_retention_sweep(
            backend,
            config.retention.purge_interval(),
            shutdown.clone(),
        ));

        Self {
            coordinator,
            retry,
            archive,
            events,
            assembler,
            writers,
            background,
            shutdown,
        }
    }

    /// The ingestion entry point for transport consumers.
    pub fn coordinator(&self) -> Arc<IngestCoordinator> {
        self.coordinator.clone()
    }

    pub fn retry_engine(&self) -> Arc<RetryEngine> {
        self.retry.clone()
    }

    pub fn archive_engine(&self) -> Arc<ArchiveEngine> {
        self.archive.clone()
    }

    /// Subscribe to recoverability operation events.
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<OperationEvent> {
        self.events.subscribe()
    }

    /// Run until the shutdown token fires, then drain and stop.
    pub async fn run(mut self) {
        info!("Engine started");
        self.shutdown.cancelled().await;

        info!("Shutdown requested, draining ingestion pipeline");
        self.assembler.finish().await;
        self.writers.finish().await;
        while self.background.join_next().await.is_some() {}
        info!("Engine stopped");
    }
}

/// Recompute the capacity gate on a fixed interval and re-publish the flow
/// signal when it flips.
async fn run_capacity_refresher(
    backend: Arc<dyn Backend>,
    coordinator: Arc<IngestCoordinator>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            _ = ticker.tick() => {
                if let Err(e) = backend.refresh_capacity().await {
                    warn!("Capacity refresh failed: {e}");
                    continue;
                }
                coordinator.refresh_flow();
            }
        }
    }
}

/// Remove expired entities on a fixed interval.
async fn run_retention_sweep(
    backend: Arc<dyn Backend>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so startup is not a sweep
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            _ = ticker.tick() => {
                match backend.purge_expired(Utc::now()).await {
                    Ok(purged) if purged > 0 => info!(purged, "Retention sweep complete"),
                    Ok(_) => {}
                    Err(e) => warn!("Retention sweep failed: {e}"),
                }
            }
        }
    }
}
