//! Batch assembler.
//!
//! Collects individual ingest entries from a bounded inbound queue into
//! batches, flushing on whichever comes first: the batch reaching its maximum
//! size, or the batch timeout measured from the first entry in the batch.
//! Full batches go to a bounded handoff queue consumed by the writer pool.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::IngestionConfig;
use crate::ingest::IngestEntry;

/// Handle to the background assembler task.
pub(crate) struct Assembler {
    /// Inbound entry queue; producers await capacity here.
    pub tx: mpsc::Sender<IngestEntry>,
    handle: JoinHandle<()>,
}

impl Assembler {
    /// Spawn the assembler. Returns the handle plus the handoff receiver
    /// the writer pool consumes batches from.
    pub fn spawn(
        config: &IngestionConfig,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::Receiver<Vec<IngestEntry>>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity());
        let (batch_tx, batch_rx) = mpsc::channel(config.writers * 2);

        let handle = tokio::spawn(run_assembler(
            rx,
            batch_tx,
            config.batch_size,
            config.batch_timeout(),
            shutdown,
        ));

        (Self { tx, handle }, batch_rx)
    }

    /// Close the inbound queue and wait for the final flush.
    pub async fn finish(self) {
        drop(self.tx);
        let _ = self.handle.await;
    }
}

/// The assembly loop.
///
/// The handoff channel is closed (by dropping `batch_tx`) only after the
/// final partial batch has been sent, so the writer pool always drains
/// everything the assembler accepted.
async fn run_assembler(
    mut rx: mpsc::Receiver<IngestEntry>,
    batch_tx: mpsc::Sender<Vec<IngestEntry>>,
    batch_size: usize,
    batch_timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut batch: Vec<IngestEntry> = Vec::with_capacity(batch_size);
    let mut deadline: Option<Instant> = None;

    loop {
        // The sleep future is constructed unconditionally; the guard keeps
        // it from being polled while the batch is empty.
        let flush_at = deadline.unwrap_or_else(|| Instant::now() + batch_timeout);

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                debug!("Assembler shutdown requested, draining inbound queue");
                drain_inbound(&mut rx, &mut batch, batch_size, &batch_tx).await;
                break;
            }

            _ = tokio::time::sleep_until(flush_at), if deadline.is_some() => {
                if !flush(&mut batch, batch_size, &batch_tx).await {
                    break;
                }
                deadline = None;
            }

            entry = rx.recv() => {
                match entry {
                    Some(entry) => {
                        if batch.is_empty() {
                            deadline = Some(Instant::now() + batch_timeout);
                        }
                        batch.push(entry);
                        if batch.len() >= batch_size {
                            if !flush(&mut batch, batch_size, &batch_tx).await {
                                break;
                            }
                            deadline = None;
                        }
                    }
                    None => {
                        flush(&mut batch, batch_size, &batch_tx).await;
                        break;
                    }
                }
            }
        }
    }

    info!("Assembler finished");
}

/// Send the current batch to the handoff queue. Returns false when the
/// writer pool has gone away.
async fn flush(
    batch: &mut Vec<IngestEntry>,
    batch_size: usize,
    batch_tx: &mpsc::Sender<Vec<IngestEntry>>,
) -> bool {
    if batch.is_empty() {
        return true;
    }
    let full = std::mem::replace(batch, Vec::with_capacity(batch_size));
    batch_tx.send(full).await.is_ok()
}

/// On cancellation, drain whatever is already queued inbound so accepted
/// entries are not lost, then flush the final partial batch.
async fn drain_inbound(
    rx: &mut mpsc::Receiver<IngestEntry>,
    batch: &mut Vec<IngestEntry>,
    batch_size: usize,
    batch_tx: &mpsc::Sender<Vec<IngestEntry>>,
) {
    rx.close();
    while let Ok(entry) = rx.try_recv() {
        batch.push(entry);
        if batch.len() >= batch_size && !flush(batch, batch_size, batch_tx).await {
            return;
        }
    }
    flush(batch, batch_size, batch_tx).await;
}
