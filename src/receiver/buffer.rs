//! Ingestion buffer and writer loop.
//!
//! Receivers hand converted batches to a bounded queue and return at once. A
//! single writer task drains the queue, coalesces batches up to
//! `max_batch_size`, and writes them through the storage contracts with a
//! bounded fixed-backoff retry. A batch that still fails is dropped, logged
//! and counted.

use crate::core::config::IngestConfig;
use crate::core::retry::{retry_with_config, RetryConfig};
use crate::core::{LanternError, Result, Span};
use crate::metrics::{MetricMetadata, TimeSeries};
use crate::receiver::metrics::ConvertedMetrics;
use crate::storage::Storage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One unit accepted from a receiver.
#[derive(Debug)]
pub enum IngestBatch {
    Spans(Vec<Span>),
    Metrics(ConvertedMetrics),
}

/// Counters shared by the queue handles and the writer.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub accepted_batches: AtomicU64,
    pub rejected_batches: AtomicU64,
    pub written_spans: AtomicU64,
    pub written_series: AtomicU64,
    pub dropped_batches: AtomicU64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            accepted_batches: self.accepted_batches.load(Ordering::Relaxed),
            rejected_batches: self.rejected_batches.load(Ordering::Relaxed),
            written_spans: self.written_spans.load(Ordering::Relaxed),
            written_series: self.written_series.load(Ordering::Relaxed),
            dropped_batches: self.dropped_batches.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    pub accepted_batches: u64,
    pub rejected_batches: u64,
    pub written_spans: u64,
    pub written_series: u64,
    pub dropped_batches: u64,
}

/// Producer side of the ingestion buffer.
#[derive(Clone)]
pub struct IngestQueue {
    sender: mpsc::Sender<IngestBatch>,
    stats: Arc<IngestStats>,
}

impl IngestQueue {
    /// Enqueues without waiting. A full buffer is reported as
    /// [`LanternError::BufferFull`] so the caller can push back.
    pub fn try_push(&self, batch: IngestBatch) -> Result<()> {
        match self.sender.try_send(batch) {
            Ok(()) => {
                self.stats.accepted_batches.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(TrySendError::Full(_)) => {
                self.stats.rejected_batches.fetch_add(1, Ordering::Relaxed);
                Err(LanternError::BufferFull)
            },
            Err(TrySendError::Closed(_)) => Err(LanternError::BufferClosed),
        }
    }

    pub fn push_spans(&self, spans: Vec<Span>) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }
        self.try_push(IngestBatch::Spans(spans))
    }

    pub fn push_metrics(&self, metrics: ConvertedMetrics) -> Result<()> {
        if metrics.series.is_empty() && metrics.metadata.is_empty() {
            return Ok(());
        }
        self.try_push(IngestBatch::Metrics(metrics))
    }

    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Batches waiting to be written.
#[derive(Default)]
struct Pending {
    spans: Vec<Span>,
    series: Vec<TimeSeries>,
    metadata: Vec<MetricMetadata>,
}

impl Pending {
    fn add(&mut self, batch: IngestBatch) {
        match batch {
            IngestBatch::Spans(spans) => self.spans.extend(spans),
            IngestBatch::Metrics(metrics) => {
                self.series.extend(metrics.series);
                self.metadata.extend(metrics.metadata);
            },
        }
    }

    fn len(&self) -> usize {
        self.spans.len() + self.series.len()
    }

    fn is_empty(&self) -> bool {
        self.spans.is_empty() && self.series.is_empty() && self.metadata.is_empty()
    }
}

struct Writer {
    storage: Storage,
    retry: RetryConfig,
    stats: Arc<IngestStats>,
    // Writes keep going during shutdown; only the loop watches the caller's
    // token.
    write_token: CancellationToken,
}

impl Writer {
    async fn flush(&self, pending: &mut Pending) {
        let Pending {
            spans,
            series,
            metadata,
        } = std::mem::take(pending);

        if !spans.is_empty() {
            let writer = &self.storage.span_writer;
            let result =
                retry_with_config(&self.retry, || writer.write(&spans, &self.write_token)).await;
            self.record("spans", spans.len(), &self.stats.written_spans, result);
        }
        if !series.is_empty() {
            let writer = &self.storage.series_writer;
            let result =
                retry_with_config(&self.retry, || writer.write(&series, &self.write_token)).await;
            self.record("series", series.len(), &self.stats.written_series, result);
        }
        if !metadata.is_empty() {
            let writer = &self.storage.metadata_writer;
            let result =
                retry_with_config(&self.retry, || writer.write(&metadata, &self.write_token)).await;
            if let Err(e) = result {
                tracing::error!("Dropping {} metric metadata records: {}", metadata.len(), e);
                self.stats.dropped_batches.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn record(&self, what: &str, count: usize, written: &AtomicU64, result: Result<()>) {
        match result {
            Ok(()) => {
                tracing::debug!("Wrote {} {}", count, what);
                written.fetch_add(count as u64, Ordering::Relaxed);
            },
            Err(e) => {
                tracing::error!("Dropping batch of {} {} after retries: {}", count, what, e);
                self.stats.dropped_batches.fetch_add(1, Ordering::Relaxed);
            },
        }
    }
}

/// Starts the writer task. The task drains and flushes what is left once
/// `shutdown` is cancelled or every queue handle is dropped.
pub fn spawn_writer(
    storage: Storage,
    config: &IngestConfig,
    shutdown: CancellationToken,
) -> (IngestQueue, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel(config.buffer_capacity.max(1));
    let stats = Arc::new(IngestStats::default());
    let writer = Writer {
        storage,
        retry: RetryConfig {
            max_attempts: config.retry_attempts,
            backoff: config.retry_backoff,
        },
        stats: Arc::clone(&stats),
        write_token: CancellationToken::new(),
    };
    let max_batch = config.max_batch_size.max(1);
    let flush_interval = if config.flush_interval.is_zero() {
        Duration::from_millis(1)
    } else {
        config.flush_interval
    };

    let handle = tokio::spawn(async move {
        let mut pending = Pending::default();
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                batch = receiver.recv() => match batch {
                    Some(batch) => {
                        pending.add(batch);
                        if pending.len() >= max_batch {
                            writer.flush(&mut pending).await;
                        }
                    },
                    None => break,
                },
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        writer.flush(&mut pending).await;
                    }
                },
                _ = shutdown.cancelled() => {
                    receiver.close();
                    while let Some(batch) = receiver.recv().await {
                        pending.add(batch);
                    }
                    break;
                },
            }
        }

        if !pending.is_empty() {
            writer.flush(&mut pending).await;
        }
        tracing::info!("Ingestion writer stopped");
    });

    (IngestQueue { sender, stats }, handle)
}
