//! Batch processor: one background task per signal kind.
//!
//! The task wakes on a fixed interval, or early when the queue reports a full
//! batch, drains at most `max_export_batch_size` items and hands them to the
//! exporter under an `export_timeout` deadline. A failed batch is counted and
//! discarded; the processor never retries.
//!
//! ```text
//!   producers ──enqueue──► SignalQueue ──drain(max)──► Batch ──► Exporter
//!                              │                          ▲
//!                              └── batch_ready ──► worker ┘  (interval / flush / shutdown)
//! ```

#[cfg(debug_assertions)]
use crate::invariants::debug_assert_batch_bounded;
use crate::error::ProcessorError;
use crate::exporter::{ExportError, ExporterBoxed};
use crate::queue::SignalQueue;
use crate::signal::{Batch, SignalKind, TelemetryItem};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Batching parameters for one processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Capacity of the signal queue.
    pub max_queue_size: usize,
    /// Upper bound on items per exported batch.
    pub max_export_batch_size: usize,
    /// Period of the export timer.
    pub export_interval: Duration,
    /// Deadline applied to each export call.
    pub export_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_export_batch_size: 512,
            export_interval: Duration::from_millis(1000),
            export_timeout: Duration::from_millis(500),
        }
    }
}

impl BatchConfig {
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_max_export_batch_size(mut self, size: usize) -> Self {
        self.max_export_batch_size = size;
        self
    }

    pub fn with_export_interval(mut self, interval: Duration) -> Self {
        self.export_interval = interval;
        self
    }

    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }
}

/// Thread-safe export counters, updated by the worker and read by anyone.
#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    items_exported: AtomicU64,
    batches_exported: AtomicU64,
    batches_dropped: AtomicU64,
    items_dropped: AtomicU64,
    export_timeouts: AtomicU64,
    consecutive_failures: AtomicU64,
}

impl ProcessorMetrics {
    fn record_success(&self, item_count: u64) {
        self.items_exported.fetch_add(item_count, Ordering::Relaxed);
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self, item_count: u64, error: &ExportError) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
        self.items_dropped.fetch_add(item_count, Ordering::Relaxed);
        if matches!(error, ExportError::Timeout) {
            self.export_timeouts.fetch_add(1, Ordering::Relaxed);
        }
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn items_exported(&self) -> u64 {
        self.items_exported.load(Ordering::Relaxed)
    }

    pub fn batches_exported(&self) -> u64 {
        self.batches_exported.load(Ordering::Relaxed)
    }

    pub fn batches_dropped(&self) -> u64 {
        self.batches_dropped.load(Ordering::Relaxed)
    }

    pub fn items_dropped(&self) -> u64 {
        self.items_dropped.load(Ordering::Relaxed)
    }

    pub fn export_timeouts(&self) -> u64 {
        self.export_timeouts.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

/// Point-in-time copy of a processor's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub items_exported: u64,
    pub batches_exported: u64,
    pub batches_dropped: u64,
    pub items_dropped: u64,
    pub export_timeouts: u64,
    pub consecutive_failures: u64,
    /// Items the queue rejected on overflow or after close.
    pub queue_dropped: u64,
}

enum Command {
    Flush(oneshot::Sender<()>),
}

struct Control {
    commands: mpsc::Sender<Command>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Exports one signal kind's queue in bounded batches.
pub struct BatchProcessor {
    kind: SignalKind,
    config: BatchConfig,
    queue: Arc<SignalQueue<TelemetryItem>>,
    metrics: Arc<ProcessorMetrics>,
    /// Items drained but not yet acknowledged by the exporter.
    inflight: Arc<AtomicUsize>,
    control: Mutex<Option<Control>>,
}

impl BatchProcessor {
    /// Creates the queue and spawns the worker on the current tokio runtime.
    pub fn new(
        kind: SignalKind,
        config: BatchConfig,
        exporter: Arc<dyn ExporterBoxed>,
    ) -> Result<Self, ProcessorError> {
        let handle =
            tokio::runtime::Handle::try_current().map_err(|_| ProcessorError::NoRuntime(kind))?;

        let queue = Arc::new(SignalQueue::with_batch_threshold(
            config.max_queue_size,
            config.max_export_batch_size,
        ));
        let metrics = Arc::new(ProcessorMetrics::default());
        let inflight = Arc::new(AtomicUsize::new(0));

        let (command_tx, command_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = Worker {
            kind,
            queue: Arc::clone(&queue),
            exporter,
            metrics: Arc::clone(&metrics),
            inflight: Arc::clone(&inflight),
            max_batch: config.max_export_batch_size.max(1),
            export_timeout: config.export_timeout,
        };
        let task = handle.spawn(worker.run(config.export_interval, command_rx, shutdown_rx));

        Ok(Self {
            kind,
            config,
            queue,
            metrics,
            inflight,
            control: Mutex::new(Some(Control {
                commands: command_tx,
                shutdown_tx,
                task,
            })),
        })
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// The queue producers enqueue into.
    pub fn queue(&self) -> &Arc<SignalQueue<TelemetryItem>> {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<ProcessorMetrics> {
        &self.metrics
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_exported: self.metrics.items_exported(),
            batches_exported: self.metrics.batches_exported(),
            batches_dropped: self.metrics.batches_dropped(),
            items_dropped: self.metrics.items_dropped(),
            export_timeouts: self.metrics.export_timeouts(),
            consecutive_failures: self.metrics.consecutive_failures(),
            queue_dropped: self.queue.dropped_count(),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock_control().is_none()
    }

    fn lock_control(&self) -> std::sync::MutexGuard<'_, Option<Control>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exports everything queued right now and waits for it, up to `timeout`.
    pub async fn force_flush(&self, timeout: Duration) -> Result<(), ProcessorError> {
        let commands = match self.lock_control().as_ref() {
            Some(control) => control.commands.clone(),
            None => return Err(ProcessorError::ShutDown(self.kind)),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let flushed = async {
            commands
                .send(Command::Flush(reply_tx))
                .await
                .map_err(|_| ProcessorError::ShutDown(self.kind))?;
            reply_rx.await.map_err(|_| ProcessorError::ShutDown(self.kind))
        };

        tokio::time::timeout(timeout, flushed)
            .await
            .map_err(|_| ProcessorError::FlushTimeout(self.kind))?
    }

    /// Stops the timer and exports what is left, giving up after `deadline`.
    ///
    /// Only the first call does any work; later calls return `Ok(())`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ProcessorError> {
        let Some(control) = self.lock_control().take() else {
            return Ok(());
        };

        self.queue.close();
        let _ = control.shutdown_tx.send(());
        drop(control.commands);

        let mut task = control.task;
        let outcome = tokio::time::timeout(deadline, &mut task).await;
        let finished = match outcome {
            Ok(Ok(())) => true,
            Ok(Err(join_error)) => {
                tracing::error!(signal = %self.kind, error = %join_error, "processor task failed");
                false
            }
            Err(_) => {
                task.abort();
                // the worker may be mid-poll on another thread; wait for it to stop
                let _ = task.await;
                false
            }
        };

        let lost = self.queue.pending(&self.inflight);
        if finished && lost == 0 {
            tracing::debug!(signal = %self.kind, "processor shut down");
            return Ok(());
        }

        tracing::warn!(
            signal = %self.kind,
            lost,
            deadline_ms = deadline.as_millis() as u64,
            "processor shutdown did not complete, items were not exported"
        );
        Err(ProcessorError::ShutdownTimeout {
            signal: self.kind,
            lost,
        })
    }
}

impl Drop for BatchProcessor {
    fn drop(&mut self) {
        let control = self
            .control
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(control) = control {
            control.task.abort();
        }
    }
}

/// State owned by the background task.
struct Worker {
    kind: SignalKind,
    queue: Arc<SignalQueue<TelemetryItem>>,
    exporter: Arc<dyn ExporterBoxed>,
    metrics: Arc<ProcessorMetrics>,
    inflight: Arc<AtomicUsize>,
    max_batch: usize,
    export_timeout: Duration,
}

impl Worker {
    async fn run(
        self,
        interval: Duration,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        // first tick one full interval from now, not immediately
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_rx => {
                    self.export_all().await;
                    break;
                }

                Some(command) = commands.recv() => match command {
                    Command::Flush(reply) => {
                        self.export_all().await;
                        let _ = reply.send(());
                    }
                },

                _ = ticker.tick() => {
                    self.export_one().await;
                    self.export_full_batches().await;
                }

                _ = self.queue.batch_ready() => {
                    self.export_full_batches().await;
                }
            }
        }
    }

    async fn export_full_batches(&self) {
        while self.queue.len() >= self.max_batch {
            if self.export_one().await == 0 {
                break;
            }
        }
    }

    async fn export_all(&self) {
        while self.export_one().await > 0 {}
    }

    /// Drains and exports at most one batch; returns how many items it took.
    async fn export_one(&self) -> usize {
        let items = self.queue.drain_tracked(self.max_batch, &self.inflight);
        let count = items.len();
        if count == 0 {
            return 0;
        }

        #[cfg(debug_assertions)]
        debug_assert_batch_bounded!(count, self.max_batch);

        let batch = Batch::new(self.kind, items);
        let result =
            match tokio::time::timeout(self.export_timeout, self.exporter.export_boxed(batch)).await
            {
                Ok(result) => result,
                Err(_) => Err(ExportError::Timeout),
            };
        self.inflight.store(0, Ordering::Relaxed);

        match result {
            Ok(()) => self.metrics.record_success(count as u64),
            Err(error) => {
                self.metrics.record_failure(count as u64, &error);
                tracing::warn!(
                    signal = %self.kind,
                    exporter = self.exporter.name(),
                    items = count,
                    consecutive_failures = self.metrics.consecutive_failures(),
                    error = %error,
                    "export failed, batch dropped"
                );
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::{SlowExporter, TestExporter};
    use crate::signal::{Span, SpanKind};

    fn span(i: u64) -> TelemetryItem {
        Span::new(7, i + 1, 0, format!("op-{}", i), SpanKind::Internal).into()
    }

    fn config(batch: usize, interval: Duration) -> BatchConfig {
        BatchConfig::default()
            .with_max_queue_size(64)
            .with_max_export_batch_size(batch)
            .with_export_interval(interval)
    }

    #[tokio::test]
    async fn test_exports_on_interval() {
        let exporter = Arc::new(TestExporter::new());
        let processor = BatchProcessor::new(
            SignalKind::Traces,
            config(512, Duration::from_millis(50)),
            exporter.clone(),
        )
        .unwrap();

        for i in 0..10 {
            processor.queue().enqueue(span(i)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(exporter.exported_count(), 10);
        assert_eq!(processor.snapshot().batches_exported, 1);
        processor.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_full_batch_flushes_early_and_bounded() {
        let exporter = Arc::new(TestExporter::new());
        let processor = BatchProcessor::new(
            SignalKind::Traces,
            config(4, Duration::from_secs(60)),
            exporter.clone(),
        )
        .unwrap();

        for i in 0..10 {
            processor.queue().enqueue(span(i)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(exporter.batch_sizes(), vec![4, 4]);

        processor.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(exporter.batch_sizes(), vec![4, 4, 2]);

        let ids: Vec<u64> = exporter
            .all_items()
            .iter()
            .map(|item| match item {
                TelemetryItem::Span(s) => s.span_id,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_slow_export_times_out_without_retry() {
        let exporter = Arc::new(SlowExporter::new(Duration::from_millis(500)));
        let processor = BatchProcessor::new(
            SignalKind::Traces,
            config(512, Duration::from_secs(60)).with_export_timeout(Duration::from_millis(50)),
            exporter.clone(),
        )
        .unwrap();

        processor.queue().enqueue(span(0)).unwrap();
        processor.force_flush(Duration::from_secs(1)).await.unwrap();

        let snapshot = processor.snapshot();
        assert_eq!(snapshot.batches_dropped, 1);
        assert_eq!(snapshot.items_dropped, 1);
        assert_eq!(snapshot.export_timeouts, 1);
        assert_eq!(snapshot.consecutive_failures, 1);
        assert_eq!(snapshot.items_exported, 0);
        assert_eq!(exporter.attempts(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let exporter = Arc::new(TestExporter::new());
        let processor = BatchProcessor::new(
            SignalKind::Traces,
            config(512, Duration::from_secs(60)),
            exporter.clone(),
        )
        .unwrap();

        for i in 0..3 {
            processor.queue().enqueue(span(i)).unwrap();
        }
        processor.shutdown(Duration::from_secs(1)).await.unwrap();
        processor.shutdown(Duration::from_secs(1)).await.unwrap();

        assert_eq!(exporter.batch_sizes(), vec![3]);
        assert!(processor.is_shutdown());
        assert!(processor.queue().enqueue(span(9)).is_err());
        assert_eq!(
            processor.force_flush(Duration::from_secs(1)).await,
            Err(ProcessorError::ShutDown(SignalKind::Traces))
        );
    }

    #[tokio::test]
    async fn test_shutdown_deadline_counts_lost_items() {
        let exporter = Arc::new(SlowExporter::new(Duration::from_secs(5)));
        let processor = BatchProcessor::new(
            SignalKind::Traces,
            config(512, Duration::from_secs(60)).with_export_timeout(Duration::from_secs(10)),
            exporter,
        )
        .unwrap();

        for i in 0..3 {
            processor.queue().enqueue(span(i)).unwrap();
        }
        let result = processor.shutdown(Duration::from_millis(50)).await;

        assert_eq!(
            result,
            Err(ProcessorError::ShutdownTimeout {
                signal: SignalKind::Traces,
                lost: 3
            })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lost_count_includes_batch_in_flight_on_worker_thread() {
        let exporter = Arc::new(SlowExporter::new(Duration::from_secs(5)));
        let processor = BatchProcessor::new(
            SignalKind::Traces,
            config(2, Duration::from_secs(60)).with_export_timeout(Duration::from_secs(10)),
            exporter.clone(),
        )
        .unwrap();

        for i in 0..9 {
            processor.queue().enqueue(span(i)).unwrap();
        }
        let result = processor.shutdown(Duration::from_millis(100)).await;

        // every item is either still queued or inside the abandoned export
        assert_eq!(
            result,
            Err(ProcessorError::ShutdownTimeout {
                signal: SignalKind::Traces,
                lost: 9
            })
        );
        assert_eq!(exporter.attempts(), 1);
    }

    #[test]
    fn test_requires_runtime() {
        let result = BatchProcessor::new(
            SignalKind::Traces,
            BatchConfig::default(),
            Arc::new(TestExporter::new()),
        );
        assert!(matches!(result, Err(ProcessorError::NoRuntime(SignalKind::Traces))));
    }
}
